//! Awaiting events from async code with a dispatcher thread driving the
//! scheduler.

use std::time::Duration;

use clevent::prelude::*;

fn scheduler() -> EventScheduler {
    EventScheduler::new(SchedulerConfig::for_testing()).expect("Failed to create scheduler")
}

fn platform(scheduler: EventScheduler) -> Platform {
    Platform::builder()
        .backend(Backend::Cpu)
        .scheduler(scheduler)
        .build()
        .expect("Failed to create platform")
}

fn counter_program() -> CpuProgram {
    CpuProgram::new()
        .kernel("count", &[ParamKind::Buffer], |launch| {
            let values: Vec<u32> = launch.read(0)?;
            launch.write(0, &[values[0] + 1])
        })
        .kernel("fail", &[], |_| Err(status::OUT_OF_HOST_MEMORY))
}

/// An awaited dispatch completes once the dispatcher resolves it.
#[tokio::test]
async fn test_completion_future() {
    let scheduler = scheduler();
    let dispatcher = scheduler.spawn_dispatcher().expect("Failed to spawn dispatcher");
    let platform = platform(scheduler);
    let device = platform.default_device().expect("No device");
    let program = platform.build_program(counter_program());
    let buffer = platform.create_buffer(4);

    let mut kernel = program.kernel("count").expect("Failed to create kernel");
    kernel.bind_buffer(0, &buffer).expect("Failed to bind buffer");
    kernel.set_global_work_size(1, 0, 0);

    let first = kernel.run_async(device, &[]);
    let second = kernel.run_async(device, &[first.clone()]);

    tokio::time::timeout(Duration::from_secs(5), second.completion())
        .await
        .expect("Timed out")
        .expect("Dispatch failed");
    assert!(first.is_resolved());

    let contents = platform
        .cpu()
        .driver()
        .buffer_contents(buffer.native_handle())
        .expect("Buffer released");
    assert_eq!(contents, 2u32.to_le_bytes().to_vec());

    dispatcher.shutdown();
}

/// Failures surface through the awaited outcome.
#[tokio::test]
async fn test_completion_failure() {
    let scheduler = scheduler();
    let dispatcher = scheduler.spawn_dispatcher().expect("Failed to spawn dispatcher");
    let platform = platform(scheduler);
    let device = platform.default_device().expect("No device");
    let program = platform.build_program(counter_program());

    let mut kernel = program.kernel("fail").expect("Failed to create kernel");
    kernel.set_global_work_size(1, 0, 0);

    let event = kernel.run_async(device, &[]);
    let outcome = tokio::time::timeout(Duration::from_secs(5), event.completion())
        .await
        .expect("Timed out");
    assert_eq!(outcome, Err(CleventError::native(status::OUT_OF_HOST_MEMORY)));

    dispatcher.shutdown();
}

/// Awaiting an event that was never enqueued returns its error at once.
#[tokio::test]
async fn test_completion_of_prefailed_event() {
    let scheduler = scheduler();
    let dispatcher = scheduler.spawn_dispatcher().expect("Failed to spawn dispatcher");
    let platform = Platform::builder()
        .without_default_queue()
        .scheduler(scheduler)
        .build()
        .expect("Failed to create platform");
    let device = platform.default_device().expect("No device");
    let program = platform.build_program(counter_program());
    let kernel = program.kernel("fail").expect("Failed to create kernel");

    let outcome = kernel.run_async(device, &[]).completion().await;
    assert_eq!(outcome, Err(CleventError::no_queue("cpu0")));

    dispatcher.shutdown();
}
