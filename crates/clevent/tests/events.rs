//! Event resolution, chaining and continuations on the CPU backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clevent::prelude::*;
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

fn scheduler() -> EventScheduler {
    EventScheduler::new(SchedulerConfig::for_testing()).expect("Failed to create scheduler")
}

fn platform(mode: QueueMode) -> Platform {
    Platform::builder()
        .backend(Backend::Cpu)
        .queue_mode(mode)
        .scheduler(scheduler())
        .build()
        .expect("Failed to create platform")
}

/// Program with a `gate` kernel that blocks until the returned sender fires
/// and an `increment` kernel that adds one to the first u32 of its buffer.
fn gated_program() -> (CpuProgram, Sender<()>) {
    let (open, gate) = channel::unbounded::<()>();
    let program = CpuProgram::new()
        .kernel("gate", &[ParamKind::Buffer], move |launch| {
            gate.recv().map_err(|_| status::OUT_OF_RESOURCES)?;
            launch.write(0, &[1u32])
        })
        .kernel("increment", &[ParamKind::Buffer], |launch| {
            let values: Vec<u32> = launch.read(0)?;
            launch.write(0, &[values[0] + 1])
        })
        .kernel("fail", &[], |_| Err(status::OUT_OF_RESOURCES));
    (program, open)
}

fn kernel(program: &Program, name: &str, buffer: Option<&Buffer>) -> Kernel {
    let mut kernel = program.kernel(name).expect("Failed to create kernel");
    if let Some(buffer) = buffer {
        kernel.bind_buffer(0, buffer).expect("Failed to bind buffer");
    }
    kernel.set_global_work_size(1, 0, 0);
    kernel
}

fn first_u32(platform: &Platform, buffer: &Buffer) -> u32 {
    let bytes = platform
        .cpu()
        .driver()
        .buffer_contents(buffer.native_handle())
        .expect("Buffer released");
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn dependent_waits_for_upstream(mode: QueueMode) {
    let platform = platform(mode);
    let device = platform.default_device().expect("No device");
    let (program, open) = gated_program();
    let program = platform.build_program(program);
    let buffer = platform.create_buffer(4);

    let gate = kernel(&program, "gate", Some(&buffer));
    let increment = kernel(&program, "increment", Some(&buffer));

    let e1 = gate.run_async(device, &[]);
    let e2 = increment.run_async(device, &[e1.clone()]);
    assert_eq!(e2.dependencies(), vec![e1.clone()]);

    let order = Arc::new(Mutex::new(Vec::new()));
    for (label, event) in [("e1", &e1), ("e2", &e2)] {
        let order = Arc::clone(&order);
        event.then(move |_, _| order.lock().push(label));
    }

    for _ in 0..5 {
        platform.scheduler().dispatch_pending();
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(!e1.is_resolved());
    assert!(!e2.is_resolved());

    open.send(()).expect("Gate kernel gone");
    platform
        .scheduler()
        .run_until_resolved(&e2)
        .expect("Dependent dispatch failed");
    assert!(e1.is_resolved());

    while order.lock().len() < 2 {
        platform.scheduler().dispatch_pending();
    }
    assert_eq!(*order.lock(), vec!["e1", "e2"]);
    assert_eq!(first_u32(&platform, &buffer), 2);
}

/// A dependent dispatch on an in-order queue resolves after its upstream.
#[test]
fn test_dependent_in_order() {
    dependent_waits_for_upstream(QueueMode::InOrder);
}

/// Same ordering holds when the queue itself does not serialize commands.
#[test]
fn test_dependent_out_of_order() {
    dependent_waits_for_upstream(QueueMode::OutOfOrder);
}

/// A chain of dependent dispatches on an out-of-order queue runs in chain
/// order.
#[test]
fn test_long_chain_out_of_order() {
    let platform = platform(QueueMode::OutOfOrder);
    let device = platform.default_device().expect("No device");
    let (program, _open) = gated_program();
    let program = platform.build_program(program);
    let buffer = platform.create_buffer(4);
    let increment = kernel(&program, "increment", Some(&buffer));

    let mut last = increment.run_async(device, &[]);
    let mut chain = vec![last.clone()];
    for _ in 1..16 {
        last = increment.run_async(device, &[last]);
        chain.push(last.clone());
    }

    platform
        .scheduler()
        .run_until_resolved(&last)
        .expect("Chain failed");
    assert!(chain.iter().all(Event::is_resolved));
    assert_eq!(first_u32(&platform, &buffer), 16);
}

/// A failed upstream fails its dependents with the wait-list status.
#[test]
fn test_upstream_failure_propagates() {
    let platform = platform(QueueMode::OutOfOrder);
    let device = platform.default_device().expect("No device");
    let (program, _open) = gated_program();
    let program = platform.build_program(program);
    let buffer = platform.create_buffer(4);

    let fail = kernel(&program, "fail", None);
    let increment = kernel(&program, "increment", Some(&buffer));

    let e1 = fail.run_async(device, &[]);
    let e2 = increment.run_async(device, &[e1.clone()]);

    let err = platform.scheduler().run_until_resolved(&e2).unwrap_err();
    assert_eq!(
        err,
        CleventError::native(status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
    );
    assert_eq!(
        e1.outcome(),
        Some(Err(CleventError::native(status::OUT_OF_RESOURCES)))
    );
    assert_eq!(first_u32(&platform, &buffer), 0);
}

/// Without a default queue, asynchronous dispatch hands back an event that
/// is already failed and cannot be resolved again.
#[test]
fn test_run_async_without_queue() {
    let platform = Platform::builder()
        .without_default_queue()
        .scheduler(scheduler())
        .build()
        .expect("Failed to create platform");
    let device = platform.default_device().expect("No device");
    let (program, _open) = gated_program();
    let program = platform.build_program(program);
    let increment = kernel(&program, "increment", None);

    let event = increment.run_async(device, &[]);
    assert!(event.is_resolved());
    assert!(event.queue().is_none());
    assert!(!event.has_native_handle());
    assert_eq!(event.outcome(), Some(Err(CleventError::no_queue("cpu0"))));

    let err = event.resolve(Ok(())).unwrap_err();
    assert!(matches!(err, CleventError::DoubleResolution { .. }));
    assert!(err.is_programming_error());

    assert_eq!(event.wait_sync(), Err(CleventError::no_queue("cpu0")));
}

/// A pre-failed event in a wait list does not block the dispatch.
#[test]
fn test_failed_event_in_wait_list() {
    let platform = platform(QueueMode::InOrder);
    let device = platform.default_device().expect("No device");
    let (program, _open) = gated_program();
    let program = platform.build_program(program);
    let buffer = platform.create_buffer(4);
    let increment = kernel(&program, "increment", Some(&buffer));

    let failed = Event::failed(platform.scheduler(), None, CleventError::no_queue("elsewhere"));
    let event = increment.run_async(device, &[failed]);

    platform
        .scheduler()
        .run_until_resolved(&event)
        .expect("Dispatch failed");
    assert_eq!(first_u32(&platform, &buffer), 1);
}

/// A dispatch re-enqueued from its own continuation, stopping the loop
/// after a fixed number of runs.
#[test]
fn test_rerun_from_continuation() {
    const RUNS: usize = 8;

    fn schedule(
        kernel: Arc<Kernel>,
        device: Device,
        scheduler: EventScheduler,
        runs: Arc<AtomicUsize>,
    ) {
        let event = kernel.run_async(&device, &[]);
        event.then(move |_, outcome| {
            outcome.expect("Dispatch failed");
            if runs.fetch_add(1, Ordering::SeqCst) + 1 == RUNS {
                scheduler.quit();
            } else {
                schedule(kernel, device, scheduler, runs);
            }
        });
    }

    let platform = platform(QueueMode::InOrder);
    let device = platform.default_device().expect("No device").clone();
    let (program, _open) = gated_program();
    let program = platform.build_program(program);
    let buffer = platform.create_buffer(4);
    let increment = Arc::new(kernel(&program, "increment", Some(&buffer)));
    let runs = Arc::new(AtomicUsize::new(0));

    schedule(
        Arc::clone(&increment),
        device,
        platform.scheduler().clone(),
        Arc::clone(&runs),
    );
    platform.scheduler().run();

    assert_eq!(runs.load(Ordering::SeqCst), RUNS);
    assert_eq!(first_u32(&platform, &buffer), RUNS as u32);
}

/// Blocking wait on a pending event reports the native outcome; the event
/// itself is settled by the scheduler afterwards.
#[test]
fn test_wait_sync_pending_and_resolved() {
    let platform = platform(QueueMode::InOrder);
    let device = platform.default_device().expect("No device");
    let (program, open) = gated_program();
    let program = platform.build_program(program);
    let buffer = platform.create_buffer(4);
    let gate = kernel(&program, "gate", Some(&buffer));

    let event = gate.run_async(device, &[]);
    open.send(()).expect("Gate kernel gone");
    event.wait_sync().expect("Wait failed");
    assert_eq!(first_u32(&platform, &buffer), 1);

    platform
        .scheduler()
        .run_until_resolved(&event)
        .expect("Dispatch failed");
    assert!(!event.has_native_handle());
    assert_eq!(event.wait_sync(), Ok(()));
}

/// Every native event handle is released once its event resolves.
#[test]
fn test_native_events_released() {
    let platform = platform(QueueMode::OutOfOrder);
    let device = platform.default_device().expect("No device");
    let (program, _open) = gated_program();
    let program = platform.build_program(program);
    let buffer = platform.create_buffer(4);
    let increment = kernel(&program, "increment", Some(&buffer));

    let first = increment.run_async(device, &[]);
    let second = increment.run_async(device, &[first.clone()]);
    platform
        .scheduler()
        .run_until_resolved(&second)
        .expect("Dispatch failed");
    platform
        .scheduler()
        .run_until_resolved(&first)
        .expect("Dispatch failed");

    increment.run_sync(device, &[]).expect("Dispatch failed");

    assert_eq!(platform.cpu().driver().live_events(), 0);
    let stats = platform.scheduler().stats();
    assert_eq!(stats.resolutions, 2);
    assert_eq!(stats.held_back, 0);
}

/// A bounded completion channel still lets a loop resolve events that carry
/// more continuations than the channel holds, and a chain whose completions
/// overflow it.
#[test]
fn test_bounded_scheduler_chain() {
    let config = SchedulerConfigBuilder::new()
        .with_idle_poll_interval(Duration::from_millis(1))
        .with_channel_capacity(1)
        .build()
        .expect("Invalid config");
    let platform = Platform::builder()
        .backend(Backend::Cpu)
        .queue_mode(QueueMode::OutOfOrder)
        .scheduler(EventScheduler::new(config).expect("Failed to create scheduler"))
        .build()
        .expect("Failed to create platform");
    let device = platform.default_device().expect("No device");
    let (program, _open) = gated_program();
    let program = platform.build_program(program);
    let buffer = platform.create_buffer(4);
    let increment = kernel(&program, "increment", Some(&buffer));

    let calls = Arc::new(AtomicUsize::new(0));
    let mut last = increment.run_async(device, &[]);
    for _ in 1..8 {
        last = increment.run_async(device, &[last]);
        for _ in 0..4 {
            let calls = Arc::clone(&calls);
            last.then(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    assert_eq!(platform.scheduler().run_until_resolved(&last), Ok(()));
    platform.scheduler().dispatch_pending();
    assert_eq!(first_u32(&platform, &buffer), 8);
    assert_eq!(calls.load(Ordering::SeqCst), 28);
}
