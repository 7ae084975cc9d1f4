//! # Hello World Example
//!
//! Asynchronous kernel dispatch driven by the event loop:
//! - Building a program of host kernels
//! - Binding a buffer and a scalar argument
//! - Dispatching without blocking and chaining the next run from the
//!   completion continuation
//! - Stopping the loop once enough runs have finished
//!
//! ## Run this example:
//! ```bash
//! cargo run -p clevent --example hello_world
//! ```
//!
//! ```text
//! main thread                         device worker
//!
//! run_async ───────────────────────▶ my_kernel
//! scheduler.run()                     │
//!   ◀──────────── completion ─────────┘
//!   continuation: run_async again ──▶ my_kernel
//!   ...
//!   continuation: quit()
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clevent::prelude::*;
use tracing_subscriber::EnvFilter;

const SIZE: usize = 1920 * 1080;
const RUNS: usize = 5;

/// Everything a continuation needs to enqueue the next run.
struct Runner {
    kernel: Kernel,
    device: Device,
    runs: AtomicUsize,
}

impl Runner {
    fn exec(self: Arc<Self>) {
        println!("Kernel execution starts");
        let event = self.kernel.run_async(&self.device, &[]);
        let scheduler = self.device.scheduler().clone();
        let runner = Arc::clone(&self);
        event.then(move |event, outcome| {
            match outcome {
                Ok(()) => println!("Kernel execution finished ({})", event.id()),
                Err(err) => println!("Kernel execution failed: {}", err),
            }
            let runs = runner.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if runs < RUNS {
                runner.exec();
            } else {
                scheduler.quit();
            }
        });
        println!("Kernel running");
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== clevent Hello World Example ===\n");

    let platform = Platform::builder().backend(Backend::Auto).build()?;
    println!("Backend selected: {:?}", platform.backend());
    println!("Num devices: {}", platform.devices().len());

    let device = platform.default_device()?.clone();

    // One byte per work item; the padding items past `size` do nothing.
    let program = platform.build_program(CpuProgram::new().kernel(
        "my_kernel",
        &[ParamKind::Buffer, ParamKind::scalar::<i32>()],
        |launch| {
            let size = launch.scalar::<i32>(1)? as usize;
            launch.with_buffer(0, |data| {
                for [tid, _, _] in launch.work_items() {
                    if tid < size {
                        data[tid] = data[tid].wrapping_add(1);
                    }
                }
            })
        },
    ));
    let mut kernel = program.kernel("my_kernel")?;
    println!("Kernel created");

    let max_work_group_size = device.max_work_group_size();
    let local = SIZE.min(max_work_group_size);
    let global = SIZE.div_ceil(local) * local;
    println!("Max work group size: {}", max_work_group_size);
    println!("Global work size: {}", global);
    println!("Local work size: {}", local);

    let buffer = platform.create_buffer(SIZE);
    device.write_buffer_sync(&buffer, 0, &vec![0u8; SIZE], &[])?;

    kernel.bind_buffer(0, &buffer)?;
    kernel.bind_value(1, &(SIZE as i32))?;
    kernel.set_global_work_size(global, 0, 0);
    kernel.set_local_work_size(local, 0, 0);

    Arc::new(Runner {
        kernel,
        device: device.clone(),
        runs: AtomicUsize::new(0),
    })
    .exec();

    // Start the show.
    platform.scheduler().run();

    let mut data = vec![0u8; SIZE];
    device.read_buffer_sync(&buffer, 0, &mut data, &[])?;
    let touched = data.iter().filter(|&&b| b as usize == RUNS).count();
    println!("\n{} of {} bytes incremented {} times", touched, SIZE, RUNS);

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
