//! # Hello World (Blocking) Example
//!
//! Same kernel as `hello_world`, dispatched with `run_sync`: every call
//! blocks the calling thread until the device reports completion, and no
//! event loop is needed.
//!
//! ## Run this example:
//! ```bash
//! cargo run -p clevent --example hello_world_sync
//! ```

use clevent::prelude::*;
use tracing_subscriber::EnvFilter;

const SIZE: usize = 1920 * 1080;
const RUNS: usize = 5;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== clevent Hello World (sync) Example ===\n");

    let platform = Platform::new()?;
    let device = platform.default_device()?;
    println!("Device: {}", device.name());

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

    let local = SIZE.min(device.max_work_group_size());
    let global = SIZE.div_ceil(local) * local;

    let buffer = platform.create_buffer(SIZE);
    kernel.bind_buffer(0, &buffer)?;
    kernel.bind_value(1, &(SIZE as i32))?;
    kernel.set_global_work_size(global, 0, 0);
    kernel.set_local_work_size(local, 0, 0);

    for run in 1..=RUNS {
        println!("Kernel execution {} starts", run);
        kernel.run_sync(device, &[])?;
        println!("Kernel execution {} finished", run);
    }

    let mut data = vec![0u8; SIZE];
    device.read_buffer_sync(&buffer, 0, &mut data, &[])?;
    let touched = data.iter().filter(|&&b| b as usize == RUNS).count();
    println!("\n{} of {} bytes incremented {} times", touched, SIZE, RUNS);

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
