//! # Gaussian Blur Example
//!
//! Two-dimensional dispatch over an RGBA image:
//! - Work dimension 2 with a global size of (width, height)
//! - A chain of dependent events: upload → blur → download
//! - Continuations reporting each stage as it resolves
//!
//! ## Run this example:
//! ```bash
//! cargo run -p clevent --example blur
//! ```

use clevent::prelude::*;
use tracing_subscriber::EnvFilter;

const WIDTH: usize = 256;
const HEIGHT: usize = 192;
const BLUR_FACTOR: f32 = 2.0;

/// Normalized Gaussian mask of `(2 * radius + 1)^2` weights.
fn blur_mask(sigma: f32) -> (Vec<f32>, i32) {
    let radius = (3.0 * sigma).ceil() as i32;
    let side = (radius * 2 + 1) as usize;
    let mut mask = vec![0.0f32; side * side];
    for a in -radius..=radius {
        for b in -radius..=radius {
            let weight = (-((a * a + b * b) as f32) / (2.0 * sigma * sigma)).exp();
            mask[(a + radius) as usize + (b + radius) as usize * side] = weight;
        }
    }
    let sum: f32 = mask.iter().sum();
    mask.iter_mut().for_each(|w| *w /= sum);
    (mask, radius)
}

/// Checkerboard test image.
fn test_image() -> Vec<u8> {
    let mut pixels = Vec::with_capacity(WIDTH * HEIGHT * 4);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let on = ((x / 16) + (y / 16)) % 2 == 0;
            let value = if on { 255 } else { 0 };
            pixels.extend_from_slice(&[value, value / 2, 255 - value, 255]);
        }
    }
    pixels
}

fn blur_program() -> CpuProgram {
    CpuProgram::new().kernel(
        "gaussian_blur",
        &[
            ParamKind::Buffer,
            ParamKind::Buffer,
            ParamKind::Buffer,
            ParamKind::scalar::<i32>(),
        ],
        |launch| {
            let source: Vec<u8> = launch.read(0)?;
            let mask: Vec<f32> = launch.read(2)?;
            let radius: i32 = launch.scalar(3)?;
            let (width, height) = (launch.global_size()[0], launch.global_size()[1]);
            let side = (radius * 2 + 1) as usize;

            let mut target = vec![0u8; source.len()];
            for [x, y, _] in launch.work_items() {
                let mut sum = [0.0f32; 4];
                for a in -radius..=radius {
                    for b in -radius..=radius {
                        let sx = (x as i32 + a).clamp(0, width as i32 - 1) as usize;
                        let sy = (y as i32 + b).clamp(0, height as i32 - 1) as usize;
                        let weight = mask[(a + radius) as usize + (b + radius) as usize * side];
                        let pixel = &source[(sy * width + sx) * 4..][..4];
                        for (acc, &channel) in sum.iter_mut().zip(pixel) {
                            *acc += weight * f32::from(channel);
                        }
                    }
                }
                let out = &mut target[(y * width + x) * 4..][..4];
                for (dst, acc) in out.iter_mut().zip(sum) {
                    *dst = acc.round().clamp(0.0, 255.0) as u8;
                }
            }
            launch.write(1, &target)
        },
    )
}

fn report(stage: &'static str) -> impl FnOnce(&Event, Result<()>) + Send + 'static {
    move |event, outcome| match outcome {
        Ok(()) => println!("   {} finished ({})", stage, event.id()),
        Err(err) => println!("   {} failed: {}", stage, err),
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== clevent Gaussian Blur Example ===\n");

    let platform = Platform::builder().backend(Backend::Cpu).build()?;
    let device = platform.default_device()?;
    let queue = device.require_queue()?;

    let image = test_image();
    let (mask, radius) = blur_mask(BLUR_FACTOR);
    println!("Image: {}x{}, mask radius {}", WIDTH, HEIGHT, radius);

    let source = platform.create_buffer(image.len());
    let target = platform.create_buffer(image.len());
    let mask_buffer = platform.create_buffer_with(&mask);

    let program = platform.build_program(blur_program());
    let mut kernel = program.kernel("gaussian_blur")?;
    kernel.bind_buffer(0, &source)?;
    kernel.bind_buffer(1, &target)?;
    kernel.bind_buffer(2, &mask_buffer)?;
    kernel.bind_value(3, &radius)?;
    kernel.set_work_dimension(2)?;
    kernel.set_global_work_size(WIDTH, HEIGHT, 0);
    kernel.set_local_work_size(8, 8, 0);

    println!("Enqueueing upload → blur → download");
    let upload = source.write(queue, 0, &image, &[]);
    upload.then(report("upload"));

    let blur = kernel.run_async(device, &[upload]);
    blur.then(report("blur"));

    let download = target.read(queue, 0, image.len(), &[blur]);
    download.event.then(report("download"));

    platform.scheduler().run_until_resolved(&download.event)?;
    platform.scheduler().dispatch_pending();

    let blurred = download.wait()?;
    let edge = (16 * WIDTH + 16) * 4;
    println!(
        "\nPixel at a checker edge: {:?} -> {:?}",
        &image[edge..edge + 4],
        &blurred[edge..edge + 4]
    );

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
