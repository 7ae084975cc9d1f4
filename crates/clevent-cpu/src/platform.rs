//! CPU platform: devices, queues, buffers and programs backed by
//! [`CpuDriver`].

use std::sync::Arc;

use bytemuck::Pod;
use tracing::info;

use clevent_core::device::{Device, DeviceInfo};
use clevent_core::error::{CleventError, Result};
use clevent_core::native::SharedDriver;
use clevent_core::{Buffer, CommandQueue, EventScheduler, Program};

use crate::config::CpuConfig;
use crate::driver::CpuDriver;
use crate::program::CpuProgram;

/// Set of CPU devices sharing one driver and one event scheduler.
pub struct CpuPlatform {
    driver: Arc<CpuDriver>,
    config: CpuConfig,
    scheduler: EventScheduler,
    devices: Vec<Device>,
}

impl CpuPlatform {
    /// Create a platform whose events are resolved by `scheduler`.
    pub fn new(config: CpuConfig, scheduler: EventScheduler) -> Result<Self> {
        config.validate()?;
        let driver = CpuDriver::with_launch_history(config.launch_history);
        let shared: SharedDriver = driver.clone();

        let devices = (0..config.num_devices)
            .map(|index| {
                let name = format!("{}{}", config.device_name_prefix, index);
                let queue = if config.default_queue {
                    Some(
                        driver
                            .create_queue(&name, config.queue_mode, config.max_work_group_size)
                            .map_err(CleventError::native)?,
                    )
                } else {
                    None
                };
                Ok(Device::new(
                    DeviceInfo {
                        name,
                        max_work_group_size: config.max_work_group_size,
                    },
                    Arc::clone(&shared),
                    scheduler.clone(),
                    queue,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            devices = devices.len(),
            mode = ?config.queue_mode,
            default_queue = config.default_queue,
            "Initialized CPU platform"
        );

        Ok(Self {
            driver,
            config,
            scheduler,
            devices,
        })
    }

    /// Create a platform with the default configuration on the global
    /// scheduler.
    pub fn with_defaults() -> Result<Self> {
        Self::new(CpuConfig::default(), EventScheduler::global())
    }

    /// Platform configuration.
    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    /// Underlying driver.
    pub fn driver(&self) -> &Arc<CpuDriver> {
        &self.driver
    }

    /// Scheduler resolving this platform's events.
    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    /// All devices.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Device by index.
    pub fn device(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    /// First device.
    pub fn default_device(&self) -> Result<&Device> {
        self.devices
            .first()
            .ok_or_else(|| CleventError::config("platform has no devices"))
    }

    /// Create an additional command queue on `device`.
    pub fn create_queue(&self, device: &Device) -> Result<CommandQueue> {
        let handle = self
            .driver
            .create_queue(device.name(), self.config.queue_mode, device.max_work_group_size())
            .map_err(CleventError::native)?;
        Ok(CommandQueue::from_native(
            self.shared_driver(),
            handle,
            device.name(),
            self.scheduler.clone(),
        ))
    }

    /// Allocate a zeroed buffer of `size` bytes.
    pub fn create_buffer(&self, size: usize) -> Buffer {
        let handle = self.driver.create_buffer(size);
        Buffer::from_native(self.shared_driver(), handle, size)
    }

    /// Allocate a buffer initialised with `data`.
    pub fn create_buffer_with<T: Pod>(&self, data: &[T]) -> Buffer {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let handle = self.driver.create_buffer_from(bytes.to_vec());
        Buffer::from_native(self.shared_driver(), handle, bytes.len())
    }

    /// Register a program and take ownership of it.
    pub fn build_program(&self, program: CpuProgram) -> Program {
        let handle = self.driver.build_program(program);
        Program::from_native(self.shared_driver(), handle)
    }

    fn shared_driver(&self) -> SharedDriver {
        self.driver.clone()
    }
}

impl std::fmt::Debug for CpuPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuPlatform")
            .field("devices", &self.devices)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use clevent_core::config::SchedulerConfig;

    use super::*;
    use crate::config::CpuConfigBuilder;
    use crate::program::ParamKind;

    fn scheduler() -> EventScheduler {
        EventScheduler::new(SchedulerConfig::for_testing()).expect("Failed to create scheduler")
    }

    #[test]
    fn test_platform_devices() {
        let config = CpuConfigBuilder::new()
            .with_devices(3)
            .with_device_name_prefix("host")
            .build()
            .unwrap();
        let platform = CpuPlatform::new(config, scheduler()).unwrap();

        let names: Vec<_> = platform.devices().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["host0", "host1", "host2"]);
        assert!(platform.devices().iter().all(|d| d.default_queue().is_some()));
    }

    #[test]
    fn test_queueless_platform() {
        let platform = CpuPlatform::new(CpuConfig::queueless(), scheduler()).unwrap();
        let device = platform.default_device().unwrap();
        assert!(device.default_queue().is_none());

        // Extra queues can still be created explicitly.
        let queue = platform.create_queue(device).unwrap();
        assert_eq!(queue.device_name(), "cpu0");
    }

    #[test]
    fn test_buffers_and_programs_release_native_objects() {
        let platform = CpuPlatform::new(CpuConfig::default(), scheduler()).unwrap();
        let buffer = platform.create_buffer_with(&[1u32, 2, 3]);
        assert_eq!(buffer.size(), 12);
        let handle = buffer.native_handle();
        assert!(platform.driver().buffer_contents(handle).is_some());

        drop(buffer);
        assert!(platform.driver().buffer_contents(handle).is_none());

        let program = platform.build_program(
            CpuProgram::new().kernel("noop", &[ParamKind::Buffer], |_| Ok(())),
        );
        let kernel = program.kernel("noop").unwrap();
        assert_eq!(kernel.name(), "noop");
        assert!(program.kernel("other").is_err());
    }

    #[test]
    fn test_launch_history_follows_config() {
        let config = CpuConfigBuilder::new().with_launch_history(2).build().unwrap();
        let platform = CpuPlatform::new(config, scheduler()).unwrap();
        let device = platform.default_device().unwrap();
        let program = platform.build_program(CpuProgram::new().kernel("noop", &[], |_| Ok(())));
        let mut kernel = program.kernel("noop").unwrap();
        kernel.set_global_work_size(1, 0, 0);

        for _ in 0..5 {
            kernel.run_sync(device, &[]).unwrap();
        }
        assert_eq!(platform.driver().launches().len(), 2);
    }

    #[test]
    fn test_queue_finish() {
        let platform = CpuPlatform::new(CpuConfig::out_of_order(), scheduler()).unwrap();
        let device = platform.default_device().unwrap();
        let buffer = platform.create_buffer(4);
        let program = platform.build_program(CpuProgram::new().kernel(
            "late",
            &[ParamKind::Buffer],
            |launch| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                launch.write(0, &[42u32])
            },
        ));
        let mut kernel = program.kernel("late").unwrap();
        kernel.bind_buffer(0, &buffer).unwrap();
        kernel.set_global_work_size(1, 0, 0);

        let event = kernel.run_async(device, &[]);
        let queue = device.default_queue().unwrap();
        queue.flush().unwrap();
        queue.finish().unwrap();

        // The command is done; the event is resolved once the loop runs.
        let contents = platform.driver().buffer_contents(buffer.native_handle()).unwrap();
        assert_eq!(contents, 42u32.to_le_bytes().to_vec());
        assert!(!event.is_resolved());
        assert_eq!(platform.scheduler().run_until_resolved(&event), Ok(()));
    }

    #[tokio::test]
    async fn test_async_dispatch_completes() {
        let scheduler = scheduler();
        let dispatcher = scheduler.spawn_dispatcher().unwrap();
        let platform = CpuPlatform::new(CpuConfig::out_of_order(), scheduler).unwrap();
        let device = platform.default_device().unwrap();
        let buffer = platform.create_buffer(8);

        let program = platform.build_program(CpuProgram::new().kernel(
            "ids",
            &[ParamKind::Buffer],
            |launch| {
                let ids: Vec<u16> = launch.work_items().map(|[x, _, _]| x as u16).collect();
                launch.write(0, &ids)
            },
        ));
        let mut kernel = program.kernel("ids").unwrap();
        kernel.bind_buffer(0, &buffer).unwrap();
        kernel.set_global_work_size(4, 0, 0);

        kernel.run_async(device, &[]).completion().await.unwrap();

        let contents = platform.driver().buffer_contents(buffer.native_handle()).unwrap();
        assert_eq!(contents, vec![0, 0, 1, 0, 2, 0, 3, 0]);
        dispatcher.shutdown();
    }
}
