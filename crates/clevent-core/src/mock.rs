//! Scripted native driver for unit tests.
//!
//! Commands never complete on their own; tests call [`MockDriver::complete`]
//! to drive completion in whatever order they want to exercise.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::native::{
    status, ArgValue, CompletionCallback, EventHandle, HostBlock, KernelHandle, MemHandle,
    NativeDriver, NativeStatus, NdRange, ProgramHandle, QueueHandle, SharedDriver,
};

#[derive(Default)]
struct MockEvent {
    refcount: u32,
    status: Option<NativeStatus>,
    callbacks: Vec<CompletionCallback>,
}

/// One recorded enqueue.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub queue: QueueHandle,
    pub range: Option<NdRange>,
    pub wait_list: Vec<EventHandle>,
    pub event: Option<EventHandle>,
}

#[derive(Default)]
struct MockState {
    events: HashMap<EventHandle, MockEvent>,
    args: HashMap<(KernelHandle, u32), Vec<u8>>,
    arg_rejections: HashMap<u32, NativeStatus>,
    enqueue_failure: Option<NativeStatus>,
    callback_failure: Option<NativeStatus>,
    enqueued: Vec<Enqueued>,
    released_kernels: Vec<KernelHandle>,
    released_programs: Vec<ProgramHandle>,
    released_queues: Vec<QueueHandle>,
    queue_calls: Vec<(&'static str, QueueHandle)>,
    queue_failure: Option<NativeStatus>,
    double_releases: usize,
    auto_complete: bool,
}

pub struct MockDriver {
    next_id: AtomicU64,
    state: Mutex<MockState>,
    completed: Condvar,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(MockState::default()),
            completed: Condvar::new(),
        })
    }

    pub fn shared(self: &Arc<Self>) -> SharedDriver {
        self.clone()
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a pending event with one reference.
    pub fn new_event(&self) -> EventHandle {
        let handle = EventHandle::from_raw(self.next());
        self.state.lock().events.insert(
            handle,
            MockEvent {
                refcount: 1,
                ..MockEvent::default()
            },
        );
        handle
    }

    /// Finish a command, firing its callbacks on the calling thread.
    pub fn complete(&self, event: EventHandle, code: NativeStatus) {
        let callbacks = {
            let mut state = self.state.lock();
            let entry = state.events.entry(event).or_default();
            entry.status = Some(code);
            std::mem::take(&mut entry.callbacks)
        };
        self.completed.notify_all();
        for callback in callbacks {
            callback(code);
        }
    }

    /// Finish a command from a freshly spawned thread.
    pub fn complete_on_thread(self: &Arc<Self>, event: EventHandle, code: NativeStatus) {
        let driver = Arc::clone(self);
        std::thread::spawn(move || driver.complete(event, code))
            .join()
            .expect("completion thread panicked");
    }

    /// Complete every command as soon as it is enqueued.
    pub fn set_auto_complete(&self, enabled: bool) {
        self.state.lock().auto_complete = enabled;
    }

    pub fn fail_next_enqueue(&self, code: NativeStatus) {
        self.state.lock().enqueue_failure = Some(code);
    }

    pub fn fail_callbacks(&self, code: NativeStatus) {
        self.state.lock().callback_failure = Some(code);
    }

    pub fn fail_queue_calls(&self, code: NativeStatus) {
        self.state.lock().queue_failure = Some(code);
    }

    pub fn queue_calls(&self) -> Vec<(&'static str, QueueHandle)> {
        self.state.lock().queue_calls.clone()
    }

    pub fn reject_arg(&self, index: u32, code: NativeStatus) {
        self.state.lock().arg_rejections.insert(index, code);
    }

    pub fn refcount(&self, event: EventHandle) -> Option<u32> {
        self.state
            .lock()
            .events
            .get(&event)
            .map(|e| e.refcount)
            .filter(|count| *count > 0)
    }

    pub fn live_events(&self) -> usize {
        self.state
            .lock()
            .events
            .values()
            .filter(|e| e.refcount > 0)
            .count()
    }

    pub fn double_releases(&self) -> usize {
        self.state.lock().double_releases
    }

    pub fn enqueued(&self) -> Vec<Enqueued> {
        self.state.lock().enqueued.clone()
    }

    pub fn last_enqueued(&self) -> Option<Enqueued> {
        self.state.lock().enqueued.last().cloned()
    }

    pub fn arg(&self, kernel: KernelHandle, index: u32) -> Option<Vec<u8>> {
        self.state.lock().args.get(&(kernel, index)).cloned()
    }

    pub fn released_kernels(&self) -> Vec<KernelHandle> {
        self.state.lock().released_kernels.clone()
    }

    pub fn released_programs(&self) -> Vec<ProgramHandle> {
        self.state.lock().released_programs.clone()
    }

    pub fn released_queues(&self) -> Vec<QueueHandle> {
        self.state.lock().released_queues.clone()
    }

    fn record(
        &self,
        queue: QueueHandle,
        range: Option<NdRange>,
        wait_list: &[EventHandle],
    ) -> Result<EventHandle, NativeStatus> {
        let failure = self.state.lock().enqueue_failure.take();
        if let Some(code) = failure {
            self.state.lock().enqueued.push(Enqueued {
                queue,
                range,
                wait_list: wait_list.to_vec(),
                event: None,
            });
            return Err(code);
        }

        let event = self.new_event();
        let auto = {
            let mut state = self.state.lock();
            state.enqueued.push(Enqueued {
                queue,
                range,
                wait_list: wait_list.to_vec(),
                event: Some(event),
            });
            state.auto_complete
        };
        if auto {
            self.complete(event, status::SUCCESS);
        }
        Ok(event)
    }
}

impl NativeDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn create_kernel(
        &self,
        _program: ProgramHandle,
        name: &str,
    ) -> Result<KernelHandle, NativeStatus> {
        if name == "missing" {
            return Err(status::INVALID_KERNEL_NAME);
        }
        Ok(KernelHandle::from_raw(self.next()))
    }

    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, value: ArgValue<'_>) -> NativeStatus {
        let mut state = self.state.lock();
        if let Some(code) = state.arg_rejections.get(&index) {
            return *code;
        }
        let bytes = match value {
            ArgValue::Bytes(bytes) => bytes.to_vec(),
            ArgValue::Mem(mem) => mem.raw().to_le_bytes().to_vec(),
        };
        state.args.insert((kernel, index), bytes);
        status::SUCCESS
    }

    fn enqueue_nd_range(
        &self,
        queue: QueueHandle,
        _kernel: KernelHandle,
        range: &NdRange,
        wait_list: &[EventHandle],
    ) -> Result<EventHandle, NativeStatus> {
        self.record(queue, Some(range.clone()), wait_list)
    }

    fn enqueue_read_buffer(
        &self,
        queue: QueueHandle,
        _mem: MemHandle,
        _offset: usize,
        _target: HostBlock,
        wait_list: &[EventHandle],
    ) -> Result<EventHandle, NativeStatus> {
        self.record(queue, None, wait_list)
    }

    fn enqueue_write_buffer(
        &self,
        queue: QueueHandle,
        _mem: MemHandle,
        _offset: usize,
        _data: Vec<u8>,
        wait_list: &[EventHandle],
    ) -> Result<EventHandle, NativeStatus> {
        self.record(queue, None, wait_list)
    }

    fn wait_for_events(&self, events: &[EventHandle]) -> NativeStatus {
        let mut state = self.state.lock();
        loop {
            let mut pending = false;
            let mut result = status::SUCCESS;
            for event in events {
                match state.events.get(event).and_then(|e| e.status) {
                    None => pending = true,
                    Some(code) if code < 0 && result == status::SUCCESS => result = code,
                    Some(_) => {}
                }
            }
            if !pending {
                return result;
            }
            self.completed.wait(&mut state);
        }
    }

    fn set_event_callback(&self, event: EventHandle, callback: CompletionCallback) -> NativeStatus {
        let done = {
            let mut state = self.state.lock();
            if let Some(code) = state.callback_failure {
                return code;
            }
            let Some(entry) = state.events.get_mut(&event) else {
                return status::INVALID_EVENT;
            };
            match entry.status {
                Some(code) => Some((code, callback)),
                None => {
                    entry.callbacks.push(callback);
                    None
                }
            }
        };
        if let Some((code, callback)) = done {
            callback(code);
        }
        status::SUCCESS
    }

    fn retain_event(&self, event: EventHandle) -> NativeStatus {
        match self.state.lock().events.get_mut(&event) {
            Some(entry) if entry.refcount > 0 => {
                entry.refcount += 1;
                status::SUCCESS
            }
            _ => status::INVALID_EVENT,
        }
    }

    fn release_event(&self, event: EventHandle) -> NativeStatus {
        let mut state = self.state.lock();
        match state.events.get_mut(&event) {
            Some(entry) if entry.refcount > 0 => {
                entry.refcount -= 1;
                status::SUCCESS
            }
            _ => {
                state.double_releases += 1;
                status::INVALID_EVENT
            }
        }
    }

    fn flush(&self, queue: QueueHandle) -> NativeStatus {
        let mut state = self.state.lock();
        state.queue_calls.push(("flush", queue));
        state.queue_failure.unwrap_or(status::SUCCESS)
    }

    fn finish(&self, queue: QueueHandle) -> NativeStatus {
        let mut state = self.state.lock();
        state.queue_calls.push(("finish", queue));
        state.queue_failure.unwrap_or(status::SUCCESS)
    }

    fn release_kernel(&self, kernel: KernelHandle) -> NativeStatus {
        self.state.lock().released_kernels.push(kernel);
        status::SUCCESS
    }

    fn release_program(&self, program: ProgramHandle) -> NativeStatus {
        self.state.lock().released_programs.push(program);
        status::SUCCESS
    }

    fn release_queue(&self, queue: QueueHandle) -> NativeStatus {
        self.state.lock().released_queues.push(queue);
        status::SUCCESS
    }

    fn release_mem(&self, _mem: MemHandle) -> NativeStatus {
        status::SUCCESS
    }
}
