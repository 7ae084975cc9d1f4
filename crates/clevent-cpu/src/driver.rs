//! Host-thread implementation of the native driver.
//!
//! Commands run on worker threads: one thread per in-order queue, or one
//! thread per command for out-of-order queues. Every command first waits
//! for its wait list, then runs, then completes its event, firing the
//! registered callbacks on the worker thread.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use clevent_core::native::{
    status, ArgValue, CompletionCallback, EventHandle, HostBlock, KernelHandle, MemHandle,
    NativeDriver, NativeStatus, NdRange, ProgramHandle, QueueHandle,
};

use crate::config::QueueMode;
use crate::program::{CpuKernelDef, CpuProgram, KernelLaunch, LaunchArg, MemoryBlock, ParamKind};

#[derive(Default)]
struct CpuEventState {
    status: Option<NativeStatus>,
    callbacks: Vec<CompletionCallback>,
    refcount: u32,
}

/// Completion state of one command.
struct CpuEvent {
    state: Mutex<CpuEventState>,
    done: Condvar,
}

impl CpuEvent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CpuEventState {
                refcount: 1,
                ..CpuEventState::default()
            }),
            done: Condvar::new(),
        })
    }

    fn wait(&self) -> NativeStatus {
        let mut state = self.state.lock();
        loop {
            if let Some(code) = state.status {
                return code;
            }
            self.done.wait(&mut state);
        }
    }

    fn is_complete(&self) -> bool {
        self.state.lock().status.is_some()
    }

    fn complete(&self, code: NativeStatus) {
        let callbacks = {
            let mut state = self.state.lock();
            state.status = Some(code);
            std::mem::take(&mut state.callbacks)
        };
        self.done.notify_all();
        for callback in callbacks {
            callback(code);
        }
    }
}

type Work = Box<dyn FnOnce() -> NativeStatus + Send + 'static>;

struct Command {
    label: &'static str,
    event: Arc<CpuEvent>,
    wait: Vec<Arc<CpuEvent>>,
    work: Work,
}

impl Command {
    fn execute(self) {
        let upstream_failed = self
            .wait
            .iter()
            .map(|event| event.wait())
            .any(|code| code != status::SUCCESS);
        let code = if upstream_failed {
            status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
        } else {
            (self.work)()
        };
        if code != status::SUCCESS {
            warn!(command = self.label, code, "CPU command failed");
        }
        self.event.complete(code);
    }
}

enum QueueTarget {
    Worker(Sender<Command>),
    Spawn(String),
}

impl QueueTarget {
    fn dispatch(&self, command: Command) -> Result<(), NativeStatus> {
        match self {
            Self::Worker(sender) => sender
                .send(command)
                .map_err(|_| status::INVALID_COMMAND_QUEUE),
            Self::Spawn(name) => std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || command.execute())
                .map(|_| ())
                .map_err(|_| status::OUT_OF_RESOURCES),
        }
    }
}

struct CpuQueue {
    target: Arc<QueueTarget>,
    max_work_group_size: usize,
    in_flight: Vec<Arc<CpuEvent>>,
}

impl CpuQueue {
    fn track(&mut self, event: Arc<CpuEvent>) {
        self.in_flight.retain(|e| !e.is_complete());
        self.in_flight.push(event);
    }
}

struct KernelSlot {
    def: CpuKernelDef,
    args: HashMap<u32, LaunchArg>,
}

/// One kernel dispatch accepted by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Kernel name.
    pub kernel: String,
    /// Queue it was enqueued on.
    pub queue: QueueHandle,
    /// Geometry as received.
    pub range: NdRange,
}

#[derive(Default)]
struct DriverState {
    programs: HashMap<ProgramHandle, Arc<CpuProgram>>,
    kernels: HashMap<KernelHandle, KernelSlot>,
    mems: HashMap<MemHandle, MemoryBlock>,
    queues: HashMap<QueueHandle, CpuQueue>,
    events: HashMap<EventHandle, Arc<CpuEvent>>,
    launches: VecDeque<LaunchRecord>,
    launch_history: usize,
}

impl DriverState {
    fn record_launch(&mut self, record: LaunchRecord) {
        if self.launch_history == 0 {
            return;
        }
        if self.launches.len() == self.launch_history {
            self.launches.pop_front();
        }
        self.launches.push_back(record);
    }
}

/// Number of launch records a driver keeps by default.
pub const DEFAULT_LAUNCH_HISTORY: usize = 256;

/// Native driver that executes registered Rust kernels on host threads.
pub struct CpuDriver {
    next_handle: AtomicU64,
    state: Mutex<DriverState>,
}

impl CpuDriver {
    /// Create a driver with no objects.
    pub fn new() -> Arc<Self> {
        Self::with_launch_history(DEFAULT_LAUNCH_HISTORY)
    }

    /// Create a driver that remembers the last `history` kernel launches.
    /// Zero turns recording off.
    pub fn with_launch_history(history: usize) -> Arc<Self> {
        Arc::new(Self {
            next_handle: AtomicU64::new(1),
            state: Mutex::new(DriverState {
                launch_history: history,
                ..DriverState::default()
            }),
        })
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a program.
    pub fn build_program(&self, program: CpuProgram) -> ProgramHandle {
        let handle = ProgramHandle::from_raw(self.next());
        debug!(program = %handle, kernels = ?program.kernel_names().collect::<Vec<_>>(), "Built CPU program");
        self.state.lock().programs.insert(handle, Arc::new(program));
        handle
    }

    /// Allocate a zeroed memory object.
    pub fn create_buffer(&self, size: usize) -> MemHandle {
        self.create_buffer_from(vec![0; size])
    }

    /// Allocate a memory object holding `data`.
    pub fn create_buffer_from(&self, data: Vec<u8>) -> MemHandle {
        let handle = MemHandle::from_raw(self.next());
        self.state
            .lock()
            .mems
            .insert(handle, Arc::new(Mutex::new(data)));
        handle
    }

    /// Create a command queue for `device`.
    pub fn create_queue(
        &self,
        device: &str,
        mode: QueueMode,
        max_work_group_size: usize,
    ) -> Result<QueueHandle, NativeStatus> {
        let handle = QueueHandle::from_raw(self.next());
        let thread_name = format!("{}-q{}", device, handle.raw());
        let target = match mode {
            QueueMode::InOrder => {
                let (sender, receiver) = channel::unbounded::<Command>();
                std::thread::Builder::new()
                    .name(thread_name)
                    .spawn(move || {
                        for command in receiver {
                            command.execute();
                        }
                    })
                    .map_err(|_| status::OUT_OF_RESOURCES)?;
                QueueTarget::Worker(sender)
            }
            QueueMode::OutOfOrder => QueueTarget::Spawn(thread_name),
        };
        self.state.lock().queues.insert(
            handle,
            CpuQueue {
                target: Arc::new(target),
                max_work_group_size,
                in_flight: Vec::new(),
            },
        );
        debug!(device, queue = %handle, ?mode, "Created CPU queue");
        Ok(handle)
    }

    /// Most recent kernel dispatches accepted, oldest first.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.iter().cloned().collect()
    }

    /// Number of events with outstanding references.
    pub fn live_events(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Current contents of a memory object.
    pub fn buffer_contents(&self, mem: MemHandle) -> Option<Vec<u8>> {
        let block = self.state.lock().mems.get(&mem).cloned()?;
        let data = block.lock().clone();
        Some(data)
    }

    fn event(&self, handle: EventHandle) -> Option<Arc<CpuEvent>> {
        self.state.lock().events.get(&handle).cloned()
    }

    fn submit<F>(
        &self,
        queue: QueueHandle,
        label: &'static str,
        wait_list: &[EventHandle],
        prepare: F,
    ) -> Result<EventHandle, NativeStatus>
    where
        F: FnOnce(&mut DriverState, usize) -> Result<Work, NativeStatus>,
    {
        let mut state = self.state.lock();
        let (target, max_work_group_size) = match state.queues.get(&queue) {
            Some(q) => (Arc::clone(&q.target), q.max_work_group_size),
            None => return Err(status::INVALID_COMMAND_QUEUE),
        };
        let wait = wait_list
            .iter()
            .map(|h| state.events.get(h).cloned().ok_or(status::INVALID_EVENT_WAIT_LIST))
            .collect::<Result<Vec<_>, _>>()?;
        let work = prepare(&mut *state, max_work_group_size)?;

        let event = CpuEvent::new();
        let handle = EventHandle::from_raw(self.next());
        state.events.insert(handle, Arc::clone(&event));
        drop(state);

        let command = Command {
            label,
            event: Arc::clone(&event),
            wait,
            work,
        };
        if let Err(code) = target.dispatch(command) {
            self.state.lock().events.remove(&handle);
            return Err(code);
        }
        if let Some(q) = self.state.lock().queues.get_mut(&queue) {
            q.track(event);
        }
        Ok(handle)
    }
}

fn validate_range(range: &NdRange, max_work_group_size: usize) -> Result<(), NativeStatus> {
    if !(1..=3).contains(&range.work_dim) {
        return Err(status::INVALID_WORK_DIMENSION);
    }
    let global = range.global.as_ref().ok_or(status::INVALID_GLOBAL_WORK_SIZE)?;
    if global.len() != range.work_dim as usize || global.contains(&0) {
        return Err(status::INVALID_GLOBAL_WORK_SIZE);
    }
    if let Some(local) = &range.local {
        if local.len() != global.len() || local.contains(&0) {
            return Err(status::INVALID_WORK_GROUP_SIZE);
        }
        if local.iter().zip(global).any(|(l, g)| g % l != 0) {
            return Err(status::INVALID_WORK_GROUP_SIZE);
        }
        if local.iter().product::<usize>() > max_work_group_size {
            return Err(status::INVALID_WORK_GROUP_SIZE);
        }
    }
    Ok(())
}

fn run_kernel(def: &CpuKernelDef, launch: &KernelLaunch) -> NativeStatus {
    match catch_unwind(AssertUnwindSafe(|| (def.func)(launch))) {
        Ok(Ok(())) => status::SUCCESS,
        Ok(Err(code)) => code,
        Err(_) => {
            error!(kernel = %def.name, "CPU kernel panicked");
            status::OUT_OF_RESOURCES
        }
    }
}

fn transfer_range(block: &MemoryBlock, offset: usize, len: usize) -> Result<(), NativeStatus> {
    match offset.checked_add(len) {
        Some(end) if end <= block.lock().len() => Ok(()),
        _ => Err(status::INVALID_VALUE),
    }
}

impl NativeDriver for CpuDriver {
    fn name(&self) -> &str {
        "cpu"
    }

    fn create_kernel(
        &self,
        program: ProgramHandle,
        name: &str,
    ) -> Result<KernelHandle, NativeStatus> {
        let mut state = self.state.lock();
        let def = state
            .programs
            .get(&program)
            .ok_or(status::INVALID_PROGRAM)?
            .find(name)
            .cloned()
            .ok_or(status::INVALID_KERNEL_NAME)?;
        let handle = KernelHandle::from_raw(self.next());
        state.kernels.insert(
            handle,
            KernelSlot {
                def,
                args: HashMap::new(),
            },
        );
        Ok(handle)
    }

    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, value: ArgValue<'_>) -> NativeStatus {
        let mut state = self.state.lock();
        let arg = {
            let Some(slot) = state.kernels.get(&kernel) else {
                return status::INVALID_KERNEL;
            };
            let Some(param) = slot.def.params.get(index as usize) else {
                return status::INVALID_ARG_INDEX;
            };
            match (param, value) {
                (ParamKind::Scalar(size), ArgValue::Bytes(bytes)) if bytes.len() == *size => {
                    LaunchArg::Bytes(bytes.to_vec())
                }
                (ParamKind::Scalar(_), ArgValue::Bytes(_)) => return status::INVALID_ARG_SIZE,
                (ParamKind::Buffer, ArgValue::Mem(mem)) => match state.mems.get(&mem) {
                    Some(block) => LaunchArg::Mem(Arc::clone(block)),
                    None => return status::INVALID_MEM_OBJECT,
                },
                _ => return status::INVALID_ARG_VALUE,
            }
        };
        if let Some(slot) = state.kernels.get_mut(&kernel) {
            slot.args.insert(index, arg);
        }
        status::SUCCESS
    }

    fn enqueue_nd_range(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        range: &NdRange,
        wait_list: &[EventHandle],
    ) -> Result<EventHandle, NativeStatus> {
        self.submit(queue, "nd_range", wait_list, |state, max_work_group_size| {
            let slot = state.kernels.get(&kernel).ok_or(status::INVALID_KERNEL)?;
            validate_range(range, max_work_group_size)?;
            let args = (0..slot.def.params.len() as u32)
                .map(|i| slot.args.get(&i).cloned().ok_or(status::INVALID_KERNEL_ARGS))
                .collect::<Result<Vec<_>, _>>()?;

            let def = slot.def.clone();
            let launch = KernelLaunch::new(
                range.work_dim,
                range.global.clone().unwrap_or_default(),
                range.local.clone(),
                args,
            );
            state.record_launch(LaunchRecord {
                kernel: def.name.clone(),
                queue,
                range: range.clone(),
            });
            Ok(Box::new(move || run_kernel(&def, &launch)) as Work)
        })
    }

    fn enqueue_read_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        target: HostBlock,
        wait_list: &[EventHandle],
    ) -> Result<EventHandle, NativeStatus> {
        self.submit(queue, "read_buffer", wait_list, |state, _| {
            let block = state.mems.get(&mem).cloned().ok_or(status::INVALID_MEM_OBJECT)?;
            let len = target.lock().len();
            transfer_range(&block, offset, len)?;
            Ok(Box::new(move || {
                let source = block.lock();
                target.lock().copy_from_slice(&source[offset..offset + len]);
                status::SUCCESS
            }) as Work)
        })
    }

    fn enqueue_write_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        data: Vec<u8>,
        wait_list: &[EventHandle],
    ) -> Result<EventHandle, NativeStatus> {
        self.submit(queue, "write_buffer", wait_list, |state, _| {
            let block = state.mems.get(&mem).cloned().ok_or(status::INVALID_MEM_OBJECT)?;
            transfer_range(&block, offset, data.len())?;
            Ok(Box::new(move || {
                block.lock()[offset..offset + data.len()].copy_from_slice(&data);
                status::SUCCESS
            }) as Work)
        })
    }

    fn wait_for_events(&self, events: &[EventHandle]) -> NativeStatus {
        let resolved = {
            let state = self.state.lock();
            events
                .iter()
                .map(|h| state.events.get(h).cloned())
                .collect::<Option<Vec<_>>>()
        };
        let Some(resolved) = resolved else {
            return status::INVALID_EVENT;
        };
        resolved
            .iter()
            .map(|event| event.wait())
            .fold(status::SUCCESS, |first, code| {
                if first == status::SUCCESS {
                    code
                } else {
                    first
                }
            })
    }

    fn flush(&self, queue: QueueHandle) -> NativeStatus {
        // Commands are handed to their thread at enqueue time.
        if self.state.lock().queues.contains_key(&queue) {
            status::SUCCESS
        } else {
            status::INVALID_COMMAND_QUEUE
        }
    }

    fn finish(&self, queue: QueueHandle) -> NativeStatus {
        let pending = {
            let mut state = self.state.lock();
            let Some(q) = state.queues.get_mut(&queue) else {
                return status::INVALID_COMMAND_QUEUE;
            };
            q.in_flight.retain(|e| !e.is_complete());
            q.in_flight.clone()
        };
        debug!(queue = %queue, pending = pending.len(), "Finishing CPU queue");
        for event in pending {
            event.wait();
        }
        status::SUCCESS
    }

    fn set_event_callback(&self, event: EventHandle, callback: CompletionCallback) -> NativeStatus {
        let Some(event) = self.event(event) else {
            return status::INVALID_EVENT;
        };
        let done = {
            let mut state = event.state.lock();
            match state.status {
                Some(code) => Some((code, callback)),
                None => {
                    state.callbacks.push(callback);
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
        match self.state.lock().events.get(&event) {
            Some(entry) => {
                entry.state.lock().refcount += 1;
                status::SUCCESS
            }
            None => status::INVALID_EVENT,
        }
    }

    fn release_event(&self, event: EventHandle) -> NativeStatus {
        let mut state = self.state.lock();
        let Some(entry) = state.events.get(&event) else {
            return status::INVALID_EVENT;
        };
        let remaining = {
            let mut event_state = entry.state.lock();
            event_state.refcount = event_state.refcount.saturating_sub(1);
            event_state.refcount
        };
        if remaining == 0 {
            state.events.remove(&event);
        }
        status::SUCCESS
    }

    fn release_kernel(&self, kernel: KernelHandle) -> NativeStatus {
        match self.state.lock().kernels.remove(&kernel) {
            Some(_) => status::SUCCESS,
            None => status::INVALID_KERNEL,
        }
    }

    fn release_program(&self, program: ProgramHandle) -> NativeStatus {
        match self.state.lock().programs.remove(&program) {
            Some(_) => status::SUCCESS,
            None => status::INVALID_PROGRAM,
        }
    }

    fn release_queue(&self, queue: QueueHandle) -> NativeStatus {
        // Dropping the worker sender lets an in-order worker drain and exit.
        match self.state.lock().queues.remove(&queue) {
            Some(_) => status::SUCCESS,
            None => status::INVALID_COMMAND_QUEUE,
        }
    }

    fn release_mem(&self, mem: MemHandle) -> NativeStatus {
        match self.state.lock().mems.remove(&mem) {
            Some(_) => status::SUCCESS,
            None => status::INVALID_MEM_OBJECT,
        }
    }
}

impl fmt::Debug for CpuDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CpuDriver")
            .field("programs", &state.programs.len())
            .field("kernels", &state.kernels.len())
            .field("buffers", &state.mems.len())
            .field("queues", &state.queues.len())
            .field("events", &state.events.len())
            .finish()
    }
}
