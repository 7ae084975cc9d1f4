//! Event scheduler.
//!
//! Native completion callbacks arrive on arbitrary threads. They never touch
//! event state directly: the registered trampoline only posts a message on
//! the scheduler channel. Events are resolved, and their continuations run,
//! by whichever thread drains the scheduler loop.
//!
//! Only native completions travel over the channel, so a bounded channel
//! throttles the threads delivering them. Continuations go to an unbounded
//! ready queue owned by the loop; resolving an event never blocks.
//!
//! Draining is single-consumer. A reentrant lock lets a continuation drive
//! the loop again from inside the loop; a second thread finds the loop busy
//! and either returns or waits on event state instead.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, ReentrantMutex};

use crate::config::SchedulerConfig;
use crate::error::{translate_native_error, CleventError, Result};
use crate::event::{Continuation, Event, Resolver};
use crate::native::{status, CompletionCallback, NativeStatus};

static GLOBAL: OnceLock<EventScheduler> = OnceLock::new();

/// Message posted to the scheduler channel.
enum Dispatch {
    /// A native command reached a terminal status.
    Completion {
        resolver: Resolver,
        code: NativeStatus,
    },
    /// Something changed; re-check exit and deferral conditions.
    Wake,
}

struct ReadyContinuation {
    event: Event,
    outcome: Result<()>,
    callback: Continuation,
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Native completions received.
    pub completions: u64,
    /// Resolutions applied by the scheduler.
    pub resolutions: u64,
    /// Completions deferred behind pending dependencies.
    pub deferred: u64,
    /// Continuations run.
    pub continuations: u64,
    /// Completion messages waiting to be handled.
    pub queued: u64,
    /// Continuations waiting to run.
    pub ready: u64,
    /// Completions currently held back.
    pub held_back: u64,
}

#[derive(Default)]
struct SchedulerCounters {
    completions: AtomicU64,
    resolutions: AtomicU64,
    deferred: AtomicU64,
    continuations: AtomicU64,
}

struct DeferredCompletion {
    resolver: Resolver,
    outcome: Result<()>,
}

struct SchedulerShared {
    config: SchedulerConfig,
    sender: Sender<Dispatch>,
    receiver: Receiver<Dispatch>,
    drain: ReentrantMutex<()>,
    /// Completions that found the channel full while nobody else was
    /// draining. Handled ahead of the channel.
    overflow: Mutex<VecDeque<Dispatch>>,
    ready: Mutex<VecDeque<ReadyContinuation>>,
    deferred: Mutex<VecDeque<DeferredCompletion>>,
    quit: AtomicBool,
    counters: SchedulerCounters,
}

impl SchedulerShared {
    fn wake(&self) {
        let _ = self.sender.try_send(Dispatch::Wake);
    }

    /// Hand a completion to the loop.
    ///
    /// Blocks on a full channel only while another thread is draining it.
    /// A thread that could be the next drainer, the loop thread included,
    /// parks the message on the overflow queue instead.
    fn deliver(&self, resolver: Resolver, code: NativeStatus) {
        let mut message = match self.sender.try_send(Dispatch::Completion { resolver, code }) {
            Ok(()) => return,
            Err(err) => err.into_inner(),
        };
        loop {
            if let Some(_guard) = self.drain.try_lock() {
                self.overflow.lock().push_back(message);
                return;
            }
            match self
                .sender
                .send_timeout(message, self.config.idle_poll_interval)
            {
                Ok(()) => return,
                Err(err) => message = err.into_inner(),
            }
        }
    }
}

/// Weak link from an event back to the loop that runs its continuations.
#[derive(Clone)]
pub(crate) struct SchedulerLink {
    shared: Weak<SchedulerShared>,
}

impl SchedulerLink {
    /// Queue `callbacks` in order and wake the loop.
    pub(crate) fn post(&self, event: &Event, outcome: &Result<()>, callbacks: Vec<Continuation>) {
        let Some(shared) = self.shared.upgrade() else {
            if !callbacks.is_empty() {
                tracing::debug!(event = %event.id(), "scheduler gone, continuations dropped");
            }
            return;
        };
        shared
            .ready
            .lock()
            .extend(callbacks.into_iter().map(|callback| ReadyContinuation {
                event: event.clone(),
                outcome: outcome.clone(),
                callback,
            }));
        shared.wake();
    }
}

/// Handle to an event loop that resolves events and runs continuations.
///
/// Cloning is cheap; clones share the same loop. Events and native
/// trampolines only hold weak links, so the loop goes away with its last
/// handle.
#[derive(Clone)]
pub struct EventScheduler {
    shared: Arc<SchedulerShared>,
}

impl EventScheduler {
    /// Create an isolated scheduler.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create an isolated scheduler with the default configuration.
    pub fn with_defaults() -> Self {
        Self::build(SchedulerConfig::default())
    }

    /// Process-wide scheduler, created on first use.
    pub fn global() -> Self {
        GLOBAL
            .get_or_init(|| {
                tracing::info!("Created global event scheduler");
                Self::build(SchedulerConfig::default())
            })
            .clone()
    }

    fn build(config: SchedulerConfig) -> Self {
        let (sender, receiver) = match config.channel_capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };
        tracing::debug!(
            scheduler = %config.name,
            capacity = ?config.channel_capacity,
            "Created event scheduler"
        );
        Self {
            shared: Arc::new(SchedulerShared {
                config,
                sender,
                receiver,
                drain: ReentrantMutex::new(()),
                overflow: Mutex::new(VecDeque::new()),
                ready: Mutex::new(VecDeque::new()),
                deferred: Mutex::new(VecDeque::new()),
                quit: AtomicBool::new(false),
                counters: SchedulerCounters::default(),
            }),
        }
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub(crate) fn link(&self) -> SchedulerLink {
        SchedulerLink {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Observe the native completion of the resolver's event and resolve it
    /// on this loop.
    ///
    /// Exactly one native callback is registered. If the event has no native
    /// handle, or registration fails, the event is resolved with an error
    /// right away.
    pub fn watch(&self, resolver: Resolver) {
        let Some(native) = resolver.native() else {
            let _ = resolver.fail(CleventError::invalid_argument(
                "event has no native completion to observe",
            ));
            return;
        };
        let id = resolver.event_id();

        let slot = Arc::new(Mutex::new(Some(resolver)));
        let trampoline_slot = Arc::clone(&slot);
        let link = Arc::downgrade(&self.shared);
        let callback: CompletionCallback = Box::new(move |code| {
            let Some(resolver) = trampoline_slot.lock().take() else {
                return;
            };
            match link.upgrade() {
                Some(shared) => shared.deliver(resolver, code),
                None => tracing::debug!(event = %id, "scheduler gone, completion dropped"),
            }
        });

        let code = native
            .driver()
            .set_event_callback(native.handle(), callback);
        drop(native);

        if code != status::SUCCESS {
            tracing::warn!(event = %id, code, "completion callback registration failed");
            if let Some(resolver) = slot.lock().take() {
                let _ = resolver.fail(CleventError::native(code));
            }
        }
    }

    /// Run every message and continuation already queued without blocking.
    ///
    /// Returns the number of items handled, or zero if another thread is
    /// draining this loop.
    pub fn dispatch_pending(&self) -> usize {
        let Some(_guard) = self.shared.drain.try_lock() else {
            return 0;
        };
        let mut handled = 0;
        loop {
            handled += self.pump();
            match self.shared.receiver.try_recv() {
                Ok(message) => {
                    self.handle(message);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Drive the loop until `event` is resolved and return its outcome.
    ///
    /// Continuations of `event` may still be queued when this returns. If
    /// another thread owns the loop, waits for that thread to resolve it.
    pub fn run_until_resolved(&self, event: &Event) -> Result<()> {
        let Some(_guard) = self.shared.drain.try_lock() else {
            return event.block_until_resolved();
        };
        loop {
            self.pump();
            if let Some(outcome) = event.outcome() {
                return outcome;
            }
            // The receiver lives as long as the sender, so only the timeout
            // can end the wait.
            if let Ok(message) = self
                .shared
                .receiver
                .recv_timeout(self.shared.config.idle_poll_interval)
            {
                self.handle(message);
            }
        }
    }

    /// Drive the loop until [`quit`](Self::quit) is called.
    pub fn run(&self) {
        let _guard = self.shared.drain.lock();
        tracing::debug!(scheduler = %self.shared.config.name, "Event loop running");
        loop {
            self.pump();
            if self.shared.quit.swap(false, Ordering::AcqRel) {
                break;
            }
            if let Ok(message) = self
                .shared
                .receiver
                .recv_timeout(self.shared.config.idle_poll_interval)
            {
                self.handle(message);
            }
        }
        tracing::debug!(scheduler = %self.shared.config.name, "Event loop stopped");
    }

    /// Ask the innermost running [`run`](Self::run) to return.
    pub fn quit(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.wake();
    }

    /// Drive the loop on a dedicated thread.
    pub fn spawn_dispatcher(&self) -> Result<DispatcherHandle> {
        let scheduler = self.clone();
        let thread = std::thread::Builder::new()
            .name(self.shared.config.name.clone())
            .spawn(move || scheduler.run())
            .map_err(|e| CleventError::ThreadSpawn(e.to_string()))?;
        tracing::info!(scheduler = %self.shared.config.name, "Started dispatcher thread");
        Ok(DispatcherHandle {
            scheduler: self.clone(),
            thread: Some(thread),
        })
    }

    /// Current statistics.
    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.shared.counters;
        SchedulerStats {
            completions: counters.completions.load(Ordering::Relaxed),
            resolutions: counters.resolutions.load(Ordering::Relaxed),
            deferred: counters.deferred.load(Ordering::Relaxed),
            continuations: counters.continuations.load(Ordering::Relaxed),
            queued: (self.shared.receiver.len() + self.shared.overflow.lock().len()) as u64,
            ready: self.shared.ready.lock().len() as u64,
            held_back: self.shared.deferred.lock().len() as u64,
        }
    }

    /// Handle parked completions, release deferred ones whose dependencies
    /// have resolved, and run ready continuations until all three are empty.
    ///
    /// Runs on every loop iteration, so a dependency resolved on another
    /// scheduler is noticed within one idle poll interval.
    fn pump(&self) -> usize {
        let mut handled = 0;
        loop {
            let parked = self.shared.overflow.lock().pop_front();
            if let Some(message) = parked {
                self.handle(message);
                handled += 1;
                continue;
            }
            self.release_deferred();
            let next = self.shared.ready.lock().pop_front();
            let Some(ReadyContinuation {
                event,
                outcome,
                callback,
            }) = next
            else {
                break;
            };
            self.shared.counters.continuations.fetch_add(1, Ordering::Relaxed);
            callback(&event, outcome);
            handled += 1;
        }
        handled
    }

    fn handle(&self, message: Dispatch) {
        let Dispatch::Completion { resolver, code } = message else {
            return;
        };
        self.shared.counters.completions.fetch_add(1, Ordering::Relaxed);
        let outcome = translate_native_error(code);
        if resolver.has_pending_dependencies() {
            tracing::trace!(
                event = %resolver.event_id(),
                "completion held back until dependencies resolve"
            );
            self.shared.counters.deferred.fetch_add(1, Ordering::Relaxed);
            self.shared
                .deferred
                .lock()
                .push_back(DeferredCompletion { resolver, outcome });
        } else {
            self.apply(resolver, outcome);
        }
    }

    fn apply(&self, resolver: Resolver, outcome: Result<()>) {
        let id = resolver.event_id();
        match resolver.resolve(outcome) {
            Ok(()) => {
                self.shared.counters.resolutions.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => tracing::error!(event = %id, error = %err, "completion not applied"),
        }
    }

    fn release_deferred(&self) {
        loop {
            let ready = {
                let mut deferred = self.shared.deferred.lock();
                deferred
                    .iter()
                    .position(|d| !d.resolver.has_pending_dependencies())
                    .and_then(|index| deferred.remove(index))
            };
            match ready {
                Some(DeferredCompletion { resolver, outcome }) => self.apply(resolver, outcome),
                None => break,
            }
        }
    }
}

impl std::fmt::Debug for EventScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScheduler")
            .field("name", &self.shared.config.name)
            .field("queued", &self.shared.receiver.len())
            .finish()
    }
}

/// Dedicated loop thread. Quits the loop and joins the thread on drop.
pub struct DispatcherHandle {
    scheduler: EventScheduler,
    thread: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Scheduler driven by this thread.
    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    /// Quit the loop and wait for the thread to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.scheduler.quit();
            if thread.join().is_err() {
                tracing::error!(
                    scheduler = %self.scheduler.config().name,
                    "dispatcher thread panicked"
                );
            }
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
