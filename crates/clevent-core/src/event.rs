//! Single-resolution events.
//!
//! An [`Event`] stands for one submitted unit of device work. It moves from
//! pending to resolved exactly once, through a one-shot [`Resolver`] that is
//! taken out of the event before use. Continuations registered with
//! [`Event::then`] are never run inline; they are posted to the event
//! scheduler and run when its loop is drained.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::error::{translate_native_error, CleventError, Result};
use crate::native::{EventHandle, NativeEvent};
use crate::queue::CommandQueue;
use crate::scheduler::{EventScheduler, SchedulerLink};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    fn next() -> Self {
        Self(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw identifier.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Continuation run on the scheduler loop once an event is resolved.
pub type Continuation = Box<dyn FnOnce(&Event, Result<()>) + Send + 'static>;

enum EventState {
    Pending,
    Resolved(Result<()>),
}

struct EventCore {
    state: EventState,
    resolver_taken: bool,
    native: Option<NativeEvent>,
    dependencies: Vec<Weak<EventInner>>,
    continuations: Vec<Continuation>,
}

pub(crate) struct EventInner {
    id: EventId,
    queue: Option<CommandQueue>,
    scheduler: SchedulerLink,
    core: Mutex<EventCore>,
    resolved: Condvar,
}

impl EventInner {
    fn is_pending(&self) -> bool {
        matches!(self.core.lock().state, EventState::Pending)
    }

    fn settle(self: &Arc<Self>, outcome: Result<()>) -> Result<()> {
        let (native, continuations) = {
            let mut core = self.core.lock();
            if let EventState::Resolved(_) = core.state {
                tracing::error!(event = %self.id, "event resolved twice");
                return Err(CleventError::DoubleResolution { event: self.id });
            }
            core.state = EventState::Resolved(outcome.clone());
            (core.native.take(), std::mem::take(&mut core.continuations))
        };
        self.resolved.notify_all();

        // Terminal resolution releases the native completion handle.
        drop(native);

        match &outcome {
            Ok(()) => tracing::debug!(event = %self.id, "event resolved"),
            Err(err) => tracing::debug!(event = %self.id, error = %err, "event resolved with error"),
        }

        let event = Event {
            inner: Arc::clone(self),
        };
        self.scheduler.post(&event, &outcome, continuations);
        Ok(())
    }
}

/// One-shot capability that settles an event.
///
/// Obtained once per event through [`Event::steal_resolver`]. Resolving
/// consumes it, so the same resolver cannot settle an event twice.
pub struct Resolver {
    inner: Arc<EventInner>,
}

impl Resolver {
    /// Identifier of the event this resolver settles.
    pub fn event_id(&self) -> EventId {
        self.inner.id
    }

    /// Event this resolver settles.
    pub fn event(&self) -> Event {
        Event {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Settle the event with `outcome`.
    pub fn resolve(self, outcome: Result<()>) -> Result<()> {
        self.inner.settle(outcome)
    }

    /// Settle the event successfully.
    pub fn succeed(self) -> Result<()> {
        self.resolve(Ok(()))
    }

    /// Settle the event with an error.
    pub fn fail(self, error: CleventError) -> Result<()> {
        self.resolve(Err(error))
    }

    /// Native handle to observe, if the event wraps one.
    pub(crate) fn native(&self) -> Option<NativeEvent> {
        self.inner.core.lock().native.clone()
    }

    /// Whether any recorded upstream event is still pending.
    pub(crate) fn has_pending_dependencies(&self) -> bool {
        self.event().has_pending_dependencies()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("event", &self.inner.id)
            .finish()
    }
}

/// Future-like handle for one submitted unit of device work.
///
/// Cloning is cheap and every clone refers to the same event.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// Create a pending event.
    ///
    /// `native` is the completion handle of the underlying command, absent
    /// for events that do not wrap a native command. The resolver is left
    /// in place for the caller to steal.
    pub fn new(
        scheduler: &EventScheduler,
        queue: Option<CommandQueue>,
        native: Option<NativeEvent>,
    ) -> Self {
        let inner = Arc::new(EventInner {
            id: EventId::next(),
            queue,
            scheduler: scheduler.link(),
            core: Mutex::new(EventCore {
                state: EventState::Pending,
                resolver_taken: false,
                native,
                dependencies: Vec::new(),
                continuations: Vec::new(),
            }),
            resolved: Condvar::new(),
        });
        Self { inner }
    }

    /// Create an event that is already resolved with `error`.
    ///
    /// Used so that asynchronous operations always hand back an event, even
    /// when the failure happened before anything reached the native layer.
    pub fn failed(
        scheduler: &EventScheduler,
        queue: Option<CommandQueue>,
        error: CleventError,
    ) -> Self {
        let event = Self::new(scheduler, queue, None);
        let settled = event
            .steal_resolver()
            .and_then(|resolver| resolver.fail(error));
        if let Err(err) = settled {
            tracing::error!(event = %event.id(), error = %err, "failed to pre-resolve event");
        }
        event
    }

    /// Event identifier.
    pub fn id(&self) -> EventId {
        self.inner.id
    }

    /// Queue the underlying command was submitted to.
    pub fn queue(&self) -> Option<&CommandQueue> {
        self.inner.queue.as_ref()
    }

    /// Take the one-shot resolver out of this event.
    ///
    /// Fails with [`CleventError::DoubleSteal`] on the second call.
    pub fn steal_resolver(&self) -> Result<Resolver> {
        let mut core = self.inner.core.lock();
        if core.resolver_taken {
            tracing::error!(event = %self.inner.id, "resolver stolen twice");
            return Err(CleventError::DoubleSteal {
                event: self.inner.id,
            });
        }
        core.resolver_taken = true;
        Ok(Resolver {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Steal the resolver and settle the event in one step.
    ///
    /// Rejected with [`CleventError::DoubleResolution`] once the event is
    /// resolved, and with [`CleventError::DoubleSteal`] while another party
    /// holds the resolver.
    pub fn resolve(&self, outcome: Result<()>) -> Result<()> {
        if !self.inner.is_pending() {
            tracing::error!(event = %self.inner.id, "event resolved twice");
            return Err(CleventError::DoubleResolution {
                event: self.inner.id,
            });
        }
        self.steal_resolver()?.resolve(outcome)
    }

    /// Record the upstream events this one waits for.
    ///
    /// Only a weak reference to each is kept. Ordering on the device is
    /// enforced by the wait list given at enqueue time; the scheduler uses
    /// this list to avoid reporting a dependent event before its upstreams.
    pub fn set_dependencies(&self, events: &[Event]) {
        let deps = events.iter().map(|e| Arc::downgrade(&e.inner)).collect();
        self.inner.core.lock().dependencies = deps;
    }

    /// Recorded upstream events that are still alive.
    pub fn dependencies(&self) -> Vec<Event> {
        let deps = self.inner.core.lock().dependencies.clone();
        deps.iter()
            .filter_map(Weak::upgrade)
            .map(|inner| Event { inner })
            .collect()
    }

    fn has_pending_dependencies(&self) -> bool {
        let deps = self.inner.core.lock().dependencies.clone();
        deps.iter()
            .filter_map(Weak::upgrade)
            .any(|dep| dep.is_pending())
    }

    /// Whether the event has been resolved.
    pub fn is_resolved(&self) -> bool {
        !self.inner.is_pending()
    }

    /// Outcome, once resolved.
    pub fn outcome(&self) -> Option<Result<()>> {
        match &self.inner.core.lock().state {
            EventState::Pending => None,
            EventState::Resolved(outcome) => Some(outcome.clone()),
        }
    }

    /// Whether the event still holds a native completion handle.
    pub fn has_native_handle(&self) -> bool {
        self.inner.core.lock().native.is_some()
    }

    /// Raw native handle, while the event still holds one.
    pub fn native_handle(&self) -> Option<EventHandle> {
        self.inner.core.lock().native.as_ref().map(NativeEvent::handle)
    }

    /// Block the calling thread until the work behind this event is done.
    ///
    /// Returns at once when the event is resolved. While pending, blocks on
    /// the native wait primitive and reports the native outcome; the event
    /// itself is still settled by its resolver holder. Events without a
    /// native handle block until resolved. Must not be called from a
    /// continuation running on the loop that resolves this event.
    pub fn wait_sync(&self) -> Result<()> {
        let native = {
            let core = self.inner.core.lock();
            if let EventState::Resolved(outcome) = &core.state {
                return outcome.clone();
            }
            core.native.clone()
        };

        match native {
            Some(native) => {
                let code = native.wait();
                drop(native);
                self.outcome().unwrap_or_else(|| translate_native_error(code))
            }
            None => self.block_until_resolved(),
        }
    }

    /// Block on the event's own state until it is resolved.
    pub(crate) fn block_until_resolved(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        loop {
            if let EventState::Resolved(outcome) = &core.state {
                return outcome.clone();
            }
            self.inner.resolved.wait(&mut core);
        }
    }

    /// Register a continuation.
    ///
    /// The callback runs on the scheduler loop after resolution, in
    /// registration order relative to other continuations of this event.
    /// Registering on a resolved event posts the callback immediately.
    pub fn then<F>(&self, callback: F)
    where
        F: FnOnce(&Event, Result<()>) + Send + 'static,
    {
        let mut core = self.inner.core.lock();
        match &core.state {
            EventState::Pending => core.continuations.push(Box::new(callback)),
            EventState::Resolved(outcome) => {
                let outcome = outcome.clone();
                drop(core);
                self.inner
                    .scheduler
                    .post(self, &outcome, vec![Box::new(callback)]);
            }
        }
    }

    /// Future that completes with the outcome once the scheduler has run
    /// this event's continuations.
    pub fn completion(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.then(move |_, outcome| {
            let _ = tx.send(outcome);
        });
        async move {
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(CleventError::SchedulerShutdown),
            }
        }
    }

    /// Retain the native handles of `events`, in order, for use as a native
    /// wait list. Events without a handle have already reached a terminal
    /// state and are skipped. The references are released when the returned
    /// vector is dropped.
    pub(crate) fn native_wait_list(events: &[Event]) -> Vec<NativeEvent> {
        events
            .iter()
            .filter_map(|event| event.inner.core.lock().native.clone())
            .collect()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("resolved", &!matches!(core.state, EventState::Pending))
            .field("native", &core.native.as_ref().map(NativeEvent::handle))
            .field("dependencies", &core.dependencies.len())
            .finish()
    }
}
