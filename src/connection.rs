//! Reconnecting binding to a remote braille service.
//!
//! Both the display client and the translator manager keep at most one live
//! binding to their service and recover from failures the same way:
//!
//! ```text
//!   Idle ──bind()──► Binding ──connected──► Registering ──ok──► Connected
//!                       │                        │                  │
//!                 bind failed           registration failed    disconnected
//!                       ▼                        ▼                  ▼
//!                       └──────────────────► Retrying ◄─────────────┘
//!                                   (500ms, 1s, 2s, 4s ... then Failed)
//! ```
//!
//! The shared state lives in [`ConnectionCore`], which public entry points
//! read. The transitions are driven by [`Reconnector`], which runs only on
//! the client's dispatch task, so transitions never race each other.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::dispatch::DispatchQueue;
use crate::ipc::IpcError;

/// Base delay before the first rebind attempt.
pub const DEFAULT_REBIND_DELAY: Duration = Duration::from_millis(500);

/// Consecutive failures tolerated before giving up.
pub const DEFAULT_MAX_BIND_ATTEMPTS: u32 = 5;

/// Exponential backoff policy for rebinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubled for every further retry.
    pub base_delay: Duration,
    /// Number of consecutive failures that ends automatic recovery.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_REBIND_DELAY,
            max_attempts: DEFAULT_MAX_BIND_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (0-indexed): `base_delay * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Delay before the next retry after `failures` consecutive failures,
    /// or `None` once the policy gives up.
    pub fn after_failures(&self, failures: u32) -> Option<Duration> {
        if failures >= self.max_attempts {
            None
        } else {
            Some(self.delay_for(failures.saturating_sub(1)))
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Service Binding Primitive
// =============================================================================

/// Asynchronous outcome of a bind request.
pub enum BindingEvent<S: ?Sized> {
    /// The service is reachable through this handle.
    Connected(Arc<S>),
    /// The binding was lost, or could not be established after all.
    Disconnected,
}

/// Notification sink handed to a [`ServiceBinder`] with every bind request.
///
/// Safe to call from any thread. Events from a binding that has since been
/// replaced are ignored.
pub struct BindingEvents<S: ?Sized + 'static> {
    sink: Arc<dyn Fn(BindingEvent<S>) + Send + Sync>,
}

impl<S: ?Sized + 'static> Clone for BindingEvents<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S: ?Sized + 'static> BindingEvents<S> {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(BindingEvent<S>) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Report that the service is connected.
    pub fn connected(&self, service: Arc<S>) {
        (self.sink)(BindingEvent::Connected(service));
    }

    /// Report that the service went away.
    pub fn disconnected(&self) {
        (self.sink)(BindingEvent::Disconnected);
    }
}

/// Platform primitive that locates and connects to a service by action name.
///
/// `bind` returns `false` when the request fails synchronously. Otherwise
/// the outcome arrives later through `events`.
pub trait ServiceBinder<S: ?Sized + 'static>: Send + Sync {
    fn bind(&self, action: &str, events: BindingEvents<S>) -> bool;

    /// Release the binding for `action`. Must tolerate unknown actions.
    fn unbind(&self, action: &str);
}

/// Client-specific handshake performed once the service is connected.
#[async_trait]
pub(crate) trait Registrar<S: ?Sized + Send + Sync + 'static>: Send + Sync {
    /// Register the client's callbacks. `Ok(false)` is a refusal.
    async fn register(&self, service: &S) -> Result<bool, IpcError>;

    async fn unregister(&self, service: &S) -> Result<(), IpcError>;
}

// =============================================================================
// Shared Connection State
// =============================================================================

/// State shared between a client's public handle and its dispatch task.
pub(crate) struct ConnectionCore<S: ?Sized + Send + Sync + 'static> {
    action: String,
    binder: Arc<dyn ServiceBinder<S>>,
    registrar: Arc<dyn Registrar<S>>,
    /// The live service, set only after registration succeeded.
    live: Mutex<Option<Arc<S>>>,
    failed_binds: AtomicU32,
    bound: AtomicBool,
    shut_down: AtomicBool,
}

impl<S: ?Sized + Send + Sync + 'static> ConnectionCore<S> {
    pub(crate) fn new(
        action: impl Into<String>,
        binder: Arc<dyn ServiceBinder<S>>,
        registrar: Arc<dyn Registrar<S>>,
    ) -> Self {
        Self {
            action: action.into(),
            binder,
            registrar,
            live: Mutex::new(None),
            failed_binds: AtomicU32::new(0),
            bound: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn action(&self) -> &str {
        &self.action
    }

    /// The registered service, if any.
    pub(crate) fn live_service(&self) -> Option<Arc<S>> {
        lock(&self.live).clone()
    }

    fn set_live(&self, service: Option<Arc<S>>) {
        *lock(&self.live) = service;
    }

    /// Consecutive failed bind or registration attempts.
    #[cfg(test)]
    pub(crate) fn failed_binds(&self) -> u32 {
        self.failed_binds.load(Ordering::SeqCst)
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn unbind(&self) {
        if self.bound.swap(false, Ordering::SeqCst) {
            self.binder.unbind(&self.action);
        }
    }

    /// Unregister from the service (best effort) and release the binding.
    ///
    /// The caller destroys its dispatch queue first so no rebind can run
    /// afterwards. Idempotent.
    pub(crate) async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let service = lock(&self.live).take();
        if let Some(service) = service {
            if let Err(e) = self.registrar.unregister(&*service).await {
                tracing::debug!("Ignoring unregister failure for {}: {}", self.action, e);
            }
        }
        self.unbind();
        tracing::info!("Shut down connection to {}", self.action);
    }

    /// Synchronous part of [`ConnectionCore::shutdown`], for `Drop`.
    pub(crate) fn shutdown_now(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_live(None);
        self.unbind();
    }
}

// =============================================================================
// Transitions
// =============================================================================

/// Where the binding currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Binding,
    Registering,
    Connected,
    /// A rebind is scheduled.
    Retrying,
    /// Attempts exhausted; only an explicit reconnect leaves this phase.
    Failed,
    ShutDown,
}

/// Connection control messages, handled on the dispatch task.
pub(crate) enum Control<S: ?Sized> {
    /// Start (or restart) binding.
    Bind,
    /// Owner asked to recover from [`Phase::Failed`].
    Reconnect,
    /// Transport notification for bind request `generation`.
    Binding {
        generation: u64,
        event: BindingEvent<S>,
    },
}

/// Everything a client's dispatch queue carries.
pub(crate) enum Message<S: ?Sized, E> {
    Control(Control<S>),
    /// Client-specific notification (state report, input event, ...).
    Client(E),
}

/// Outcomes the owning client turns into listener callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionEvent {
    /// Callbacks registered; the retry counter was reset.
    Registered,
    /// An established binding went away; a retry may follow.
    Lost,
    /// Attempts exhausted. Reported once.
    GaveUp,
}

/// Drives [`ConnectionCore`] through bind, register and retry.
pub(crate) struct Reconnector<S: ?Sized + Send + Sync + 'static, E> {
    core: Arc<ConnectionCore<S>>,
    queue: DispatchQueue<Message<S, E>>,
    policy: RetryPolicy,
    phase: Phase,
    /// Incremented per bind request; stale notifications are dropped.
    generation: u64,
}

impl<S, E> Reconnector<S, E>
where
    S: ?Sized + Send + Sync + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(
        core: Arc<ConnectionCore<S>>,
        queue: DispatchQueue<Message<S, E>>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            core,
            queue,
            policy,
            phase: Phase::Idle,
            generation: 0,
        }
    }

    /// Whether notices the service sends through the registered callback
    /// should reach the owner. Notices queued by a registration that then
    /// failed are handled once the phase has moved on, and get dropped.
    pub(crate) fn accepts_service_notices(&self) -> bool {
        matches!(self.phase, Phase::Registering | Phase::Connected)
    }

    /// Apply one control message.
    pub(crate) async fn handle(&mut self, control: Control<S>) -> Vec<ConnectionEvent> {
        if self.core.is_shut_down() {
            self.phase = Phase::ShutDown;
            return Vec::new();
        }
        match control {
            Control::Bind => self.bind(),
            Control::Reconnect => self.reconnect(),
            Control::Binding { generation, event } => {
                if generation != self.generation {
                    tracing::debug!(
                        "Ignoring notification from superseded binding to {}",
                        self.core.action
                    );
                    return Vec::new();
                }
                match event {
                    BindingEvent::Connected(service) => self.on_connected(service).await,
                    BindingEvent::Disconnected => self.on_disconnected(),
                }
            }
        }
    }

    fn bind(&mut self) -> Vec<ConnectionEvent> {
        if self.phase == Phase::Failed {
            return Vec::new();
        }

        // Start over from a clean slate.
        self.core.set_live(None);
        self.core.unbind();

        self.generation += 1;
        self.phase = Phase::Binding;

        if self.core.binder.bind(&self.core.action, self.binding_events()) {
            self.core.bound.store(true, Ordering::SeqCst);
            tracing::debug!(
                "Bind request {} to {} accepted",
                self.generation,
                self.core.action
            );
            Vec::new()
        } else {
            tracing::warn!("Failed to bind to {}", self.core.action);
            self.schedule_rebind()
        }
    }

    fn binding_events(&self) -> BindingEvents<S> {
        let queue = self.queue.clone();
        let generation = self.generation;
        BindingEvents::new(move |event| {
            queue.post(Message::Control(Control::Binding { generation, event }));
        })
    }

    fn reconnect(&mut self) -> Vec<ConnectionEvent> {
        if self.phase != Phase::Failed {
            tracing::debug!("Reconnect ignored while {:?}", self.phase);
            return Vec::new();
        }
        tracing::info!("Reconnecting to {} on request", self.core.action);
        self.core.failed_binds.store(0, Ordering::SeqCst);
        self.phase = Phase::Idle;
        self.bind()
    }

    async fn on_connected(&mut self, service: Arc<S>) -> Vec<ConnectionEvent> {
        if self.phase != Phase::Binding {
            tracing::debug!(
                "Ignoring connection to {} while {:?}",
                self.core.action,
                self.phase
            );
            return Vec::new();
        }

        self.phase = Phase::Registering;
        match self.core.registrar.register(&*service).await {
            Ok(true) => {
                self.core.set_live(Some(Arc::clone(&service)));
                if self.core.is_shut_down() {
                    // Shutdown ran while we were registering. Whoever takes
                    // the service unregisters it.
                    let orphan = lock(&self.core.live).take();
                    if let Some(orphan) = orphan {
                        if let Err(e) = self.core.registrar.unregister(&*orphan).await {
                            tracing::debug!("Ignoring unregister failure: {}", e);
                        }
                    }
                    self.phase = Phase::ShutDown;
                    return Vec::new();
                }
                self.core.failed_binds.store(0, Ordering::SeqCst);
                self.phase = Phase::Connected;
                tracing::info!("Registered with {}", self.core.action);
                vec![ConnectionEvent::Registered]
            }
            Ok(false) => {
                tracing::warn!("{} refused callback registration", self.core.action);
                self.schedule_rebind()
            }
            Err(e) => {
                tracing::warn!("Registration with {} failed: {}", self.core.action, e);
                self.schedule_rebind()
            }
        }
    }

    fn on_disconnected(&mut self) -> Vec<ConnectionEvent> {
        match self.phase {
            Phase::Binding | Phase::Registering | Phase::Connected => {}
            Phase::Idle | Phase::Retrying | Phase::Failed | Phase::ShutDown => {
                tracing::debug!("Ignoring disconnect while {:?}", self.phase);
                return Vec::new();
            }
        }

        tracing::warn!("Lost connection to {}", self.core.action);
        self.core.set_live(None);
        let mut events = vec![ConnectionEvent::Lost];
        events.extend(self.schedule_rebind());
        events
    }

    fn schedule_rebind(&mut self) -> Vec<ConnectionEvent> {
        let failures = self.core.failed_binds.fetch_add(1, Ordering::SeqCst) + 1;

        match self.policy.after_failures(failures) {
            Some(delay) => {
                tracing::warn!(
                    "Rebinding to {} in {:?} (failure {} of {})",
                    self.core.action,
                    delay,
                    failures,
                    self.policy.max_attempts
                );
                self.phase = Phase::Retrying;
                self.queue
                    .post_delayed(Message::Control(Control::Bind), delay);
                Vec::new()
            }
            None => {
                tracing::error!(
                    "Giving up on {} after {} failed attempts",
                    self.core.action,
                    failures
                );
                self.phase = Phase::Failed;
                self.core.unbind();
                vec![ConnectionEvent::GaveUp]
            }
        }
    }
}
