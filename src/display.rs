//! Client for the braille display service.
//!
//! [`Display`] binds to the display service, registers a callback and keeps
//! the binding alive across service restarts. Connection state changes and
//! input events are delivered to the owner's listeners on a single dispatch
//! task, in the order the service produced them.
//!
//! # Usage
//!
//! ```ignore
//! let binder = Arc::new(SocketBinder::new(config.clone(), Handle::current()));
//! let display = Display::new(binder, &config, |state: ConnectionState, properties: Option<DisplayProperties>| {
//!     tracing::info!("Display is now {:?} ({:?})", state, properties);
//! })?;
//! display.set_input_listener(|event: InputEvent| println!("{}", event));
//! display.display_dots(&[0b0000_0001, 0b0000_0011]).await;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::config::ClientConfig;
use crate::connection::{
    lock, ConnectionCore, ConnectionEvent, Control, Message, Reconnector, Registrar,
    ServiceBinder,
};
use crate::dispatch::{DispatchQueue, MessageHandler};
use crate::event::{InputEvent, KeyBinding};
use crate::ipc::IpcError;

/// Action name the display service is published under.
pub const ACTION_DISPLAY_SERVICE: &str =
    "com.googlecode.eyesfree.braille.service.ACTION_DISPLAY_SERVICE";

/// Connection state reported to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No display is connected; the client may be retrying.
    NotConnected,
    Connected,
    /// The service could not be reached after repeated attempts.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::NotConnected => "NOT_CONNECTED",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Properties of a connected braille display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayProperties {
    num_text_cells: u32,
    num_status_cells: u32,
    #[serde(default)]
    key_bindings: Vec<KeyBinding>,
    #[serde(default)]
    friendly_key_names: BTreeMap<String, String>,
}

impl DisplayProperties {
    pub fn new(
        num_text_cells: u32,
        num_status_cells: u32,
        key_bindings: Vec<KeyBinding>,
        friendly_key_names: BTreeMap<String, String>,
    ) -> Self {
        Self {
            num_text_cells,
            num_status_cells,
            key_bindings,
            friendly_key_names,
        }
    }

    pub fn num_text_cells(&self) -> u32 {
        self.num_text_cells
    }

    pub fn num_status_cells(&self) -> u32 {
        self.num_status_cells
    }

    pub fn key_bindings(&self) -> &[KeyBinding] {
        &self.key_bindings
    }

    /// Map from raw key names to names suitable for presenting to users.
    pub fn friendly_key_names(&self) -> &BTreeMap<String, String> {
        &self.friendly_key_names
    }

    /// Friendly name of `key_name`, falling back to the raw name.
    pub fn friendly_key_name<'a>(&'a self, key_name: &'a str) -> &'a str {
        self.friendly_key_names
            .get(key_name)
            .map(String::as_str)
            .unwrap_or(key_name)
    }
}

impl fmt::Display for DisplayProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DisplayProperties {{textCells={}, statusCells={}, keyBindings={}}}",
            self.num_text_cells,
            self.num_status_cells,
            self.key_bindings.len()
        )
    }
}

/// Remote side of the display protocol.
#[async_trait]
pub trait DisplayService: Send + Sync {
    /// Register `callback` for connection and input notifications.
    /// `Ok(false)` means the service refused.
    async fn register_callback(&self, callback: Arc<dyn DisplayCallback>) -> Result<bool, IpcError>;

    /// Stop notifying `callback`. Oneway: no confirmation is awaited.
    async fn unregister_callback(&self, callback: Arc<dyn DisplayCallback>) -> Result<(), IpcError>;

    /// Show raw dot patterns, one byte per cell.
    async fn display_dots(&self, patterns: &[u8]) -> Result<(), IpcError>;
}

/// Notifications the display service sends to a registered client.
///
/// Called from transport tasks; implementations must not block.
pub trait DisplayCallback: Send + Sync {
    fn on_display_connected(&self, properties: DisplayProperties);
    fn on_display_disconnected(&self);
    fn on_input(&self, event: InputEvent);
}

/// Receives connection state changes. `properties` is set only with
/// [`ConnectionState::Connected`].
pub trait ConnectionStateListener: Send + 'static {
    fn on_connection_state_changed(
        &mut self,
        state: ConnectionState,
        properties: Option<DisplayProperties>,
    );
}

impl<F> ConnectionStateListener for F
where
    F: FnMut(ConnectionState, Option<DisplayProperties>) + Send + 'static,
{
    fn on_connection_state_changed(
        &mut self,
        state: ConnectionState,
        properties: Option<DisplayProperties>,
    ) {
        self(state, properties)
    }
}

/// Receives input events from the display.
pub trait InputEventListener: Send + 'static {
    fn on_input_event(&mut self, event: InputEvent);
}

impl<F> InputEventListener for F
where
    F: FnMut(InputEvent) + Send + 'static,
{
    fn on_input_event(&mut self, event: InputEvent) {
        self(event)
    }
}

enum DisplayNotice {
    State {
        state: ConnectionState,
        properties: Option<DisplayProperties>,
    },
    Input(InputEvent),
    InputListener(Option<Box<dyn InputEventListener>>),
}

type DisplayMessage = Message<dyn DisplayService, DisplayNotice>;

/// Callback handed to the service; forwards everything to the dispatch task.
struct ServiceCallback {
    queue: DispatchQueue<DisplayMessage>,
}

impl DisplayCallback for ServiceCallback {
    fn on_display_connected(&self, properties: DisplayProperties) {
        self.queue.post(Message::Client(DisplayNotice::State {
            state: ConnectionState::Connected,
            properties: Some(properties),
        }));
    }

    fn on_display_disconnected(&self) {
        self.queue.post(Message::Client(DisplayNotice::State {
            state: ConnectionState::NotConnected,
            properties: None,
        }));
    }

    fn on_input(&self, event: InputEvent) {
        self.queue.post(Message::Client(DisplayNotice::Input(event)));
    }
}

struct CallbackRegistrar {
    callback: Arc<dyn DisplayCallback>,
}

#[async_trait]
impl Registrar<dyn DisplayService> for CallbackRegistrar {
    async fn register(&self, service: &(dyn DisplayService + 'static)) -> Result<bool, IpcError> {
        service.register_callback(Arc::clone(&self.callback)).await
    }

    async fn unregister(&self, service: &(dyn DisplayService + 'static)) -> Result<(), IpcError> {
        service.unregister_callback(Arc::clone(&self.callback)).await
    }
}

#[derive(Default)]
struct DisplayStatus {
    /// `None` until the first state is reported.
    state: Option<ConnectionState>,
    properties: Option<DisplayProperties>,
}

struct DisplayDispatcher {
    reconnector: Reconnector<dyn DisplayService, DisplayNotice>,
    status: Arc<Mutex<DisplayStatus>>,
    state_listener: Box<dyn ConnectionStateListener>,
    input_listener: Option<Box<dyn InputEventListener>>,
}

impl DisplayDispatcher {
    fn report_state(&mut self, state: ConnectionState, properties: Option<DisplayProperties>) {
        let properties = match state {
            ConnectionState::Connected => properties,
            ConnectionState::NotConnected | ConnectionState::Error => None,
        };

        {
            let mut status = lock(&self.status);
            if status.state == Some(state) {
                // Same state again; keep any refreshed properties quietly.
                if properties.is_some() {
                    status.properties = properties;
                }
                tracing::debug!("Suppressing repeated display state {}", state);
                return;
            }
            status.state = Some(state);
            status.properties = properties.clone();
        }

        tracing::debug!("Display state changed to {}", state);
        self.state_listener
            .on_connection_state_changed(state, properties);
    }
}

#[async_trait]
impl MessageHandler<DisplayMessage> for DisplayDispatcher {
    async fn handle_message(&mut self, message: DisplayMessage) {
        match message {
            Message::Control(control) => {
                for event in self.reconnector.handle(control).await {
                    match event {
                        ConnectionEvent::Registered => {
                            tracing::debug!("Display callback registered");
                        }
                        ConnectionEvent::Lost => {
                            self.report_state(ConnectionState::NotConnected, None);
                        }
                        ConnectionEvent::GaveUp => {
                            self.report_state(ConnectionState::Error, None);
                        }
                    }
                }
            }
            Message::Client(DisplayNotice::State { state, properties }) => {
                if self.reconnector.accepts_service_notices() {
                    self.report_state(state, properties);
                } else {
                    tracing::debug!("Ignoring display state {} from unregistered service", state);
                }
            }
            Message::Client(DisplayNotice::Input(event)) => match self.input_listener.as_mut() {
                Some(listener) => listener.on_input_event(event),
                None => tracing::debug!("No input listener for {}", event),
            },
            Message::Client(DisplayNotice::InputListener(listener)) => {
                self.input_listener = listener;
            }
        }
    }
}

/// Reconnecting client of the braille display service.
///
/// Dropping the client stops all callbacks and releases the binding without
/// unregistering; call [`Display::shutdown`] for an orderly goodbye.
pub struct Display {
    core: Arc<ConnectionCore<dyn DisplayService>>,
    queue: DispatchQueue<DisplayMessage>,
    status: Arc<Mutex<DisplayStatus>>,
}

impl Display {
    /// Create a client bound to the current tokio runtime and start binding.
    ///
    /// Fails only when called outside a runtime.
    pub fn new<B, L>(binder: Arc<B>, config: &ClientConfig, listener: L) -> Result<Self, IpcError>
    where
        B: ServiceBinder<dyn DisplayService> + 'static,
        L: ConnectionStateListener,
    {
        let runtime = Handle::try_current().map_err(|_| IpcError::NoRuntime)?;
        Ok(Self::with_runtime(&runtime, binder, config, listener))
    }

    /// Create a client whose listeners run on `runtime`.
    pub fn with_runtime<B, L>(
        runtime: &Handle,
        binder: Arc<B>,
        config: &ClientConfig,
        listener: L,
    ) -> Self
    where
        B: ServiceBinder<dyn DisplayService> + 'static,
        L: ConnectionStateListener,
    {
        let (queue, inbox) = DispatchQueue::new();
        let callback = Arc::new(ServiceCallback {
            queue: queue.clone(),
        });
        let core = Arc::new(ConnectionCore::new(
            ACTION_DISPLAY_SERVICE,
            binder as Arc<dyn ServiceBinder<dyn DisplayService>>,
            Arc::new(CallbackRegistrar { callback }),
        ));
        let status = Arc::new(Mutex::new(DisplayStatus::default()));

        inbox.spawn(
            runtime,
            DisplayDispatcher {
                reconnector: Reconnector::new(Arc::clone(&core), queue.clone(), config.retry),
                status: Arc::clone(&status),
                state_listener: Box::new(listener),
                input_listener: None,
            },
        );
        queue.post(Message::Control(Control::Bind));

        Self {
            core,
            queue,
            status,
        }
    }

    /// Deliver subsequent input events to `listener`, replacing any other.
    ///
    /// Takes effect in order with events already queued.
    pub fn set_input_listener<L>(&self, listener: L)
    where
        L: InputEventListener,
    {
        self.queue.post(Message::Client(DisplayNotice::InputListener(Some(
            Box::new(listener),
        ))));
    }

    /// Drop input events from now on.
    pub fn clear_input_listener(&self) {
        self.queue
            .post(Message::Client(DisplayNotice::InputListener(None)));
    }

    /// Last state reported to the listener; `NotConnected` before the first.
    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.status)
            .state
            .unwrap_or(ConnectionState::NotConnected)
    }

    /// Properties of the connected display, if any.
    pub fn display_properties(&self) -> Option<DisplayProperties> {
        lock(&self.status).properties.clone()
    }

    /// Show dot patterns on the display.
    ///
    /// Returns `false` when not connected or when the service call failed.
    pub async fn display_dots(&self, patterns: &[u8]) -> bool {
        let Some(service) = self.core.live_service() else {
            tracing::debug!("Dropping {} cell(s): display service not bound", patterns.len());
            return false;
        };
        match service.display_dots(patterns).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("display_dots failed: {}", e);
                false
            }
        }
    }

    /// Start over after [`ConnectionState::Error`]. No effect otherwise.
    pub fn reconnect(&self) {
        self.queue.post(Message::Control(Control::Reconnect));
    }

    /// Cancel pending retries and callbacks, unregister and unbind.
    ///
    /// No listener runs after this returns. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.queue.destroy();
        self.core.shutdown().await;
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.queue.destroy();
        self.core.shutdown_now();
    }
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display")
            .field("action", &self.core.action())
            .field("state", &self.connection_state())
            .finish()
    }
}
