//! Client for the braille translation service.
//!
//! [`TranslatorManager`] keeps a reconnecting binding to the translator
//! service and hands out [`Translator`]s bound to one translation table.
//! Every call degrades to `None` when the service is unavailable or fails.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::config::ClientConfig;
use crate::connection::{
    ConnectionCore, ConnectionEvent, Control, Message, Reconnector, Registrar, ServiceBinder,
};
use crate::dispatch::{DispatchQueue, MessageHandler};
use crate::ipc::IpcError;

/// Action name the translator service is published under.
pub const ACTION_TRANSLATOR_SERVICE: &str =
    "com.googlecode.eyesfree.braille.service.ACTION_TRANSLATOR_SERVICE";

/// Outcome of translator initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitStatus {
    Success,
    Error,
}

/// Remote side of the translation protocol.
#[async_trait]
pub trait TranslatorService: Send + Sync {
    /// Install the callback that receives `on_init`.
    async fn set_callback(&self, callback: Arc<dyn TranslatorCallback>) -> Result<(), IpcError>;

    /// Whether the service knows `table_name`.
    async fn check_table(&self, table_name: &str) -> Result<bool, IpcError>;

    /// Translate `text` to dot patterns. `None` if the service could not.
    async fn translate(&self, text: &str, table_name: &str) -> Result<Option<Vec<u8>>, IpcError>;

    /// Translate dot patterns back to text. `None` if the service could not.
    async fn back_translate(
        &self,
        cells: &[u8],
        table_name: &str,
    ) -> Result<Option<String>, IpcError>;
}

/// Notification the translator service sends once it is ready.
pub trait TranslatorCallback: Send + Sync {
    fn on_init(&self, status: InitStatus);
}

/// Receives the single initialization outcome.
pub trait InitListener: Send + 'static {
    fn on_init(self: Box<Self>, status: InitStatus);
}

impl<F> InitListener for F
where
    F: FnOnce(InitStatus) + Send + 'static,
{
    fn on_init(self: Box<Self>, status: InitStatus) {
        (*self)(status)
    }
}

enum TranslatorNotice {
    Init(InitStatus),
}

type TranslatorMessage = Message<dyn TranslatorService, TranslatorNotice>;

struct ServiceCallback {
    queue: DispatchQueue<TranslatorMessage>,
}

impl TranslatorCallback for ServiceCallback {
    fn on_init(&self, status: InitStatus) {
        self.queue
            .post(Message::Client(TranslatorNotice::Init(status)));
    }
}

/// Installing the callback is the whole handshake; there is nothing to undo.
struct CallbackRegistrar {
    callback: Arc<dyn TranslatorCallback>,
}

#[async_trait]
impl Registrar<dyn TranslatorService> for CallbackRegistrar {
    async fn register(&self, service: &(dyn TranslatorService + 'static)) -> Result<bool, IpcError> {
        service.set_callback(Arc::clone(&self.callback)).await?;
        Ok(true)
    }

    async fn unregister(&self, _service: &(dyn TranslatorService + 'static)) -> Result<(), IpcError> {
        Ok(())
    }
}

struct TranslatorDispatcher {
    reconnector: Reconnector<dyn TranslatorService, TranslatorNotice>,
    /// Taken by the first report.
    init_listener: Option<Box<dyn InitListener>>,
}

impl TranslatorDispatcher {
    fn report_init(&mut self, status: InitStatus) {
        match self.init_listener.take() {
            Some(listener) => {
                tracing::debug!("Translator initialized: {:?}", status);
                listener.on_init(status);
            }
            None => tracing::debug!("Ignoring repeated translator init {:?}", status),
        }
    }
}

#[async_trait]
impl MessageHandler<TranslatorMessage> for TranslatorDispatcher {
    async fn handle_message(&mut self, message: TranslatorMessage) {
        match message {
            Message::Control(control) => {
                for event in self.reconnector.handle(control).await {
                    match event {
                        ConnectionEvent::GaveUp => self.report_init(InitStatus::Error),
                        ConnectionEvent::Registered | ConnectionEvent::Lost => {}
                    }
                }
            }
            Message::Client(TranslatorNotice::Init(status)) => {
                if self.reconnector.accepts_service_notices() {
                    self.report_init(status);
                } else {
                    tracing::debug!("Ignoring translator init {:?} from unregistered service", status);
                }
            }
        }
    }
}

/// Reconnecting client of the braille translator service.
pub struct TranslatorManager {
    core: Arc<ConnectionCore<dyn TranslatorService>>,
    queue: DispatchQueue<TranslatorMessage>,
}

impl TranslatorManager {
    /// Create a manager bound to the current tokio runtime and start binding.
    ///
    /// `on_init` runs exactly once, with `Success` when the service reports
    /// ready or `Error` when it could not be reached.
    pub fn new<B, L>(binder: Arc<B>, config: &ClientConfig, on_init: L) -> Result<Self, IpcError>
    where
        B: ServiceBinder<dyn TranslatorService> + 'static,
        L: InitListener,
    {
        let runtime = Handle::try_current().map_err(|_| IpcError::NoRuntime)?;
        Ok(Self::with_runtime(&runtime, binder, config, on_init))
    }

    pub fn with_runtime<B, L>(runtime: &Handle, binder: Arc<B>, config: &ClientConfig, on_init: L) -> Self
    where
        B: ServiceBinder<dyn TranslatorService> + 'static,
        L: InitListener,
    {
        let (queue, inbox) = DispatchQueue::new();
        let callback = Arc::new(ServiceCallback {
            queue: queue.clone(),
        });
        let core = Arc::new(ConnectionCore::new(
            ACTION_TRANSLATOR_SERVICE,
            binder as Arc<dyn ServiceBinder<dyn TranslatorService>>,
            Arc::new(CallbackRegistrar { callback }),
        ));

        inbox.spawn(
            runtime,
            TranslatorDispatcher {
                reconnector: Reconnector::new(Arc::clone(&core), queue.clone(), config.retry),
                init_listener: Some(Box::new(on_init)),
            },
        );
        queue.post(Message::Control(Control::Bind));

        Self { core, queue }
    }

    /// A translator for `table_name`, if the service is bound and knows it.
    ///
    /// The table is checked with the service on every call.
    pub async fn get_translator(&self, table_name: &str) -> Option<Translator> {
        let Some(service) = self.core.live_service() else {
            tracing::debug!("No translator for {}: service not bound", table_name);
            return None;
        };
        match service.check_table(table_name).await {
            Ok(true) => Some(Translator {
                table_name: table_name.to_string(),
                core: Arc::downgrade(&self.core),
            }),
            Ok(false) => {
                tracing::warn!("Unknown translation table {}", table_name);
                None
            }
            Err(e) => {
                tracing::error!("Error checking translation table {}: {}", table_name, e);
                None
            }
        }
    }

    /// Cancel pending work and release the service. Safe to call repeatedly.
    ///
    /// Translators handed out earlier return `None` from then on.
    pub async fn destroy(&self) {
        self.queue.destroy();
        self.core.shutdown().await;
    }
}

impl Drop for TranslatorManager {
    fn drop(&mut self) {
        self.queue.destroy();
        self.core.shutdown_now();
    }
}

impl fmt::Debug for TranslatorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatorManager")
            .field("action", &self.core.action())
            .field("bound", &self.core.live_service().is_some())
            .finish()
    }
}

/// Translates to and from braille with one table.
#[derive(Clone)]
pub struct Translator {
    table_name: String,
    core: Weak<ConnectionCore<dyn TranslatorService>>,
}

impl Translator {
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn service(&self) -> Option<Arc<dyn TranslatorService>> {
        let core = self.core.upgrade()?;
        if core.is_shut_down() {
            return None;
        }
        core.live_service()
    }

    /// Translate `text` into dot patterns, one byte per cell.
    pub async fn translate(&self, text: &str) -> Option<Vec<u8>> {
        let service = self.service()?;
        match service.translate(text, &self.table_name).await {
            Ok(cells) => cells,
            Err(e) => {
                tracing::error!("Error translating with {}: {}", self.table_name, e);
                None
            }
        }
    }

    /// Translate dot patterns back into text.
    pub async fn back_translate(&self, cells: &[u8]) -> Option<String> {
        let service = self.service()?;
        match service.back_translate(cells, &self.table_name).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Error back translating with {}: {}", self.table_name, e);
                None
            }
        }
    }
}

impl fmt::Debug for Translator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Translator")
            .field("table_name", &self.table_name)
            .finish()
    }
}
