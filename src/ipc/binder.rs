//! [`ServiceBinder`] that finds services as Unix sockets on disk.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::config::ClientConfig;
use crate::connection::{lock, BindingEvents, ServiceBinder};
use crate::display::DisplayService;
use crate::ipc::client::IpcError;
use crate::ipc::remote::{RemoteDisplay, RemoteTranslator};
use crate::translate::TranslatorService;

/// Binds actions to `<socket_dir>/<action>.sock`.
///
/// A bind request fails immediately when the socket file is missing.
/// Otherwise the connection is made on `runtime` and reported through the
/// binding events; a later EOF from the service reports a disconnect.
pub struct SocketBinder {
    config: ClientConfig,
    runtime: Handle,
    connecting: Mutex<HashMap<String, AbortHandle>>,
}

impl SocketBinder {
    pub fn new(config: ClientConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            connecting: Mutex::new(HashMap::new()),
        }
    }

    /// Binder using the current tokio runtime.
    pub fn current(config: ClientConfig) -> Result<Self, IpcError> {
        let runtime = Handle::try_current().map_err(|_| IpcError::NoRuntime)?;
        Ok(Self::new(config, runtime))
    }

    fn bind_with<S, F, Fut>(&self, action: &str, events: BindingEvents<S>, connect: F) -> bool
    where
        S: ?Sized + Send + Sync + 'static,
        F: FnOnce(PathBuf, Duration, Box<dyn FnOnce() + Send>) -> Fut,
        Fut: Future<Output = Result<Arc<S>, IpcError>> + Send + 'static,
    {
        let socket_path = self.config.socket_path_for(action);
        if !socket_path.exists() {
            tracing::debug!("No socket for {} at {}", action, socket_path.display());
            return false;
        }

        let closed_events = events.clone();
        let connecting = connect(
            socket_path.clone(),
            self.config.request_timeout,
            Box::new(move || closed_events.disconnected()),
        );
        let task = self.runtime.spawn(async move {
            match connecting.await {
                Ok(service) => events.connected(service),
                Err(e) => {
                    tracing::warn!("Failed to connect to {}: {}", socket_path.display(), e);
                    events.disconnected();
                }
            }
        });

        if let Some(previous) = lock(&self.connecting).insert(action.to_string(), task.abort_handle()) {
            previous.abort();
        }
        true
    }

    fn release(&self, action: &str) {
        if let Some(task) = lock(&self.connecting).remove(action) {
            task.abort();
        }
    }
}

impl ServiceBinder<dyn DisplayService> for SocketBinder {
    fn bind(&self, action: &str, events: BindingEvents<dyn DisplayService>) -> bool {
        self.bind_with(action, events, |path, timeout, on_closed| async move {
            let display = RemoteDisplay::connect(&path, timeout, on_closed).await?;
            Ok::<_, IpcError>(display as Arc<dyn DisplayService>)
        })
    }

    fn unbind(&self, action: &str) {
        self.release(action);
    }
}

impl ServiceBinder<dyn TranslatorService> for SocketBinder {
    fn bind(&self, action: &str, events: BindingEvents<dyn TranslatorService>) -> bool {
        self.bind_with(action, events, |path, timeout, on_closed| async move {
            let translator = RemoteTranslator::connect(&path, timeout, on_closed).await?;
            Ok::<_, IpcError>(translator as Arc<dyn TranslatorService>)
        })
    }

    fn unbind(&self, action: &str) {
        self.release(action);
    }
}
