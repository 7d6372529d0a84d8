//! Service proxies over an [`RpcConnection`].
//!
//! Each proxy implements the service trait by issuing requests and routes
//! the service's notifications into whichever callback is registered.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::connection::lock;
use crate::display::{DisplayCallback, DisplayProperties, DisplayService};
use crate::ipc::client::{IpcError, RpcConnection};
use crate::ipc::protocol::{
    methods, BackTranslateParams, DisplayDotsParams, InitParams, InputParams, JsonRpcRequest,
    TableParams, TranslateParams,
};
use crate::translate::{TranslatorCallback, TranslatorService};

type Slot<C> = Arc<Mutex<Option<Arc<C>>>>;

fn same_callback<C: ?Sized>(a: &Arc<C>, b: &Arc<C>) -> bool {
    // Compare data pointers only; vtables may differ across codegen units.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Display service reached over a Unix socket.
pub struct RemoteDisplay {
    connection: RpcConnection,
    callback: Slot<dyn DisplayCallback>,
}

impl RemoteDisplay {
    pub async fn connect<C>(
        socket_path: &Path,
        request_timeout: Duration,
        on_closed: C,
    ) -> Result<Arc<Self>, IpcError>
    where
        C: FnOnce() + Send + 'static,
    {
        let callback: Slot<dyn DisplayCallback> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&callback);
        let connection = RpcConnection::connect(
            socket_path,
            request_timeout,
            move |request| route_display_notification(&slot, request),
            on_closed,
        )
        .await?;
        Ok(Arc::new(Self {
            connection,
            callback,
        }))
    }
}

fn route_display_notification(slot: &Mutex<Option<Arc<dyn DisplayCallback>>>, request: JsonRpcRequest) {
    let Some(callback) = lock(slot).clone() else {
        tracing::debug!("No display callback for {}", request.method);
        return;
    };

    match request.method.as_str() {
        methods::ON_DISPLAY_CONNECTED => {
            match serde_json::from_value::<DisplayProperties>(request.params) {
                Ok(properties) => callback.on_display_connected(properties),
                Err(e) => tracing::warn!("Malformed display properties: {}", e),
            }
        }
        methods::ON_DISPLAY_DISCONNECTED => callback.on_display_disconnected(),
        methods::ON_INPUT => match serde_json::from_value::<InputParams>(request.params) {
            Ok(params) => callback.on_input(params.event),
            Err(e) => tracing::warn!("Malformed input event: {}", e),
        },
        other => tracing::debug!("Ignoring unknown display notification {}", other),
    }
}

#[async_trait]
impl DisplayService for RemoteDisplay {
    async fn register_callback(&self, callback: Arc<dyn DisplayCallback>) -> Result<bool, IpcError> {
        // Install first: the service may notify before its reply arrives.
        *lock(&self.callback) = Some(Arc::clone(&callback));

        let result = self
            .connection
            .request::<Value, bool>(methods::DISPLAY_REGISTER_CALLBACK, &Value::Null)
            .await;
        if !matches!(result, Ok(true)) {
            let mut slot = lock(&self.callback);
            if slot.as_ref().is_some_and(|current| same_callback(current, &callback)) {
                *slot = None;
            }
        }
        result
    }

    async fn unregister_callback(&self, callback: Arc<dyn DisplayCallback>) -> Result<(), IpcError> {
        {
            let mut slot = lock(&self.callback);
            if slot.as_ref().is_some_and(|current| same_callback(current, &callback)) {
                *slot = None;
            }
        }
        self.connection
            .notify(methods::DISPLAY_UNREGISTER_CALLBACK, &Value::Null)
            .await
    }

    async fn display_dots(&self, patterns: &[u8]) -> Result<(), IpcError> {
        let params = DisplayDotsParams {
            patterns: patterns.to_vec(),
        };
        self.connection.call(methods::DISPLAY_DOTS, &params).await?;
        Ok(())
    }
}

/// Translator service reached over a Unix socket.
pub struct RemoteTranslator {
    connection: RpcConnection,
    callback: Slot<dyn TranslatorCallback>,
}

impl RemoteTranslator {
    pub async fn connect<C>(
        socket_path: &Path,
        request_timeout: Duration,
        on_closed: C,
    ) -> Result<Arc<Self>, IpcError>
    where
        C: FnOnce() + Send + 'static,
    {
        let callback: Slot<dyn TranslatorCallback> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&callback);
        let connection = RpcConnection::connect(
            socket_path,
            request_timeout,
            move |request| route_translator_notification(&slot, request),
            on_closed,
        )
        .await?;
        Ok(Arc::new(Self {
            connection,
            callback,
        }))
    }
}

fn route_translator_notification(
    slot: &Mutex<Option<Arc<dyn TranslatorCallback>>>,
    request: JsonRpcRequest,
) {
    if request.method != methods::ON_INIT {
        tracing::debug!("Ignoring unknown translator notification {}", request.method);
        return;
    }
    let Some(callback) = lock(slot).clone() else {
        tracing::debug!("No translator callback for {}", request.method);
        return;
    };
    match serde_json::from_value::<InitParams>(request.params) {
        Ok(params) => callback.on_init(params.status),
        Err(e) => tracing::warn!("Malformed init notification: {}", e),
    }
}

#[async_trait]
impl TranslatorService for RemoteTranslator {
    async fn set_callback(&self, callback: Arc<dyn TranslatorCallback>) -> Result<(), IpcError> {
        *lock(&self.callback) = Some(callback);
        self.connection
            .call(methods::TRANSLATOR_SET_CALLBACK, &Value::Null)
            .await?;
        Ok(())
    }

    async fn check_table(&self, table_name: &str) -> Result<bool, IpcError> {
        let params = TableParams {
            table_name: table_name.to_string(),
        };
        self.connection
            .request(methods::TRANSLATOR_CHECK_TABLE, &params)
            .await
    }

    async fn translate(&self, text: &str, table_name: &str) -> Result<Option<Vec<u8>>, IpcError> {
        let params = TranslateParams {
            text: text.to_string(),
            table_name: table_name.to_string(),
        };
        self.connection
            .request(methods::TRANSLATOR_TRANSLATE, &params)
            .await
    }

    async fn back_translate(
        &self,
        cells: &[u8],
        table_name: &str,
    ) -> Result<Option<String>, IpcError> {
        let params = BackTranslateParams {
            cells: cells.to_vec(),
            table_name: table_name.to_string(),
        };
        self.connection
            .request(methods::TRANSLATOR_BACK_TRANSLATE, &params)
            .await
    }
}
