//! Multiplexed JSON-RPC 2.0 connection to a braille service.
//!
//! Unlike a plain request/response client, a service connection carries
//! traffic both ways: our requests, their responses, and callbacks the
//! service sends on its own. A reader task owns the read half, completes
//! pending requests by id and forwards everything else to a notification
//! handler.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::connection::lock;
use crate::ipc::framing::{read_message, write_message};
use crate::ipc::protocol::{Incoming, JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Transport and RPC failures.
///
/// Public client operations never return these; they are logged and turned
/// into `None`/`false`.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to connect to the service socket.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    /// Request timed out waiting for a response.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Protocol-level error (framing, encoding).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Service returned a JSON-RPC error response.
    #[error("Server error {code}: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// The connection closed before a response arrived.
    #[error("Connection closed")]
    Closed,

    /// No service is currently bound.
    #[error("Not connected")]
    NotConnected,

    /// Constructed outside of a tokio runtime.
    #[error("No tokio runtime available")]
    NoRuntime,
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                IpcError::ConnectionFailed(err)
            }
            _ => IpcError::Io(err),
        }
    }
}

impl From<JsonRpcError> for IpcError {
    fn from(err: JsonRpcError) -> Self {
        IpcError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// A live connection to one service.
///
/// Dropping the connection stops the reader task without reporting a close.
pub struct RpcConnection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    request_id: AtomicU64,
    timeout: Duration,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl RpcConnection {
    /// Connect to the service socket at `socket_path`.
    ///
    /// `on_notification` runs on the reader task for every callback the
    /// service sends. `on_closed` runs once if the service closes the stream.
    pub async fn connect<N, C>(
        socket_path: &Path,
        request_timeout: Duration,
        on_notification: N,
        on_closed: C,
    ) -> Result<Self, IpcError>
    where
        N: Fn(JsonRpcRequest) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(IpcError::ConnectionFailed)?;
        Ok(Self::from_stream(stream, request_timeout, on_notification, on_closed))
    }

    /// Wrap an already connected stream. Must be called within a runtime.
    pub fn from_stream<N, C>(
        stream: UnixStream,
        request_timeout: Duration,
        on_notification: N,
        on_closed: C,
    ) -> Self
    where
        N: Fn(JsonRpcRequest) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            BufReader::new(read_half),
            Arc::clone(&pending),
            Arc::clone(&closed),
            on_notification,
            on_closed,
        ));

        Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            request_id: AtomicU64::new(1),
            timeout: request_timeout,
            closed,
            reader,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its result, bounded by the request timeout.
    pub async fn call<P>(&self, method: &str, params: &P) -> Result<Value, IpcError>
    where
        P: Serialize + ?Sized,
    {
        if self.is_closed() {
            return Err(IpcError::Closed);
        }

        let params = serde_json::to_value(params)
            .map_err(|e| IpcError::Protocol(format!("Failed to serialize params: {}", e)))?;
        let id = self.next_id();
        let request = JsonRpcRequest::new(method, params, id);

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if let Err(e) = self.send(&request).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        match timeout(self.timeout, rx).await {
            Ok(Ok(response)) => process_response(response),
            Ok(Err(_)) => Err(IpcError::Closed),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(IpcError::Timeout(self.timeout))
            }
        }
    }

    /// Like [`RpcConnection::call`], decoding the result into `R`.
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R, IpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let result = self.call(method, params).await?;
        serde_json::from_value(result).map_err(|e| {
            IpcError::Protocol(format!("Failed to parse {} result: {}", method, e))
        })
    }

    /// Send a notification; no response is expected.
    pub async fn notify<P>(&self, method: &str, params: &P) -> Result<(), IpcError>
    where
        P: Serialize + ?Sized,
    {
        if self.is_closed() {
            return Err(IpcError::Closed);
        }
        let params = serde_json::to_value(params)
            .map_err(|e| IpcError::Protocol(format!("Failed to serialize params: {}", e)))?;
        self.send(&JsonRpcRequest::notification(method, params)).await
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<(), IpcError> {
        let request_json = serde_json::to_string(request)
            .map_err(|e| IpcError::Protocol(format!("Failed to serialize request: {}", e)))?;

        let send = async {
            let mut writer = self.writer.lock().await;
            write_message(&mut *writer, &request_json).await
        };
        match timeout(self.timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(IpcError::Protocol(format!("Failed to send request: {:#}", e))),
            Err(_) => Err(IpcError::Timeout(self.timeout)),
        }
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Extract the result or error of a response. A missing result is `null`.
fn process_response(response: JsonRpcResponse) -> Result<Value, IpcError> {
    if let Some(err) = response.error {
        return Err(err.into());
    }
    Ok(response.result.unwrap_or(Value::Null))
}

async fn read_loop<N, C>(
    mut reader: BufReader<OwnedReadHalf>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    on_notification: N,
    on_closed: C,
) where
    N: Fn(JsonRpcRequest) + Send + Sync + 'static,
    C: FnOnce() + Send + 'static,
{
    loop {
        let text = match read_message(&mut reader).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::debug!("Service closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!("Dropping service connection: {:#}", e);
                break;
            }
        };

        match serde_json::from_str::<Incoming>(&text) {
            Ok(Incoming::Notification(request)) => on_notification(request),
            Ok(Incoming::Response(response)) => {
                let waiter = response.id.and_then(|id| lock(&pending).remove(&id));
                match waiter {
                    // The caller may have timed out meanwhile.
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!("Discarding response with unknown id {:?}", response.id),
                }
            }
            Err(e) => tracing::warn!("Ignoring malformed message from service: {}", e),
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every outstanding call with `Closed`.
    lock(&pending).clear();
    on_closed();
}
