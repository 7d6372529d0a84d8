//! Unix socket transport for the braille services.
//!
//! Each service listens on `<socket_dir>/<action>.sock` and speaks JSON-RPC
//! 2.0. Traffic flows both ways over one connection: the client issues
//! requests, and the service answers them and sends callbacks as
//! notifications.
//!
//! ```text
//! ┌──────────────────┐        Unix Socket         ┌──────────────────┐
//! │  Display /       │  ─── requests ───────────► │  braille display │
//! │  TranslatorMgr   │  ◄── responses ─────────── │  or translator   │
//! │  (SocketBinder)  │  ◄── notifications ─────── │  service         │
//! └──────────────────┘   JSON-RPC 2.0 + framing   └──────────────────┘
//! ```
//!
//! # Protocol
//!
//! Messages use HTTP-style Content-Length framing (same as LSP):
//!
//! ```text
//! Content-Length: 60\r\n
//! \r\n
//! {"jsonrpc":"2.0","method":"display.registerCallback","id":1}
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use braille_client::ipc::SocketBinder;
//!
//! let binder = Arc::new(SocketBinder::current(config.clone())?);
//! let manager = TranslatorManager::new(binder, &config, |status: InitStatus| {
//!     tracing::info!("Translator ready: {:?}", status);
//! })?;
//! ```

mod binder;
mod client;
mod framing;
pub mod protocol;
mod remote;

pub use binder::SocketBinder;
pub use client::{IpcError, RpcConnection};
pub use framing::{read_message, write_message, MAX_MESSAGE_SIZE};
pub use remote::{RemoteDisplay, RemoteTranslator};
