//! Braille display and translation client.
//!
//! This library talks to the out-of-process braille services:
//!
//! - `display` - reconnecting client of the braille display service
//! - `translate` - reconnecting client of the braille translator service
//! - `command` / `event` - input commands, events and key bindings
//! - `connection` - bind/register/backoff state machine shared by both clients
//! - `dispatch` - single-consumer queue that runs the owner's listeners
//! - `ipc` - Unix socket transport (JSON-RPC 2.0 with Content-Length framing)
//!
//! # Display client
//!
//! ```ignore
//! use braille_client::{ClientConfig, ConnectionState, Display, DisplayProperties, SocketBinder};
//!
//! let config = ClientConfig::from_env();
//! let binder = Arc::new(SocketBinder::current(config.clone())?);
//! let display = Display::new(binder, &config, |state: ConnectionState, _: Option<DisplayProperties>| {
//!     println!("display {}", state);
//! })?;
//! display.display_dots(&[0x01, 0x03, 0x09]).await;
//! display.shutdown().await;
//! ```

pub mod command;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod display;
pub mod event;
pub mod ipc;
pub mod logging;
pub mod translate;

pub use command::{
    argument_type, command_to_string, string_to_command, ArgumentKind, BrailleDots, Command,
};
pub use config::ClientConfig;
pub use connection::{BindingEvent, BindingEvents, RetryPolicy, ServiceBinder};
pub use display::{
    ConnectionState, ConnectionStateListener, Display, DisplayCallback, DisplayProperties,
    DisplayService, InputEventListener,
};
pub use event::{InputEvent, KeyBinding};
pub use ipc::{IpcError, SocketBinder};
pub use logging::init_logging;
pub use translate::{
    InitListener, InitStatus, Translator, TranslatorCallback, TranslatorManager,
    TranslatorService,
};
