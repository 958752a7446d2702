//! Transport error type

use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

use super::WindowId;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to display {display}: {source}")]
    Connect {
        display: String,
        #[source]
        source: ConnectError,
    },

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("request failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("request failed: {0}")]
    ReplyOrId(#[from] ReplyOrIdError),

    #[error("required extension {0} is not available")]
    MissingExtension(&'static str),

    #[error("window {0:#x} is not known to the display")]
    UnknownWindow(WindowId),
}
