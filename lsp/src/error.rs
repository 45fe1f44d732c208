//! Error type for LSP client operations.

use std::path::PathBuf;

use crate::codec::CodecError;
use crate::protocol::ResponseError;
use crate::types::LifecycleState;

#[derive(Debug, thiserror::Error)]
pub enum LspError {
    #[error("failed to start language server `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("language server executable `{0}` not found in PATH")]
    CommandNotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("failed to (de)serialize LSP payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("language server returned error for `{method}`: {error}")]
    Rpc {
        method: String,
        error: ResponseError,
    },
    #[error("connection to language server closed")]
    ConnectionClosed,
    #[error("request `{0}` was cancelled")]
    Cancelled(String),
    #[error("request `{0}` timed out")]
    Timeout(String),
    #[error("cannot notify change for unopened file: {}", .0.display())]
    NotOpen(PathBuf),
    #[error("cannot convert path to file URI: {}", .0.display())]
    InvalidPath(PathBuf),
    #[error("language server client already closed")]
    AlreadyClosed,
    #[error("cannot {operation} while the client is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

pub type Result<T, E = LspError> = std::result::Result<T, E>;
