//! LSP client core: drives one language server over its stdio.
//!
//! [`LspClient`] spawns the server, performs the `initialize` handshake,
//! keeps the server's view of open documents in sync, caches published
//! diagnostics, answers the server's own requests, and shuts the process down
//! within a bounded time.
//!
//! ```no_run
//! # async fn demo() -> langbridge_lsp::Result<()> {
//! use std::path::Path;
//! use langbridge_lsp::LspClient;
//!
//! let client = LspClient::spawn("gopls", ["serve"])?;
//! client.initialize(Path::new("/src/project"), None).await?;
//! client.open_file(Path::new("/src/project/main.go")).await?;
//! let diagnostics = client.diagnostics_for_path(Path::new("/src/project/main.go"));
//! client.close().await?;
//! # let _ = diagnostics;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod types;

mod client;
mod correlation;
mod diagnostics;
mod dispatch;
mod documents;
mod edit;
mod error;
mod handlers;
mod language;
mod protocol;
mod quirks;
mod transport;

pub use client::LspClient;
pub use codec::{CodecError, FrameReader, FrameWriter, MAX_FRAME_BYTES};
pub use dispatch::{NotificationHandler, ServerRequestHandler};
pub use documents::OpenFileInfo;
pub use error::{LspError, Result};
pub use language::detect_language_id;
pub use protocol::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, ResponseError};
pub use quirks::ServerFamily;
pub use tokio_util::sync::CancellationToken;
pub use types::{
    ClientInfo, ClientOptions, Diagnostic, DiagnosticSeverity, InitializeResult, LifecycleState,
    Position, Range, ServerInfo, ShutdownTimeouts,
};
