//! Transport: serialized frame writes and the single read loop.
//!
//! A [`Connection`] is shared (behind an `Arc`) between callers, which use it
//! to send requests and notifications, and the read loop task, which routes
//! every incoming frame to the correlation table or the handler registry.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::codec::{FrameReader, FrameWriter};
use crate::correlation::PendingCalls;
use crate::dispatch::HandlerRegistry;
use crate::error::{LspError, Result};
use crate::protocol::{self, Incoming, Notification, Request, Response, ResponseError};

pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Why the read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReadLoopExit {
    /// The server closed its stdout at a frame boundary.
    Eof,
    /// The stream failed or desynchronized.
    Failed(String),
}

pub(crate) struct Connection {
    /// `None` once stdin has been closed.
    writer: Mutex<Option<FrameWriter<BoxedWriter>>>,
    pub pending: PendingCalls,
    pub handlers: HandlerRegistry,
}

impl Connection {
    pub fn new(writer: BoxedWriter) -> Self {
        Self {
            writer: Mutex::new(Some(FrameWriter::new(writer))),
            pending: PendingCalls::new(),
            handlers: HandlerRegistry::default(),
        }
    }

    /// Write one frame. Concurrent callers queue on the writer lock so
    /// frames are never interleaved.
    pub async fn send(&self, message: &serde_json::Value) -> Result<()> {
        tracing::trace!(frame = %message, "LSP TX");
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(LspError::ConnectionClosed);
        };
        writer.write_frame(message).await?;
        Ok(())
    }

    /// Close the server's stdin. Later sends fail with `ConnectionClosed`.
    pub async fn close_input(&self) -> Result<()> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }
        Ok(())
    }

    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let frame = serde_json::to_value(Notification::new(method, params))?;
        self.send(&frame).await
    }

    /// Send a request and wait for its response.
    ///
    /// Cancelling `cancel`, or dropping the returned future, abandons the
    /// call: the pending entry is removed and a late response is dropped.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<serde_json::Value> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(LspError::Cancelled(method.to_string()));
        }

        let (guard, rx) = self.pending.register().ok_or(LspError::ConnectionClosed)?;
        let id = guard.id();
        let frame = serde_json::to_value(Request::new(id, method, params))?;
        self.send(&frame).await?;
        tracing::debug!(method, id, "LSP request sent");

        let delivered = match cancel {
            Some(token) => tokio::select! {
                biased;
                delivered = rx => delivered,
                () = token.cancelled() => {
                    tracing::debug!(method, id, "LSP request cancelled");
                    return Err(LspError::Cancelled(method.to_string()));
                }
            },
            None => rx.await,
        };
        drop(guard);

        match delivered {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(LspError::Rpc {
                method: method.to_string(),
                error,
            }),
            Err(_) => Err(LspError::ConnectionClosed),
        }
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        tokio::time::timeout(timeout, self.call(method, params, None))
            .await
            .map_err(|_| LspError::Timeout(method.to_string()))?
    }

    async fn reply(
        &self,
        id: serde_json::Value,
        outcome: std::result::Result<serde_json::Value, ResponseError>,
    ) -> Result<()> {
        let frame = serde_json::to_value(Response::from_outcome(id, outcome))?;
        self.send(&frame).await
    }
}

/// Read frames until the stream ends, routing each one.
///
/// Malformed frames are logged and skipped. On exit every pending call is
/// failed so no caller waits on a dead connection.
pub(crate) async fn run_read_loop<R>(conn: Arc<Connection>, reader: R) -> ReadLoopExit
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameReader::new(reader);
    let exit = loop {
        match frames.read_frame().await {
            Ok(Some(frame)) => dispatch(&conn, frame),
            Ok(None) => break ReadLoopExit::Eof,
            Err(e) if e.is_fatal() => break ReadLoopExit::Failed(e.to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed frame from language server");
            }
        }
    };

    let failed = conn.pending.close();
    if failed > 0 {
        tracing::warn!(failed, "Failing pending LSP requests: connection closed");
    }
    exit
}

/// Route one decoded frame. Never blocks on I/O: replies are written from
/// their own task.
pub(crate) fn dispatch(conn: &Arc<Connection>, frame: serde_json::Value) {
    tracing::trace!(frame = %frame, "LSP RX");
    let Some(incoming) = protocol::parse_incoming(frame) else {
        tracing::warn!("Ignoring unclassifiable JSON-RPC message");
        return;
    };

    match incoming {
        Incoming::Response { id, outcome } => {
            let delivered = id.as_u64().is_some_and(|n| conn.pending.complete(n, outcome));
            if !delivered {
                tracing::debug!(id = %id, "Dropping response with no waiting request");
            }
        }
        Incoming::ServerRequest { id, method, params } => {
            let reply: BoxFuture<'static, std::result::Result<serde_json::Value, ResponseError>> =
                match conn.handlers.request(&method) {
                    Some(handler) => handler.handle(params),
                    None => {
                        tracing::debug!(
                            method = %method,
                            "No handler for server request, replying method not found"
                        );
                        let error = ResponseError::method_not_found(&method);
                        Box::pin(async move { Err(error) })
                    }
                };
            let conn = Arc::clone(conn);
            tokio::spawn(async move {
                let outcome = reply.await;
                if let Err(e) = &outcome {
                    tracing::debug!(method = %method, error = %e, "Server request handler failed");
                }
                if let Err(e) = conn.reply(id, outcome).await {
                    tracing::warn!(method = %method, error = %e, "Failed to answer server request");
                }
            });
        }
        Incoming::Notification { method, params } => match conn.handlers.notification(&method) {
            Some(handler) => {
                if let Err(e) = handler.handle(params) {
                    tracing::warn!(method = %method, error = %e, "Notification handler failed");
                }
            }
            None => tracing::trace!(method = %method, "Ignoring notification with no handler"),
        },
    }
}
