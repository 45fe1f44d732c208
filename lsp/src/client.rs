//! Lifecycle controller: spawn, handshake, and bounded shutdown.
//!
//! An [`LspClient`] owns one language server. Construction starts the read
//! loop; [`LspClient::initialize`] performs the handshake; [`LspClient::close`]
//! runs the shutdown sequence and reaps the process exactly once.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::DiagnosticsCache;
use crate::dispatch::{NotificationHandler, ServerRequestHandler};
use crate::documents::{self, DocumentSync, OpenFileInfo};
use crate::error::{LspError, Result};
use crate::handlers;
use crate::protocol;
use crate::quirks::ServerFamily;
use crate::transport::{self, Connection, ReadLoopExit};
use crate::types::{ClientOptions, Diagnostic, InitializeResult, LifecycleState};

pub struct LspClient {
    name: String,
    conn: Arc<Connection>,
    /// Taken by the first `close()`.
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    documents: DocumentSync,
    diagnostics: Arc<DiagnosticsCache>,
    state: Arc<RwLock<LifecycleState>>,
    options: ClientOptions,
    family: ServerFamily,
    reader: JoinHandle<()>,
}

impl LspClient {
    /// Spawn `command` with default options.
    pub fn spawn<I, S>(command: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Self::spawn_with_options(command, args, ClientOptions::default())
    }

    /// Resolve `command` on `PATH` and start it with piped stdio.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_with_options<I, S>(command: &str, args: I, options: ClientOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let resolved =
            which::which(command).map_err(|_| LspError::CommandNotFound(command.to_string()))?;
        let mut child = Command::new(&resolved)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LspError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(LspError::ConnectionClosed);
        };
        let name = resolved
            .file_stem()
            .map_or_else(|| command.to_string(), |s| s.to_string_lossy().into_owned());
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(name.clone(), stderr));
        }

        let pid = child.id();
        tracing::info!(server = %name, pid, "Started language server");
        Ok(Self::start(
            name,
            Box::new(stdin),
            stdout,
            Some(child),
            ServerFamily::detect(&resolved),
            options,
        ))
    }

    /// Run the client over arbitrary streams, with no process attached.
    pub fn connect<R, W>(reader: R, writer: W, options: ClientOptions) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(
            String::from("in-memory"),
            Box::new(writer),
            reader,
            None,
            ServerFamily::Generic,
            options,
        )
    }

    fn start<R>(
        name: String,
        writer: transport::BoxedWriter,
        reader: R,
        child: Option<Child>,
        family: ServerFamily,
        options: ClientOptions,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let conn = Arc::new(Connection::new(writer));
        let state = Arc::new(RwLock::new(LifecycleState::Starting));

        let reader = {
            let conn = Arc::clone(&conn);
            let state = Arc::clone(&state);
            let server = name.clone();
            tokio::spawn(async move {
                let exit = transport::run_read_loop(conn, reader).await;
                let mut state = state.write();
                if matches!(*state, LifecycleState::ShuttingDown | LifecycleState::Closed) {
                    tracing::debug!(server = %server, ?exit, "LSP read loop finished");
                    return;
                }
                let reason = match exit {
                    ReadLoopExit::Eof => String::from("language server closed its output"),
                    ReadLoopExit::Failed(e) => e,
                };
                tracing::error!(server = %server, reason = %reason, "Lost connection to language server");
                *state = LifecycleState::Error(reason);
            })
        };

        Self {
            pid: child.as_ref().and_then(Child::id),
            name,
            conn,
            child: Mutex::new(child),
            documents: DocumentSync::default(),
            diagnostics: Arc::new(DiagnosticsCache::default()),
            state,
            options,
            family,
            reader,
        }
    }

    /// Perform the `initialize` / `initialized` handshake.
    ///
    /// `custom` becomes the `initializationOptions` when non-empty and is
    /// also what `workspace/configuration` requests are answered from.
    pub async fn initialize(
        &self,
        workspace: &Path,
        custom: Option<serde_json::Map<String, Value>>,
    ) -> Result<InitializeResult> {
        {
            let mut state = self.state.write();
            if *state != LifecycleState::Starting {
                return Err(LspError::InvalidState {
                    operation: "initialize",
                    state: state.clone(),
                });
            }
            *state = LifecycleState::Initializing;
        }
        let result = self.handshake(workspace, custom).await;
        match &result {
            Ok(init) => {
                let server = init.server_info.as_ref().map(|s| s.name.as_str());
                tracing::info!(server = %self.name, reported_name = ?server, "Language server initialized");
            }
            Err(e) => {
                // Keep the read loop's reason, and never reopen a closed client.
                let mut state = self.state.write();
                if matches!(*state, LifecycleState::Initializing | LifecycleState::Ready) {
                    *state = LifecycleState::Error(e.to_string());
                }
            }
        }
        result
    }

    async fn handshake(
        &self,
        workspace: &Path,
        custom: Option<serde_json::Map<String, Value>>,
    ) -> Result<InitializeResult> {
        let root_uri = documents::file_uri(workspace)?;
        let custom = custom.filter(|opts| !opts.is_empty()).map(Value::Object);

        // Built-ins go in before `initialize` so nothing the server sends
        // during the handshake is answered with "method not found".
        handlers::register_builtins(
            &self.conn.handlers,
            Arc::clone(&self.diagnostics),
            custom.clone().unwrap_or(Value::Null),
        );

        let init_options = custom.unwrap_or_else(protocol::default_initialization_options);
        let params = protocol::initialize_params(
            workspace,
            &root_uri,
            &self.options.client_info,
            init_options,
        );
        let value = self
            .conn
            .call_with_timeout("initialize", Some(params), self.options.initialize_timeout)
            .await?;
        let result: InitializeResult = serde_json::from_value(value)?;

        self.conn
            .notify("initialized", Some(serde_json::json!({})))
            .await?;
        {
            let mut state = self.state.write();
            if *state != LifecycleState::Initializing {
                return Err(LspError::ConnectionClosed);
            }
            *state = LifecycleState::Ready;
        }

        self.family.after_initialize(self, workspace).await?;
        Ok(result)
    }

    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.conn.call(method, params, None).await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        self.conn.call_with_timeout(method, params, timeout).await
    }

    /// Like [`call`](Self::call), abandoned as soon as `cancel` fires.
    pub async fn call_with_cancel(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.conn.call(method, params, Some(cancel)).await
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.conn.notify(method, params).await
    }

    /// Replaces any handler already registered for `method`.
    pub fn register_notification_handler<H>(&self, method: &str, handler: H)
    where
        H: NotificationHandler + 'static,
    {
        self.conn
            .handlers
            .register_notification(method, Arc::new(handler));
    }

    /// Replaces any handler already registered for `method`.
    pub fn register_server_request_handler<H>(&self, method: &str, handler: H)
    where
        H: ServerRequestHandler + 'static,
    {
        self.conn.handlers.register_request(method, Arc::new(handler));
    }

    pub async fn open_file(&self, path: &Path) -> Result<()> {
        self.documents.open_file(&self.conn, path).await
    }

    pub async fn notify_change(&self, path: &Path) -> Result<()> {
        self.documents.notify_change(&self.conn, path).await
    }

    pub async fn close_file(&self, path: &Path) -> Result<()> {
        self.documents.close_file(&self.conn, path).await
    }

    /// Returns the number of files closed.
    pub async fn close_all_files(&self) -> usize {
        self.documents.close_all_files(&self.conn).await
    }

    pub async fn is_file_open(&self, path: &Path) -> bool {
        self.documents.is_open(path).await
    }

    pub async fn open_files(&self) -> Vec<OpenFileInfo> {
        self.documents.snapshot().await
    }

    /// Latest diagnostics published for `uri`; empty if none.
    #[must_use]
    pub fn get_file_diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        self.diagnostics.get(uri)
    }

    #[must_use]
    pub fn diagnostics_for_path(&self, path: &Path) -> Vec<Diagnostic> {
        match documents::file_uri(path) {
            Ok(uri) => self.diagnostics.get(&uri),
            Err(_) => Vec::new(),
        }
    }

    /// Give the server `settle` to finish start-up work, then check that it
    /// is still connected.
    pub async fn wait_for_server_ready(&self, settle: Duration) -> Result<()> {
        tokio::time::sleep(settle).await;
        if self.conn.pending.is_closed() || self.state().is_terminal() {
            return Err(LspError::ConnectionClosed);
        }
        Ok(())
    }

    /// Send the `shutdown` request, bounded by the configured deadline.
    pub async fn shutdown(&self) -> Result<()> {
        self.conn
            .call_with_timeout("shutdown", None, self.options.shutdown.shutdown_request)
            .await
            .map(|_| ())
    }

    /// Send the `exit` notification, bounded by the configured deadline.
    pub async fn exit(&self) -> Result<()> {
        tokio::time::timeout(
            self.options.shutdown.exit_notification,
            self.conn.notify("exit", None),
        )
        .await
        .map_err(|_| LspError::Timeout(String::from("exit")))?
    }

    /// Shut the server down and reap its process.
    ///
    /// Every step is bounded, so this returns within the sum of the
    /// [`ShutdownTimeouts`](crate::ShutdownTimeouts) even if the server
    /// ignores the protocol. Returns `None` for clients built with
    /// [`connect`](Self::connect). A second call fails with `AlreadyClosed`.
    pub async fn close(&self) -> Result<Option<ExitStatus>> {
        {
            let mut state = self.state.write();
            if matches!(*state, LifecycleState::ShuttingDown | LifecycleState::Closed) {
                return Err(LspError::AlreadyClosed);
            }
            *state = LifecycleState::ShuttingDown;
        }
        let timeouts = self.options.shutdown;
        tracing::info!(server = %self.name, pid = self.pid, "Shutting down language server");

        if tokio::time::timeout(timeouts.close_files, self.close_all_files())
            .await
            .is_err()
        {
            tracing::warn!(server = %self.name, "Timed out closing open files");
        }
        if let Err(e) = self.shutdown().await {
            tracing::warn!(server = %self.name, error = %e, "Shutdown request failed");
        }
        if let Err(e) = self.exit().await {
            tracing::debug!(server = %self.name, error = %e, "Failed to send exit notification");
        }
        match tokio::time::timeout(timeouts.exit_notification, self.conn.close_input()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(server = %self.name, error = %e, "Failed to close server stdin");
            }
            Err(_) => tracing::warn!(server = %self.name, "Timed out closing server stdin"),
        }

        let child = self.child.lock().await.take();
        let status = match child {
            Some(mut child) => wait_or_kill(&self.name, &mut child, timeouts.exit_grace)
                .await
                .map(Some),
            None => Ok(None),
        };
        *self.state.write() = LifecycleState::Closed;

        if let Ok(Some(status)) = &status {
            tracing::info!(server = %self.name, %status, "Language server exited");
        }
        status
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state.read().clone()
    }

    #[must_use]
    pub fn family(&self) -> ServerFamily {
        self.family
    }

    /// OS process id, if this client spawned a process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Wait up to `grace` for the process to exit, then kill it.
async fn wait_or_kill(server: &str, child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        () = tokio::time::sleep(grace) => None,
    };
    match exited {
        Some(status) => Ok(status?),
        None => {
            tracing::warn!(server, "Language server did not exit in time, killing");
            child.kill().await?;
            Ok(child.wait().await?)
        }
    }
}

async fn drain_stderr(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(target: "lsp_stderr", server = %server, "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(target: "lsp_stderr", server = %server, error = %e, "stderr read failed");
                break;
            }
        }
    }
}
