//! Document synchronizer: which files the server has open, and at what version.
//!
//! Each URI is either Closed (absent from the map) or Open with a version
//! that starts at 1 and grows by one per `didChange`. The whole document is
//! sent on every change; there is no incremental diffing.

use std::collections::HashMap;
use std::path::Path;

use tokio::sync::RwLock;

use crate::error::{LspError, Result};
use crate::language::detect_language_id;
use crate::protocol;
use crate::transport::Connection;

/// A file the server currently has open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFileInfo {
    pub uri: String,
    pub version: i32,
}

#[derive(Default)]
pub(crate) struct DocumentSync {
    /// Writers hold the lock across the notification write so that the map
    /// and what the server has seen never diverge.
    open: RwLock<HashMap<String, OpenFileInfo>>,
}

pub(crate) fn file_uri(path: &Path) -> Result<String> {
    protocol::path_to_file_uri(path)
        .map(String::from)
        .ok_or_else(|| LspError::InvalidPath(path.to_path_buf()))
}

async fn read_text(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

impl DocumentSync {
    /// Send `didOpen` unless the file is already open.
    pub async fn open_file(&self, conn: &Connection, path: &Path) -> Result<()> {
        let uri = file_uri(path)?;
        let mut open = self.open.write().await;
        if open.contains_key(&uri) {
            return Ok(());
        }

        let text = read_text(path).await?;
        let params = protocol::did_open_params(&uri, detect_language_id(path), 1, &text);
        conn.notify("textDocument/didOpen", Some(params)).await?;

        open.insert(uri.clone(), OpenFileInfo { uri, version: 1 });
        tracing::debug!(path = %path.display(), "Opened file");
        Ok(())
    }

    /// Re-read the file and send it whole as the next version.
    pub async fn notify_change(&self, conn: &Connection, path: &Path) -> Result<()> {
        let uri = file_uri(path)?;
        let mut open = self.open.write().await;
        let Some(info) = open.get_mut(&uri) else {
            return Err(LspError::NotOpen(path.to_path_buf()));
        };

        let text = read_text(path).await?;
        let version = info.version + 1;
        let params = protocol::did_change_params(&uri, version, &text);
        conn.notify("textDocument/didChange", Some(params)).await?;

        info.version = version;
        tracing::debug!(path = %path.display(), version, "Sent file change");
        Ok(())
    }

    /// Send `didClose` unless the file is already closed.
    pub async fn close_file(&self, conn: &Connection, path: &Path) -> Result<()> {
        let uri = file_uri(path)?;
        self.close_uri(conn, &uri, false).await.map(|_| ())
    }

    /// Best-effort close of everything currently open.
    ///
    /// Every file is attempted; failures are logged. The local entry is
    /// dropped even when the notification could not be written. Returns the
    /// number of `didClose` notifications sent.
    pub async fn close_all_files(&self, conn: &Connection) -> usize {
        let uris: Vec<String> = self.open.read().await.keys().cloned().collect();
        let mut closed = 0;
        for uri in &uris {
            match self.close_uri(conn, uri, true).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(uri = %uri, error = %e, "Error closing file"),
            }
        }
        tracing::debug!(closed, total = uris.len(), "Closed open files");
        closed
    }

    pub async fn is_open(&self, path: &Path) -> bool {
        match file_uri(path) {
            Ok(uri) => self.open.read().await.contains_key(&uri),
            Err(_) => false,
        }
    }

    pub async fn snapshot(&self) -> Vec<OpenFileInfo> {
        let mut files: Vec<OpenFileInfo> = self.open.read().await.values().cloned().collect();
        files.sort_by(|a, b| a.uri.cmp(&b.uri));
        files
    }

    /// Returns whether a `didClose` was sent.
    async fn close_uri(&self, conn: &Connection, uri: &str, drop_on_failure: bool) -> Result<bool> {
        let mut open = self.open.write().await;
        if !open.contains_key(uri) {
            return Ok(false);
        }

        let sent = conn
            .notify(
                "textDocument/didClose",
                Some(protocol::did_close_params(uri)),
            )
            .await;
        if sent.is_ok() || drop_on_failure {
            open.remove(uri);
        }
        sent?;
        tracing::debug!(uri = %uri, "Closed file");
        Ok(true)
    }
}
