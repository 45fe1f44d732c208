//! Per-server workarounds, selected from the resolved executable path.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::client::LspClient;
use crate::error::Result;

/// How many project files are opened to wake up `typescript-language-server`.
const TYPESCRIPT_PRELOAD_FILES: usize = 10;

const TYPESCRIPT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerFamily {
    #[default]
    Generic,
    /// `typescript-language-server` only loads a project once one of its
    /// files is open.
    TypeScript,
}

impl ServerFamily {
    #[must_use]
    pub fn detect(executable: &Path) -> Self {
        // Wrapper installs live under a `typescript-language-server/` directory.
        let path = executable.to_string_lossy().to_lowercase();
        if path.contains("typescript-language-server") {
            Self::TypeScript
        } else {
            Self::Generic
        }
    }

    /// Runs once, right after `initialized` has been sent.
    pub(crate) async fn after_initialize(self, client: &LspClient, workspace: &Path) -> Result<()> {
        match self {
            Self::Generic => Ok(()),
            Self::TypeScript => preload_project_files(client, workspace).await,
        }
    }
}

async fn preload_project_files(client: &LspClient, workspace: &Path) -> Result<()> {
    let root = workspace.to_path_buf();
    let files = tokio::task::spawn_blocking(move || {
        find_files(&root, TYPESCRIPT_EXTENSIONS, TYPESCRIPT_PRELOAD_FILES)
    })
    .await
    .map_err(std::io::Error::other)?;

    tracing::debug!(count = files.len(), "Opening project files for typescript-language-server");
    for path in &files {
        if let Err(e) = client.open_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to preload file");
        }
    }
    Ok(())
}

/// First `limit` files under `root` with one of `extensions`, honouring
/// `.gitignore` and skipping dependency directories.
fn find_files(root: &Path, extensions: &[&str], limit: usize) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(root)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .require_git(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !matches!(name.as_ref(), ".git" | "node_modules" | "dist" | "build")
        })
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    walker
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(ignore::DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.contains(&ext))
        })
        .take(limit)
        .collect()
}
