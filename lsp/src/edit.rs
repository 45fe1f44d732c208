//! Applying `WorkspaceEdit`s received through `workspace/applyEdit`.
//!
//! Every affected file is read and edited in memory first; nothing is written
//! unless all edits resolve. Each file is then replaced with a temp file +
//! rename so a reader never sees a half-written document.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::protocol;
use crate::types::{Position, Range};

#[derive(Debug, thiserror::Error)]
pub(crate) enum EditError {
    #[error("resource operation `{0}` is not supported")]
    UnsupportedResourceOp(String),
    #[error("not a file URI: {0}")]
    InvalidUri(String),
    #[error("malformed document change: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("overlapping edits in {}", .0.display())]
    Overlapping(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApplyWorkspaceEditParams {
    #[serde(default)]
    pub label: Option<String>,
    pub edit: WorkspaceEdit,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorkspaceEdit {
    #[serde(default)]
    pub changes: Option<BTreeMap<String, Vec<TextEdit>>>,
    /// Either `TextDocumentEdit`s or resource operations, told apart by `kind`.
    #[serde(default)]
    pub document_changes: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextDocumentEdit {
    text_document: VersionedDocument,
    edits: Vec<TextEdit>,
}

#[derive(Debug, Deserialize)]
struct VersionedDocument {
    uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApplyWorkspaceEditResult {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl ApplyWorkspaceEditResult {
    pub fn from_outcome(outcome: Result<usize, EditError>) -> Self {
        match outcome {
            Ok(_) => Self {
                applied: true,
                failure_reason: None,
            },
            Err(e) => Self {
                applied: false,
                failure_reason: Some(e.to_string()),
            },
        }
    }
}

/// Apply `edit` to disk. Returns the number of files rewritten.
pub(crate) fn apply_workspace_edit(edit: &WorkspaceEdit) -> Result<usize, EditError> {
    let per_file = collect_edits(edit)?;

    let mut rewritten = Vec::with_capacity(per_file.len());
    for (path, edits) in per_file {
        let original = fs::read_to_string(&path).map_err(|source| EditError::Read {
            path: path.clone(),
            source,
        })?;
        let updated = apply_text_edits(&original, &edits)
            .ok_or_else(|| EditError::Overlapping(path.clone()))?;
        rewritten.push((path, updated));
    }

    for (path, text) in &rewritten {
        write_atomically(path, text.as_bytes()).map_err(|source| EditError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Applied workspace edit");
    }
    Ok(rewritten.len())
}

/// Group every text edit by target file, in document order. Refuses the whole
/// edit if it contains a resource operation.
fn collect_edits(edit: &WorkspaceEdit) -> Result<BTreeMap<PathBuf, Vec<TextEdit>>, EditError> {
    let mut per_file: BTreeMap<PathBuf, Vec<TextEdit>> = BTreeMap::new();

    // `documentChanges` takes precedence over `changes` when both are present.
    if let Some(document_changes) = &edit.document_changes {
        for change in document_changes {
            if let Some(kind) = change.get("kind").and_then(|k| k.as_str()) {
                return Err(EditError::UnsupportedResourceOp(kind.to_string()));
            }
            let doc_edit: TextDocumentEdit = serde_json::from_value(change.clone())?;
            let path = uri_to_path(&doc_edit.text_document.uri)?;
            per_file.entry(path).or_default().extend(doc_edit.edits);
        }
    } else if let Some(changes) = &edit.changes {
        for (uri, edits) in changes {
            let path = uri_to_path(uri)?;
            per_file.entry(path).or_default().extend(edits.iter().cloned());
        }
    }
    Ok(per_file)
}

fn uri_to_path(uri: &str) -> Result<PathBuf, EditError> {
    protocol::file_uri_to_path(uri).ok_or_else(|| EditError::InvalidUri(uri.to_string()))
}

/// Apply `edits` to `text`. Returns `None` if two edits overlap.
///
/// Edits are resolved against the original text and applied back to front,
/// so earlier offsets stay valid. Edits with the same start keep their
/// relative order.
pub(crate) fn apply_text_edits(text: &str, edits: &[TextEdit]) -> Option<String> {
    let starts = line_starts(text);
    let mut spans: Vec<(usize, usize, &str)> = edits
        .iter()
        .map(|e| {
            let start = offset_at(text, &starts, e.range.start);
            let end = offset_at(text, &starts, e.range.end).max(start);
            (start, end, e.new_text.as_str())
        })
        .collect();
    spans.sort_by_key(|&(start, end, _)| (start, end));

    if spans.windows(2).any(|pair| pair[0].1 > pair[1].0) {
        return None;
    }

    let mut out = text.to_string();
    for &(start, end, new_text) in spans.iter().rev() {
        out.replace_range(start..end, new_text);
    }
    Some(out)
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Byte offset of an LSP position. Columns count UTF-16 code units; a column
/// past the end of its line clamps to the line end and a line past the end of
/// the document clamps to the document end.
fn offset_at(text: &str, starts: &[usize], pos: Position) -> usize {
    let Some(&start) = starts.get(pos.line as usize) else {
        return text.len();
    };
    let end = starts.get(pos.line as usize + 1).map_or(text.len(), |&next| next - 1);
    let line = &text[start..end];
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut units = 0u32;
    for (idx, ch) in line.char_indices() {
        if units >= pos.character {
            return start + idx;
        }
        units += ch.len_utf16() as u32;
    }
    start + line.len()
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let permissions = fs::metadata(path).map(|m| m.permissions()).ok();

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if let Some(permissions) = permissions {
        fs::set_permissions(tmp.path(), permissions)?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
