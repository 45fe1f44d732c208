//! Public types shared between the client core and its callers.
//!
//! Callers construct [`ClientOptions`], observe [`LifecycleState`], and read
//! [`Diagnostic`]s out of the diagnostics cache.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name and version reported to the server in `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: String::from("langbridge"),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Per-step deadlines for the shutdown sequence.
///
/// `close()` suspends for at most the sum of these, with
/// `exit_notification` counted twice (the `exit` write and closing stdin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimeouts {
    /// Budget for sending `didClose` for every open file.
    pub close_files: Duration,
    /// Budget for the `shutdown` request round trip.
    pub shutdown_request: Duration,
    /// Budget for writing `exit`, and again for closing stdin. A server that
    /// stopped reading can leave either write blocked on a full pipe.
    pub exit_notification: Duration,
    /// How long the process may take to exit after stdin is closed.
    pub exit_grace: Duration,
}

impl Default for ShutdownTimeouts {
    fn default() -> Self {
        Self {
            close_files: Duration::from_secs(5),
            shutdown_request: Duration::from_millis(500),
            exit_notification: Duration::from_millis(500),
            exit_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub client_info: ClientInfo,
    /// Deadline for the `initialize` round trip.
    pub initialize_timeout: Duration,
    pub shutdown: ShutdownTimeouts,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            initialize_timeout: Duration::from_secs(30),
            shutdown: ShutdownTimeouts::default(),
        }
    }
}

/// Where a client is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Initializing,
    Ready,
    ShuttingDown,
    Closed,
    /// The transport failed; the client can no longer be used.
    Error(String),
}

impl LifecycleState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error(_))
    }
}

/// Server identity returned from `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// The result of the `initialize` request.
///
/// Capabilities are kept as raw JSON; the core never interprets them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// 0-indexed line.
    pub line: u32,
    /// 0-indexed UTF-16 code unit offset within the line.
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A single diagnostic as published by the server.
///
/// Fields the core does not model (`tags`, `relatedInformation`, `data`, ...)
/// are preserved verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    severity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    message: String,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(range: Range, severity: Option<DiagnosticSeverity>, message: String) -> Self {
        Self {
            range,
            severity: severity.map(|s| s as u64),
            code: None,
            source: None,
            message,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    /// `None` when the server omitted severity or sent an unknown value.
    #[must_use]
    pub fn severity(&self) -> Option<DiagnosticSeverity> {
        self.severity.and_then(DiagnosticSeverity::from_lsp)
    }

    #[must_use]
    pub fn code(&self) -> Option<&serde_json::Value> {
        self.code.as_ref()
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Fields not modelled above, exactly as the server sent them.
    #[must_use]
    pub fn extra(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extra
    }

    /// Format as `path:line:col: severity: [source] message` (1-indexed for display).
    #[must_use]
    pub fn display_with_path(&self, path: &Path) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            path.display(),
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity()
                .unwrap_or(DiagnosticSeverity::Warning)
                .label(),
            self.source().unwrap_or("unknown"),
            self.message,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lsp_known_and_unknown_values() {
        assert_eq!(
            DiagnosticSeverity::from_lsp(1),
            Some(DiagnosticSeverity::Error)
        );
        assert_eq!(
            DiagnosticSeverity::from_lsp(4),
            Some(DiagnosticSeverity::Hint)
        );
        assert_eq!(DiagnosticSeverity::from_lsp(0), None);
        assert_eq!(DiagnosticSeverity::from_lsp(99), None);
    }

    #[test]
    fn test_diagnostic_deserialization_keeps_unknown_fields() {
        let json = serde_json::json!({
            "range": { "start": { "line": 5, "character": 3 }, "end": { "line": 5, "character": 10 } },
            "severity": 1,
            "code": "E0308",
            "source": "rustc",
            "message": "mismatched types",
            "tags": [1]
        });
        let diag: Diagnostic = serde_json::from_value(json).unwrap();
        assert_eq!(diag.severity(), Some(DiagnosticSeverity::Error));
        assert_eq!(diag.code(), Some(&serde_json::json!("E0308")));
        assert_eq!(diag.range().start.line, 5);
        assert_eq!(diag.extra()["tags"], serde_json::json!([1]));
    }

    #[test]
    fn test_diagnostic_without_severity() {
        // Severity is optional on the wire
        let json = serde_json::json!({
            "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
            "message": "some warning"
        });
        let diag: Diagnostic = serde_json::from_value(json).unwrap();
        assert_eq!(diag.severity(), None);
        assert_eq!(diag.source(), None);
    }

    #[test]
    fn test_display_with_path() {
        let diag = Diagnostic::new(
            Range {
                start: Position {
                    line: 10,
                    character: 5,
                },
                end: Position::default(),
            },
            Some(DiagnosticSeverity::Error),
            "expected `;`".to_string(),
        )
        .with_source("rustc");
        // line/col are 0-indexed internally, displayed as 1-indexed
        assert_eq!(
            diag.display_with_path(Path::new("src/main.rs")),
            "src/main.rs:11:6: error: [rustc] expected `;`"
        );
    }

    #[test]
    fn test_initialize_result_deserialization() {
        let json = serde_json::json!({
            "capabilities": { "textDocumentSync": 1 },
            "serverInfo": { "name": "fake", "version": "1.2.3" }
        });
        let result: InitializeResult = serde_json::from_value(json).unwrap();
        assert_eq!(result.capabilities["textDocumentSync"], 1);
        assert_eq!(result.server_info.unwrap().name, "fake");
    }

    #[test]
    fn test_shutdown_timeouts_are_bounded() {
        let t = ShutdownTimeouts::default();
        assert!(t.shutdown_request + t.exit_grace <= Duration::from_secs(3));
    }
}
