//! JSON-RPC envelope types and LSP payload builders.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{ClientInfo, Diagnostic};

/// JSON-RPC error code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code for unusable parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code for a handler failure.
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Reply to a server-initiated request.
#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn from_outcome(
        id: serde_json::Value,
        outcome: Result<serde_json::Value, ResponseError>,
    ) -> Self {
        // A successful reply must carry `result`, even when it is null.
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            jsonrpc: "2.0",
            id,
            result,
            error,
        }
    }
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(err: impl fmt::Display) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {err}"))
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(INTERNAL_ERROR, err.to_string())
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for ResponseError {}

/// A classified message read from the server.
#[derive(Debug)]
pub(crate) enum Incoming {
    Response {
        id: serde_json::Value,
        outcome: Result<serde_json::Value, ResponseError>,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

/// Classify a decoded frame. Returns `None` for envelopes that fit none of
/// the three shapes.
pub(crate) fn parse_incoming(frame: serde_json::Value) -> Option<Incoming> {
    let serde_json::Value::Object(mut obj) = frame else {
        return None;
    };
    let id = obj.remove("id");
    let method = match obj.remove("method") {
        Some(serde_json::Value::String(m)) => Some(m),
        Some(_) => return None,
        None => None,
    };
    let params = obj.remove("params");

    match (id, method) {
        (Some(id), Some(method)) => Some(Incoming::ServerRequest { id, method, params }),
        (None, Some(method)) => Some(Incoming::Notification { method, params }),
        (Some(id), None) => {
            if let Some(error) = obj.remove("error").filter(|e| !e.is_null()) {
                let error = serde_json::from_value::<ResponseError>(error).unwrap_or_else(|e| {
                    ResponseError::internal(format!("unparsable error object: {e}"))
                });
                Some(Incoming::Response {
                    id,
                    outcome: Err(error),
                })
            } else {
                let result = obj.remove("result")?;
                Some(Incoming::Response {
                    id,
                    outcome: Ok(result),
                })
            }
        }
        (None, None) => None,
    }
}

/// Initialization options sent when the caller supplies none.
pub(crate) fn default_initialization_options() -> serde_json::Value {
    serde_json::json!({
        "codelenses": {
            "generate": true,
            "regenerate_cgo": true,
            "test": true,
            "tidy": true,
            "upgrade_dependency": true,
            "vendor": true,
            "vulncheck": false
        }
    })
}

/// Build the `initialize` request parameters.
pub(crate) fn initialize_params(
    root_path: &Path,
    root_uri: &str,
    client: &ClientInfo,
    initialization_options: serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": client.name,
            "version": client.version
        },
        "rootPath": root_path.to_string_lossy(),
        "rootUri": root_uri,
        "workspaceFolders": [{
            "uri": root_uri,
            "name": root_path.to_string_lossy()
        }],
        "capabilities": {
            "workspace": {
                "configuration": true,
                "applyEdit": true,
                "didChangeConfiguration": { "dynamicRegistration": true },
                "didChangeWatchedFiles": {
                    "dynamicRegistration": true,
                    "relativePatternSupport": true
                }
            },
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": true,
                    "didSave": true
                },
                "completion": { "completionItem": {} },
                "codeLens": { "dynamicRegistration": true },
                "documentSymbol": {},
                "codeAction": {
                    "codeActionLiteralSupport": {
                        "codeActionKind": { "valueSet": [] }
                    }
                },
                "publishDiagnostics": { "versionSupport": true },
                "semanticTokens": {
                    "requests": { "range": {}, "full": {} },
                    "tokenTypes": [],
                    "tokenModifiers": [],
                    "formats": []
                }
            },
            "window": {}
        },
        "initializationOptions": initialization_options
    })
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn did_close_params(uri: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri
        }
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub version: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
}

pub(crate) fn path_to_file_uri(path: &Path) -> Option<url::Url> {
    url::Url::from_file_path(path).ok()
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
