//! Built-in handlers for the server-to-client traffic every client must answer.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::diagnostics::DiagnosticsCache;
use crate::dispatch::HandlerRegistry;
use crate::edit::{self, ApplyWorkspaceEditParams, ApplyWorkspaceEditResult};
use crate::protocol::ResponseError;

/// Register the diagnostics sink and the built-in request/notification
/// handlers. `settings` is what `workspace/configuration` answers from.
pub(crate) fn register_builtins(
    registry: &HandlerRegistry,
    diagnostics: Arc<DiagnosticsCache>,
    settings: Value,
) {
    registry.register_notification(
        "textDocument/publishDiagnostics",
        Arc::new(move |params: Option<Value>| diagnostics.publish(params)),
    );
    registry.register_notification("window/showMessage", Arc::new(show_message));
    registry.register_notification("window/logMessage", Arc::new(log_message));

    let settings = Arc::new(settings);
    registry.register_request(
        "workspace/configuration",
        Arc::new(move |params: Option<Value>| {
            let settings = Arc::clone(&settings);
            async move { configuration(&settings, params) }
        }),
    );
    registry.register_request("workspace/applyEdit", Arc::new(apply_edit));
    registry.register_request("client/registerCapability", Arc::new(register_capability));
    registry.register_request("window/workDoneProgress/create", Arc::new(create_progress));
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    #[serde(rename = "type")]
    kind: u8,
    message: String,
}

fn parse_message(params: Option<Value>) -> anyhow::Result<MessageParams> {
    let params = params.ok_or_else(|| anyhow::anyhow!("message notification without params"))?;
    Ok(serde_json::from_value(params)?)
}

fn show_message(params: Option<Value>) -> anyhow::Result<()> {
    let MessageParams { kind, message } = parse_message(params)?;
    match kind {
        1 => tracing::error!(target: "lsp_server", "{message}"),
        2 => tracing::warn!(target: "lsp_server", "{message}"),
        _ => tracing::info!(target: "lsp_server", "{message}"),
    }
    Ok(())
}

fn log_message(params: Option<Value>) -> anyhow::Result<()> {
    let MessageParams { kind, message } = parse_message(params)?;
    match kind {
        1 => tracing::warn!(target: "lsp_server", "{message}"),
        _ => tracing::debug!(target: "lsp_server", "{message}"),
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct ConfigurationParams {
    #[serde(default)]
    items: Vec<ConfigurationItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigurationItem {
    #[serde(default)]
    section: Option<String>,
}

/// One result per requested item, in request order.
fn configuration(settings: &Value, params: Option<Value>) -> Result<Value, ResponseError> {
    let params: ConfigurationParams = match params {
        Some(params) => serde_json::from_value(params).map_err(ResponseError::invalid_params)?,
        None => ConfigurationParams::default(),
    };
    let results = params
        .items
        .iter()
        .map(|item| lookup_section(settings, item.section.as_deref()))
        .collect();
    Ok(Value::Array(results))
}

/// Resolve a dotted `section` path. Missing sections resolve to `{}`.
fn lookup_section(settings: &Value, section: Option<&str>) -> Value {
    let found = match section.filter(|s| !s.is_empty()) {
        None => Some(settings),
        Some(section) => section
            .split('.')
            .try_fold(settings, |value, key| value.get(key)),
    };
    match found {
        Some(value) if !value.is_null() => value.clone(),
        _ => Value::Object(serde_json::Map::new()),
    }
}

async fn apply_edit(params: Option<Value>) -> Result<Value, ResponseError> {
    let params: ApplyWorkspaceEditParams = params
        .ok_or_else(|| ResponseError::invalid_params("missing params"))
        .and_then(|p| serde_json::from_value(p).map_err(ResponseError::invalid_params))?;

    let label = params.label.clone().unwrap_or_default();
    let outcome = tokio::task::spawn_blocking(move || edit::apply_workspace_edit(&params.edit))
        .await
        .map_err(ResponseError::internal)?;

    match &outcome {
        Ok(files) => tracing::info!(label = %label, files, "Applied workspace edit"),
        Err(e) => tracing::warn!(label = %label, error = %e, "Refused workspace edit"),
    }
    serde_json::to_value(ApplyWorkspaceEditResult::from_outcome(outcome))
        .map_err(ResponseError::internal)
}

async fn register_capability(params: Option<Value>) -> Result<Value, ResponseError> {
    let methods: Vec<String> = params
        .as_ref()
        .and_then(|p| p.get("registrations"))
        .and_then(Value::as_array)
        .map(|regs| {
            regs.iter()
                .filter_map(|r| r.get("method").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    tracing::debug!(?methods, "Server registered capabilities");
    Ok(Value::Null)
}

async fn create_progress(_params: Option<Value>) -> Result<Value, ResponseError> {
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Value {
        serde_json::json!({
            "gopls": {
                "analyses": { "unusedparams": true },
                "staticcheck": false
            },
            "formatting": null
        })
    }

    #[test]
    fn test_configuration_returns_one_result_per_item() {
        let params = serde_json::json!({
            "items": [
                { "section": "gopls" },
                { "section": "gopls.analyses" },
                { "section": "gopls.staticcheck" },
                { "section": "missing.entirely" },
                { "scopeUri": "file:///ws" }
            ]
        });
        let result = configuration(&settings(), Some(params)).unwrap();
        let items = result.as_array().unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0]["staticcheck"], false);
        assert_eq!(items[1], serde_json::json!({ "unusedparams": true }));
        assert_eq!(items[2], false);
        assert_eq!(items[3], serde_json::json!({}));
        assert_eq!(items[4], settings());
    }

    #[test]
    fn test_configuration_null_and_empty_settings() {
        let params = serde_json::json!({ "items": [{ "section": "formatting" }, {}] });
        let result = configuration(&settings(), Some(params.clone())).unwrap();
        assert_eq!(result[0], serde_json::json!({}));

        let result = configuration(&Value::Null, Some(params)).unwrap();
        assert_eq!(result, serde_json::json!([{}, {}]));
    }

    #[test]
    fn test_configuration_rejects_malformed_params() {
        let err = configuration(&settings(), Some(serde_json::json!({ "items": 3 }))).unwrap_err();
        assert_eq!(err.code, crate::protocol::INVALID_PARAMS);
    }

    #[test]
    fn test_message_handlers_accept_and_reject() {
        let params = serde_json::json!({ "type": 2, "message": "workspace loading" });
        assert!(show_message(Some(params.clone())).is_ok());
        assert!(log_message(Some(params)).is_ok());
        assert!(show_message(None).is_err());
        assert!(log_message(Some(serde_json::json!({ "type": "x" }))).is_err());
    }

    #[tokio::test]
    async fn test_acknowledgements_return_null() {
        let params = serde_json::json!({
            "registrations": [{ "id": "1", "method": "workspace/didChangeWatchedFiles" }]
        });
        assert_eq!(register_capability(Some(params)).await.unwrap(), Value::Null);
        assert_eq!(
            create_progress(Some(serde_json::json!({ "token": "t" })))
                .await
                .unwrap(),
            Value::Null
        );
    }

    #[tokio::test]
    async fn test_apply_edit_refuses_resource_operations() {
        let params = serde_json::json!({
            "label": "rename file",
            "edit": {
                "documentChanges": [{ "kind": "create", "uri": "file:///tmp/new.rs" }]
            }
        });
        let result = apply_edit(Some(params)).await.unwrap();
        assert_eq!(result["applied"], false);
        assert!(result["failureReason"].as_str().unwrap().contains("create"));
    }

    #[tokio::test]
    async fn test_apply_edit_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.py");
        std::fs::write(&path, "x = 1\n").unwrap();
        let uri = crate::protocol::path_to_file_uri(&path).unwrap();

        let params = serde_json::json!({
            "edit": {
                "changes": {
                    uri.as_str(): [{
                        "range": {"start": {"line": 0, "character": 4}, "end": {"line": 0, "character": 5}},
                        "newText": "2"
                    }]
                }
            }
        });
        let result = apply_edit(Some(params)).await.unwrap();
        assert_eq!(result, serde_json::json!({ "applied": true }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x = 2\n");
    }

    #[tokio::test]
    async fn test_register_builtins_wires_diagnostics() {
        let registry = HandlerRegistry::default();
        let cache = Arc::new(DiagnosticsCache::default());
        register_builtins(&registry, cache.clone(), Value::Null);

        let handler = registry
            .notification("textDocument/publishDiagnostics")
            .unwrap();
        handler
            .handle(Some(serde_json::json!({
                "uri": "file:///a.rs",
                "diagnostics": [{
                    "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}},
                    "message": "boom"
                }]
            })))
            .unwrap();
        assert_eq!(cache.get("file:///a.rs")[0].message(), "boom");

        for method in [
            "workspace/configuration",
            "workspace/applyEdit",
            "client/registerCapability",
            "window/workDoneProgress/create",
        ] {
            assert!(registry.request(method).is_some(), "{method}");
        }
    }
}
