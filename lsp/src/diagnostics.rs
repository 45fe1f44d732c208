//! Diagnostics cache: the latest published diagnostics per document URI.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::protocol::PublishDiagnosticsParams;
use crate::types::Diagnostic;

struct Entry {
    /// Document version the server attached, if any. Recorded only; it does
    /// not gate replacement.
    version: Option<i32>,
    items: Vec<Diagnostic>,
}

#[derive(Default)]
pub(crate) struct DiagnosticsCache {
    data: RwLock<HashMap<String, Entry>>,
}

impl DiagnosticsCache {
    /// Replace the entry for `uri` wholesale. Last writer wins.
    pub fn update(&self, uri: String, version: Option<i32>, items: Vec<Diagnostic>) {
        tracing::debug!(uri = %uri, count = items.len(), ?version, "Diagnostics updated");
        self.data.write().insert(uri, Entry { version, items });
    }

    /// Handler body for `textDocument/publishDiagnostics`.
    pub fn publish(&self, params: Option<serde_json::Value>) -> anyhow::Result<()> {
        let params = params.ok_or_else(|| anyhow::anyhow!("publishDiagnostics without params"))?;
        let params: PublishDiagnosticsParams = serde_json::from_value(params)?;
        self.update(params.uri, params.version, params.diagnostics);
        Ok(())
    }

    /// Snapshot for `uri`; empty if nothing was ever published.
    pub fn get(&self, uri: &str) -> Vec<Diagnostic> {
        self.data
            .read()
            .get(uri)
            .map(|entry| entry.items.clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn version(&self, uri: &str) -> Option<i32> {
        self.data.read().get(uri).and_then(|entry| entry.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiagnosticSeverity;

    fn publish_frame(uri: &str, messages: &[&str]) -> serde_json::Value {
        let diagnostics: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "range": { "start": { "line": 1, "character": 0 }, "end": { "line": 1, "character": 4 } },
                    "severity": 1,
                    "source": "test",
                    "message": m
                })
            })
            .collect();
        serde_json::json!({ "uri": uri, "diagnostics": diagnostics })
    }

    #[test]
    fn test_unknown_uri_is_empty() {
        let cache = DiagnosticsCache::default();
        assert!(cache.get("file:///nothing.rs").is_empty());
    }

    #[test]
    fn test_publish_and_get() {
        let cache = DiagnosticsCache::default();
        cache
            .publish(Some(publish_frame("file:///a.rs", &["expected `;`"])))
            .unwrap();

        let items = cache.get("file:///a.rs");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message(), "expected `;`");
        assert_eq!(items[0].severity(), Some(DiagnosticSeverity::Error));
    }

    #[test]
    fn test_second_publish_replaces_first() {
        let cache = DiagnosticsCache::default();
        cache
            .publish(Some(publish_frame("file:///a.rs", &["err1", "err2"])))
            .unwrap();
        cache
            .publish(Some(publish_frame("file:///a.rs", &["err3"])))
            .unwrap();

        let messages: Vec<String> = cache
            .get("file:///a.rs")
            .iter()
            .map(|d| d.message().to_string())
            .collect();
        assert_eq!(messages, vec!["err3"]);
    }

    #[test]
    fn test_empty_publish_clears_entry() {
        let cache = DiagnosticsCache::default();
        cache
            .publish(Some(publish_frame("file:///a.rs", &["err"])))
            .unwrap();
        cache
            .publish(Some(publish_frame("file:///a.rs", &[])))
            .unwrap();
        assert!(cache.get("file:///a.rs").is_empty());
    }

    #[test]
    fn test_stale_version_still_overwrites() {
        let cache = DiagnosticsCache::default();
        let mut newer = publish_frame("file:///a.rs", &["new"]);
        newer["version"] = serde_json::json!(5);
        let mut older = publish_frame("file:///a.rs", &["old"]);
        older["version"] = serde_json::json!(3);

        cache.publish(Some(newer)).unwrap();
        cache.publish(Some(older)).unwrap();
        assert_eq!(cache.get("file:///a.rs")[0].message(), "old");
        assert_eq!(cache.version("file:///a.rs"), Some(3));
    }

    #[test]
    fn test_malformed_params_are_rejected_without_mutation() {
        let cache = DiagnosticsCache::default();
        assert!(cache.publish(None).is_err());
        assert!(
            cache
                .publish(Some(serde_json::json!({"uri": "file:///a.rs"})))
                .is_err()
        );
        assert!(cache.get("file:///a.rs").is_empty());
    }
}
