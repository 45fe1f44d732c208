//! Dispatch registry: method name -> handler for server-initiated traffic.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;

use crate::protocol::ResponseError;

/// Handles a notification pushed by the server.
///
/// Runs on the read loop, so it must not block. Errors are logged by the
/// loop and never reported back to the server.
pub trait NotificationHandler: Send + Sync {
    fn handle(&self, params: Option<serde_json::Value>) -> anyhow::Result<()>;
}

impl<F> NotificationHandler for F
where
    F: Fn(Option<serde_json::Value>) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, params: Option<serde_json::Value>) -> anyhow::Result<()> {
        self(params)
    }
}

/// Answers a request sent by the server.
///
/// `handle` is called on the read loop in arrival order; the returned
/// future runs on its own task and its output becomes the response.
pub trait ServerRequestHandler: Send + Sync {
    fn handle(
        &self,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'static, Result<serde_json::Value, ResponseError>>;
}

impl<F, Fut> ServerRequestHandler for F
where
    F: Fn(Option<serde_json::Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, ResponseError>> + Send + 'static,
{
    fn handle(
        &self,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'static, Result<serde_json::Value, ResponseError>> {
        Box::pin(self(params))
    }
}

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    notifications: RwLock<HashMap<String, Arc<dyn NotificationHandler>>>,
    requests: RwLock<HashMap<String, Arc<dyn ServerRequestHandler>>>,
}

impl HandlerRegistry {
    pub fn register_notification(&self, method: &str, handler: Arc<dyn NotificationHandler>) {
        self.notifications
            .write()
            .insert(method.to_string(), handler);
    }

    pub fn register_request(&self, method: &str, handler: Arc<dyn ServerRequestHandler>) {
        self.requests.write().insert(method.to_string(), handler);
    }

    pub fn notification(&self, method: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.notifications.read().get(method).cloned()
    }

    pub fn request(&self, method: &str) -> Option<Arc<dyn ServerRequestHandler>> {
        self.requests.read().get(method).cloned()
    }
}
