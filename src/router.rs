//! # Route Table
//!
//! Maps `(path, method)` pairs to handlers. Matching is exact string
//! equality on the path and case-insensitive equality on the method —
//! there are no path parameters, prefixes or wildcards.
//!
//! Handlers have a single fixed signature: an async function from
//! [`Request`] to [`HandlerResult`]. Closures that do not need the request
//! are wrapped with [`zero_arg`] at registration time.

use crate::request::Request;
use crate::response::Response;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What a handler returns: a [`Response`] or any error, which the
/// dispatcher converts into a canonical 500.
pub type HandlerResult = anyhow::Result<Response>;

/// Boxed handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A registered handler.
pub type Handler = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// The route table: path → method → handler.
///
/// Registering the same `(path, method)` pair twice replaces the prior
/// binding; the most recent registration wins.
#[derive(Default)]
pub struct Router {
    routes: DashMap<String, HashMap<String, Handler>>,
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    /// Binds `handler` to `(path, method)`, replacing any existing binding.
    pub fn register(&self, path: &str, method: &str, handler: Handler) {
        self.routes
            .entry(path.to_string())
            .or_default()
            .insert(method.to_ascii_uppercase(), handler);
    }

    /// Exact-match lookup. The method comparison is case-insensitive.
    pub fn lookup(&self, path: &str, method: &str) -> Option<Handler> {
        self.routes
            .get(path)
            .and_then(|methods| methods.get(&method.to_ascii_uppercase()).cloned())
    }

    /// Every registered `(method, path)` pair, for startup logging.
    pub fn bindings(&self) -> Vec<(String, String)> {
        let mut bindings = Vec::new();
        for entry in self.routes.iter() {
            for method in entry.value().keys() {
                bindings.push((method.clone(), entry.key().clone()));
            }
        }
        bindings
    }
}

/// Wraps a handler function into the boxed [`Handler`] shape.
pub fn into_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// Adapts a request-less closure to the fixed handler signature.
///
/// ```ignore
/// agent.get("/ping", zero_arg(|| async { Ok(Response::html("pong")) }));
/// ```
pub fn zero_arg<F, Fut>(f: F) -> impl Fn(Request) -> Fut + Send + Sync + 'static
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    move |_request| f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use std::collections::HashMap;

    fn sample_request() -> Request {
        Request::reconstruct(
            "GET".into(),
            "/".into(),
            HashMap::new(),
            None,
            None,
            None,
        )
    }

    fn tagged(tag: &'static str) -> Handler {
        into_handler(move |_req| async move { Ok(Response::html(tag)) })
    }

    async fn invoke(handler: Handler) -> String {
        handler(sample_request()).await.unwrap().into_canonical().body
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let router = Router::new();
        router.register("/a", "GET", tagged("first"));
        router.register("/a", "get", tagged("second"));

        let handler = router.lookup("/a", "GET").unwrap();
        assert_eq!(invoke(handler).await, "second");
    }

    #[test]
    fn method_matching_is_case_insensitive() {
        let router = Router::new();
        router.register("/a", "post", tagged("x"));
        assert!(router.lookup("/a", "POST").is_some());
        assert!(router.lookup("/a", "PoSt").is_some());
        assert!(router.lookup("/a", "GET").is_none());
    }

    #[test]
    fn path_matching_is_exact() {
        let router = Router::new();
        router.register("/a", "GET", tagged("x"));
        assert!(router.lookup("/a/", "GET").is_none());
        assert!(router.lookup("/a/b", "GET").is_none());
        assert!(router.lookup("/", "GET").is_none());
    }

    #[tokio::test]
    async fn zero_arg_adapter_ignores_the_request() {
        let handler = into_handler(zero_arg(|| async { Ok(Response::html("pong")) }));
        assert_eq!(invoke(handler).await, "pong");
    }
}
