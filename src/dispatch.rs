//! # Request Dispatch
//!
//! Resolves a reconstructed [`Request`] against the shared agent state and
//! produces a [`CanonicalResponse`]. Resolution order: blocked-IP check,
//! redirect table, route table, handler invocation. A handler fault is
//! converted to a canonical 500 — it never tears down the connection.

use crate::request::Request;
use crate::response::CanonicalResponse;
use crate::state::AgentState;
use tracing::{debug, error};

/// Dispatches one request to completion.
pub async fn dispatch(state: &AgentState, request: Request) -> CanonicalResponse {
    if state.blocked_ips.contains(&request.remote_addr) {
        debug!(remote_addr = %request.remote_addr, "blocked request");
        return CanonicalResponse::forbidden();
    }

    if let Some(redirect) = state.redirects.get(&request.path) {
        return CanonicalResponse::redirect(&redirect.target, redirect.status);
    }

    let Some(handler) = state.router.lookup(&request.path, &request.method) else {
        return CanonicalResponse::not_found(&request.method, &request.path);
    };

    let path = request.path.clone();
    match handler(request).await {
        Ok(response) => response.into_canonical(),
        Err(e) => {
            error!(%path, error = %e, "handler failed");
            CanonicalResponse::server_error(&e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use crate::router::into_handler;
    use crate::state::Redirect;
    use anyhow::anyhow;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn request(method: &str, path: &str, remote_addr: &str) -> Request {
        Request::reconstruct(
            method.into(),
            path.into(),
            HashMap::new(),
            Some(remote_addr.into()),
            Some(String::new()),
            None,
        )
    }

    #[tokio::test]
    async fn routed_json_handler_produces_canonical_200() {
        let state = AgentState::new();
        state.router.register(
            "/hi",
            "GET",
            into_handler(|req: Request| async move {
                assert_eq!(req.args.get("name").map(String::as_str), Some("Ann"));
                Ok(Response::json(json!({"msg": "hello"})))
            }),
        );

        let canonical = dispatch(&state, request("GET", "/hi?name=Ann", "9.9.9.9")).await;
        assert_eq!(canonical.status, 200);
        assert_eq!(canonical.body, r#"{"msg":"hello"}"#);
        assert_eq!(canonical.headers["Content-Type"], "application/json");
    }

    #[tokio::test]
    async fn unmatched_route_is_404_and_never_invokes_a_handler() {
        let state = AgentState::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        state.router.register(
            "/other",
            "GET",
            into_handler(move |_req| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Response::html("nope"))
                }
            }),
        );

        let canonical = dispatch(&state, request("GET", "/missing", "9.9.9.9")).await;
        assert_eq!(canonical.status, 404);
        assert!(canonical.body.contains("GET /missing"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blocked_ip_is_403_regardless_of_route() {
        let state = AgentState::new();
        state
            .router
            .register("/hi", "GET", into_handler(|_req| async { Ok(Response::html("hi")) }));
        state.blocked_ips.insert("6.6.6.6".to_string());

        let canonical = dispatch(&state, request("GET", "/hi", "6.6.6.6")).await;
        assert_eq!(canonical.status, 403);
    }

    #[tokio::test]
    async fn redirect_table_wins_over_route_table() {
        let state = AgentState::new();
        state
            .router
            .register("/old", "GET", into_handler(|_req| async { Ok(Response::html("old")) }));
        state.redirects.insert(
            "/old".to_string(),
            Redirect {
                target: "/new".to_string(),
                status: 302,
            },
        );

        let canonical = dispatch(&state, request("GET", "/old", "9.9.9.9")).await;
        assert_eq!(canonical.status, 302);
        assert_eq!(canonical.headers["Location"], "/new");
    }

    #[tokio::test]
    async fn handler_error_becomes_canonical_500() {
        let state = AgentState::new();
        state.router.register(
            "/boom",
            "GET",
            into_handler(|_req| async { Err(anyhow!("database is down")) }),
        );

        let canonical = dispatch(&state, request("GET", "/boom", "9.9.9.9")).await;
        assert_eq!(canonical.status, 500);
        assert!(canonical.body.contains("database is down"));
    }

    #[tokio::test]
    async fn dispatch_survives_a_handler_fault() {
        let state = AgentState::new();
        state.router.register(
            "/boom",
            "GET",
            into_handler(|_req| async { Err(anyhow!("boom")) }),
        );
        state
            .router
            .register("/ok", "GET", into_handler(|_req| async { Ok(Response::html("fine")) }));

        assert_eq!(dispatch(&state, request("GET", "/boom", "1.1.1.1")).await.status, 500);
        let canonical = dispatch(&state, request("GET", "/ok", "1.1.1.1")).await;
        assert_eq!(canonical.status, 200);
        assert_eq!(canonical.body, "fine");
    }
}
