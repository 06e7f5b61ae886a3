//! # Agent State
//!
//! Shared state for the tunnel agent: the route table, the redirect table,
//! the blocked-IP set, the assigned public URL and the connection lifecycle
//! state. One `Arc<AgentState>` is shared between the registration surface,
//! the receive loop and every spawned dispatch task.
//!
//! The registries use `DashMap`/`DashSet`, so a mutation concurrent with
//! dispatch is visible to the next lookup without ever exposing a partial
//! update.

use crate::router::Router;
use dashmap::{DashMap, DashSet};
use std::sync::RwLock;

/// Connection lifecycle.
///
/// `Disconnected → Connecting → Registering → Active → Draining →
/// Disconnected`. `Draining` means the relay announced the session's end
/// (`disconnecting` or `error`); in-flight dispatch may finish but new
/// requests are no longer accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registering,
    Active,
    Draining,
}

/// A configured redirect: requests for the source path are answered with
/// `status` and a `Location: target` header, without invoking any handler.
#[derive(Debug, Clone)]
pub struct Redirect {
    pub target: String,
    pub status: u16,
}

/// State shared across the agent's tasks.
pub struct AgentState {
    /// The route table.
    pub router: Router,

    /// Redirect table: source path → redirect. Consulted before the
    /// route table; a path present in both resolves to the redirect.
    pub redirects: DashMap<String, Redirect>,

    /// Remote addresses refused with 403 before any routing.
    pub blocked_ips: DashSet<String>,

    /// Public URL assigned by the relay. `None` until registered.
    pub public_url: RwLock<Option<String>>,

    /// Current lifecycle state.
    state: RwLock<ConnectionState>,
}

impl AgentState {
    pub fn new() -> AgentState {
        AgentState {
            router: Router::new(),
            redirects: DashMap::new(),
            blocked_ips: DashSet::new(),
            public_url: RwLock::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|state| *state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn set_connection_state(&self, next: ConnectionState) {
        if let Ok(mut state) = self.state.write() {
            *state = next;
        }
    }

    pub fn set_public_url(&self, url: Option<String>) {
        if let Ok(mut public_url) = self.public_url.write() {
            *public_url = url;
        }
    }

    pub fn public_url(&self) -> Option<String> {
        self.public_url.read().ok().and_then(|url| url.clone())
    }
}

impl Default for AgentState {
    fn default() -> Self {
        AgentState::new()
    }
}
