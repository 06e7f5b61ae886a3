//! # Tunnel Agent Connection Loop
//!
//! Owns the lifecycle of the duplex connection to the relay:
//! - connection establishment and registration
//! - the single receive loop feeding the codec → reconstructor → router →
//!   dispatcher round trip
//! - the independent keepalive task (WebSocket pings at a tenth of the
//!   configured timeout)
//! - terminal-state reporting to the caller
//!
//! A closed connection is **not** reconnected automatically; `run` returns
//! and the owning process decides whether to call it again.

use crate::config::AgentConfig;
use crate::dispatch::dispatch;
use crate::helpers::send_file;
use crate::protocol::{self, WsMessage};
use crate::request::Request;
use crate::response::CanonicalResponse;
use crate::router::{into_handler, HandlerResult};
use crate::state::{AgentState, ConnectionState, Redirect};
use crate::update;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Queue of outbound WebSocket frames, drained by the sender task.
type OutboundTx = mpsc::UnboundedSender<Message>;

/// Why a session ended, when it ended without a transport fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The relay announced a graceful disconnect.
    RelayClosing {
        message: String,
        detail: Option<String>,
    },

    /// The relay reported an error (e.g. the declared name is taken).
    RelayError { message: String, name_taken: bool },

    /// The channel closed without an announcement from the relay.
    ChannelClosed,
}

/// Faults surfaced to the caller. Everything else — parse faults, handler
/// faults, malformed frames — is recovered locally.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to connect to relay at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// A client-side tunnel agent.
///
/// Handlers, redirects and blocked IPs are registered up front; [`run`]
/// then connects to the relay and serves inbound requests until the
/// session ends. Registrations made while a session is running become
/// visible to the next matched request.
///
/// ```ignore
/// let agent = TunnelAgent::new(AgentConfig::default());
/// agent.get("/hi", |_req| async { Ok(Response::json(json!({"msg": "hello"}))) });
/// let end = agent.run().await?;
/// ```
///
/// [`run`]: TunnelAgent::run
pub struct TunnelAgent {
    config: AgentConfig,
    client_id: String,
    state: Arc<AgentState>,
}

impl TunnelAgent {
    /// Creates an agent with a freshly generated client id and empty
    /// registration tables.
    pub fn new(config: AgentConfig) -> TunnelAgent {
        TunnelAgent {
            config,
            client_id: Uuid::new_v4().to_string(),
            state: Arc::new(AgentState::new()),
        }
    }

    /// The opaque client identifier sent in the `register` message.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Current connection lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection_state()
    }

    /// The public URL assigned by the relay, once registered.
    pub fn public_url(&self) -> Option<String> {
        self.state.public_url()
    }

    // ── Registration Surface ──────────────────────────────────────

    /// Binds `handler` to `path` for each of `methods`. Registering the
    /// same `(path, method)` pair again replaces the previous handler.
    pub fn route<F, Fut>(&self, path: &str, methods: &[&str], handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = into_handler(handler);
        for method in methods {
            self.state.router.register(path, method, handler.clone());
        }
    }

    pub fn get<F, Fut>(&self, path: &str, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(path, &["GET"], handler);
    }

    pub fn post<F, Fut>(&self, path: &str, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(path, &["POST"], handler);
    }

    pub fn put<F, Fut>(&self, path: &str, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(path, &["PUT"], handler);
    }

    pub fn delete<F, Fut>(&self, path: &str, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(path, &["DELETE"], handler);
    }

    /// Answers requests for `from` with a redirect to `to`, without
    /// invoking any handler. Redirects take precedence over routes.
    pub fn add_redirect(&self, from: &str, to: &str, status: u16) {
        if self.config.debug {
            info!("added redirect: {from} -> {to} ({status})");
        }
        self.state.redirects.insert(
            from.to_string(),
            Redirect {
                target: to.to_string(),
                status,
            },
        );
    }

    pub fn remove_redirect(&self, from: &str) {
        if self.state.redirects.remove(from).is_some() && self.config.debug {
            info!("removed redirect: {from}");
        }
    }

    /// Refuses further requests from `ip` with a 403.
    pub fn block_ip(&self, ip: &str) {
        self.state.blocked_ips.insert(ip.to_string());
    }

    pub fn unblock_ip(&self, ip: &str) {
        self.state.blocked_ips.remove(ip);
    }

    /// Registers a GET handler at the literal path `{prefix}/<filename>`
    /// that serves the trailing segment of the request path from the
    /// configured static folder. Sugar over normal registration.
    pub fn static_dir(&self, prefix: &str) {
        let folder = self.config.static_folder.clone();
        self.route(&format!("{prefix}/<filename>"), &["GET"], move |request| {
            let folder = folder.clone();
            async move {
                let filename = request.path.rsplit('/').next().unwrap_or("").to_string();
                Ok(send_file(Path::new(&folder).join(filename)))
            }
        });
    }

    // ── Connection Lifecycle ──────────────────────────────────────

    /// Runs one session against the relay: connect, register, serve
    /// requests until the channel closes.
    ///
    /// Returns the reason the session ended, or an [`AgentError`] for
    /// connect/transport faults. Never reconnects on its own.
    pub async fn run(&self) -> Result<SessionEnd, AgentError> {
        if self.config.check_updates {
            update::check_for_updates().await;
        }
        self.log_registrations();

        let url = self.config.relay_url();
        self.state.set_connection_state(ConnectionState::Connecting);
        info!("connecting to relay at {url}");
        let (socket, _) = match connect_async(&url).await {
            Ok(connected) => connected,
            Err(source) => {
                self.state.set_connection_state(ConnectionState::Disconnected);
                return Err(AgentError::Connect { url, source });
            }
        };

        let (mut sink, mut stream) = socket.split();

        // Outbound sender task: drains the frame queue into the socket.
        // Dispatch tasks and the keepalive share the queue, so responses
        // can complete out of order without contending for the sink.
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let outbound = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break; // Connection lost
                }
            }
        });

        send_frame(
            &tx,
            &WsMessage::Register {
                client_id: self.client_id.clone(),
                name: self.config.name.clone(),
                security: self.config.security.clone(),
                token: self.config.token.clone(),
            },
        );
        self.state.set_connection_state(ConnectionState::Registering);

        let mut keepalive: Option<JoinHandle<()>> = None;
        let mut session_end: Option<SessionEnd> = None;

        let result = loop {
            match stream.next().await {
                None => break Ok(session_end.take().unwrap_or(SessionEnd::ChannelClosed)),
                Some(Err(e)) => break Err(AgentError::Transport(e)),
                Some(Ok(Message::Close(_))) => {
                    break Ok(session_end.take().unwrap_or(SessionEnd::ChannelClosed))
                }
                Some(Ok(Message::Text(text))) => {
                    self.handle_frame(text.as_str(), &tx, &mut keepalive, &mut session_end)
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle_frame(text, &tx, &mut keepalive, &mut session_end),
                    Err(_) => debug!("dropping non-UTF-8 binary frame"),
                },
                // Raw ping/pong frames are answered by the transport.
                Some(Ok(_)) => {}
            }
        };

        if let Some(task) = keepalive.take() {
            task.abort();
        }
        outbound.abort();
        self.state.set_public_url(None);
        self.state.set_connection_state(ConnectionState::Disconnected);

        match &result {
            Ok(end) => info!("session ended: {end:?}"),
            Err(e) => error!("session ended with transport fault: {e}"),
        }
        result
    }

    /// Handles one decoded-or-dropped inbound frame. HTTP requests are
    /// dispatched on their own task so a suspended handler never blocks
    /// the receive loop.
    fn handle_frame(
        &self,
        frame: &str,
        tx: &OutboundTx,
        keepalive: &mut Option<JoinHandle<()>>,
        session_end: &mut Option<SessionEnd>,
    ) {
        let msg = match protocol::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("dropping undecodable frame: {e}");
                return;
            }
        };

        match msg {
            WsMessage::Registered {
                public_url,
                http_port,
                has_token,
                time_info,
            } => {
                self.state.set_public_url(Some(public_url.clone()));
                self.state.set_connection_state(ConnectionState::Active);

                info!("server exposed at {public_url} (relay http port {http_port})");
                if let Some(name) = &self.config.name {
                    info!("claimed name: {name}");
                }
                info!(
                    "session tier: {}",
                    if has_token { "with token" } else { "free" }
                );
                if let Some(remaining) = &time_info.remaining_formatted {
                    info!("time remaining: {remaining}");
                }
                if let Some(reset_in) = time_info.reset_in {
                    info!("budget resets in {reset_in}s");
                }
                if time_info.active_servers.unwrap_or(0) > 1 {
                    warn!(
                        "{} active servers share this time budget",
                        time_info.active_servers.unwrap_or(0)
                    );
                }
                info!("request timeout: {}s", self.config.timeout_secs);

                if keepalive.is_none() {
                    *keepalive = Some(spawn_keepalive(
                        tx.clone(),
                        Duration::from_secs(self.config.keepalive_interval_secs()),
                    ));
                }
            }

            WsMessage::Warning {
                message,
                time_remaining,
            } => {
                warn!("relay warning: {message}");
                if let Some(remaining) = time_remaining {
                    warn!("time left: {remaining}s");
                }
            }

            WsMessage::Disconnecting { message, detail } => {
                warn!("relay disconnecting: {message}");
                if let Some(detail) = &detail {
                    warn!("{detail}");
                }
                *session_end = Some(SessionEnd::RelayClosing { message, detail });
                self.state.set_connection_state(ConnectionState::Draining);
                if let Some(task) = keepalive.take() {
                    task.abort();
                }
            }

            WsMessage::Error {
                message,
                name_taken,
            } => {
                error!("relay error: {message}");
                let name_taken = name_taken.is_some();
                if name_taken {
                    if let Some(name) = &self.config.name {
                        error!("the name '{name}' is already in use; pick another");
                    }
                }
                *session_end = Some(SessionEnd::RelayError {
                    message,
                    name_taken,
                });
                self.state.set_connection_state(ConnectionState::Draining);
                if let Some(task) = keepalive.take() {
                    task.abort();
                }
            }

            WsMessage::HttpRequest {
                request_id,
                method,
                path,
                headers,
                remote_addr,
                body,
                body_encoding,
            } => {
                if self.state.connection_state() != ConnectionState::Active {
                    debug!("not active; dropping request {request_id}");
                    return;
                }
                if self.config.debug {
                    info!(
                        "{method} {path} - {}",
                        remote_addr.as_deref().unwrap_or("unknown")
                    );
                }

                let state = self.state.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let request =
                        Request::reconstruct(method, path, headers, remote_addr, body, body_encoding);
                    let CanonicalResponse {
                        status,
                        body,
                        headers,
                        body_encoding,
                    } = dispatch(&state, request).await;
                    send_frame(
                        &tx,
                        &WsMessage::HttpResponse {
                            request_id,
                            status,
                            body,
                            headers,
                            body_encoding,
                        },
                    );
                });
            }

            WsMessage::Ping => send_frame(tx, &WsMessage::Pong),

            // Outbound-only or no-op messages arriving inbound.
            WsMessage::Pong | WsMessage::Register { .. } | WsMessage::HttpResponse { .. } => {}
        }
    }

    fn log_registrations(&self) {
        let bindings = self.state.router.bindings();
        info!("registered routes: {}", bindings.len());
        for (method, path) in bindings {
            info!("  {method} {path}");
        }
        if !self.state.redirects.is_empty() {
            info!("registered redirects: {}", self.state.redirects.len());
            for entry in self.state.redirects.iter() {
                info!(
                    "  {} -> {} ({})",
                    entry.key(),
                    entry.value().target,
                    entry.value().status
                );
            }
        }
    }
}

/// Sends protocol-level pings at `interval` until the outbound channel
/// closes. Independent of request traffic; aborted as soon as the
/// connection leaves the active state (Draining or loop exit).
fn spawn_keepalive(tx: OutboundTx, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(Message::Ping(Bytes::new())).is_err() {
                break; // Channel closed; connection lost
            }
        }
    })
}

/// Serializes a protocol message and queues it for the sender task.
fn send_frame(tx: &OutboundTx, msg: &WsMessage) {
    match protocol::encode(msg) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text.into()));
        }
        Err(e) => error!("failed to encode outbound frame: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;

    #[test]
    fn agents_get_distinct_client_ids() {
        let a = TunnelAgent::new(AgentConfig::default());
        let b = TunnelAgent::new(AgentConfig::default());
        assert_ne!(a.client_id(), b.client_id());
        assert_eq!(a.connection_state(), ConnectionState::Disconnected);
        assert!(a.public_url().is_none());
    }

    #[test]
    fn route_registers_every_method() {
        let agent = TunnelAgent::new(AgentConfig::default());
        agent.route("/multi", &["GET", "post"], |_req| async {
            Ok(Response::html("ok"))
        });
        assert!(agent.state.router.lookup("/multi", "GET").is_some());
        assert!(agent.state.router.lookup("/multi", "POST").is_some());
        assert!(agent.state.router.lookup("/multi", "DELETE").is_none());
    }

    #[test]
    fn static_dir_registers_the_literal_placeholder_path() {
        let agent = TunnelAgent::new(AgentConfig::default());
        agent.static_dir("/static");
        assert!(agent
            .state
            .router
            .lookup("/static/<filename>", "GET")
            .is_some());
    }
}
