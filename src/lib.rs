//! # tunnel-agent
//!
//! A client-side tunnel agent: it keeps a persistent duplex WebSocket
//! connection to a relay, receives HTTP-shaped requests over that
//! connection, dispatches them to registered handlers and sends the
//! results back over the same channel. No local socket is ever bound —
//! all traffic arrives as relay protocol messages.
//!
//! ```ignore
//! use serde_json::json;
//! use tunnel_agent::{AgentConfig, Response, TunnelAgent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let agent = TunnelAgent::new(AgentConfig {
//!         name: Some("demo".into()),
//!         ..AgentConfig::default()
//!     });
//!
//!     agent.get("/hi", |req| async move {
//!         let name = req.args.get("name").cloned().unwrap_or_default();
//!         Ok(Response::json(json!({ "msg": format!("hello {name}") })))
//!     });
//!
//!     let end = agent.run().await?;
//!     println!("session over: {end:?}");
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod helpers;
pub mod protocol;
pub mod request;
pub mod response;
pub mod router;
pub mod state;
pub mod update;

pub use agent::{AgentError, SessionEnd, TunnelAgent};
pub use config::AgentConfig;
pub use helpers::{redirect, render_template, send_file, send_file_with};
pub use request::{FileUpload, FormValue, Request};
pub use response::{CanonicalResponse, Response};
pub use router::{zero_arg, Handler, HandlerResult};
pub use state::ConnectionState;
