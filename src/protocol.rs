//! # Tunnel Protocol Messages
//!
//! Defines all message types exchanged between the agent and the relay
//! server over the duplex WebSocket connection. Messages are serialized as
//! JSON text frames using serde's internally-tagged representation
//! (`"type": "..."` field).
//!
//! The relay correlates an `http_response` with its `http_request` through
//! the `request_id` field — the channel carries interleaved traffic with no
//! other sequencing, so responses may be sent out of arrival order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// All messages in the relay protocol.
///
/// The `#[serde(tag = "type")]` attribute means each variant is serialized
/// as a JSON object with a `"type"` field whose value is the snake_case
/// variant name. For example, `WsMessage::Registered { .. }` corresponds to
/// `{"type": "registered", ...}`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    // ── Registration ──────────────────────────────────────────────
    /// Sent by the agent right after the channel opens. Declares the
    /// client identity, the optional public name, the security
    /// configuration and the optional access token.
    Register {
        client_id: String,
        name: Option<String>,
        security: Map<String, Value>,
        token: Option<String>,
    },

    /// Relay's acknowledgment: the agent is reachable at `public_url`.
    Registered {
        public_url: String,
        http_port: u16,
        #[serde(default)]
        has_token: bool,
        #[serde(default)]
        time_info: TimeInfo,
    },

    // ── Control ───────────────────────────────────────────────────
    /// Advisory from the relay (e.g. session time running low).
    /// Surfaced to the operator, no state change.
    Warning {
        message: String,
        #[serde(default)]
        time_remaining: Option<Value>,
    },

    /// Graceful disconnect notice: the relay will close the channel.
    Disconnecting {
        message: String,
        #[serde(default)]
        detail: Option<String>,
    },

    /// Error from the relay. `name_taken` is set when the declared name
    /// is already in use by another agent.
    Error {
        message: String,
        #[serde(default)]
        name_taken: Option<Value>,
    },

    // ── HTTP traffic ──────────────────────────────────────────────
    /// An inbound HTTP request, already decoded by the relay.
    /// `body_encoding` is `"base64"` when the body carries binary data.
    HttpRequest {
        request_id: String,
        method: String,
        path: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        remote_addr: Option<String>,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        body_encoding: Option<String>,
    },

    /// The agent's answer to an `http_request`, correlated by `request_id`.
    HttpResponse {
        request_id: String,
        status: u16,
        body: String,
        headers: HashMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body_encoding: Option<String>,
    },

    // ── Heartbeat ─────────────────────────────────────────────────
    /// Protocol-level heartbeat request.
    Ping,

    /// Protocol-level heartbeat response.
    Pong,
}

/// Session time budget metadata carried in `registered`.
///
/// Every field is optional: the relay omits what it does not track.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TimeInfo {
    #[serde(default)]
    pub remaining_formatted: Option<String>,
    #[serde(default)]
    pub reset_in: Option<u64>,
    #[serde(default)]
    pub active_servers: Option<u32>,
    #[serde(default)]
    pub consumption_rate: Option<Value>,
}

/// Decodes a single text frame into a protocol message.
///
/// Fails when the payload is not a JSON object, lacks a `type` field or
/// names an unknown type. The caller drops such frames; a decode failure
/// is never a connection fault.
pub fn decode(frame: &str) -> Result<WsMessage, serde_json::Error> {
    serde_json::from_str(frame)
}

/// Encodes a protocol message as a JSON text frame.
pub fn encode(msg: &WsMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_registered_with_partial_time_info() {
        let frame = r#"{
            "type": "registered",
            "public_url": "http://relay.example/abc",
            "http_port": 8080,
            "time_info": {"remaining_formatted": "3h 12m"}
        }"#;
        match decode(frame).unwrap() {
            WsMessage::Registered {
                public_url,
                http_port,
                has_token,
                time_info,
            } => {
                assert_eq!(public_url, "http://relay.example/abc");
                assert_eq!(http_port, 8080);
                assert!(!has_token);
                assert_eq!(time_info.remaining_formatted.as_deref(), Some("3h 12m"));
                assert_eq!(time_info.reset_in, None);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decodes_http_request_with_missing_optionals() {
        let frame = r#"{"type":"http_request","request_id":"r1","method":"GET","path":"/x"}"#;
        match decode(frame).unwrap() {
            WsMessage::HttpRequest {
                request_id,
                method,
                headers,
                remote_addr,
                body,
                body_encoding,
                ..
            } => {
                assert_eq!(request_id, "r1");
                assert_eq!(method, "GET");
                assert!(headers.is_empty());
                assert!(remote_addr.is_none());
                assert!(body.is_none());
                assert!(body_encoding.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_frames_without_a_type() {
        assert!(decode(r#"{"message": "hi"}"#).is_err());
        assert!(decode("not json at all").is_err());
        assert!(decode(r#"{"type": "no_such_message"}"#).is_err());
    }

    #[test]
    fn encodes_register_with_type_tag() {
        let msg = WsMessage::Register {
            client_id: "c-1".into(),
            name: Some("demo".into()),
            security: Map::new(),
            token: None,
        };
        let frame = encode(&msg).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "register");
        assert_eq!(value["client_id"], "c-1");
        assert_eq!(value["name"], "demo");
        assert!(value["token"].is_null());
    }

    #[test]
    fn http_response_carries_request_id_and_skips_absent_encoding() {
        let msg = WsMessage::HttpResponse {
            request_id: "r9".into(),
            status: 200,
            body: "ok".into(),
            headers: HashMap::new(),
            body_encoding: None,
        };
        let frame = encode(&msg).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "http_response");
        assert_eq!(value["request_id"], "r9");
        assert!(value.get("body_encoding").is_none());
    }
}
