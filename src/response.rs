//! # Handler Responses
//!
//! Handlers produce a tagged [`Response`] value; the dispatcher normalizes
//! every variant into the single canonical `{status, body, headers,
//! body_encoding}` shape the wire protocol carries. Default headers are
//! added without overwriting what the handler set.

use serde_json::Value;
use std::collections::HashMap;

/// A handler's result, before normalization.
#[derive(Debug, Clone)]
pub enum Response {
    /// A JSON document. Serialized with `Content-Type: application/json`
    /// unless the handler set its own content type.
    Json {
        value: Value,
        status: u16,
        headers: HashMap<String, String>,
    },

    /// A text body with full control over status and headers.
    /// `Content-Type` defaults to `text/html`.
    Body {
        body: String,
        status: u16,
        headers: HashMap<String, String>,
    },

    /// A body that is already base64-encoded bytes, passed through
    /// verbatim with a `body_encoding: "base64"` marker so the relay
    /// decodes it before delivery.
    Base64 {
        body: String,
        status: u16,
        headers: HashMap<String, String>,
    },

    /// An HTTP redirect to `location`.
    Redirect { location: String, status: u16 },
}

impl Response {
    /// A 200 JSON response.
    pub fn json(value: Value) -> Response {
        Response::Json {
            value,
            status: 200,
            headers: HashMap::new(),
        }
    }

    /// A JSON response with an explicit status.
    pub fn json_with_status(value: Value, status: u16) -> Response {
        Response::Json {
            value,
            status,
            headers: HashMap::new(),
        }
    }

    /// A 200 HTML response.
    pub fn html(body: impl Into<String>) -> Response {
        Response::Body {
            body: body.into(),
            status: 200,
            headers: HashMap::new(),
        }
    }

    /// A text body with an explicit status and headers.
    pub fn body_with(
        body: impl Into<String>,
        status: u16,
        headers: HashMap<String, String>,
    ) -> Response {
        Response::Body {
            body: body.into(),
            status,
            headers,
        }
    }

    /// Normalizes this response into the canonical wire shape.
    pub fn into_canonical(self) -> CanonicalResponse {
        match self {
            Response::Json {
                value,
                status,
                mut headers,
            } => {
                set_default(&mut headers, "Content-Type", "application/json");
                CanonicalResponse {
                    status,
                    body: serde_json::to_string(&value)
                        .unwrap_or_else(|_| "null".to_string()),
                    headers,
                    body_encoding: None,
                }
            }
            Response::Body {
                body,
                status,
                mut headers,
            } => {
                set_default(&mut headers, "Content-Type", "text/html");
                CanonicalResponse {
                    status,
                    body,
                    headers,
                    body_encoding: None,
                }
            }
            Response::Base64 {
                body,
                status,
                headers,
            } => CanonicalResponse {
                status,
                body,
                headers,
                body_encoding: Some("base64".to_string()),
            },
            Response::Redirect { location, status } => CanonicalResponse::redirect(&location, status),
        }
    }
}

/// The normalized response shape sent back over the wire as
/// `http_response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub body_encoding: Option<String>,
}

impl CanonicalResponse {
    /// 403 for a blocked remote address.
    pub fn forbidden() -> CanonicalResponse {
        CanonicalResponse::html(
            403,
            "<h1>403 Forbidden</h1><p>Your IP has been blocked</p>".to_string(),
        )
    }

    /// 404 naming the unmatched method and path.
    pub fn not_found(method: &str, path: &str) -> CanonicalResponse {
        CanonicalResponse::html(
            404,
            format!("<h1>404 Not Found</h1><p>Route {method} {path} not found</p>"),
        )
    }

    /// 500 carrying the handler's error text.
    pub fn server_error(detail: &str) -> CanonicalResponse {
        CanonicalResponse::html(
            500,
            format!("<h1>500 Internal Server Error</h1><p>{detail}</p>"),
        )
    }

    /// A redirect with a `Location` header and a small HTML body.
    pub fn redirect(location: &str, status: u16) -> CanonicalResponse {
        let mut headers = HashMap::new();
        headers.insert("Location".to_string(), location.to_string());
        headers.insert("Content-Type".to_string(), "text/html".to_string());
        CanonicalResponse {
            status,
            body: format!(
                "<html><body>Redirecting to <a href=\"{location}\">{location}</a></body></html>"
            ),
            headers,
            body_encoding: None,
        }
    }

    fn html(status: u16, body: String) -> CanonicalResponse {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/html".to_string());
        CanonicalResponse {
            status,
            body,
            headers,
            body_encoding: None,
        }
    }
}

fn set_default(headers: &mut HashMap<String, String>, key: &str, value: &str) {
    if !headers.keys().any(|k| k.eq_ignore_ascii_case(key)) {
        headers.insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_normalizes_to_200_with_json_content_type() {
        let canonical = Response::json(json!({"msg": "hello"})).into_canonical();
        assert_eq!(canonical.status, 200);
        assert_eq!(canonical.body, r#"{"msg":"hello"}"#);
        assert_eq!(canonical.headers["Content-Type"], "application/json");
        assert_eq!(canonical.body_encoding, None);
    }

    #[test]
    fn json_with_status_keeps_the_status_and_content_type() {
        let canonical =
            Response::json_with_status(json!({"error": "unprocessable"}), 422).into_canonical();
        assert_eq!(canonical.status, 422);
        assert_eq!(canonical.body, r#"{"error":"unprocessable"}"#);
        assert_eq!(canonical.headers["Content-Type"], "application/json");
    }

    #[test]
    fn body_defaults_content_type_without_overwriting() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        let canonical = Response::body_with("hi", 201, headers).into_canonical();
        assert_eq!(canonical.status, 201);
        assert_eq!(canonical.headers["content-type"], "text/plain");
        assert!(!canonical.headers.contains_key("Content-Type"));
    }

    #[test]
    fn base64_body_passes_through_with_marker() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "image/png".to_string());
        let canonical = Response::Base64 {
            body: "aGVsbG8=".into(),
            status: 200,
            headers,
        }
        .into_canonical();
        assert_eq!(canonical.body, "aGVsbG8=");
        assert_eq!(canonical.body_encoding.as_deref(), Some("base64"));
    }

    #[test]
    fn redirect_carries_location_header() {
        let canonical = Response::Redirect {
            location: "/new".into(),
            status: 301,
        }
        .into_canonical();
        assert_eq!(canonical.status, 301);
        assert_eq!(canonical.headers["Location"], "/new");
        assert!(canonical.body.contains("/new"));
    }
}
