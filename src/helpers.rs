//! # Handler Helpers
//!
//! Convenience builders used inside user handlers, layered on top of the
//! protocol core:
//! - [`send_file`] — serve a local file as a base64 response consumable by
//!   the dispatcher's normalization rules;
//! - [`redirect`] — build a redirect response;
//! - [`render_template`] — literal `{{ key }}` substitution plus
//!   regex-driven `{% for %}` / `{% if %}` expansion over a text file.

use crate::response::Response;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Serves a local file with a guessed content type.
pub fn send_file(path: impl AsRef<Path>) -> Response {
    send_file_with(path, None, false, None)
}

/// Serves a local file with full control: explicit content type, and an
/// optional `Content-Disposition: attachment` header.
///
/// A missing file yields a plain 404 response rather than an error. The
/// file content is base64-encoded so binary data survives the JSON wire
/// format; the relay decodes it before delivery.
pub fn send_file_with(
    path: impl AsRef<Path>,
    mimetype: Option<&str>,
    as_attachment: bool,
    attachment_name: Option<&str>,
) -> Response {
    let path = path.as_ref();
    let Ok(content) = fs::read(path) else {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/html".to_string());
        return Response::body_with(
            "<h1>404 Not Found</h1><p>File not found</p>",
            404,
            headers,
        );
    };

    let mut headers = HashMap::new();
    headers.insert(
        "Content-Type".to_string(),
        mimetype.unwrap_or_else(|| content_type_for(path)).to_string(),
    );
    if as_attachment {
        let filename = attachment_name
            .map(str::to_string)
            .or_else(|| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        headers.insert(
            "Content-Disposition".to_string(),
            format!("attachment; filename=\"{filename}\""),
        );
    }

    Response::Base64 {
        body: BASE64.encode(&content),
        status: 200,
        headers,
    }
}

/// A redirect response. `status` is typically 301 or 302.
pub fn redirect(location: &str, status: u16) -> Response {
    Response::Redirect {
        location: location.to_string(),
        status,
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
        .as_str()
    {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

static FOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{% for (\w+) in (\w+) %\}(.*?)\{% endfor %\}").expect("valid regex")
});
static IF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{% if (\w+) %\}(.*?)\{% endif %\}").expect("valid regex"));

/// Renders a template file against a JSON object context.
///
/// Supported constructs, in expansion order:
/// 1. `{{ key }}` / `{{key}}` — literal substitution of top-level keys;
/// 2. `{% for item in list %}...{% endfor %}` — repeats the body per array
///    element, substituting `{{ item }}` or `{{ item.field }}`;
/// 3. `{% if key %}...{% endif %}` — keeps the body when the key is truthy.
///
/// A missing template yields an error HTML string; rendering never fails.
pub fn render_template(path: impl AsRef<Path>, context: &Value) -> String {
    let path = path.as_ref();
    let Ok(mut template) = fs::read_to_string(path) else {
        return format!(
            "<h1>Template Error</h1><p>Template {} not found</p>",
            path.display()
        );
    };

    if let Some(object) = context.as_object() {
        for (key, value) in object {
            let rendered = display_value(value);
            template = template.replace(&format!("{{{{ {key} }}}}"), &rendered);
            template = template.replace(&format!("{{{{{key}}}}}"), &rendered);
        }
    }

    let template = FOR_RE
        .replace_all(&template, |caps: &Captures| {
            expand_loop(&caps[1], &caps[2], &caps[3], context)
        })
        .into_owned();

    IF_RE
        .replace_all(&template, |caps: &Captures| {
            let truthy = context
                .get(&caps[1])
                .map(is_truthy)
                .unwrap_or(false);
            if truthy {
                caps[2].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

fn expand_loop(item_name: &str, list_name: &str, body: &str, context: &Value) -> String {
    let Some(items) = context.get(list_name).and_then(Value::as_array) else {
        return String::new();
    };

    let mut out = String::new();
    for item in items {
        let mut chunk = body.to_string();
        match item.as_object() {
            Some(fields) => {
                for (key, value) in fields {
                    let rendered = display_value(value);
                    chunk = chunk.replace(&format!("{{{{ {item_name}.{key} }}}}"), &rendered);
                    chunk = chunk.replace(&format!("{{{{{item_name}.{key}}}}}"), &rendered);
                }
            }
            None => {
                let rendered = display_value(item);
                chunk = chunk.replace(&format!("{{{{ {item_name} }}}}"), &rendered);
                chunk = chunk.replace(&format!("{{{{{item_name}}}}}"), &rendered);
            }
        }
        out.push_str(&chunk);
    }
    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
