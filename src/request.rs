//! # Request Reconstruction
//!
//! Turns a decoded `http_request` protocol message into a structured
//! [`Request`] the routing layer can work with: path/query split, query
//! parameter decoding, body decoding (text or base64) and content-type
//! driven body parsing (JSON, URL-encoded form, multipart form).
//!
//! Reconstruction is total. Every parsing step is independently
//! fault-tolerant: a malformed query token, JSON body or multipart part
//! degrades to an empty or absent field, never to an error. Handlers always
//! receive a complete `Request`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use std::collections::HashMap;

/// A single URL-encoded form field.
///
/// A key that occurs exactly once collapses to `Single`; repeated keys
/// retain all values in occurrence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Single(String),
    Many(Vec<String>),
}

impl FormValue {
    /// The first (or only) value of this field.
    pub fn first(&self) -> &str {
        match self {
            FormValue::Single(v) => v,
            FormValue::Many(vs) => vs.first().map(String::as_str).unwrap_or(""),
        }
    }
}

/// A file carried by a multipart part that declared a `filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Client-supplied file name, exactly as sent.
    pub filename: String,
    /// Raw part content, untouched.
    pub content: Vec<u8>,
}

/// HTTP-semantic view of an inbound `http_request` message.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method, as sent by the relay (e.g. "GET").
    pub method: String,
    /// Request path with the query string stripped.
    pub path: String,
    /// The original path, query string included.
    pub full_path: String,
    /// Raw query string ("" when absent).
    pub query_string: String,
    /// Decoded query parameters. Later duplicate keys overwrite earlier ones.
    pub args: HashMap<String, String>,
    /// Header map as received.
    pub headers: HashMap<String, String>,
    /// Remote peer address, "unknown" when the relay did not report one.
    pub remote_addr: String,
    /// Raw body bytes (base64-decoded when the message declared it).
    pub raw_body: Vec<u8>,
    /// Body as text; invalid UTF-8 sequences are replaced, not fatal.
    pub body: String,
    /// Parsed JSON body. Present only when the content type is
    /// `application/json` and the body parses.
    pub json: Option<Value>,
    /// URL-encoded or multipart form fields.
    pub form: HashMap<String, FormValue>,
    /// Multipart file uploads, keyed by field name.
    pub files: HashMap<String, FileUpload>,
}

impl Request {
    /// Builds a `Request` from the fields of an `http_request` message.
    /// Never fails; see the module docs for the degradation rules.
    pub fn reconstruct(
        method: String,
        path: String,
        headers: HashMap<String, String>,
        remote_addr: Option<String>,
        body: Option<String>,
        body_encoding: Option<String>,
    ) -> Request {
        let full_path = path;
        let (path, query_string) = match full_path.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (full_path.clone(), String::new()),
        };

        let args = parse_query(&query_string);

        let text_body = body.unwrap_or_default();
        let raw_body = if body_encoding.as_deref() == Some("base64") {
            BASE64.decode(text_body.as_bytes()).unwrap_or_default()
        } else {
            text_body.into_bytes()
        };
        let body = String::from_utf8_lossy(&raw_body).into_owned();

        let mut request = Request {
            method,
            path,
            full_path,
            query_string,
            args,
            headers,
            remote_addr: remote_addr.unwrap_or_else(|| "unknown".to_string()),
            raw_body,
            body,
            json: None,
            form: HashMap::new(),
            files: HashMap::new(),
        };

        // Only the media-type comparison is case-insensitive; the multipart
        // boundary token must keep its original case.
        let content_type = request.content_type().to_string();
        let media_type = content_type.to_ascii_lowercase();
        if media_type.contains("application/json") && !request.body.is_empty() {
            request.json = serde_json::from_str(&request.body).ok();
        } else if media_type.contains("application/x-www-form-urlencoded")
            && !request.body.is_empty()
        {
            request.form = parse_urlencoded_form(&request.body);
        } else if media_type.contains("multipart/form-data") {
            let (form, files) = parse_multipart(&content_type, &request.raw_body);
            request.form = form;
            request.files = files;
        }

        request
    }

    /// Case-insensitive `content-type` header lookup.
    fn content_type(&self) -> &str {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }
}

/// Parses a query string into a key/value map.
///
/// Tokens are split on `&`, then on the first `=`; tokens without `=` are
/// ignored. Keys and values are percent-decoded; a token that fails to
/// decode is kept verbatim.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut args = HashMap::new();
    if query.is_empty() {
        return args;
    }
    for param in query.split('&') {
        if let Some((key, value)) = param.split_once('=') {
            args.insert(percent_decode(key), percent_decode(value));
        }
    }
    args
}

fn percent_decode(token: &str) -> String {
    urlencoding::decode(token)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| token.to_string())
}

/// Parses an `application/x-www-form-urlencoded` body. Single-occurrence
/// keys collapse to a single value; repeated keys retain every value.
fn parse_urlencoded_form(body: &str) -> HashMap<String, FormValue> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
        grouped
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                FormValue::Single(values.remove(0))
            } else {
                FormValue::Many(values)
            };
            (key, value)
        })
        .collect()
}

/// Parses a `multipart/form-data` body.
///
/// The raw body is split on `--boundary`; the preamble and the closing
/// segment are discarded. Each remaining part is split at the first blank
/// line into headers and content. A part whose `Content-Disposition`
/// carries a `filename` becomes a file upload, otherwise a form field.
/// Malformed parts are skipped individually.
fn parse_multipart(
    content_type: &str,
    raw_body: &[u8],
) -> (HashMap<String, FormValue>, HashMap<String, FileUpload>) {
    let mut form = HashMap::new();
    let mut files = HashMap::new();

    let Some(boundary) = extract_boundary(content_type) else {
        return (form, files);
    };
    let delimiter = format!("--{boundary}").into_bytes();
    let segments = split_on(raw_body, &delimiter);
    if segments.len() < 3 {
        // No complete part between the preamble and the closing segment.
        return (form, files);
    }

    for part in &segments[1..segments.len() - 1] {
        if part.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let Some(header_end) = find(part, b"\r\n\r\n") else {
            continue;
        };
        let header_text = String::from_utf8_lossy(&part[..header_end]);
        let mut content = &part[header_end + 4..];
        while matches!(content.last(), Some(b'\r') | Some(b'\n')) {
            content = &content[..content.len() - 1];
        }

        let Some((name, filename)) = parse_disposition(&header_text) else {
            continue;
        };
        match filename {
            Some(filename) => {
                files.insert(
                    name,
                    FileUpload {
                        filename,
                        content: content.to_vec(),
                    },
                );
            }
            None => {
                form.insert(
                    name,
                    FormValue::Single(String::from_utf8_lossy(content).into_owned()),
                );
            }
        }
    }

    (form, files)
}

/// Extracts the `boundary` token from a `multipart/form-data` content type.
fn extract_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|piece| {
        piece
            .trim()
            .strip_prefix("boundary=")
            .map(|b| b.trim().trim_matches('"').to_string())
    })
}

/// Pulls `name` and the optional `filename` out of a part's
/// `Content-Disposition` header. Returns `None` when the header or the
/// `name` parameter is missing.
fn parse_disposition(headers: &str) -> Option<(String, Option<String>)> {
    let line = headers
        .split("\r\n")
        .find(|line| line.to_ascii_lowercase().starts_with("content-disposition"))?;

    let mut name = None;
    let mut filename = None;
    for piece in line.split(';') {
        let piece = piece.trim();
        if let Some(value) = piece.strip_prefix("filename=") {
            filename = Some(unquote(value));
        } else if let Some(value) = piece.strip_prefix("name=") {
            name = Some(unquote(value));
        }
    }
    name.map(|n| (n, filename))
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

/// Splits `haystack` on every occurrence of `needle`.
fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            parts.push(&haystack[start..i]);
            i += needle.len();
            start = i;
        } else {
            i += 1;
        }
    }
    parts.push(&haystack[start..]);
    parts
}

/// Position of the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
