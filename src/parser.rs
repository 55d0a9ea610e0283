//! Response parsing for upload replies
//!
//! The API answers with JSON, but depending on the transport that JSON may
//! arrive as a decoded value, as a raw body, or wrapped inside a rendered
//! HTML document (`<pre>` block). Everything here is pure.

use crate::models::{ApiError, HTTP_ERROR_CODE};
use crate::{Error, Result};
use serde_json::{json, Value};

/// A reply as handed over by a transport.
#[derive(Debug, Clone)]
pub enum RawResponse {
    Structured(Value),
    Text { status: Option<u16>, body: String },
}

/// Turn any raw reply into structured data. Never fails: undecodable
/// replies become a synthetic `error` reply carrying the status and text.
pub fn parse(raw: RawResponse) -> Value {
    match raw {
        RawResponse::Structured(value) => value,
        RawResponse::Text { status, body } => {
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                return value;
            }
            if let Some(value) = extract_from_document(&body) {
                return value;
            }
            tracing::debug!(?status, "Reply body is not JSON, synthesizing error reply");
            failure_reply(status, &body)
        }
    }
}

/// Synthetic reply used when nothing decodable came back.
pub fn failure_reply(status: Option<u16>, text: &str) -> Value {
    let mut error = json!({
        "code": HTTP_ERROR_CODE,
        "info": text,
    });
    if let Some(status) = status {
        error["status"] = json!(status);
    }
    json!({ "error": error })
}

/// Decode the JSON carried in the `<pre>` blocks of a rendered document.
pub fn extract_from_document(html: &str) -> Option<Value> {
    let text = preformatted_text(html)?;
    serde_json::from_str(text.trim()).ok()
}

/// Concatenated text content of every `<pre>` element, or `None` when the
/// document has none.
pub fn preformatted_text(html: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `html`.
    let lower = html.to_ascii_lowercase();
    let mut text = String::new();
    let mut found = false;
    let mut cursor = 0;

    while let Some(open) = find_open_tag(&lower, cursor, "pre") {
        let content_start = match lower[open..].find('>') {
            Some(offset) => open + offset + 1,
            None => break,
        };
        let content_end = lower[content_start..]
            .find("</pre")
            .map(|offset| content_start + offset)
            .unwrap_or(html.len());

        text.push_str(&decode_entities(&strip_tags(&html[content_start..content_end])));
        found = true;
        cursor = content_end;
    }

    found.then_some(text)
}

fn find_open_tag(lower: &str, from: usize, tag: &str) -> Option<usize> {
    let needle = format!("<{}", tag);
    let mut cursor = from;
    while let Some(offset) = lower[cursor..].find(&needle) {
        let start = cursor + offset;
        let after = start + needle.len();
        match lower.as_bytes().get(after) {
            Some(b'>') | Some(b'/') => return Some(start),
            Some(byte) if byte.is_ascii_whitespace() => return Some(start),
            Some(_) => cursor = after,
            None => return None,
        }
    }
    None
}

fn strip_tags(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&rest[1..semi]).map(|ch| (ch, semi)));

        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let code = if let Some(hex) = name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

/// Sort a decoded reply into success, warning, or error.
pub fn classify(reply: Value) -> Result<Value> {
    if let Some(error) = reply.get("error").filter(|v| !v.is_null()) {
        return Err(Error::ServerError(ApiError::from_value(error)));
    }
    if let Some(warnings) = reply.get("warnings").filter(|v| !v.is_null()) {
        return Err(Error::ServerWarning(warnings.clone()));
    }
    Ok(reply)
}
