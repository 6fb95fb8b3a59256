//! `shisho.url` — URL parsing and encoding helpers.
//!
//! `searchParams` sorts keys lexicographically so the produced query string
//! is deterministic for a given input object.

use super::HostEnv;
use crate::error::PluginError;
use crate::plugins::engine::{js_to_json, json_to_js, throw_host_error};
use rquickjs::class::Trace;
use rquickjs::{Ctx, Value};
use std::sync::Arc;

/// Bytes left unescaped by `encodeURIComponent`.
fn is_unescaped(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

/// Percent-encode with `encodeURIComponent` semantics.
pub(crate) fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if is_unescaped(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Percent-decode; fails on truncated or non-hex escapes or invalid UTF-8.
pub(crate) fn decode_component(input: &str) -> Result<String, PluginError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'%' => {
                let hex = bytes
                    .get(index + 1..index + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| {
                        PluginError::Internal(format!("malformed percent escape in '{input}'"))
                    })?;
                out.push(hex);
                index += 3;
            }
            other => {
                out.push(other);
                index += 1;
            }
        }
    }
    String::from_utf8(out)
        .map_err(|_| PluginError::Internal(format!("decoded '{input}' is not valid utf-8")))
}

fn stringify_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Trace)]
#[rquickjs::class]
pub struct UrlApi {
    #[qjs(skip_trace)]
    env: Arc<HostEnv>,
}

impl UrlApi {
    pub fn new(env: Arc<HostEnv>) -> Self {
        Self { env }
    }
}

#[rquickjs::methods]
impl UrlApi {
    #[qjs(rename = "encodeURIComponent")]
    pub fn encode_uri_component(&self, input: String) -> String {
        encode_component(&input)
    }

    #[qjs(rename = "decodeURIComponent")]
    pub fn decode_uri_component<'js>(&self, ctx: Ctx<'js>, input: String) -> rquickjs::Result<String> {
        decode_component(&input).map_err(|e| throw_host_error(&ctx, e))
    }

    /// Decompose a URL into
    /// `{scheme, host, port, path, query, fragment}`.
    pub fn parse<'js>(&self, ctx: Ctx<'js>, input: String) -> rquickjs::Result<Value<'js>> {
        let parsed: url::Url = input
            .parse()
            .map_err(|e| throw_host_error(&ctx, PluginError::Internal(format!("invalid url: {e}"))))?;
        json_to_js(
            &ctx,
            &serde_json::json!({
                "scheme": parsed.scheme(),
                "host": parsed.host_str(),
                "port": parsed.port(),
                "path": parsed.path(),
                "query": parsed.query(),
                "fragment": parsed.fragment(),
            }),
        )
    }

    /// Encode an object as a query string with keys sorted lexicographically.
    #[qjs(rename = "searchParams")]
    pub fn search_params<'js>(&self, ctx: Ctx<'js>, params: Value<'js>) -> rquickjs::Result<String> {
        let params = js_to_json(&ctx, params).map_err(|e| throw_host_error(&ctx, e))?;
        let object = match params {
            serde_json::Value::Object(object) => object,
            _ => {
                return Err(throw_host_error(
                    &ctx,
                    PluginError::Internal("searchParams expects an object".to_string()),
                ))
            }
        };
        // BTreeMap iteration gives the lexicographic key order
        let sorted: std::collections::BTreeMap<String, serde_json::Value> =
            object.into_iter().collect();
        let pairs: Vec<String> = sorted
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    encode_component(key),
                    encode_component(&stringify_scalar(value))
                )
            })
            .collect();
        Ok(pairs.join("&"))
    }
}
