//! `shisho.http` — outbound HTTP, gated by `httpAccess`.
//!
//! Domain matching is purely lexical (exact or `*.` wildcard, case
//! insensitive) — no DNS resolution. Redirects are never followed by the
//! client; each hop is re-validated against the declared domains and a
//! disallowed hop fails with `RedirectBlocked`.

use super::HostEnv;
use crate::error::{PluginError, PluginResult};
use crate::plugins::engine::{json_to_js, throw_host_error};
use rquickjs::class::Trace;
use rquickjs::function::Opt;
use rquickjs::{ArrayBuffer, Ctx, Object, TypedArray, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const MAX_REDIRECTS: usize = 10;

/// One allowlist entry, parsed: optional wildcard, host, optional port.
struct DomainPattern<'a> {
    wildcard: bool,
    host: &'a str,
    port: Option<u16>,
}

fn parse_pattern(entry: &str) -> DomainPattern<'_> {
    let (host_part, port) = match entry.rsplit_once(':') {
        Some((h, p)) => match p.parse::<u16>() {
            Ok(port) => (h, Some(port)),
            Err(_) => (entry, None),
        },
        None => (entry, None),
    };
    match host_part.strip_prefix("*.") {
        Some(bare) => DomainPattern {
            wildcard: true,
            host: bare,
            port,
        },
        None => DomainPattern {
            wildcard: false,
            host: host_part,
            port,
        },
    }
}

/// Whether `host:port` is admitted by the declared domain list.
///
/// `port` is the effective port of the request (scheme default when the URL
/// names none). An entry without a port admits ports 80 and 443 only; an
/// entry with a port requires an exact match.
pub fn validate_domain(host: &str, port: u16, allowed: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    allowed.iter().any(|entry| {
        let entry_lower = entry.to_ascii_lowercase();
        let pattern = parse_pattern(&entry_lower);
        let host_ok = if pattern.wildcard {
            host == pattern.host || host.ends_with(&format!(".{}", pattern.host))
        } else {
            host == pattern.host
        };
        let port_ok = match pattern.port {
            Some(p) => port == p,
            None => port == 80 || port == 443,
        };
        host_ok && port_ok
    })
}

fn check_url(url: &url::Url, allowed: &[String]) -> PluginResult<()> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(PluginError::AccessDenied(format!(
                "scheme '{other}' is not allowed"
            )))
        }
    }
    let host = url
        .host_str()
        .ok_or_else(|| PluginError::AccessDenied("url has no host".to_string()))?;
    let port = url.port_or_known_default().unwrap_or(443);
    if !validate_domain(host, port, allowed) {
        return Err(PluginError::AccessDenied(format!(
            "host '{host}:{port}' is not in the allowed domains list"
        )));
    }
    Ok(())
}

struct FetchRequest {
    method: reqwest::Method,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

struct FetchResponse {
    status: u16,
    status_text: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

#[derive(Trace)]
#[rquickjs::class]
pub struct HttpApi {
    #[qjs(skip_trace)]
    env: Arc<HostEnv>,
}

impl HttpApi {
    pub fn new(env: Arc<HostEnv>) -> Self {
        Self { env }
    }

    fn do_fetch(&self, url_text: &str, request: FetchRequest) -> PluginResult<FetchResponse> {
        let env = &self.env;
        let allowed = env.require_http()?.domains.clone();

        let mut url: url::Url = url_text
            .parse()
            .map_err(|e| PluginError::AccessDenied(format!("invalid url: {e}")))?;
        check_url(&url, &allowed)?;

        let timeout = env.config.http_timeout;
        let client = env.http_client.clone();
        let FetchRequest {
            mut method,
            headers,
            mut body,
        } = request;

        env.rt.clone().block_on(async move {
            for _ in 0..=MAX_REDIRECTS {
                let mut builder = client
                    .request(method.clone(), url.clone())
                    .timeout(timeout);
                for (name, value) in &headers {
                    builder = builder.header(name, value);
                }
                if let Some(bytes) = &body {
                    builder = builder.body(bytes.clone());
                }

                let response = builder.send().await?;
                let status = response.status();

                if status.is_redirection() {
                    let location = response
                        .headers()
                        .get(reqwest::header::LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .ok_or_else(|| {
                            PluginError::RedirectBlocked("redirect without location".to_string())
                        })?;
                    let next = url.join(location).map_err(|e| {
                        PluginError::RedirectBlocked(format!("invalid redirect target: {e}"))
                    })?;
                    if check_url(&next, &allowed).is_err() {
                        return Err(PluginError::RedirectBlocked(format!(
                            "redirect to '{}' is not in the allowed domains list",
                            next.host_str().unwrap_or_default()
                        )));
                    }
                    debug!(from = %url, to = %next, "following validated redirect");
                    // 303 (and historical 301/302) demote to GET without a body
                    if status.as_u16() != 307 && status.as_u16() != 308 {
                        method = reqwest::Method::GET;
                        body = None;
                    }
                    url = next;
                    continue;
                }

                let status_text = status
                    .canonical_reason()
                    .unwrap_or("unknown")
                    .to_string();
                let mut headers = BTreeMap::new();
                for (name, value) in response.headers() {
                    if let Ok(text) = value.to_str() {
                        headers.insert(name.as_str().to_string(), text.to_string());
                    }
                }
                let body = response.bytes().await?.to_vec();
                return Ok(FetchResponse {
                    status: status.as_u16(),
                    status_text,
                    headers,
                    body,
                });
            }
            Err(PluginError::RedirectBlocked(format!(
                "more than {MAX_REDIRECTS} redirects"
            )))
        })
    }
}

fn body_bytes<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> PluginResult<Vec<u8>> {
    use rquickjs::FromJs;
    if let Some(s) = value.as_string() {
        return Ok(s
            .to_string()
            .map_err(|e| PluginError::Internal(e.to_string()))?
            .into_bytes());
    }
    if let Ok(buffer) = ArrayBuffer::from_js(ctx, value.clone()) {
        if let Some(bytes) = buffer.as_bytes() {
            return Ok(bytes.to_vec());
        }
    }
    if let Ok(array) = TypedArray::<u8>::from_js(ctx, value.clone()) {
        if let Some(bytes) = array.as_bytes() {
            return Ok(bytes.to_vec());
        }
    }
    Err(PluginError::Internal(
        "request body must be a string or binary buffer".to_string(),
    ))
}

#[rquickjs::methods]
impl HttpApi {
    /// `fetch(url, {method, headers, body})` with a fully buffered response.
    pub fn fetch<'js>(
        &self,
        ctx: Ctx<'js>,
        url: String,
        options: Opt<Object<'js>>,
    ) -> rquickjs::Result<HttpResponse> {
        let mut request = FetchRequest {
            method: reqwest::Method::GET,
            headers: Vec::new(),
            body: None,
        };

        if let Some(options) = options.0 {
            if let Some(method) = options.get::<_, Option<String>>("method")? {
                request.method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
                    .map_err(|_| {
                        throw_host_error(
                            &ctx,
                            PluginError::Internal(format!("invalid http method '{method}'")),
                        )
                    })?;
            }
            if let Some(headers) = options.get::<_, Option<Object>>("headers")? {
                for entry in headers.props::<String, String>() {
                    let (name, value) = entry?;
                    request.headers.push((name, value));
                }
            }
            if let Some(body) = options.get::<_, Option<Value>>("body")? {
                if !body.is_undefined() && !body.is_null() {
                    request.body =
                        Some(body_bytes(&ctx, body).map_err(|e| throw_host_error(&ctx, e))?);
                }
            }
        }

        let response = self
            .do_fetch(&url, request)
            .map_err(|e| throw_host_error(&ctx, e))?;
        Ok(HttpResponse {
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            body: response.body,
        })
    }
}

/// Buffered HTTP response handed back to scripts.
///
/// The body is held in memory, so `text()` / `json()` / `arrayBuffer()` may
/// each be called any number of times.
#[derive(Trace)]
#[rquickjs::class]
pub struct HttpResponse {
    #[qjs(skip_trace)]
    status: u16,
    #[qjs(skip_trace)]
    status_text: String,
    #[qjs(skip_trace)]
    headers: BTreeMap<String, String>,
    #[qjs(skip_trace)]
    body: Vec<u8>,
}

#[rquickjs::methods]
impl HttpResponse {
    #[qjs(get)]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[qjs(get)]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[qjs(get, rename = "statusText")]
    pub fn status_text(&self) -> String {
        self.status_text.clone()
    }

    #[qjs(get)]
    pub fn headers<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let map: serde_json::Map<String, serde_json::Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        json_to_js(&ctx, &serde_json::Value::Object(map))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        ctx.json_parse(self.body.clone())
    }

    #[qjs(rename = "arrayBuffer")]
    pub fn array_buffer<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<ArrayBuffer<'js>> {
        ArrayBuffer::new(ctx, self.body.clone())
    }
}
