//! `shisho.xml` — namespace-aware XML parsing and simple selectors.
//!
//! `parse` produces a plain tree of `{tag, namespace, text, attributes,
//! children}` objects. Selectors are either `local` (matches any namespace)
//! or `prefix|local` with the prefix resolved through the caller's namespace
//! map. Search is depth-first in document order, starting at the given node.

use super::HostEnv;
use crate::error::{PluginError, PluginResult};
use crate::plugins::engine::{js_to_json, json_to_js, throw_host_error};
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use rquickjs::class::Trace;
use rquickjs::function::Opt;
use rquickjs::{Ctx, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Node {
    tag: String,
    namespace: String,
    text: String,
    attributes: serde_json::Map<String, serde_json::Value>,
    children: Vec<serde_json::Value>,
}

impl Node {
    fn into_json(self) -> serde_json::Value {
        serde_json::json!({
            "tag": self.tag,
            "namespace": self.namespace,
            "text": self.text.trim(),
            "attributes": serde_json::Value::Object(self.attributes),
            "children": serde_json::Value::Array(self.children),
        })
    }
}

fn element_node(
    resolved: ResolveResult,
    event: &quick_xml::events::BytesStart,
) -> PluginResult<Node> {
    let namespace = match resolved {
        ResolveResult::Bound(ns) => String::from_utf8_lossy(ns.as_ref()).into_owned(),
        _ => String::new(),
    };
    let tag = String::from_utf8_lossy(event.local_name().as_ref()).into_owned();
    let mut attributes = serde_json::Map::new();
    for attribute in event.attributes() {
        let attribute =
            attribute.map_err(|e| PluginError::Internal(format!("xml attribute error: {e}")))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| PluginError::Internal(format!("xml attribute error: {e}")))?;
        attributes.insert(key, serde_json::Value::String(value.into_owned()));
    }
    Ok(Node {
        tag,
        namespace,
        attributes,
        ..Node::default()
    })
}

/// Parse an XML document into the plain-object tree handed to scripts.
pub(crate) fn parse_xml(text: &str) -> PluginResult<serde_json::Value> {
    let mut reader = NsReader::from_str(text);
    let mut stack: Vec<Node> = Vec::new();

    loop {
        match reader.read_resolved_event() {
            Ok((resolved, Event::Start(event))) => {
                stack.push(element_node(resolved, &event)?);
            }
            Ok((resolved, Event::Empty(event))) => {
                let node = element_node(resolved, &event)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node.into_json()),
                    None => return Ok(node.into_json()),
                }
            }
            Ok((_, Event::End(_))) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| PluginError::Internal("xml parse error: unbalanced end tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node.into_json()),
                    None => return Ok(node.into_json()),
                }
            }
            Ok((_, Event::Text(text))) => {
                if let Some(top) = stack.last_mut() {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| PluginError::Internal(format!("xml parse error: {e}")))?;
                    top.text.push_str(&unescaped);
                }
            }
            Ok((_, Event::CData(data))) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok((_, Event::Eof)) => {
                return Err(PluginError::Internal(
                    "xml parse error: no root element".to_string(),
                ));
            }
            Ok(_) => {}
            Err(e) => return Err(PluginError::Internal(format!("xml parse error: {e}"))),
        }
    }
}

/// Parsed form of a selector: optional namespace URI constraint + local name.
struct Selector {
    namespace: Option<String>,
    local: String,
}

fn parse_selector(selector: &str, ns_map: &BTreeMap<String, String>) -> Selector {
    match selector.split_once('|') {
        Some((prefix, local)) => Selector {
            // an unmapped prefix matches nothing
            namespace: Some(ns_map.get(prefix).cloned().unwrap_or_default()),
            local: local.to_string(),
        },
        None => Selector {
            namespace: None,
            local: selector.to_string(),
        },
    }
}

fn node_matches(node: &serde_json::Value, selector: &Selector) -> bool {
    if node.get("tag").and_then(|t| t.as_str()) != Some(selector.local.as_str()) {
        return false;
    }
    match &selector.namespace {
        Some(ns) if ns.is_empty() => false,
        Some(ns) => node.get("namespace").and_then(|n| n.as_str()) == Some(ns.as_str()),
        None => true,
    }
}

fn collect_matches<'a>(
    node: &'a serde_json::Value,
    selector: &Selector,
    out: &mut Vec<&'a serde_json::Value>,
    first_only: bool,
) {
    if node_matches(node, selector) {
        out.push(node);
        if first_only {
            return;
        }
    }
    if let Some(children) = node.get("children").and_then(|c| c.as_array()) {
        for child in children {
            if first_only && !out.is_empty() {
                return;
            }
            collect_matches(child, selector, out, first_only);
        }
    }
}

fn ns_map_from_value(value: Option<serde_json::Value>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(serde_json::Value::Object(object)) = value {
        for (key, value) in object {
            if let serde_json::Value::String(uri) = value {
                map.insert(key, uri);
            }
        }
    }
    map
}

#[derive(Trace)]
#[rquickjs::class]
pub struct XmlApi {
    #[qjs(skip_trace)]
    env: Arc<HostEnv>,
}

impl XmlApi {
    pub fn new(env: Arc<HostEnv>) -> Self {
        Self { env }
    }
}

#[rquickjs::methods]
impl XmlApi {
    pub fn parse<'js>(&self, ctx: Ctx<'js>, text: String) -> rquickjs::Result<Value<'js>> {
        let tree = parse_xml(&text).map_err(|e| throw_host_error(&ctx, e))?;
        json_to_js(&ctx, &tree)
    }

    #[qjs(rename = "querySelector")]
    pub fn query_selector<'js>(
        &self,
        ctx: Ctx<'js>,
        document: Value<'js>,
        selector: String,
        ns_map: Opt<Value<'js>>,
    ) -> rquickjs::Result<Option<Value<'js>>> {
        let document = js_to_json(&ctx, document).map_err(|e| throw_host_error(&ctx, e))?;
        let ns_map = ns_map
            .0
            .map(|v| js_to_json(&ctx, v))
            .transpose()
            .map_err(|e| throw_host_error(&ctx, e))?;
        let selector = parse_selector(&selector, &ns_map_from_value(ns_map));
        let mut matches = Vec::new();
        collect_matches(&document, &selector, &mut matches, true);
        match matches.first() {
            Some(node) => Ok(Some(json_to_js(&ctx, node)?)),
            None => Ok(None),
        }
    }

    #[qjs(rename = "querySelectorAll")]
    pub fn query_selector_all<'js>(
        &self,
        ctx: Ctx<'js>,
        document: Value<'js>,
        selector: String,
        ns_map: Opt<Value<'js>>,
    ) -> rquickjs::Result<Value<'js>> {
        let document = js_to_json(&ctx, document).map_err(|e| throw_host_error(&ctx, e))?;
        let ns_map = ns_map
            .0
            .map(|v| js_to_json(&ctx, v))
            .transpose()
            .map_err(|e| throw_host_error(&ctx, e))?;
        let selector = parse_selector(&selector, &ns_map_from_value(ns_map));
        let mut matches = Vec::new();
        collect_matches(&document, &selector, &mut matches, false);
        let array: Vec<serde_json::Value> = matches.into_iter().cloned().collect();
        json_to_js(&ctx, &serde_json::Value::Array(array))
    }
}
