//! Plugin host runtime.
//!
//! Third-party extensions ship as signed zip archives containing a
//! `manifest.json` (declared identity + capabilities) and a `main.js` script.
//! The host loads each plugin into its own embedded script engine, injects the
//! capability-gated `shisho.*` API surface, and invokes the plugin's hooks on
//! demand under per-invocation filesystem sandboxes and deadlines.
//!
//! Module map:
//! - [`manifest`] — parse/validate the capability descriptor
//! - [`installer`] — download, verify, extract, update, uninstall
//! - [`repository`] — fetch and filter plugin repository indexes
//! - [`sandbox`] — per-invocation filesystem allowlists and temp dirs
//! - [`engine`] / [`runtime`] — the embedded script engine and loaded plugin
//! - [`host`] — the `shisho.*` namespaces injected into every runtime
//! - [`invoker`] — hook dispatch, marshalling, deadlines
//! - [`service`] — durable store for plugins, config, orders, settings
//! - [`manager`] — the top-level coordinator

pub mod engine;
pub mod host;
pub mod installer;
pub mod invoker;
pub mod manager;
pub mod manifest;
pub mod repository;
pub mod runtime;
pub mod sandbox;
pub mod service;

pub use installer::PluginInstaller;
pub use manager::PluginManager;
pub use manifest::{FileAccessLevel, Manifest};
pub use repository::{RepositoryClient, RepositoryIndex};
pub use runtime::PluginRuntime;
pub use service::PluginService;

use serde::{Deserialize, Serialize};
use std::fmt;

/// File name of the capability descriptor inside a plugin directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// File name of the plugin script inside a plugin directory.
pub const SCRIPT_FILE: &str = "main.js";

/// File types the host parses itself; a plugin parser cannot shadow these.
pub const RESERVED_PARSER_TYPES: &[&str] = &["epub", "pdf", "cbz"];

/// Compound key identifying one installed plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginKey {
    /// Origin namespace, e.g. `official` or `community`.
    pub scope: String,
    /// Plugin id, unique within its scope.
    pub id: String,
}

impl PluginKey {
    pub fn new(scope: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.id)
    }
}

/// The four orderable hook types a plugin may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookType {
    InputConverter,
    FileParser,
    MetadataEnricher,
    OutputGenerator,
}

impl HookType {
    /// All hook types, in the order they appear on the `plugin` global.
    pub const ALL: [HookType; 4] = [
        HookType::InputConverter,
        HookType::FileParser,
        HookType::MetadataEnricher,
        HookType::OutputGenerator,
    ];

    /// Stable string used in persistence rows and the `plugin` global.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::InputConverter => "inputConverter",
            HookType::FileParser => "fileParser",
            HookType::MetadataEnricher => "metadataEnricher",
            HookType::OutputGenerator => "outputGenerator",
        }
    }

    /// Parse a persisted hook-type string.
    pub fn parse(s: &str) -> Option<HookType> {
        match s {
            "inputConverter" => Some(HookType::InputConverter),
            "fileParser" => Some(HookType::FileParser),
            "metadataEnricher" => Some(HookType::MetadataEnricher),
            "outputGenerator" => Some(HookType::OutputGenerator),
            _ => None,
        }
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
