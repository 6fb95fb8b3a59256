//! Shisho plugin host runtime.
//!
//! Lets third-party extensions — signed archives containing a `manifest.json`
//! and a `main.js` script — extend the media-library host along four axes:
//! converting input files, parsing file metadata, enriching metadata from
//! remote sources, and generating derived output formats. Plugins run in an
//! embedded per-plugin script engine behind a capability-scoped `shisho.*`
//! API surface with filesystem, HTTP, and subprocess sandboxing.
//!
//! Entry point: build a [`config::HostConfig`] and a
//! [`plugins::PluginService`], hand both to [`plugins::PluginManager`], call
//! `load_all`, and dispatch hooks through the manager.

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod plugins;

pub use config::HostConfig;
pub use error::{PluginError, PluginResult};
pub use plugins::{HookType, PluginKey, PluginManager, PluginService};
