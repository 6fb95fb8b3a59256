//! Host configuration for the plugin runtime.
//!
//! Collects every knob the subsystem consults: directory layout, URL
//! allowlists, deadlines, and extraction limits. The host application builds
//! one of these at startup and hands it to [`crate::plugins::PluginManager`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Manifest versions this host understands.
pub const SUPPORTED_MANIFEST_VERSIONS: &[i64] = &[1];

/// Repository index versions this host understands.
pub const SUPPORTED_REPOSITORY_VERSIONS: &[i64] = &[1];

/// Configuration governing the plugin host runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Directory under which plugins are installed (`<root>/<scope>/<id>`).
    pub plugin_root: PathBuf,

    /// URL prefixes plugin archives may be downloaded from.
    pub download_allowlist: Vec<String>,

    /// URL prefixes repository indexes may be fetched from.
    pub repository_allowlist: Vec<String>,

    /// Host application version, checked against manifest `minHostVersion`.
    pub host_version: String,

    /// Deadline for downloading a plugin archive.
    #[serde(with = "duration_secs")]
    pub download_timeout: Duration,

    /// Deadline for fetching a repository index.
    #[serde(with = "duration_secs")]
    pub repository_timeout: Duration,

    /// Deadline for a single `shisho.http.fetch` call.
    #[serde(with = "duration_secs")]
    pub http_timeout: Duration,

    /// Deadline for a `shisho.shell.exec` subprocess.
    #[serde(with = "duration_secs")]
    pub shell_timeout: Duration,

    /// Deadline for an ffmpeg transcode subprocess.
    #[serde(with = "duration_secs")]
    pub transcode_timeout: Duration,

    /// Deadline for an ffprobe / version subprocess.
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Outer deadline for converter and generator hooks.
    #[serde(with = "duration_secs")]
    pub long_hook_timeout: Duration,

    /// Outer deadline for parser and enricher hooks.
    #[serde(with = "duration_secs")]
    pub short_hook_timeout: Duration,

    /// Maximum decompressed size of a single archive entry.
    pub max_entry_size: u64,

    /// ffmpeg binary name or path.
    pub ffmpeg_bin: String,

    /// ffprobe binary name or path.
    pub ffprobe_bin: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_root: PathBuf::from("plugins"),
            download_allowlist: vec!["https://github.com/".to_string()],
            repository_allowlist: vec!["https://raw.githubusercontent.com/".to_string()],
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            download_timeout: Duration::from_secs(60),
            repository_timeout: Duration::from_secs(15),
            http_timeout: Duration::from_secs(30),
            shell_timeout: Duration::from_secs(60),
            transcode_timeout: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(30),
            long_hook_timeout: Duration::from_secs(600),
            short_hook_timeout: Duration::from_secs(60),
            max_entry_size: 256 * 1024 * 1024,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

impl HostConfig {
    /// Directory for one plugin: `<plugin_root>/<scope>/<id>`.
    pub fn plugin_dir(&self, scope: &str, id: &str) -> PathBuf {
        self.plugin_root.join(scope).join(id)
    }

    /// Whether `url` is covered by the download allowlist.
    pub fn is_download_allowed(&self, url: &str) -> bool {
        self.download_allowlist.iter().any(|p| url.starts_with(p))
    }

    /// Whether `url` is covered by the repository allowlist.
    pub fn is_repository_allowed(&self, url: &str) -> bool {
        self.repository_allowlist.iter().any(|p| url.starts_with(p))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
