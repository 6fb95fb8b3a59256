//! Plugin repository client.
//!
//! A repository is a JSON index at an allowlisted URL listing the plugins a
//! scope publishes and, per plugin, its released versions in the repository's
//! own order — the last compatible element is treated as the latest.

use crate::config::{HostConfig, SUPPORTED_MANIFEST_VERSIONS, SUPPORTED_REPOSITORY_VERSIONS};
use crate::error::{PluginError, PluginResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Top-level repository index document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default)]
    pub repository_version: i64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plugins: Vec<RepositoryPlugin>,
}

/// One plugin listed in a repository index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryPlugin {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default)]
    pub versions: Vec<RepositoryVersion>,
}

/// One released version of a repository plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryVersion {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_host_version: Option<String>,
    #[serde(default)]
    pub manifest_version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub sha256: String,
}

/// Fetches and filters repository indexes.
pub struct RepositoryClient {
    config: Arc<HostConfig>,
    client: reqwest::Client,
}

impl RepositoryClient {
    pub fn new(config: Arc<HostConfig>) -> PluginResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(PluginError::Http)?;
        Ok(Self { config, client })
    }

    /// Fetch a repository index from an allowlisted URL.
    pub async fn fetch_index(&self, url: &str) -> PluginResult<RepositoryIndex> {
        if !self.config.is_repository_allowed(url) {
            return Err(PluginError::InvalidSource(url.to_string()));
        }
        let response = self
            .client
            .get(url)
            .timeout(self.config.repository_timeout)
            .send()
            .await?
            .error_for_status()?;
        let index: RepositoryIndex = response.json().await?;

        if !SUPPORTED_REPOSITORY_VERSIONS.contains(&index.repository_version) {
            return Err(PluginError::RepositoryInvalid(format!(
                "unsupported repositoryVersion {} (supported: {:?})",
                index.repository_version, SUPPORTED_REPOSITORY_VERSIONS
            )));
        }
        debug!(url, scope = %index.scope, plugins = index.plugins.len(), "fetched repository index");
        Ok(index)
    }
}

/// Keep only versions whose `manifestVersion` this host understands,
/// preserving the repository's ordering.
pub fn filter_compatible(versions: &[RepositoryVersion]) -> Vec<RepositoryVersion> {
    versions
        .iter()
        .filter(|v| SUPPORTED_MANIFEST_VERSIONS.contains(&v.manifest_version))
        .cloned()
        .collect()
}

/// The repository's notion of the newest compatible version.
pub fn latest_compatible(versions: &[RepositoryVersion]) -> Option<RepositoryVersion> {
    filter_compatible(versions).into_iter().last()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(v: &str, manifest_version: i64) -> RepositoryVersion {
        RepositoryVersion {
            version: v.to_string(),
            manifest_version,
            ..RepositoryVersion::default()
        }
    }

    #[test]
    fn filter_preserves_order_and_drops_incompatible() {
        let versions = vec![version("1.0.0", 1), version("2.0.0", 99), version("1.1.0", 1)];
        let compatible = filter_compatible(&versions);
        let names: Vec<&str> = compatible.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(names, vec!["1.0.0", "1.1.0"]);
    }

    #[test]
    fn latest_is_the_last_compatible_element() {
        let versions = vec![version("1.0.0", 1), version("1.1.0", 1), version("9.0.0", 99)];
        assert_eq!(latest_compatible(&versions).unwrap().version, "1.1.0");
        assert!(latest_compatible(&[version("9.0.0", 99)]).is_none());
    }

    #[test]
    fn index_deserializes_camel_case() {
        let json = serde_json::json!({
            "repositoryVersion": 1,
            "scope": "community",
            "name": "Community Plugins",
            "plugins": [{
                "id": "goodreads",
                "name": "Goodreads",
                "versions": [{
                    "version": "1.0.0",
                    "manifestVersion": 1,
                    "minHostVersion": "0.1.0",
                    "downloadUrl": "https://github.com/x/releases/v1.zip",
                    "sha256": "abc"
                }]
            }]
        });
        let index: RepositoryIndex = serde_json::from_value(json).unwrap();
        assert_eq!(index.repository_version, 1);
        assert_eq!(index.plugins[0].versions[0].manifest_version, 1);
        assert_eq!(
            index.plugins[0].versions[0].min_host_version.as_deref(),
            Some("0.1.0")
        );
    }
}
