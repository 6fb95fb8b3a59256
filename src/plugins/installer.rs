//! Plugin installation pipeline.
//!
//! Fetch an archive from an allowlisted URL, verify its SHA-256 byte-for-byte
//! against the expected hash, then extract it (zip-slip protected, per-entry
//! capped) into `<plugin_root>/<scope>/<id>`. Updates extract to a staging
//! sibling and swap atomically. Any post-download failure removes the
//! destination so an incomplete extract never remains.

use crate::config::HostConfig;
use crate::error::{PluginError, PluginResult};
use crate::plugins::host::extract_zip_file;
use crate::plugins::manifest::Manifest;
use crate::plugins::{PluginKey, MANIFEST_FILE};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Downloads, verifies, and extracts plugin archives.
pub struct PluginInstaller {
    config: Arc<HostConfig>,
    client: reqwest::Client,
}

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Byte-for-byte integrity gate: `data` must hash to `expected_sha256`
/// (hex, case-insensitive).
pub fn verify_sha256(data: &[u8], expected_sha256: &str) -> PluginResult<()> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected_sha256) {
        Ok(())
    } else {
        Err(PluginError::IntegrityMismatch {
            expected: expected_sha256.to_ascii_lowercase(),
            actual,
        })
    }
}

impl PluginInstaller {
    pub fn new(config: Arc<HostConfig>) -> PluginResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(PluginError::Http)?;
        Ok(Self { config, client })
    }

    /// Download `url` and verify it against `expected_sha256`.
    async fn download_verified(&self, url: &str, expected_sha256: &str) -> PluginResult<Vec<u8>> {
        if !self.config.is_download_allowed(url) {
            return Err(PluginError::InvalidSource(url.to_string()));
        }
        let response = self
            .client
            .get(url)
            .timeout(self.config.download_timeout)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?.to_vec();
        verify_sha256(&bytes, expected_sha256)?;
        Ok(bytes)
    }

    /// Install a plugin into `<plugin_root>/<scope>/<id>`.
    ///
    /// The destination must not carry a previous install; use
    /// [`PluginInstaller::update`] to replace one.
    pub async fn install(
        &self,
        scope: &str,
        id: &str,
        url: &str,
        expected_sha256: &str,
    ) -> PluginResult<Manifest> {
        let bytes = self.download_verified(url, expected_sha256).await?;
        let destination = self.config.plugin_dir(scope, id);
        let host_version = self.config.host_version.clone();
        let max_entry_size = self.config.max_entry_size;
        let key = PluginKey::new(scope, id);

        let manifest = tokio::task::spawn_blocking(move || {
            install_archive(&bytes, &destination, max_entry_size, &host_version)
        })
        .await
        .map_err(|e| PluginError::Internal(format!("install task failed: {e}")))??;

        info!(plugin = %key, version = %manifest.version, "plugin installed");
        Ok(manifest)
    }

    /// Replace an installed plugin with a new version, atomically.
    pub async fn update(
        &self,
        scope: &str,
        id: &str,
        url: &str,
        expected_sha256: &str,
    ) -> PluginResult<Manifest> {
        let bytes = self.download_verified(url, expected_sha256).await?;
        let destination = self.config.plugin_dir(scope, id);
        let host_version = self.config.host_version.clone();
        let max_entry_size = self.config.max_entry_size;
        let key = PluginKey::new(scope, id);

        let manifest = tokio::task::spawn_blocking(move || {
            update_archive(&bytes, &destination, max_entry_size, &host_version)
        })
        .await
        .map_err(|e| PluginError::Internal(format!("update task failed: {e}")))??;

        info!(plugin = %key, version = %manifest.version, "plugin updated");
        Ok(manifest)
    }

    /// Remove a plugin's directory. Idempotent.
    pub async fn uninstall(&self, scope: &str, id: &str) -> PluginResult<()> {
        let destination = self.config.plugin_dir(scope, id);
        match tokio::fs::remove_dir_all(&destination).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PluginError::Io(e)),
        }
    }
}

/// Extract a verified archive into `destination` and parse its manifest.
///
/// Visible to tests; the async wrappers add download + verification.
pub(crate) fn install_archive(
    bytes: &[u8],
    destination: &Path,
    max_entry_size: u64,
    host_version: &str,
) -> PluginResult<Manifest> {
    let archive = write_temp_archive(bytes)?;

    let result = extract_zip_file(archive.path(), destination, max_entry_size)
        .and_then(|()| read_manifest(destination, host_version));
    if result.is_err() {
        remove_quietly(destination);
    }
    result
}

/// Extract to a staging sibling, validate, then swap into `destination`.
pub(crate) fn update_archive(
    bytes: &[u8],
    destination: &Path,
    max_entry_size: u64,
    host_version: &str,
) -> PluginResult<Manifest> {
    let archive = write_temp_archive(bytes)?;
    let staging = staging_dir(destination);

    let staged = extract_zip_file(archive.path(), &staging, max_entry_size)
        .and_then(|()| read_manifest(&staging, host_version));
    let manifest = match staged {
        Ok(manifest) => manifest,
        Err(e) => {
            remove_quietly(&staging);
            return Err(e);
        }
    };

    let retired = staging_dir(destination);
    let had_previous = destination.exists();
    if had_previous {
        std::fs::rename(destination, &retired)?;
    }
    match std::fs::rename(&staging, destination) {
        Ok(()) => {
            if had_previous {
                remove_quietly(&retired);
            }
            Ok(manifest)
        }
        Err(rename_error) => {
            // cross-device rename; fall back to extracting in place
            warn!(
                destination = %destination.display(),
                error = %rename_error,
                "staging swap failed, extracting in place"
            );
            remove_quietly(&staging);
            remove_quietly(destination);
            let result = extract_zip_file(archive.path(), destination, max_entry_size)
                .and_then(|()| read_manifest(destination, host_version));
            match result {
                Ok(manifest) => {
                    if had_previous {
                        remove_quietly(&retired);
                    }
                    Ok(manifest)
                }
                Err(e) => {
                    remove_quietly(destination);
                    if had_previous {
                        // restore the previous install
                        let _ = std::fs::rename(&retired, destination);
                    }
                    Err(e)
                }
            }
        }
    }
}

fn write_temp_archive(bytes: &[u8]) -> PluginResult<tempfile::NamedTempFile> {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

fn staging_dir(destination: &Path) -> PathBuf {
    let nonce = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "plugin".to_string());
    destination
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{name}.staging-{}-{nonce}", std::process::id()))
}

fn read_manifest(directory: &Path, host_version: &str) -> PluginResult<Manifest> {
    let bytes = std::fs::read(directory.join(MANIFEST_FILE)).map_err(|_| {
        PluginError::ManifestInvalid(format!(
            "archive does not contain {MANIFEST_FILE} at its root"
        ))
    })?;
    Ok(Manifest::parse(&bytes, host_version)?.manifest)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "cleanup failed");
        }
    }
}
