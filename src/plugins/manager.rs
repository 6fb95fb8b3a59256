//! Top-level plugin coordinator.
//!
//! Owns the `(scope, id) -> runtime` map, orchestrates install / load /
//! reload / unload under concurrent-hook safety, resolves ordered runtime
//! lists for dispatch, and periodically checks repositories for updates.
//!
//! Two locks, deliberately kept apart: the manager's map lock guards map
//! structure only and is never held across script execution; each runtime's
//! own gate is what makes reload safe (the write side waits out in-flight
//! hooks before the swap).

use crate::config::HostConfig;
use crate::error::{PluginError, PluginResult};
use crate::model::{Book, BookFile, ConvertResult, EnrichResult, ParsedMetadata};
use crate::plugins::installer::PluginInstaller;
use crate::plugins::invoker;
use crate::plugins::manifest::Manifest;
use crate::plugins::repository::{latest_compatible, RepositoryClient, RepositoryIndex};
use crate::plugins::runtime::{load_runtime, PluginRuntime};
use crate::plugins::service::{PluginRecord, PluginService};
use crate::plugins::{HookType, PluginKey, RESERVED_PARSER_TYPES};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Future returned by a repository fetch.
pub type RepoFetchFuture = Pin<Box<dyn Future<Output = PluginResult<RepositoryIndex>> + Send>>;

/// Injectable repository-index fetch, so update checks are testable.
pub type RepoFetchFn = Arc<dyn Fn(String) -> RepoFetchFuture + Send + Sync>;

/// The plugin subsystem's coordinator.
pub struct PluginManager {
    config: Arc<HostConfig>,
    service: PluginService,
    installer: PluginInstaller,
    runtimes: RwLock<HashMap<PluginKey, Arc<PluginRuntime>>>,
    repo_fetch: RepoFetchFn,
}

impl PluginManager {
    /// Build a manager with the default HTTP-backed repository client.
    pub fn new(config: HostConfig, service: PluginService) -> PluginResult<Self> {
        let config = Arc::new(config);
        let client = Arc::new(RepositoryClient::new(config.clone())?);
        let repo_fetch: RepoFetchFn = Arc::new(move |url: String| {
            let client = client.clone();
            let future: RepoFetchFuture = Box::pin(async move { client.fetch_index(&url).await });
            future
        });
        Self::with_repository_fetch(config, service, repo_fetch)
    }

    /// Build a manager with an injected repository fetch function.
    pub fn with_repository_fetch(
        config: Arc<HostConfig>,
        service: PluginService,
        repo_fetch: RepoFetchFn,
    ) -> PluginResult<Self> {
        let installer = PluginInstaller::new(config.clone())?;
        Ok(Self {
            config,
            service,
            installer,
            runtimes: RwLock::new(HashMap::new()),
            repo_fetch,
        })
    }

    /// Host configuration in effect.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// The durable store backing this manager.
    pub fn service(&self) -> &PluginService {
        &self.service
    }

    // ── lifecycle ────────────────────────────────────────────────────────

    /// Install a plugin archive and create its (disabled) record.
    pub async fn install_plugin(
        &self,
        scope: &str,
        id: &str,
        url: &str,
        expected_sha256: &str,
    ) -> PluginResult<Manifest> {
        let manifest = self.installer.install(scope, id, url, expected_sha256).await?;
        let now = Utc::now();
        self.service
            .install_plugin(&PluginRecord {
                scope: scope.to_string(),
                id: id.to_string(),
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                description: manifest.description.clone(),
                installed_at: now,
                updated_at: now,
                enabled: false,
                load_error: None,
                update_available_version: None,
            })
            .await?;
        Ok(manifest)
    }

    /// Load every enabled plugin, recording per-plugin failures on the
    /// plugin rows without aborting the loop.
    pub async fn load_all(&self) -> PluginResult<()> {
        let plugins = self.service.list_plugins().await?;
        let mut loaded = 0usize;
        let mut failed = 0usize;
        for plugin in plugins.iter().filter(|p| p.enabled) {
            match self.load_plugin(&plugin.scope, &plugin.id).await {
                Ok(()) => {
                    loaded += 1;
                    self.service
                        .set_load_error(&plugin.scope, &plugin.id, None)
                        .await?;
                }
                Err(e) => {
                    failed += 1;
                    error!(plugin = %format!("{}/{}", plugin.scope, plugin.id), error = %e, "plugin load failed");
                    self.service
                        .set_load_error(&plugin.scope, &plugin.id, Some(&e.script_message()))
                        .await?;
                }
            }
        }
        info!(loaded, failed, "plugin load pass complete");
        Ok(())
    }

    /// Load one plugin from disk and register it.
    pub async fn load_plugin(&self, scope: &str, id: &str) -> PluginResult<()> {
        let key = PluginKey::new(scope, id);
        let runtime = load_runtime(
            self.config.clone(),
            Arc::new(self.service.clone()),
            key.clone(),
        )
        .await?;

        let provided = runtime.provided_hooks();
        let identifier_types = runtime.manifest.identifier_types.clone();

        self.runtimes.write().await.insert(key.clone(), runtime);

        self.service
            .upsert_identifier_types(scope, id, &identifier_types)
            .await?;
        for hook in provided {
            // a second loader racing here is harmless; duplicates are ignored
            self.service.append_to_order(hook, scope, id).await?;
        }
        info!(plugin = %key, "plugin loaded");
        Ok(())
    }

    /// Remove a plugin's runtime from the map.
    pub async fn unload_plugin(&self, scope: &str, id: &str) {
        let key = PluginKey::new(scope, id);
        if self.runtimes.write().await.remove(&key).is_some() {
            info!(plugin = %key, "plugin unloaded");
        }
    }

    /// Replace a plugin's runtime with a freshly loaded one.
    ///
    /// Blocks until in-flight hook invocations on the old runtime drain; no
    /// invocation ever observes a half-replaced runtime.
    pub async fn reload_plugin(&self, scope: &str, id: &str) -> PluginResult<()> {
        let key = PluginKey::new(scope, id);
        let fresh = load_runtime(
            self.config.clone(),
            Arc::new(self.service.clone()),
            key.clone(),
        )
        .await?;
        let identifier_types = fresh.manifest.identifier_types.clone();

        let old = self.runtimes.read().await.get(&key).cloned();
        match old {
            Some(old) => {
                // drain in-flight hooks, then swap while still holding the
                // old runtime's write side
                let drained = old.gate.clone().write_owned().await;
                self.runtimes.write().await.insert(key.clone(), fresh);
                drop(drained);
            }
            None => {
                self.runtimes.write().await.insert(key.clone(), fresh);
            }
        }

        self.service
            .upsert_identifier_types(scope, id, &identifier_types)
            .await?;
        info!(plugin = %key, "plugin reloaded");
        Ok(())
    }

    /// Enable and load; a load failure is recorded on the plugin row.
    pub async fn enable_plugin(&self, scope: &str, id: &str) -> PluginResult<()> {
        self.service.set_plugin_enabled(scope, id, true).await?;
        match self.load_plugin(scope, id).await {
            Ok(()) => {
                self.service.set_load_error(scope, id, None).await?;
                Ok(())
            }
            Err(e) => {
                self.service
                    .set_load_error(scope, id, Some(&e.script_message()))
                    .await?;
                Err(e)
            }
        }
    }

    /// Disable and unload.
    pub async fn disable_plugin(&self, scope: &str, id: &str) -> PluginResult<()> {
        self.service.set_plugin_enabled(scope, id, false).await?;
        self.unload_plugin(scope, id).await;
        Ok(())
    }

    /// User-initiated update: download + swap + reload, then clear the
    /// update-available marker.
    pub async fn update_plugin(
        &self,
        scope: &str,
        id: &str,
        url: &str,
        expected_sha256: &str,
    ) -> PluginResult<Manifest> {
        let manifest = self.installer.update(scope, id, url, expected_sha256).await?;
        if let Some(mut record) = self.service.get_plugin(scope, id).await? {
            record.name = manifest.name.clone();
            record.version = manifest.version.clone();
            record.description = manifest.description.clone();
            record.updated_at = Utc::now();
            record.update_available_version = None;
            self.service.update_plugin(&record).await?;
            if record.enabled {
                self.reload_plugin(scope, id).await?;
            }
        }
        Ok(manifest)
    }

    /// Unload, remove from disk, and cascade-delete the rows.
    pub async fn uninstall_plugin(&self, scope: &str, id: &str) -> PluginResult<()> {
        self.unload_plugin(scope, id).await;
        self.installer.uninstall(scope, id).await?;
        self.service.uninstall_plugin(scope, id).await?;
        Ok(())
    }

    // ── lookup ───────────────────────────────────────────────────────────

    /// Currently loaded runtime for `(scope, id)`, if any.
    pub async fn get_runtime(&self, scope: &str, id: &str) -> Option<Arc<PluginRuntime>> {
        self.runtimes
            .read()
            .await
            .get(&PluginKey::new(scope, id))
            .cloned()
    }

    async fn runtime_or_err(&self, scope: &str, id: &str) -> PluginResult<Arc<PluginRuntime>> {
        self.get_runtime(scope, id)
            .await
            .ok_or_else(|| PluginError::PluginNotLoaded {
                scope: scope.to_string(),
                id: id.to_string(),
            })
    }

    /// Loaded runtimes for `hook`, in dispatch order.
    ///
    /// A library (> 0) that customised this hook type filters and reorders;
    /// otherwise the global order applies. Only loaded plugins appear either
    /// way — a globally disabled plugin is invisible regardless of overrides.
    pub async fn get_ordered_runtimes(
        &self,
        hook: HookType,
        library_id: i64,
    ) -> PluginResult<Vec<Arc<PluginRuntime>>> {
        let keys: Vec<PluginKey> = if library_id > 0
            && self.service.is_library_customized(library_id, hook).await?
        {
            self.service
                .get_library_order(library_id, hook)
                .await?
                .into_iter()
                .filter(|entry| entry.enabled)
                .map(|entry| PluginKey::new(entry.scope, entry.plugin_id))
                .collect()
        } else {
            self.service
                .get_order(hook)
                .await?
                .into_iter()
                .map(|entry| PluginKey::new(entry.scope, entry.plugin_id))
                .collect()
        };

        let runtimes = self.runtimes.read().await;
        Ok(keys
            .into_iter()
            .filter_map(|key| runtimes.get(&key).cloned())
            .filter(|runtime| runtime.has_hook(hook))
            .collect())
    }

    /// First loaded parser declaring `file_type`, skipping reserved built-in
    /// extensions the host parses itself.
    pub async fn get_parser_for_type(&self, file_type: &str) -> PluginResult<Option<Arc<PluginRuntime>>> {
        if RESERVED_PARSER_TYPES.contains(&file_type) {
            return Ok(None);
        }
        let ordered = self.get_ordered_runtimes(HookType::FileParser, 0).await?;
        Ok(ordered.into_iter().find(|runtime| {
            runtime
                .manifest
                .file_parser
                .as_ref()
                .map_or(false, |parser| parser.types.iter().any(|t| t == file_type))
        }))
    }

    /// First loaded generator whose `outputGenerator.id` matches, wrapped in
    /// the host's generator interface.
    pub async fn get_output_generator(&self, format_id: &str) -> PluginResult<Option<GeneratorAdapter>> {
        let ordered = self.get_ordered_runtimes(HookType::OutputGenerator, 0).await?;
        let found = ordered.into_iter().find(|runtime| {
            runtime
                .manifest
                .output_generator
                .as_ref()
                .map_or(false, |generator| generator.id == format_id)
        });
        Ok(found.map(|runtime| GeneratorAdapter {
            runtime,
            config: self.config.clone(),
        }))
    }

    // ── hook entry points ────────────────────────────────────────────────

    pub async fn run_input_converter(
        &self,
        scope: &str,
        id: &str,
        source_path: &Path,
        target_dir: &Path,
    ) -> PluginResult<ConvertResult> {
        let runtime = self.runtime_or_err(scope, id).await?;
        invoker::run_input_converter(runtime, &self.config, source_path, target_dir).await
    }

    pub async fn run_file_parser(
        &self,
        scope: &str,
        id: &str,
        file_path: &Path,
        file_type: &str,
    ) -> PluginResult<ParsedMetadata> {
        let runtime = self.runtime_or_err(scope, id).await?;
        invoker::run_file_parser(runtime, &self.config, file_path, file_type).await
    }

    pub async fn run_metadata_enricher(
        &self,
        scope: &str,
        id: &str,
        book: &Book,
        file: &BookFile,
        parsed: Option<&ParsedMetadata>,
    ) -> PluginResult<EnrichResult> {
        let runtime = self.runtime_or_err(scope, id).await?;
        invoker::run_metadata_enricher(runtime, &self.config, book, file, parsed).await
    }

    pub async fn run_output_generator(
        &self,
        scope: &str,
        id: &str,
        source_path: &Path,
        dest_path: &Path,
        book: &Book,
        file: &BookFile,
    ) -> PluginResult<()> {
        let runtime = self.runtime_or_err(scope, id).await?;
        invoker::run_output_generator(runtime, &self.config, source_path, dest_path, book, file).await
    }

    pub async fn run_fingerprint(
        &self,
        scope: &str,
        id: &str,
        book: &Book,
        file: &BookFile,
    ) -> PluginResult<String> {
        let runtime = self.runtime_or_err(scope, id).await?;
        invoker::run_fingerprint(runtime, book, file).await
    }

    // ── updates ──────────────────────────────────────────────────────────

    /// Fetch every enabled repository and set or clear the
    /// update-available marker on each installed plugin.
    ///
    /// Per-repository fetch failures are logged and recorded, not fatal.
    pub async fn check_for_updates(&self) -> PluginResult<()> {
        let repositories = self.service.list_repositories().await?;
        let mut indexes: HashMap<String, RepositoryIndex> = HashMap::new();

        for repository in repositories.iter().filter(|r| r.enabled) {
            match (self.repo_fetch)(repository.url.clone()).await {
                Ok(index) => {
                    self.service
                        .set_repository_fetch_status(&repository.scope, Some(Utc::now()), None)
                        .await?;
                    indexes.insert(repository.scope.clone(), index);
                }
                Err(e) => {
                    warn!(scope = %repository.scope, error = %e, "repository fetch failed");
                    self.service
                        .set_repository_fetch_status(&repository.scope, None, Some(&e.to_string()))
                        .await?;
                }
            }
        }

        for plugin in self.service.list_plugins().await? {
            let latest = indexes.get(&plugin.scope).and_then(|index| {
                index
                    .plugins
                    .iter()
                    .find(|entry| entry.id == plugin.id)
                    .and_then(|entry| latest_compatible(&entry.versions))
            });
            let update = latest.filter(|candidate| is_newer(&candidate.version, &plugin.version));
            self.service
                .set_update_available(
                    &plugin.scope,
                    &plugin.id,
                    update.as_ref().map(|v| v.version.as_str()),
                )
                .await?;
        }
        Ok(())
    }

    /// Run [`PluginManager::check_for_updates`] on a fixed interval.
    pub fn spawn_update_checker(
        self: Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // consume the immediate first tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.check_for_updates().await {
                    warn!(error = %e, "update check failed");
                }
            }
        })
    }
}

/// Prefer semver comparison; fall back to plain inequality when either side
/// does not parse.
fn is_newer(candidate: &str, current: &str) -> bool {
    match (semver::Version::parse(candidate), semver::Version::parse(current)) {
        (Ok(candidate), Ok(current)) => candidate > current,
        _ => candidate != current,
    }
}

/// Adapter implementing the host's output-generator contract over a runtime.
pub struct GeneratorAdapter {
    runtime: Arc<PluginRuntime>,
    config: Arc<HostConfig>,
}

impl GeneratorAdapter {
    /// Generate `dest_path` from `source_path`.
    pub async fn generate(
        &self,
        source_path: &Path,
        dest_path: &Path,
        book: &Book,
        file: &BookFile,
    ) -> PluginResult<()> {
        invoker::run_output_generator(
            self.runtime.clone(),
            &self.config,
            source_path,
            dest_path,
            book,
            file,
        )
        .await
    }

    /// The source file type this generator consumes.
    pub fn supported_type(&self) -> String {
        self.runtime
            .manifest
            .output_generator
            .as_ref()
            .and_then(|generator| generator.source_types.first().cloned())
            .unwrap_or_default()
    }

    /// Stable content fingerprint for change detection.
    pub async fn fingerprint(&self, book: &Book, file: &BookFile) -> PluginResult<String> {
        invoker::run_fingerprint(self.runtime.clone(), book, file).await
    }
}
