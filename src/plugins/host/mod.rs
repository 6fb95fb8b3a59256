//! The `shisho.*` host API surface.
//!
//! All nine namespaces are injected into every runtime regardless of the
//! manifest: each gated function performs its own capability check before
//! parsing arguments, so the surface plugins see is uniform and a missing
//! capability surfaces as a thrown `CapabilityDenied` rather than a missing
//! function.
//!
//! Namespaces are rquickjs classes holding an [`Arc<HostEnv>`]; every method
//! is synchronous from the script's point of view. Host work that must await
//! (HTTP, subprocesses, config reads) blocks on the captured tokio handle —
//! engine entry always happens on the blocking pool, never on an async worker.

mod archive;
mod config_api;
mod ffmpeg;
mod fs;
mod http;
mod log;
mod shell;
mod url_api;
mod xml;

pub use archive::extract_zip_file;
pub use http::validate_domain;
pub(crate) use fs::buffer_bytes;

use crate::config::HostConfig;
use crate::error::{PluginError, PluginResult};
use crate::plugins::engine::ScriptEngine;
use crate::plugins::manifest::Manifest;
use crate::plugins::sandbox::FsContext;
use crate::plugins::PluginKey;
use rquickjs::{Class, Object};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Narrow read interface onto the persisted per-plugin config.
#[async_trait::async_trait]
pub trait ConfigGetter: Send + Sync {
    /// Raw value for one key, `None` when unset.
    async fn get_value(
        &self,
        scope: &str,
        plugin_id: &str,
        key: &str,
    ) -> PluginResult<Option<String>>;

    /// All non-null values.
    async fn get_all(&self, scope: &str, plugin_id: &str)
        -> PluginResult<BTreeMap<String, String>>;
}

/// State shared by every host-API namespace of one runtime.
pub struct HostEnv {
    /// Owning plugin.
    pub key: PluginKey,
    /// The plugin's validated manifest.
    pub manifest: Arc<Manifest>,
    /// The plugin's install directory.
    pub plugin_dir: PathBuf,
    /// Current per-invocation FS context; installed/cleared by the invoker.
    pub fs_slot: Arc<Mutex<Option<Arc<FsContext>>>>,
    /// Host configuration (deadlines, binaries, caps).
    pub config: Arc<HostConfig>,
    /// Persisted plugin config, read through a narrow interface.
    pub config_store: Arc<dyn ConfigGetter>,
    /// Handle used to block on async host work from script callbacks.
    pub rt: tokio::runtime::Handle,
    /// Shared HTTP client; redirects disabled so every hop is validated.
    pub http_client: reqwest::Client,
}

impl HostEnv {
    /// Build the shared HTTP client used by `shisho.http`.
    pub fn build_http_client() -> PluginResult<reqwest::Client> {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(PluginError::Http)
    }
}

impl HostEnv {
    /// The FS context of the in-flight invocation.
    ///
    /// Calls made outside a hook invocation (e.g. at script load) have no
    /// context and are denied.
    pub fn fs_context(&self) -> PluginResult<Arc<FsContext>> {
        self.fs_slot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PluginError::AccessDenied("no filesystem context active".to_string()))
    }

    fn capability_denied(capability: &str) -> PluginError {
        PluginError::CapabilityDenied {
            capability: capability.to_string(),
        }
    }

    /// Fail unless the manifest declares `httpAccess`.
    pub fn require_http(&self) -> PluginResult<&crate::plugins::manifest::HttpAccessCap> {
        self.manifest
            .http_access
            .as_ref()
            .ok_or_else(|| Self::capability_denied("httpAccess"))
    }

    /// Fail unless the manifest declares `ffmpegAccess`.
    pub fn require_ffmpeg(&self) -> PluginResult<()> {
        self.manifest
            .ffmpeg_access
            .as_ref()
            .map(|_| ())
            .ok_or_else(|| Self::capability_denied("ffmpegAccess"))
    }

    /// Fail unless the manifest declares `shellAccess`.
    pub fn require_shell(&self) -> PluginResult<&crate::plugins::manifest::ShellAccessCap> {
        self.manifest
            .shell_access
            .as_ref()
            .ok_or_else(|| Self::capability_denied("shellAccess"))
    }
}

/// Output of a completed (or failed-by-exit-code) subprocess.
pub(crate) struct ProcessOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run a subprocess to completion under `timeout`.
///
/// Direct exec, no shell. Start failures and deadline expiry are errors;
/// a non-zero exit code is data.
pub(crate) fn run_process(
    env: &HostEnv,
    bin: &str,
    args: &[String],
    timeout: Duration,
) -> PluginResult<ProcessOutput> {
    let bin = bin.to_string();
    let args = args.to_vec();
    env.rt.clone().block_on(async move {
        let child = tokio::process::Command::new(&bin)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PluginError::Internal(format!("failed to start '{bin}': {e}")))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ProcessOutput {
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                stdout: output.stdout,
                stderr: output.stderr,
            }),
            Ok(Err(e)) => Err(PluginError::Io(e)),
            // child is killed via kill_on_drop when the future is dropped
            Err(_) => Err(PluginError::Timeout(format!(
                "'{bin}' exceeded {}s",
                timeout.as_secs()
            ))),
        }
    })
}

/// Attach the `shisho` global and populate all nine namespaces.
pub fn inject(engine: &ScriptEngine, env: Arc<HostEnv>) -> PluginResult<()> {
    engine
        .with(|ctx| -> rquickjs::Result<()> {
            let shisho = Object::new(ctx.clone())?;
            shisho.set("log", Class::instance(ctx.clone(), log::LogApi::new(env.clone()))?)?;
            shisho.set(
                "config",
                Class::instance(ctx.clone(), config_api::ConfigApi::new(env.clone()))?,
            )?;
            shisho.set("http", Class::instance(ctx.clone(), http::HttpApi::new(env.clone()))?)?;
            shisho.set("fs", Class::instance(ctx.clone(), fs::FsApi::new(env.clone()))?)?;
            shisho.set(
                "archive",
                Class::instance(ctx.clone(), archive::ArchiveApi::new(env.clone()))?,
            )?;
            shisho.set("xml", Class::instance(ctx.clone(), xml::XmlApi::new(env.clone()))?)?;
            shisho.set(
                "ffmpeg",
                Class::instance(ctx.clone(), ffmpeg::FfmpegApi::new(env.clone()))?,
            )?;
            shisho.set(
                "shell",
                Class::instance(ctx.clone(), shell::ShellApi::new(env.clone()))?,
            )?;
            shisho.set(
                "url",
                Class::instance(ctx.clone(), url_api::UrlApi::new(env.clone()))?,
            )?;
            ctx.globals().set("shisho", shisho)?;
            Ok(())
        })
        .map_err(|e| PluginError::Internal(format!("host api injection failed: {e}")))
}
