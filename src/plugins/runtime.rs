//! Loaded plugin runtimes.
//!
//! A [`PluginRuntime`] owns one plugin's script engine, the handles to its
//! exported hooks, and the locks that coordinate in-flight hook invocations
//! against hot reload. Runtimes are created by [`load_runtime`], owned by the
//! manager, and replaced wholesale on reload.

use crate::config::HostConfig;
use crate::error::{PluginError, PluginResult};
use crate::plugins::engine::{self, ScriptEngine};
use crate::plugins::host::{self, ConfigGetter, HostEnv};
use crate::plugins::manifest::Manifest;
use crate::plugins::sandbox::FsContext;
use crate::plugins::{HookType, PluginKey, MANIFEST_FILE, SCRIPT_FILE};
use rquickjs::{Function, Object, Persistent, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Persistent handles to the callables a plugin exports.
#[derive(Default)]
struct Hooks {
    convert: Option<Persistent<Function<'static>>>,
    parse: Option<Persistent<Function<'static>>>,
    enrich: Option<Persistent<Function<'static>>>,
    generate: Option<Persistent<Function<'static>>>,
    fingerprint: Option<Persistent<Function<'static>>>,
}

/// The callable being invoked on a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFn {
    Convert,
    Parse,
    Enrich,
    Generate,
    Fingerprint,
}

impl HookFn {
    /// Script-side name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            HookFn::Convert => "inputConverter.convert",
            HookFn::Parse => "fileParser.parse",
            HookFn::Enrich => "metadataEnricher.enrich",
            HookFn::Generate => "outputGenerator.generate",
            HookFn::Fingerprint => "outputGenerator.fingerprint",
        }
    }
}

/// An in-memory handle around one plugin's script engine.
pub struct PluginRuntime {
    pub key: PluginKey,
    pub manifest: Arc<Manifest>,
    pub plugin_dir: PathBuf,
    engine: ScriptEngine,
    hooks: Hooks,
    pub(crate) env: Arc<HostEnv>,
    /// Read side held by in-flight invocations; write side drains them on
    /// reload. Owned guards so an invocation can carry its guard onto the
    /// blocking pool.
    pub(crate) gate: Arc<tokio::sync::RwLock<()>>,
    /// Serialises all script execution within this plugin.
    exec: Mutex<()>,
}

// Safety: QuickJS's raw engine handles are not `Send`/`Sync` by default, but
// all engine entry is serialised through `exec` (and gated against reload via
// `gate`), so the runtime is never touched from two threads concurrently.
unsafe impl Send for PluginRuntime {}
unsafe impl Sync for PluginRuntime {}

impl PluginRuntime {
    /// Whether the runtime carries the callable for `hook`.
    pub fn has_hook(&self, hook: HookType) -> bool {
        match hook {
            HookType::InputConverter => self.hooks.convert.is_some(),
            HookType::FileParser => self.hooks.parse.is_some(),
            HookType::MetadataEnricher => self.hooks.enrich.is_some(),
            HookType::OutputGenerator => self.hooks.generate.is_some(),
        }
    }

    /// Hook types this runtime provides, in canonical order.
    pub fn provided_hooks(&self) -> Vec<HookType> {
        HookType::ALL
            .into_iter()
            .filter(|hook| self.has_hook(*hook))
            .collect()
    }

    pub(crate) fn hook_handle(&self, which: HookFn) -> PluginResult<Persistent<Function<'static>>> {
        let slot = match which {
            HookFn::Convert => &self.hooks.convert,
            HookFn::Parse => &self.hooks.parse,
            HookFn::Enrich => &self.hooks.enrich,
            HookFn::Generate => &self.hooks.generate,
            HookFn::Fingerprint => &self.hooks.fingerprint,
        };
        slot.clone().ok_or_else(|| PluginError::NoHook {
            hook: which.name().to_string(),
        })
    }

    /// Install the FS context consulted by host calls of the next invocation.
    pub(crate) fn set_fs_context(&self, context: Arc<FsContext>) {
        *self.env.fs_slot.lock().unwrap() = Some(context);
    }

    /// Clear the FS context and remove its temp directory.
    pub(crate) fn clear_fs_context(&self) {
        if let Some(context) = self.env.fs_slot.lock().unwrap().take() {
            context.cleanup();
        }
    }

    /// Call `which` with a JSON-marshalled argument, synchronously.
    ///
    /// Must run on the blocking pool. When `extract_cover` is set, a binary
    /// `coverData` buffer on the result (or on `result.metadata`) is pulled
    /// out before JSON serialisation and returned alongside.
    pub(crate) fn invoke_hook(
        &self,
        which: HookFn,
        argument: serde_json::Value,
        extract_cover: bool,
    ) -> PluginResult<(serde_json::Value, Option<Vec<u8>>)> {
        let handle = self.hook_handle(which)?;
        let _exec = self.exec.lock().unwrap();
        self.engine.with(|ctx| {
            let function: Function = handle
                .restore(&ctx)
                .map_err(|e| PluginError::Internal(format!("hook handle restore failed: {e}")))?;
            let argument = engine::json_to_js(&ctx, &argument)
                .map_err(|e| PluginError::Internal(format!("argument marshalling failed: {e}")))?;
            let result: Value = function
                .call((argument,))
                .map_err(|e| PluginError::ScriptRuntime(engine::error_text(&ctx, e)))?;

            let mut cover = None;
            if extract_cover {
                if let Some(object) = result.as_object() {
                    cover = take_cover_data(&ctx, object)?;
                    if cover.is_none() {
                        if let Ok(Some(metadata)) = object.get::<_, Option<Object>>("metadata") {
                            cover = take_cover_data(&ctx, &metadata)?;
                        }
                    }
                }
            }
            let json = engine::js_to_json(&ctx, result)?;
            Ok((json, cover))
        })
    }
}

/// Detach a binary `coverData` property from `object`, if present.
fn take_cover_data<'js>(
    ctx: &rquickjs::Ctx<'js>,
    object: &Object<'js>,
) -> PluginResult<Option<Vec<u8>>> {
    let value: Value = match object.get("coverData") {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    match host::buffer_bytes(ctx, value) {
        Ok(bytes) => {
            // JSON.stringify skips undefined-valued properties
            object
                .set("coverData", ())
                .map_err(|e| PluginError::Internal(e.to_string()))?;
            Ok(Some(bytes))
        }
        Err(_) => Ok(None),
    }
}

/// Load a plugin from `<plugin_root>/<scope>/<id>`.
///
/// Reads and validates the manifest, creates a fresh engine, injects the host
/// API, executes `main.js`, and reconciles the exported hooks with the
/// declared capabilities. Engine work runs on the blocking pool.
pub async fn load_runtime(
    config: Arc<HostConfig>,
    config_store: Arc<dyn ConfigGetter>,
    key: PluginKey,
) -> PluginResult<Arc<PluginRuntime>> {
    let handle = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || load_runtime_blocking(config, config_store, key, handle))
        .await
        .map_err(|e| PluginError::Internal(format!("loader task failed: {e}")))?
}

fn load_runtime_blocking(
    config: Arc<HostConfig>,
    config_store: Arc<dyn ConfigGetter>,
    key: PluginKey,
    rt: tokio::runtime::Handle,
) -> PluginResult<Arc<PluginRuntime>> {
    let plugin_dir = config.plugin_dir(&key.scope, &key.id);

    let manifest_bytes = std::fs::read(plugin_dir.join(MANIFEST_FILE))?;
    let parsed = Manifest::parse(&manifest_bytes, &config.host_version)?;
    for warning in &parsed.warnings {
        warn!(plugin = %key, "{warning}");
    }
    let manifest = Arc::new(parsed.manifest);

    let script = std::fs::read_to_string(plugin_dir.join(SCRIPT_FILE))?;
    let engine = ScriptEngine::new()?;

    let env = Arc::new(HostEnv {
        key: key.clone(),
        manifest: manifest.clone(),
        plugin_dir: plugin_dir.clone(),
        fs_slot: Arc::new(Mutex::new(None)),
        config,
        config_store,
        rt,
        http_client: HostEnv::build_http_client()?,
    });
    host::inject(&engine, env.clone())?;

    engine.eval_script(&script)?;

    let hooks = extract_hooks(&engine, &manifest, &key)?;

    debug!(plugin = %key, version = %manifest.version, "plugin runtime loaded");
    Ok(Arc::new(PluginRuntime {
        key,
        manifest,
        plugin_dir,
        engine,
        hooks,
        env,
        gate: Arc::new(tokio::sync::RwLock::new(())),
        exec: Mutex::new(()),
    }))
}

/// Read the `plugin` global and reconcile exported hooks with the manifest.
fn extract_hooks(
    engine: &ScriptEngine,
    manifest: &Manifest,
    key: &PluginKey,
) -> PluginResult<Hooks> {
    engine.with(|ctx| {
        let plugin: Value = ctx
            .globals()
            .get("plugin")
            .map_err(|e| PluginError::ScriptInit(engine::error_text(&ctx, e)))?;
        let plugin = plugin.into_object().ok_or_else(|| {
            PluginError::ScriptInit(
                "script did not assign an object to the 'plugin' global".to_string(),
            )
        })?;

        let mut hooks = Hooks::default();
        for hook_type in HookType::ALL {
            let exported: Option<Object> = plugin
                .get(hook_type.as_str())
                .map_err(|e| PluginError::ScriptInit(engine::error_text(&ctx, e)))?;
            let Some(exported) = exported else { continue };

            if !manifest.declares_hook(hook_type) {
                return Err(PluginError::UndeclaredHook {
                    hook: hook_type.as_str().to_string(),
                });
            }

            match hook_type {
                HookType::InputConverter => {
                    hooks.convert = Some(required_fn(&ctx, &exported, "convert", hook_type)?);
                }
                HookType::FileParser => {
                    hooks.parse = Some(required_fn(&ctx, &exported, "parse", hook_type)?);
                }
                HookType::MetadataEnricher => {
                    if manifest.enricher_enabled() {
                        hooks.enrich = Some(required_fn(&ctx, &exported, "enrich", hook_type)?);
                    } else {
                        warn!(plugin = %key, "metadataEnricher disabled: no declared fields");
                    }
                }
                HookType::OutputGenerator => {
                    hooks.generate = Some(required_fn(&ctx, &exported, "generate", hook_type)?);
                    let fingerprint: Option<Function> = exported
                        .get("fingerprint")
                        .map_err(|e| PluginError::ScriptInit(engine::error_text(&ctx, e)))?;
                    if let Some(function) = fingerprint {
                        hooks.fingerprint = Some(Persistent::save(&ctx, function));
                    }
                }
            }
        }
        Ok(hooks)
    })
}

fn required_fn<'js>(
    ctx: &rquickjs::Ctx<'js>,
    exported: &Object<'js>,
    name: &str,
    hook_type: HookType,
) -> PluginResult<Persistent<Function<'static>>> {
    let function: Option<Function> = exported
        .get(name)
        .map_err(|e| PluginError::ScriptInit(engine::error_text(ctx, e)))?;
    let function = function.ok_or_else(|| {
        PluginError::ScriptInit(format!("{}.{name} is not a function", hook_type.as_str()))
    })?;
    Ok(Persistent::save(ctx, function))
}
