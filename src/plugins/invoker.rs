//! Hook invocation.
//!
//! Common protocol for every hook call: verify the hook exists, take the
//! runtime's read gate (so reloads drain behind us), install a fresh FS
//! context scoped to the call,
//! marshal the context object, run the script on the blocking pool under the
//! hook's deadline, unmarshal and normalise the result, and tear the FS
//! context down again even when the hook fails.
//!
//! Deadlines are cooperative: the engine is never preempted, so an expired
//! deadline surfaces `Timeout` to the caller while the script runs to
//! completion in the background, still holding its read guard.

use crate::config::HostConfig;
use crate::error::{PluginError, PluginResult};
use crate::model::{Book, BookFile, ConvertResult, EnrichResult, ParsedMetadata};
use crate::plugins::runtime::{HookFn, PluginRuntime};
use crate::plugins::sandbox::FsContext;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Clears the runtime's FS context (and its temp dir) on scope exit.
struct FsContextGuard<'a>(&'a PluginRuntime);

impl Drop for FsContextGuard<'_> {
    fn drop(&mut self) {
        self.0.clear_fs_context();
    }
}

/// Run `which` on `runtime` with the common invocation protocol.
async fn run_hook(
    runtime: Arc<PluginRuntime>,
    which: HookFn,
    argument: serde_json::Value,
    allowed_paths: Vec<PathBuf>,
    deadline: Option<Duration>,
    extract_cover: bool,
) -> PluginResult<(serde_json::Value, Option<Vec<u8>>)> {
    // a missing hook fails before the reload gate or an FS context exist
    runtime.hook_handle(which)?;

    // Read side of the reload gate; the owned guard rides along onto the
    // blocking pool so a timed-out invocation still blocks reload until the
    // script actually returns.
    let gate = runtime.gate.clone().read_owned().await;

    let label = format!("{}-{}", runtime.key.scope, runtime.key.id);
    let task = tokio::task::spawn_blocking(move || {
        let _gate = gate;
        let context = Arc::new(FsContext::new(
            runtime.plugin_dir.clone(),
            allowed_paths,
            runtime.manifest.file_access.as_ref().map(|f| f.level),
            &label,
        ));
        runtime.set_fs_context(context);
        let _teardown = FsContextGuard(&runtime);
        runtime.invoke_hook(which, argument, extract_cover)
    });

    let joined = match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, task).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(PluginError::Timeout(format!(
                    "hook {} exceeded {}s",
                    which.name(),
                    deadline.as_secs()
                )))
            }
        },
        None => task.await,
    };
    joined.map_err(|e| PluginError::Internal(format!("hook task failed: {e}")))?
}

/// `inputConverter.convert({sourcePath, targetDir})`.
pub async fn run_input_converter(
    runtime: Arc<PluginRuntime>,
    config: &HostConfig,
    source_path: &Path,
    target_dir: &Path,
) -> PluginResult<ConvertResult> {
    let argument = serde_json::json!({
        "sourcePath": source_path.to_string_lossy(),
        "targetDir": target_dir.to_string_lossy(),
    });
    let allowed = vec![source_path.to_path_buf(), target_dir.to_path_buf()];
    let (result, _) = run_hook(
        runtime,
        HookFn::Convert,
        argument,
        allowed,
        Some(config.long_hook_timeout),
        false,
    )
    .await?;
    Ok(serde_json::from_value(result)?)
}

/// `fileParser.parse({filePath, fileType})`, normalised.
pub async fn run_file_parser(
    runtime: Arc<PluginRuntime>,
    config: &HostConfig,
    file_path: &Path,
    file_type: &str,
) -> PluginResult<ParsedMetadata> {
    let data_source = runtime.key.to_string();
    let argument = serde_json::json!({
        "filePath": file_path.to_string_lossy(),
        "fileType": file_type,
    });
    let allowed = vec![file_path.to_path_buf()];
    let (result, cover) = run_hook(
        runtime,
        HookFn::Parse,
        argument,
        allowed,
        Some(config.short_hook_timeout),
        true,
    )
    .await?;

    let mut metadata: ParsedMetadata = serde_json::from_value(result)?;
    metadata.cover_data = cover;
    metadata.normalize(&data_source);
    debug!(source = %data_source, title = ?metadata.title, "file parsed");
    Ok(metadata)
}

/// `metadataEnricher.enrich({book, file, parsedMetadata?})`, normalised.
pub async fn run_metadata_enricher(
    runtime: Arc<PluginRuntime>,
    config: &HostConfig,
    book: &Book,
    file: &BookFile,
    parsed: Option<&ParsedMetadata>,
) -> PluginResult<EnrichResult> {
    let data_source = runtime.key.to_string();
    let mut argument = serde_json::json!({
        "book": book,
        "file": file,
    });
    if let Some(parsed) = parsed {
        argument["parsedMetadata"] = serde_json::to_value(parsed)?;
    }
    let allowed = vec![PathBuf::from(&file.filepath)];
    let (result, cover) = run_hook(
        runtime,
        HookFn::Enrich,
        argument,
        allowed,
        Some(config.short_hook_timeout),
        true,
    )
    .await?;

    let mut enriched: EnrichResult = serde_json::from_value(result)?;
    if let Some(metadata) = enriched.metadata.as_mut() {
        metadata.cover_data = cover;
        metadata.normalize(&data_source);
    }
    Ok(enriched)
}

/// `outputGenerator.generate({sourcePath, destPath, book, file})`.
pub async fn run_output_generator(
    runtime: Arc<PluginRuntime>,
    config: &HostConfig,
    source_path: &Path,
    dest_path: &Path,
    book: &Book,
    file: &BookFile,
) -> PluginResult<()> {
    let argument = serde_json::json!({
        "sourcePath": source_path.to_string_lossy(),
        "destPath": dest_path.to_string_lossy(),
        "book": book,
        "file": file,
    });
    let allowed = vec![source_path.to_path_buf(), dest_path.to_path_buf()];
    run_hook(
        runtime,
        HookFn::Generate,
        argument,
        allowed,
        Some(config.long_hook_timeout),
        false,
    )
    .await?;
    Ok(())
}

/// `outputGenerator.fingerprint({book, file})` — pure, no deadline.
pub async fn run_fingerprint(
    runtime: Arc<PluginRuntime>,
    book: &Book,
    file: &BookFile,
) -> PluginResult<String> {
    let argument = serde_json::json!({
        "book": book,
        "file": file,
    });
    let (result, _) = run_hook(runtime, HookFn::Fingerprint, argument, Vec::new(), None, false).await?;
    match result {
        serde_json::Value::String(fingerprint) => Ok(fingerprint),
        other => Err(PluginError::ScriptRuntime(format!(
            "fingerprint must return a string, got {other}"
        ))),
    }
}
