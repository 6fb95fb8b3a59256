//! `shisho.ffmpeg` — media tooling, gated by `ffmpegAccess`.
//!
//! Every transcode call gets `-protocol_whitelist file,pipe` prepended so a
//! smuggled URL argument cannot reach the network through the child process.
//! Non-zero exit codes are data; start failures and deadline expiry throw.

use super::{run_process, HostEnv};
use crate::plugins::engine::{json_to_js, throw_host_error};
use rquickjs::class::Trace;
use rquickjs::{Ctx, Value};
use std::sync::Arc;

#[derive(Trace)]
#[rquickjs::class]
pub struct FfmpegApi {
    #[qjs(skip_trace)]
    env: Arc<HostEnv>,
}

impl FfmpegApi {
    pub fn new(env: Arc<HostEnv>) -> Self {
        Self { env }
    }
}

#[rquickjs::methods]
impl FfmpegApi {
    /// Run ffmpeg with the given arguments. Returns
    /// `{exitCode, stdout, stderr}`.
    pub fn transcode<'js>(&self, ctx: Ctx<'js>, args: Vec<String>) -> rquickjs::Result<Value<'js>> {
        self.env.require_ffmpeg().map_err(|e| throw_host_error(&ctx, e))?;

        let mut full_args = vec!["-protocol_whitelist".to_string(), "file,pipe".to_string()];
        full_args.extend(args);

        let output = run_process(
            &self.env,
            &self.env.config.ffmpeg_bin,
            &full_args,
            self.env.config.transcode_timeout,
        )
        .map_err(|e| throw_host_error(&ctx, e))?;

        json_to_js(
            &ctx,
            &serde_json::json!({
                "exitCode": output.exit_code,
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            }),
        )
    }

    /// Probe a media file. Returns `{exitCode, data?, parseError?, stderr}`;
    /// a stdout that fails to parse as JSON surfaces in `parseError` rather
    /// than as an exception.
    pub fn probe<'js>(&self, ctx: Ctx<'js>, args: Vec<String>) -> rquickjs::Result<Value<'js>> {
        self.env.require_ffmpeg().map_err(|e| throw_host_error(&ctx, e))?;

        let mut full_args = args;
        full_args.extend([
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
        ]);

        let output = run_process(
            &self.env,
            &self.env.config.ffprobe_bin,
            &full_args,
            self.env.config.probe_timeout,
        )
        .map_err(|e| throw_host_error(&ctx, e))?;

        let mut result = serde_json::json!({
            "exitCode": output.exit_code,
            "stderr": String::from_utf8_lossy(&output.stderr),
        });
        match serde_json::from_slice::<serde_json::Value>(&output.stdout) {
            Ok(data) => {
                result["data"] = data;
            }
            Err(e) => {
                result["parseError"] = serde_json::Value::String(e.to_string());
            }
        }
        json_to_js(&ctx, &result)
    }

    /// The ffmpeg version banner (first line of `ffmpeg -version`).
    pub fn version<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<String> {
        self.env.require_ffmpeg().map_err(|e| throw_host_error(&ctx, e))?;

        let output = run_process(
            &self.env,
            &self.env.config.ffmpeg_bin,
            &["-version".to_string()],
            self.env.config.probe_timeout,
        )
        .map_err(|e| throw_host_error(&ctx, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }
}
