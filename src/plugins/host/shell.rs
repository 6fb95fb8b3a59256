//! `shisho.shell` — subprocess execution, gated by `shellAccess`.
//!
//! The command must appear verbatim in the manifest's allowlist. Execution is
//! a direct exec of `command` with `args` — no shell, no interpolation.

use super::{run_process, HostEnv};
use crate::error::PluginError;
use crate::plugins::engine::{json_to_js, throw_host_error};
use rquickjs::class::Trace;
use rquickjs::{Ctx, Value};
use std::sync::Arc;

#[derive(Trace)]
#[rquickjs::class]
pub struct ShellApi {
    #[qjs(skip_trace)]
    env: Arc<HostEnv>,
}

impl ShellApi {
    pub fn new(env: Arc<HostEnv>) -> Self {
        Self { env }
    }
}

#[rquickjs::methods]
impl ShellApi {
    /// Run an allowlisted command. Returns `{exitCode, stdout, stderr}`.
    pub fn exec<'js>(
        &self,
        ctx: Ctx<'js>,
        command: String,
        args: Vec<String>,
    ) -> rquickjs::Result<Value<'js>> {
        let shell = self.env.require_shell().map_err(|e| throw_host_error(&ctx, e))?;
        if !shell.commands.iter().any(|c| c == &command) {
            return Err(throw_host_error(
                &ctx,
                PluginError::AccessDenied(format!(
                    "command '{command}' is not in the manifest's shellAccess list"
                )),
            ));
        }

        let output = run_process(&self.env, &command, &args, self.env.config.shell_timeout)
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
}
