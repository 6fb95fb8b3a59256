//! `shisho.fs` — sandboxed filesystem access.
//!
//! Every call consults the invocation's [`FsContext`] before touching the
//! filesystem. Binary payloads cross the boundary as `ArrayBuffer`.

use super::HostEnv;
use crate::error::{PluginError, PluginResult};
use crate::plugins::engine::{json_to_js, throw_host_error};
use rquickjs::class::Trace;
use rquickjs::{ArrayBuffer, Ctx, TypedArray, Value};
use std::path::Path;
use std::sync::Arc;

#[derive(Trace)]
#[rquickjs::class]
pub struct FsApi {
    #[qjs(skip_trace)]
    env: Arc<HostEnv>,
}

impl FsApi {
    pub fn new(env: Arc<HostEnv>) -> Self {
        Self { env }
    }

    fn check_read(&self, path: &str) -> PluginResult<()> {
        let context = self.env.fs_context()?;
        if context.is_read_allowed(Path::new(path)) {
            Ok(())
        } else {
            Err(PluginError::AccessDenied(format!(
                "read of '{path}' is not permitted"
            )))
        }
    }

    fn check_write(&self, path: &str) -> PluginResult<()> {
        let context = self.env.fs_context()?;
        if context.is_write_allowed(Path::new(path)) {
            Ok(())
        } else {
            Err(PluginError::AccessDenied(format!(
                "write of '{path}' is not permitted"
            )))
        }
    }
}

/// Extract raw bytes from an `ArrayBuffer` or typed-array value.
pub(crate) fn buffer_bytes<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> PluginResult<Vec<u8>> {
    use rquickjs::FromJs;
    if let Ok(buffer) = ArrayBuffer::from_js(ctx, value.clone()) {
        if let Some(bytes) = buffer.as_bytes() {
            return Ok(bytes.to_vec());
        }
    }
    if let Ok(array) = TypedArray::<u8>::from_js(ctx, value.clone()) {
        if let Some(bytes) = array.as_bytes() {
            return Ok(bytes.to_vec());
        }
    }
    Err(PluginError::Internal(
        "expected an ArrayBuffer or Uint8Array".to_string(),
    ))
}

#[rquickjs::methods]
impl FsApi {
    #[qjs(rename = "readFile")]
    pub fn read_file<'js>(&self, ctx: Ctx<'js>, path: String) -> rquickjs::Result<ArrayBuffer<'js>> {
        self.check_read(&path).map_err(|e| throw_host_error(&ctx, e))?;
        let data = std::fs::read(&path)
            .map_err(|e| throw_host_error(&ctx, PluginError::Io(e)))?;
        ArrayBuffer::new(ctx, data)
    }

    #[qjs(rename = "readTextFile")]
    pub fn read_text_file<'js>(&self, ctx: Ctx<'js>, path: String) -> rquickjs::Result<String> {
        self.check_read(&path).map_err(|e| throw_host_error(&ctx, e))?;
        std::fs::read_to_string(&path).map_err(|e| throw_host_error(&ctx, PluginError::Io(e)))
    }

    #[qjs(rename = "writeFile")]
    pub fn write_file<'js>(
        &self,
        ctx: Ctx<'js>,
        path: String,
        data: Value<'js>,
    ) -> rquickjs::Result<()> {
        self.check_write(&path).map_err(|e| throw_host_error(&ctx, e))?;
        let bytes = buffer_bytes(&ctx, data).map_err(|e| throw_host_error(&ctx, e))?;
        std::fs::write(&path, bytes).map_err(|e| throw_host_error(&ctx, PluginError::Io(e)))
    }

    #[qjs(rename = "writeTextFile")]
    pub fn write_text_file<'js>(
        &self,
        ctx: Ctx<'js>,
        path: String,
        text: String,
    ) -> rquickjs::Result<()> {
        self.check_write(&path).map_err(|e| throw_host_error(&ctx, e))?;
        std::fs::write(&path, text).map_err(|e| throw_host_error(&ctx, PluginError::Io(e)))
    }

    pub fn exists<'js>(&self, ctx: Ctx<'js>, path: String) -> rquickjs::Result<bool> {
        self.check_read(&path).map_err(|e| throw_host_error(&ctx, e))?;
        Ok(Path::new(&path).exists())
    }

    pub fn mkdir<'js>(&self, ctx: Ctx<'js>, path: String) -> rquickjs::Result<()> {
        self.check_write(&path).map_err(|e| throw_host_error(&ctx, e))?;
        std::fs::create_dir_all(&path).map_err(|e| throw_host_error(&ctx, PluginError::Io(e)))
    }

    #[qjs(rename = "listDir")]
    pub fn list_dir<'js>(&self, ctx: Ctx<'js>, path: String) -> rquickjs::Result<Value<'js>> {
        self.check_read(&path).map_err(|e| throw_host_error(&ctx, e))?;
        let mut entries = Vec::new();
        let read_dir =
            std::fs::read_dir(&path).map_err(|e| throw_host_error(&ctx, PluginError::Io(e)))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| throw_host_error(&ctx, PluginError::Io(e)))?;
            let meta = entry
                .metadata()
                .map_err(|e| throw_host_error(&ctx, PluginError::Io(e)))?;
            entries.push(serde_json::json!({
                "name": entry.file_name().to_string_lossy(),
                "isDir": meta.is_dir(),
                "size": meta.len(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        json_to_js(&ctx, &serde_json::Value::Array(entries))
    }

    #[qjs(rename = "tempDir")]
    pub fn temp_dir<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<String> {
        let context = self.env.fs_context().map_err(|e| throw_host_error(&ctx, e))?;
        let dir = context
            .temp_dir()
            .map_err(|e| throw_host_error(&ctx, PluginError::Io(e)))?;
        Ok(dir.to_string_lossy().into_owned())
    }
}
