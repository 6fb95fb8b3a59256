//! `shisho.archive` — zip handling under the FS sandbox.
//!
//! The hardened extraction path here (zip-slip containment + per-entry size
//! cap, validated before any byte is written) is shared with the installer.

use super::HostEnv;
use crate::error::{PluginError, PluginResult};
use crate::plugins::engine::{json_to_js, throw_host_error};
use crate::plugins::sandbox::is_within;
use rquickjs::class::Trace;
use rquickjs::{ArrayBuffer, Ctx, Value};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Extract `src` into `dst` with zip-slip protection and a per-entry cap.
///
/// All entries are validated before anything is written, so a hostile archive
/// leaves no files at the destination.
pub fn extract_zip_file(src: &Path, dst: &Path, max_entry_size: u64) -> PluginResult<()> {
    let file = File::open(src)?;
    let mut archive = ZipArchive::new(file)?;

    // validation pass
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        let Some(relative) = entry.enclosed_name() else {
            return Err(PluginError::ZipSlip { entry: name });
        };
        if !is_within(&dst.join(&relative), dst) {
            return Err(PluginError::ZipSlip { entry: name });
        }
        if entry.size() > max_entry_size {
            return Err(PluginError::ExtractTooLarge {
                entry: name,
                size: entry.size(),
                cap: max_entry_size,
            });
        }
    }

    // extraction pass
    std::fs::create_dir_all(dst)?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| PluginError::ZipSlip { entry: name.clone() })?;
        let target = dst.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        // header sizes can lie; enforce the cap on actual bytes too
        let copied = std::io::copy(&mut (&mut entry).take(max_entry_size + 1), &mut out)?;
        if copied > max_entry_size {
            drop(out);
            let _ = std::fs::remove_file(&target);
            return Err(PluginError::ExtractTooLarge {
                entry: name,
                size: copied,
                cap: max_entry_size,
            });
        }
    }
    Ok(())
}

/// Write `src_dir` as a zip at `dst_file`, entry names using forward slashes.
pub(crate) fn create_zip_file(src_dir: &Path, dst_file: &Path) -> PluginResult<()> {
    let out = File::create(dst_file)?;
    let mut writer = ZipWriter::new(out);
    let options = SimpleFileOptions::default();
    add_dir_recursive(&mut writer, src_dir, src_dir, options)?;
    writer.finish().map_err(PluginError::Archive)?;
    Ok(())
}

fn add_dir_recursive(
    writer: &mut ZipWriter<File>,
    base: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> PluginResult<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        let relative = path
            .strip_prefix(base)
            .map_err(|e| PluginError::Internal(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if path.is_dir() {
            writer.add_directory(format!("{name}/"), options)?;
            add_dir_recursive(writer, base, &path, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut file = File::open(&path)?;
            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer)?;
            writer.write_all(&buffer)?;
        }
    }
    Ok(())
}

#[derive(Trace)]
#[rquickjs::class]
pub struct ArchiveApi {
    #[qjs(skip_trace)]
    env: Arc<HostEnv>,
}

impl ArchiveApi {
    pub fn new(env: Arc<HostEnv>) -> Self {
        Self { env }
    }

    fn check_read(&self, path: &str) -> PluginResult<PathBuf> {
        let context = self.env.fs_context()?;
        let path = PathBuf::from(path);
        if context.is_read_allowed(&path) {
            Ok(path)
        } else {
            Err(PluginError::AccessDenied(format!(
                "read of '{}' is not permitted",
                path.display()
            )))
        }
    }

    fn check_write(&self, path: &str) -> PluginResult<PathBuf> {
        let context = self.env.fs_context()?;
        let path = PathBuf::from(path);
        if context.is_write_allowed(&path) {
            Ok(path)
        } else {
            Err(PluginError::AccessDenied(format!(
                "write of '{}' is not permitted",
                path.display()
            )))
        }
    }
}

#[rquickjs::methods]
impl ArchiveApi {
    #[qjs(rename = "extractZip")]
    pub fn extract_zip<'js>(&self, ctx: Ctx<'js>, src: String, dst: String) -> rquickjs::Result<()> {
        let result = self
            .check_read(&src)
            .and_then(|src| self.check_write(&dst).map(|dst| (src, dst)))
            .and_then(|(src, dst)| {
                extract_zip_file(&src, &dst, self.env.config.max_entry_size)
            });
        result.map_err(|e| throw_host_error(&ctx, e))
    }

    #[qjs(rename = "createZip")]
    pub fn create_zip<'js>(&self, ctx: Ctx<'js>, src_dir: String, dst_file: String) -> rquickjs::Result<()> {
        let result = self
            .check_read(&src_dir)
            .and_then(|src| self.check_write(&dst_file).map(|dst| (src, dst)))
            .and_then(|(src, dst)| create_zip_file(&src, &dst));
        result.map_err(|e| throw_host_error(&ctx, e))
    }

    #[qjs(rename = "readZipEntry")]
    pub fn read_zip_entry<'js>(
        &self,
        ctx: Ctx<'js>,
        zip_path: String,
        entry_name: String,
    ) -> rquickjs::Result<ArrayBuffer<'js>> {
        let data = self
            .check_read(&zip_path)
            .and_then(|path| {
                let file = File::open(&path)?;
                let mut archive = ZipArchive::new(file)?;
                let mut entry = archive.by_name(&entry_name).map_err(|_| {
                    PluginError::NotFound(format!("zip entry '{entry_name}'"))
                })?;
                let cap = self.env.config.max_entry_size;
                if entry.size() > cap {
                    return Err(PluginError::ExtractTooLarge {
                        entry: entry_name.clone(),
                        size: entry.size(),
                        cap,
                    });
                }
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                Ok(buffer)
            })
            .map_err(|e| throw_host_error(&ctx, e))?;
        ArrayBuffer::new(ctx, data)
    }

    #[qjs(rename = "listZipEntries")]
    pub fn list_zip_entries<'js>(
        &self,
        ctx: Ctx<'js>,
        zip_path: String,
    ) -> rquickjs::Result<Value<'js>> {
        let entries = self
            .check_read(&zip_path)
            .and_then(|path| {
                let file = File::open(&path)?;
                let mut archive = ZipArchive::new(file)?;
                let mut entries = Vec::new();
                for index in 0..archive.len() {
                    let entry = archive.by_index(index)?;
                    entries.push(serde_json::json!({
                        "name": entry.name(),
                        "size": entry.size(),
                        "isDir": entry.is_dir(),
                    }));
                }
                Ok(entries)
            })
            .map_err(|e| throw_host_error(&ctx, e))?;
        json_to_js(&ctx, &serde_json::Value::Array(entries))
    }
}
