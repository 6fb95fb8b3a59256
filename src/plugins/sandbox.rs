//! Per-invocation filesystem sandbox.
//!
//! Every `shisho.fs` / `shisho.archive` host call consults an [`FsContext`]
//! installed for the duration of one hook invocation. A context admits the
//! plugin's own directory, the hook-supplied allowlisted paths, the lazily
//! materialised scoped temp directory, and (if the manifest declares
//! `fileAccess`) the rest of the filesystem at the declared level.

use crate::plugins::manifest::FileAccessLevel;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

static TEMP_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Resolve `path` to an absolute, lexically normalised form.
///
/// `.` and `..` components are resolved without touching the filesystem;
/// if the result exists, symlinks are additionally resolved through
/// `fs::canonicalize` so a link cannot smuggle a path out of its parent.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    match std::fs::canonicalize(&normalized) {
        Ok(canonical) => canonical,
        Err(_) => normalized,
    }
}

/// Whether `child` equals `parent` or lives underneath it.
///
/// Both sides are normalised first. The check is component-wise: a sibling
/// whose name merely shares a string prefix (`/foo/barBaz` vs `/foo/bar`)
/// is not within.
pub fn is_within(child: &Path, parent: &Path) -> bool {
    let child = normalize_path(child);
    let parent = normalize_path(parent);
    child == parent || child.starts_with(&parent)
}

/// Per-invocation allowlist and temp-directory bundle.
#[derive(Debug)]
pub struct FsContext {
    /// The plugin's own directory; always readable and writable.
    plugin_dir: PathBuf,
    /// Hook-supplied paths; always readable and writable.
    allowed_paths: Vec<PathBuf>,
    /// Manifest-declared blanket filesystem access, if any.
    file_access: Option<FileAccessLevel>,
    /// Prefix for the scoped temp directory name.
    label: String,
    /// Materialised lazily on first `temp_dir()` call.
    temp_dir: Mutex<Option<PathBuf>>,
}

impl FsContext {
    /// Build a context for one invocation.
    ///
    /// `label` tags the temp directory with the owning plugin (`scope-id`).
    pub fn new(
        plugin_dir: PathBuf,
        allowed_paths: Vec<PathBuf>,
        file_access: Option<FileAccessLevel>,
        label: &str,
    ) -> Self {
        Self {
            plugin_dir,
            allowed_paths,
            file_access,
            label: label.to_string(),
            temp_dir: Mutex::new(None),
        }
    }

    /// Whether reading `path` is permitted under this context.
    pub fn is_read_allowed(&self, path: &Path) -> bool {
        self.is_allowed(path, FileAccessLevel::Read)
    }

    /// Whether writing `path` is permitted under this context.
    pub fn is_write_allowed(&self, path: &Path) -> bool {
        self.is_allowed(path, FileAccessLevel::Readwrite)
    }

    fn is_allowed(&self, path: &Path, needed: FileAccessLevel) -> bool {
        if is_within(path, &self.plugin_dir) {
            return true;
        }
        if let Some(temp) = self.temp_dir.lock().unwrap().as_ref() {
            if is_within(path, temp) {
                return true;
            }
        }
        if self.allowed_paths.iter().any(|p| is_within(path, p)) {
            return true;
        }
        match (self.file_access, needed) {
            (Some(FileAccessLevel::Readwrite), _) => true,
            (Some(FileAccessLevel::Read), FileAccessLevel::Read) => true,
            _ => false,
        }
    }

    /// The scoped temp directory, created on first call.
    pub fn temp_dir(&self) -> std::io::Result<PathBuf> {
        let mut slot = self.temp_dir.lock().unwrap();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        let nonce = TEMP_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "shisho-plugin-{}-{}-{}",
            self.label,
            std::process::id(),
            nonce
        ));
        std::fs::create_dir_all(&dir)?;
        *slot = Some(dir.clone());
        Ok(dir)
    }

    /// Remove the temp directory if one was materialised.
    pub fn cleanup(&self) {
        let mut slot = self.temp_dir.lock().unwrap();
        if let Some(dir) = slot.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %e, "failed to remove plugin temp dir");
            }
        }
    }
}
