//! Error types for the plugin host runtime.
//!
//! Every failure the subsystem can surface carries a stable, inspectable tag
//! via [`PluginError::kind`]. Errors that cross into script-land are thrown as
//! JS exceptions whose message is prefixed with that tag, so plugins can react
//! to specific failures without string-scraping host internals.

use thiserror::Error;

/// Result alias used throughout the plugin subsystem.
pub type PluginResult<T> = Result<T, PluginError>;

/// All errors the plugin host runtime can produce.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Manifest is missing a required field, has an unsupported version,
    /// is malformed JSON, or declares an unknown enricher field.
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    /// The script exports a hook the manifest does not declare.
    #[error("plugin exports hook '{hook}' without declaring the matching capability")]
    UndeclaredHook { hook: String },

    /// The script threw during its initial top-level execution.
    #[error("script initialization failed: {0}")]
    ScriptInit(String),

    /// An invocation was requested of a hook the plugin does not provide.
    #[error("plugin does not provide hook '{hook}'")]
    NoHook { hook: String },

    /// A host-API call was made without the required manifest capability.
    #[error("capability '{capability}' not declared in manifest")]
    CapabilityDenied { capability: String },

    /// A filesystem path or HTTP host/port was rejected by the sandbox.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Downloaded archive's SHA-256 does not match the expected hash.
    #[error("integrity check failed: expected sha256 {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// URL is not within the configured allowlist.
    #[error("invalid source url: {0}")]
    InvalidSource(String),

    /// Archive entry resolves outside the extraction destination.
    #[error("zip entry escapes destination: {entry}")]
    ZipSlip { entry: String },

    /// Archive entry exceeds the per-entry extraction cap.
    #[error("zip entry '{entry}' exceeds extraction cap ({size} > {cap} bytes)")]
    ExtractTooLarge { entry: String, size: u64, cap: u64 },

    /// An HTTP redirect targeted a host outside the allowed domains.
    #[error("redirect to disallowed host blocked: {0}")]
    RedirectBlocked(String),

    /// A hook or host-side call exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// A call targeted a `(scope, id)` with no loaded runtime.
    #[error("plugin {scope}/{id} is not loaded")]
    PluginNotLoaded { scope: String, id: String },

    /// The script raised an exception during hook execution.
    #[error("script error: {0}")]
    ScriptRuntime(String),

    /// Repository index was malformed or carried an unsupported version.
    #[error("invalid repository index: {0}")]
    RepositoryInvalid(String),

    /// A requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PluginError {
    /// Stable machine-readable tag for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            PluginError::ManifestInvalid(_) => "ManifestInvalid",
            PluginError::UndeclaredHook { .. } => "UndeclaredHook",
            PluginError::ScriptInit(_) => "ScriptInit",
            PluginError::NoHook { .. } => "NoHook",
            PluginError::CapabilityDenied { .. } => "CapabilityDenied",
            PluginError::AccessDenied(_) => "AccessDenied",
            PluginError::IntegrityMismatch { .. } => "IntegrityMismatch",
            PluginError::InvalidSource(_) => "InvalidSource",
            PluginError::ZipSlip { .. } => "ZipSlip",
            PluginError::ExtractTooLarge { .. } => "ExtractTooLarge",
            PluginError::RedirectBlocked(_) => "RedirectBlocked",
            PluginError::Timeout(_) => "Timeout",
            PluginError::PluginNotLoaded { .. } => "PluginNotLoaded",
            PluginError::ScriptRuntime(_) => "ScriptRuntime",
            PluginError::RepositoryInvalid(_) => "RepositoryInvalid",
            PluginError::NotFound(_) => "NotFound",
            PluginError::Io(_) => "Io",
            PluginError::Json(_) => "Json",
            PluginError::Http(_) => "Http",
            PluginError::Db(_) => "Db",
            PluginError::Archive(_) => "Archive",
            PluginError::Internal(_) => "Internal",
        }
    }

    /// Message as shown to scripts: `"<Kind>: <detail>"`.
    pub fn script_message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}
