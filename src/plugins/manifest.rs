//! Plugin manifest parsing and validation.
//!
//! Each plugin ships a declarative `manifest.json` naming its identity, the
//! hooks it implements, and the host capabilities it needs. Parsing tolerates
//! unknown top-level keys; validation enforces required identity fields, the
//! supported manifest revision, and the metadata-field catalog for enrichers.

use crate::config::SUPPORTED_MANIFEST_VERSIONS;
use crate::error::{PluginError, PluginResult};
use crate::model::is_metadata_field;
use crate::plugins::HookType;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Validated plugin manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub manifest_version: i64,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_host_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_converter: Option<InputConverterCap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_parser: Option<FileParserCap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_generator: Option<OutputGeneratorCap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_enricher: Option<MetadataEnricherCap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier_types: Vec<IdentifierTypeDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_access: Option<HttpAccessCap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_access: Option<FileAccessCap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_access: Option<FfmpegAccessCap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_access: Option<ShellAccessCap>,

    /// Config schema: key -> field descriptor.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, ConfigField>,
}

/// `inputConverter` capability: convert foreign input files to a host type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputConverterCap {
    #[serde(default)]
    pub source_types: Vec<String>,
    #[serde(default)]
    pub mime_types: Vec<String>,
    #[serde(default)]
    pub target_type: String,
}

/// `fileParser` capability: extract metadata from files of the given types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileParserCap {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub mime_types: Vec<String>,
}

/// `outputGenerator` capability: produce a derived output format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputGeneratorCap {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_types: Vec<String>,
}

/// `metadataEnricher` capability: augment metadata from remote sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEnricherCap {
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// A plugin-contributed identifier type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifierTypeDecl {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// `httpAccess` capability: outbound HTTP to the listed domains.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpAccessCap {
    #[serde(default)]
    pub domains: Vec<String>,
}

/// Filesystem access level granted by `fileAccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAccessLevel {
    Read,
    Readwrite,
}

/// `fileAccess` capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAccessCap {
    pub level: FileAccessLevel,
}

/// `ffmpegAccess` capability. Carries no parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegAccessCap {}

/// `shellAccess` capability: the exact commands the plugin may execute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellAccessCap {
    #[serde(default)]
    pub commands: Vec<String>,
}

/// Value type of a config schema entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldType {
    String,
    Boolean,
    Number,
    Select,
    Textarea,
}

impl Default for ConfigFieldType {
    fn default() -> Self {
        ConfigFieldType::String
    }
}

/// One entry of the manifest's config schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigField {
    #[serde(rename = "type", default)]
    pub field_type: ConfigFieldType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ConfigField {
    /// Validate a value against this schema entry.
    pub fn validate(&self, key: &str, value: &str) -> PluginResult<()> {
        if self.required && value.is_empty() {
            return Err(PluginError::ManifestInvalid(format!(
                "config key '{key}' is required and cannot be empty"
            )));
        }
        if value.is_empty() {
            return Ok(());
        }
        match self.field_type {
            ConfigFieldType::String | ConfigFieldType::Textarea => Ok(()),
            ConfigFieldType::Boolean => match value {
                "true" | "false" => Ok(()),
                other => Err(PluginError::ManifestInvalid(format!(
                    "config key '{key}' expects a boolean, got '{other}'"
                ))),
            },
            ConfigFieldType::Number => {
                let n: f64 = value.parse().map_err(|_| {
                    PluginError::ManifestInvalid(format!(
                        "config key '{key}' expects a number, got '{value}'"
                    ))
                })?;
                if let Some(min) = self.min {
                    if n < min {
                        return Err(PluginError::ManifestInvalid(format!(
                            "config key '{key}' must be >= {min}"
                        )));
                    }
                }
                if let Some(max) = self.max {
                    if n > max {
                        return Err(PluginError::ManifestInvalid(format!(
                            "config key '{key}' must be <= {max}"
                        )));
                    }
                }
                Ok(())
            }
            ConfigFieldType::Select => {
                if self.options.iter().any(|o| o == value) {
                    Ok(())
                } else {
                    Err(PluginError::ManifestInvalid(format!(
                        "config key '{key}' must be one of {:?}",
                        self.options
                    )))
                }
            }
        }
    }
}

/// Outcome of parsing a manifest: the manifest plus non-fatal warnings.
#[derive(Debug, Clone)]
pub struct ParsedManifest {
    pub manifest: Manifest,
    pub warnings: Vec<String>,
}

impl Manifest {
    /// Parse and validate a `manifest.json` byte buffer.
    ///
    /// `host_version` is the running host's version, checked against the
    /// manifest's `minHostVersion` when one is declared.
    pub fn parse(bytes: &[u8], host_version: &str) -> PluginResult<ParsedManifest> {
        let manifest: Manifest = serde_json::from_slice(bytes)
            .map_err(|e| PluginError::ManifestInvalid(format!("malformed json: {e}")))?;
        let warnings = manifest.validate(host_version)?;
        Ok(ParsedManifest { manifest, warnings })
    }

    /// Validate an already-deserialized manifest, returning warnings.
    fn validate(&self, host_version: &str) -> PluginResult<Vec<String>> {
        if !SUPPORTED_MANIFEST_VERSIONS.contains(&self.manifest_version) {
            return Err(PluginError::ManifestInvalid(format!(
                "unsupported manifestVersion {} (supported: {:?})",
                self.manifest_version, SUPPORTED_MANIFEST_VERSIONS
            )));
        }
        for (field, value) in [("id", &self.id), ("name", &self.name), ("version", &self.version)] {
            if value.is_empty() {
                return Err(PluginError::ManifestInvalid(format!(
                    "missing required field '{field}'"
                )));
            }
        }

        if let Some(min) = &self.min_host_version {
            if let (Ok(min), Ok(host)) = (Version::parse(min), Version::parse(host_version)) {
                if host < min {
                    return Err(PluginError::ManifestInvalid(format!(
                        "plugin requires host >= {min}, running {host}"
                    )));
                }
            }
        }

        let mut warnings = Vec::new();
        if let Some(enricher) = &self.metadata_enricher {
            if enricher.fields.is_empty() {
                warnings.push(format!(
                    "plugin '{}' declares a metadataEnricher with no fields; enricher disabled",
                    self.id
                ));
            } else {
                for field in &enricher.fields {
                    if !is_metadata_field(field) {
                        return Err(PluginError::ManifestInvalid(format!(
                            "metadataEnricher declares unknown field '{field}'"
                        )));
                    }
                }
            }
        }
        Ok(warnings)
    }

    /// Whether the manifest declares the capability backing `hook`.
    pub fn declares_hook(&self, hook: HookType) -> bool {
        match hook {
            HookType::InputConverter => self.input_converter.is_some(),
            HookType::FileParser => self.file_parser.is_some(),
            HookType::MetadataEnricher => self.metadata_enricher.is_some(),
            HookType::OutputGenerator => self.output_generator.is_some(),
        }
    }

    /// Whether the declared enricher is usable (declares at least one field).
    pub fn enricher_enabled(&self) -> bool {
        self.metadata_enricher
            .as_ref()
            .map_or(false, |e| !e.fields.is_empty())
    }
}
