//! Domain shapes crossing the plugin boundary.
//!
//! These are the narrow, marshalled views of the host's domain model that
//! plugins see (spec'd by the hook context shapes), plus the metadata a parser
//! or enricher hook may return. The host application owns the full domain
//! model; only these projections ever reach script-land.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical metadata fields a `metadataEnricher` may declare.
///
/// A manifest naming a field outside this set fails validation.
pub const METADATA_FIELDS: &[&str] = &[
    "title",
    "subtitle",
    "authors",
    "narrators",
    "series",
    "seriesNumber",
    "description",
    "publisher",
    "imprint",
    "url",
    "releaseDate",
    "cover",
    "coverPage",
    "pageCount",
    "duration",
    "bitrate",
    "identifiers",
    "chapters",
    "genres",
    "tags",
];

/// Whether `field` is a member of the canonical metadata field catalog.
pub fn is_metadata_field(field: &str) -> bool {
    METADATA_FIELDS.contains(&field)
}

/// Author entry as marshalled to plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Series membership as marshalled to plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f64>,
}

/// External identifier, e.g. a third-party catalog id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub id_type: String,
    pub value: String,
}

/// Book view marshalled into hook contexts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub series: Vec<SeriesRef>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// File view marshalled into hook contexts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookFile {
    pub id: i64,
    pub filepath: String,
    pub file_type: String,
    pub file_role: String,
    pub filesize_bytes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imprint: Option<String>,
    /// `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub narrators: Vec<String>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
}

/// Chapter entry, possibly nested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_page: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Chapter>,
}

/// Metadata returned by `fileParser.parse` and `metadataEnricher.enrich`.
///
/// All fields are optional; absence means "no claim". `duration` travels as
/// seconds on the wire and is exposed in nanoseconds via
/// [`ParsedMetadata::duration_nanos`]. `coverData` crosses the boundary as the
/// engine's binary buffer and is attached by the invoker, not by serde.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_number: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub narrators: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<Identifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chapters: Vec<Chapter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_page: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<i64>,
    /// Seconds on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// RFC 3339 string on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    /// Binary cover image, attached by the invoker from the engine's buffer.
    #[serde(skip)]
    pub cover_data: Option<Vec<u8>>,
}

impl ParsedMetadata {
    /// Duration in nanoseconds, converted from the wire's seconds.
    pub fn duration_nanos(&self) -> Option<i64> {
        self.duration.map(|secs| (secs * 1_000_000_000.0) as i64)
    }

    /// `releaseDate` parsed as RFC 3339, if present and well-formed.
    pub fn release_date_utc(&self) -> Option<DateTime<Utc>> {
        self.release_date
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Post-hook normalisation: strip HTML from the description and default
    /// the data source to `scope/id` when the plugin did not set one.
    pub fn normalize(&mut self, default_data_source: &str) {
        if let Some(desc) = &self.description {
            self.description = Some(strip_html(desc));
        }
        if self.data_source.as_deref().map_or(true, str::is_empty) {
            self.data_source = Some(default_data_source.to_string());
        }
    }
}

/// Result of a `metadataEnricher.enrich` call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichResult {
    #[serde(default)]
    pub modified: bool,
    #[serde(default)]
    pub metadata: Option<ParsedMetadata>,
}

/// Result of an `inputConverter.convert` call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub target_path: String,
}

/// Remove HTML tags from `input`, keeping text content.
///
/// Unterminated tags are dropped to their end of input.
pub fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_catalog_membership() {
        assert!(is_metadata_field("seriesNumber"));
        assert!(is_metadata_field("chapters"));
        assert!(!is_metadata_field("seriesnumber"));
        assert!(!is_metadata_field("rating"));
    }

    #[test]
    fn strip_html_removes_tags() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_html("no tags"), "no tags");
        assert_eq!(strip_html("broken <tag"), "broken ");
        assert_eq!(strip_html("a < b"), "a ");
    }

    #[test]
    fn duration_converts_to_nanos() {
        let meta = ParsedMetadata {
            duration: Some(1.5),
            ..ParsedMetadata::default()
        };
        assert_eq!(meta.duration_nanos(), Some(1_500_000_000));
    }

    #[test]
    fn normalize_defaults_data_source() {
        let mut meta = ParsedMetadata {
            description: Some("<i>desc</i>".to_string()),
            ..ParsedMetadata::default()
        };
        meta.normalize("community/goodreads");
        assert_eq!(meta.description.as_deref(), Some("desc"));
        assert_eq!(meta.data_source.as_deref(), Some("community/goodreads"));

        let mut meta = ParsedMetadata {
            data_source: Some("already-set".to_string()),
            ..ParsedMetadata::default()
        };
        meta.normalize("community/goodreads");
        assert_eq!(meta.data_source.as_deref(), Some("already-set"));
    }

    #[test]
    fn parsed_metadata_deserializes_camel_case() {
        let json = r#"{
            "title": "T",
            "seriesNumber": 1.5,
            "authors": [{"name": "A", "role": "author"}],
            "identifiers": [{"type": "isbn", "value": "978"}],
            "duration": 2.0,
            "releaseDate": "2021-03-01T00:00:00Z"
        }"#;
        let meta: ParsedMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.series_number, Some(1.5));
        assert_eq!(meta.authors[0].role.as_deref(), Some("author"));
        assert_eq!(meta.identifiers[0].id_type, "isbn");
        assert!(meta.release_date_utc().is_some());
    }
}
