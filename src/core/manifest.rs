//! Inventory manifest discovery, schema validation and loading
//!
//! The build emits `<binary>.tests.yaml` next to each test binary, listing
//! every method the binary declares together with its markers. This module
//! finds the binary under the sources root, validates the manifest against
//! the embedded schema and turns it into [`TestMethod`]s.

use jsonschema::{validator_for, ValidationError as JsonSchemaError, Validator as JsonValidator};
use miette::{Diagnostic, NamedSource, SourceSpan};
use rust_embed::Embed;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::core::inventory::{TestInventory, TestMethod};

#[derive(Embed)]
#[folder = "schemas/"]
struct EmbeddedSchemas;

const INVENTORY_SCHEMA: &str = "inventory.schema.json";

/// Suffix appended to the binary file name to find its manifest
pub const MANIFEST_SUFFIX: &str = ".tests.yaml";

/// Errors raised while locating or reading the test inventory
#[derive(Debug, Error, Diagnostic)]
pub enum InventoryError {
    #[error("Test binary '{name}' not found under {}", .root.display())]
    #[diagnostic(
        code(tcassoc::inventory::binary_not_found),
        help("Point Build_SourcesDirectory (or --sources-dir) at the build output root")
    )]
    BinaryNotFound { name: String, root: PathBuf },

    #[error("Test inventory manifest not found: {}", .path.display())]
    #[diagnostic(
        code(tcassoc::inventory::manifest_not_found),
        help("The build must emit <binary>.tests.yaml next to the test binary, or pass --inventory")
    )]
    ManifestNotFound { path: PathBuf },

    #[error("Failed to read {}: {message}", .path.display())]
    #[diagnostic(code(tcassoc::inventory::io))]
    Io { path: PathBuf, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] ManifestSchemaError),

    #[error("Embedded inventory schema is unusable: {0}")]
    #[diagnostic(code(tcassoc::inventory::schema_unavailable))]
    SchemaUnavailable(String),
}

/// Manifest failed schema validation
#[derive(Debug, Error, Diagnostic)]
#[error("Invalid test inventory manifest: {summary}")]
#[diagnostic(code(tcassoc::inventory::invalid_manifest))]
pub struct ManifestSchemaError {
    summary: String,

    #[source_code]
    src: NamedSource<String>,

    #[related]
    violations: Vec<SchemaViolation>,
}

impl ManifestSchemaError {
    fn new(filename: &str, source: &str, violations: Vec<SchemaViolation>) -> Self {
        let count = violations.len();
        let summary = if count == 1 {
            "1 error".to_string()
        } else {
            format!("{} errors", count)
        };
        Self {
            summary,
            src: NamedSource::new(filename, source.to_string()),
            violations,
        }
    }

    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }
}

/// A single schema violation
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
pub struct SchemaViolation {
    #[label("{}", self.hint)]
    span: SourceSpan,

    message: String,
    hint: String,
}

/// Parsed manifest document
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    binary: Option<String>,

    #[serde(default)]
    methods: Vec<TestMethod>,
}

/// Find `binary_name` anywhere below `root`
///
/// Directory entries are visited in file-name order so the first match is
/// stable between runs.
pub fn locate_binary(root: &Path, binary_name: &str) -> Result<PathBuf, InventoryError> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == binary_name)
        .map(|e| e.into_path())
        .ok_or_else(|| InventoryError::BinaryNotFound {
            name: binary_name.to_string(),
            root: root.to_path_buf(),
        })
}

/// `<dir>/<binary>.tests.yaml` for a binary at `<dir>/<binary>`
pub fn manifest_path_for(binary: &Path) -> PathBuf {
    let mut name = binary
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(MANIFEST_SUFFIX);
    binary.with_file_name(name)
}

/// Test inventory backed by a manifest file
#[derive(Debug, Clone)]
pub struct ManifestInventory {
    path: PathBuf,
}

impl ManifestInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Inventory for the manifest next to `binary_name` found under `root`
    pub fn discover(root: &Path, binary_name: &str) -> Result<Self, InventoryError> {
        let binary = locate_binary(root, binary_name)?;
        tracing::debug!(binary = %binary.display(), "located test binary");
        Ok(Self::new(manifest_path_for(&binary)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TestInventory for ManifestInventory {
    fn test_methods(&self) -> Result<Vec<TestMethod>, InventoryError> {
        if !self.path.exists() {
            return Err(InventoryError::ManifestNotFound {
                path: self.path.clone(),
            });
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| InventoryError::Io {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let filename = self
            .path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        parse_manifest(&content, &filename).inspect_err(|e| {
            if let InventoryError::Schema(schema) = e {
                tracing::warn!(
                    manifest = %self.path.display(),
                    violations = schema.violation_count(),
                    "test inventory manifest failed validation"
                );
            }
        })
    }
}

/// Validate manifest text against the schema and parse it
pub fn parse_manifest(content: &str, filename: &str) -> Result<Vec<TestMethod>, InventoryError> {
    let schema = compile_schema()?;

    let yaml_value: serde_yml::Value = serde_yml::from_str(content).map_err(|e| {
        let span = find_error_span(content, e.location());
        let violation = SchemaViolation {
            span,
            message: format!("YAML parse error: {}", e),
            hint: "invalid YAML".to_string(),
        };
        ManifestSchemaError::new(filename, content, vec![violation])
    })?;

    let json_value: JsonValue = serde_json::to_value(&yaml_value).map_err(|e| {
        let violation = SchemaViolation {
            span: (0, content.len()).into(),
            message: format!("Failed to convert YAML to JSON: {}", e),
            hint: "conversion error".to_string(),
        };
        ManifestSchemaError::new(filename, content, vec![violation])
    })?;

    let violations: Vec<SchemaViolation> = schema
        .iter_errors(&json_value)
        .map(|e| error_to_violation(content, &e))
        .collect();
    if !violations.is_empty() {
        return Err(ManifestSchemaError::new(filename, content, violations).into());
    }

    let manifest: Manifest = serde_json::from_value(json_value).map_err(|e| {
        let violation = SchemaViolation {
            span: (0, content.len().min(1)).into(),
            message: format!("Unexpected manifest shape: {}", e),
            hint: "unreadable".to_string(),
        };
        ManifestSchemaError::new(filename, content, vec![violation])
    })?;

    if let Some(binary) = &manifest.binary {
        tracing::debug!(%binary, methods = manifest.methods.len(), "loaded test inventory");
    }
    Ok(manifest.methods)
}

fn compile_schema() -> Result<JsonValidator, InventoryError> {
    let file = EmbeddedSchemas::get(INVENTORY_SCHEMA)
        .ok_or_else(|| InventoryError::SchemaUnavailable(format!("{} missing", INVENTORY_SCHEMA)))?;
    let schema_json: JsonValue = serde_json::from_slice(&file.data)
        .map_err(|e| InventoryError::SchemaUnavailable(e.to_string()))?;
    validator_for(&schema_json).map_err(|e| InventoryError::SchemaUnavailable(e.to_string()))
}

fn error_to_violation(content: &str, error: &JsonSchemaError) -> SchemaViolation {
    let path = error.instance_path.to_string();
    let location = if path.is_empty() {
        "document root".to_string()
    } else {
        format!("'{}'", path)
    };

    let (message, hint) = match &error.kind {
        jsonschema::error::ValidationErrorKind::Required { property } => {
            let prop_str = property
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| property.to_string());
            (
                format!("Missing required field: {} at {}", prop_str, location),
                "required field missing",
            )
        }
        jsonschema::error::ValidationErrorKind::Type { kind } => (
            format!("Wrong type at {}: expected {:?}", location, kind),
            "wrong type",
        ),
        jsonschema::error::ValidationErrorKind::MinLength { limit } => (
            format!("Value at {} is too short: minimum {} characters", location, limit),
            "too short",
        ),
        jsonschema::error::ValidationErrorKind::AdditionalProperties { unexpected } => (
            format!("Unknown field(s) at {}: {}", location, unexpected.join(", ")),
            "unknown field",
        ),
        _ => (
            format!("Validation error at {}: {}", location, error),
            "validation error",
        ),
    };

    SchemaViolation {
        span: find_path_span(content, &path),
        message,
        hint: hint.to_string(),
    }
}

const LINE_END: &[char] = &['\r', '\n'];

fn first_line_span(content: &str) -> SourceSpan {
    let len = content.find('\n').unwrap_or(content.len()).max(1);
    (0, len).into()
}

fn find_error_span(content: &str, location: Option<serde_yml::Location>) -> SourceSpan {
    let Some(loc) = location else {
        return first_line_span(content);
    };
    let line = loc.line().saturating_sub(1);
    let column = loc.column().saturating_sub(1);

    // The reported column counts characters, not bytes
    let mut offset = content.len();
    let mut line_start = 0;
    for (i, raw) in content.split_inclusive('\n').enumerate() {
        if i == line {
            let text = raw.trim_end_matches(LINE_END);
            let within = text
                .char_indices()
                .nth(column)
                .map_or(text.len(), |(byte, _)| byte);
            offset = line_start + within;
            break;
        }
        line_start += raw.len();
    }

    let rest = &content[offset..];
    let len = match rest.find('\n') {
        Some(end) => end.max(1),
        None => rest.len(),
    };
    (offset, len).into()
}

/// Span for a JSON pointer such as `/methods/3/markers/0/kind`
///
/// Array indices are followed so the span lands on the right list item,
/// which matters because every method repeats the same keys.
fn find_path_span(content: &str, json_path: &str) -> SourceSpan {
    let parts: Vec<&str> = json_path.split('/').filter(|s| !s.is_empty()).collect();
    if parts.is_empty() {
        return first_line_span(content);
    }

    let mut cursor = 0;
    let mut found: Option<SourceSpan> = None;
    let mut i = 0;
    while i < parts.len() {
        let key = parts[i];
        match find_key_from(content, key, cursor) {
            Some((start, len)) => {
                cursor = start + len;
                found = Some((start, len).into());
            }
            None => break,
        }
        // Skip to the n-th list item under this key
        if let Some(index) = parts.get(i + 1).and_then(|p| p.parse::<usize>().ok()) {
            match nth_list_item(content, cursor, index) {
                Some((start, len)) => {
                    cursor = start;
                    found = Some((start, len).into());
                }
                None => break,
            }
            i += 1;
        }
        i += 1;
    }

    found.unwrap_or_else(|| first_line_span(content))
}

/// Offset and length of the first `key:` line at or after `from`
fn find_key_from(content: &str, key: &str, from: usize) -> Option<(usize, usize)> {
    let pattern = format!("{}:", key);
    let mut offset = 0;
    for raw in content.split_inclusive('\n') {
        let line = raw.trim_end_matches(LINE_END);
        let line_start = offset;
        offset += raw.len();
        if line_start + line.len() <= from {
            continue;
        }
        let trimmed = line.trim_start().trim_start_matches("- ");
        if trimmed.starts_with(&pattern) {
            let start = line_start + (line.len() - trimmed.len());
            return Some((start, trimmed.len()));
        }
    }
    None
}

/// Offset and length of the `index`-th `- ` item at or after `from`
fn nth_list_item(content: &str, from: usize, index: usize) -> Option<(usize, usize)> {
    let mut offset = 0;
    let mut seen = 0;
    let mut indent: Option<usize> = None;
    for raw in content.split_inclusive('\n') {
        let line = raw.trim_end_matches(LINE_END);
        let line_start = offset;
        offset += raw.len();
        if line_start + line.len() <= from {
            continue;
        }
        let trimmed = line.trim_start();
        let depth = line.len() - trimmed.len();
        if !trimmed.starts_with("- ") && trimmed != "-" {
            continue;
        }
        match indent {
            None => indent = Some(depth),
            Some(d) if d != depth => continue,
            _ => {}
        }
        if seen == index {
            return Some((line_start + depth, trimmed.len()));
        }
        seen += 1;
    }
    None
}
