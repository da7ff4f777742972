//! Core domain types for the consolidated diagram document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{DiagramError, Result};

/// Current schema version stamped into every new document.
pub const DOCUMENT_VERSION: u32 = 1;

/// Name of the only mandatory key of a document.
pub const METADATA_KEY: &str = "metadata";

/// An opaque JSON value returned by a tool invocation.
pub type ToolResult = Value;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// A UUID v7 identifying one image session (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ToolKey
// ---------------------------------------------------------------------------

/// Normalized document key for a tool: hyphens become underscores, so
/// `edges-fewshot` and `edges_fewshot` address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolKey(String);

impl ToolKey {
    /// Normalize a tool id into its document key.
    pub fn from_tool_id(tool_id: &str) -> Self {
        Self(tool_id.replace('-', "_"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ToolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ToolKey {
    fn from(tool_id: &str) -> Self {
        Self::from_tool_id(tool_id)
    }
}

// ---------------------------------------------------------------------------
// FileMeta
// ---------------------------------------------------------------------------

/// What is known about a newly selected source file before upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// File name as chosen by the user (no directory part).
    pub name: String,
    /// Declared MIME type, sent with both the signed-URL request and the PUT.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
}

// ---------------------------------------------------------------------------
// DocumentMetadata
// ---------------------------------------------------------------------------

/// The `metadata` sub-record of a consolidated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Fields added by hand in the editor; kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMetadata {
    /// Fresh metadata for a new image session.
    pub fn new(original_file_name: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            created_at,
            updated_at: None,
            original_file_name,
            source_image_url: None,
            uploaded_at: None,
            extra: Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// The consolidated record: `metadata` plus one entry per captured tool,
/// in capture order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub metadata: DocumentMetadata,
    #[serde(flatten)]
    entries: Map<String, Value>,
}

impl Document {
    /// A document holding only fresh metadata.
    pub fn new(original_file_name: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            metadata: DocumentMetadata::new(original_file_name, created_at),
            entries: Map::new(),
        }
    }

    /// Assemble a document from metadata and raw entries.
    ///
    /// A `metadata` key inside `entries` is rejected; metadata lives only in
    /// its typed field.
    pub fn from_parts(metadata: DocumentMetadata, entries: Map<String, Value>) -> Result<Self> {
        if entries.contains_key(METADATA_KEY) {
            return Err(DiagramError::validation(
                "document entries must not contain a metadata key",
            ));
        }
        Ok(Self { metadata, entries })
    }

    /// Captured result for a tool, if any.
    pub fn entry(&self, key: &ToolKey) -> Option<&ToolResult> {
        self.entries.get(key.as_str())
    }

    /// All tool entries, in insertion order.
    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    /// Write or overwrite a tool entry. Position of an existing key is kept.
    pub fn set_entry(&mut self, key: &ToolKey, result: ToolResult) {
        self.entries.insert(key.as_str().to_string(), result);
    }

    /// Number of tool entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// True when there is neither captured tool data nor an uploaded image.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.metadata.source_image_url.is_none()
    }

    /// Serialize into a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| DiagramError::validation(format!("failed to serialize document: {e}")))
    }

    /// Format as indented JSON text.
    pub fn to_pretty_string(&self, indent: usize) -> Result<String> {
        to_indented_json(&self.to_value()?, indent)
    }
}

/// Serialize any JSON value with the given indentation width.
pub fn to_indented_json(value: &Value, indent: usize) -> Result<String> {
    let indent = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| DiagramError::validation(format!("failed to format JSON: {e}")))?;
    String::from_utf8(buf)
        .map_err(|e| DiagramError::validation(format!("formatted JSON is not UTF-8: {e}")))
}
