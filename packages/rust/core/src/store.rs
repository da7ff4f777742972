//! Owner of the consolidated document.
//!
//! Every mutation builds its result completely before swapping it in, so a
//! failed commit leaves the previous document in place.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use diagram_shared::{
    DiagramError, Document, DocumentMetadata, FileMeta, METADATA_KEY, Result, ToolKey, ToolResult,
};

/// Metadata fields the store always recomputes on commit.
const UPDATED_AT_FIELD: &str = "updatedAt";

#[derive(Debug, Clone)]
pub struct ConsolidationStore {
    document: Document,
}

impl ConsolidationStore {
    /// A store holding an empty document with no source file.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            document: Document::new(None, at),
        }
    }

    /// A store resuming from a previously exported document.
    pub fn from_document(document: Document) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Start over for a newly selected file; all tool entries are dropped.
    pub fn reset(&mut self, file: &FileMeta, at: DateTime<Utc>) {
        info!(file = %file.name, "resetting consolidated document");
        self.document = Document::new(Some(file.name.clone()), at);
    }

    /// Record where the source image now lives.
    pub fn stamp_upload(&mut self, source_url: &str, at: DateTime<Utc>) {
        self.document.metadata.source_image_url = Some(source_url.to_string());
        self.document.metadata.uploaded_at = Some(at);
    }

    /// Write `result` under `key`, leaving other entries alone.
    pub fn capture(&mut self, key: &ToolKey, result: ToolResult, at: DateTime<Utc>) {
        let replaced = self.document.entry(key).is_some();
        self.document.set_entry(key, result);
        self.document.metadata.updated_at = Some(at);
        info!(tool = %key, replaced, "captured tool result");
    }

    /// Replace the document with an edited one.
    ///
    /// Tool entries are taken verbatim from `edited`. Its `metadata` object,
    /// if any, is laid over the current metadata field by field, so dropping
    /// the sub-record in the editor does not lose it. `updatedAt` is always
    /// set to `at`.
    pub fn commit_edit(&mut self, edited: Value, at: DateTime<Utc>) -> Result<()> {
        let Value::Object(mut entries) = edited else {
            return Err(DiagramError::validation(
                "edited document must be a JSON object",
            ));
        };

        let overrides = match entries.remove(METADATA_KEY) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                return Err(DiagramError::validation(format!(
                    "metadata must be an object, got {}",
                    json_kind(&other)
                )));
            }
        };

        let metadata = merge_metadata(&self.document.metadata, overrides, at)?;
        let document = Document::from_parts(metadata, entries)?;

        debug!(entries = document.entry_count(), "committing edited document");
        self.document = document;
        Ok(())
    }
}

fn merge_metadata(
    current: &DocumentMetadata,
    overrides: Map<String, Value>,
    at: DateTime<Utc>,
) -> Result<DocumentMetadata> {
    let Value::Object(mut merged) = serde_json::to_value(current)
        .map_err(|e| DiagramError::validation(format!("failed to serialize metadata: {e}")))?
    else {
        return Err(DiagramError::validation("metadata did not serialize to an object"));
    };

    merged.extend(overrides);
    merged.remove(UPDATED_AT_FIELD);

    let mut metadata: DocumentMetadata = serde_json::from_value(Value::Object(merged))
        .map_err(|e| DiagramError::validation(format!("invalid metadata: {e}")))?;
    metadata.updated_at = Some(at);
    Ok(metadata)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
