//! Exclusive edit transaction over the consolidated document.
//!
//! A session copies its target into a text buffer, re-parses on every
//! change, and only reaches the store on a valid commit. Exclusivity (one
//! open session at a time) is enforced by the workbench that owns it.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use diagram_shared::{DiagramError, Document, Result, ToolKey, to_indented_json};

use crate::store::ConsolidationStore;

/// What an edit session will replace on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditTarget {
    /// The whole document, metadata included.
    Document,
    /// A single captured tool entry.
    Tool(ToolKey),
}

/// Text being edited plus the outcome of its last parse.
#[derive(Debug, Clone, PartialEq)]
pub struct EditBuffer {
    text: String,
    parsed: Option<Value>,
    parse_error: Option<String>,
}

impl EditBuffer {
    fn from_value(value: Value, indent: usize) -> Result<Self> {
        Ok(Self {
            text: to_indented_json(&value, indent)?,
            parsed: Some(value),
            parse_error: None,
        })
    }

    fn set_text(&mut self, text: String) {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                self.parsed = Some(value);
                self.parse_error = None;
            }
            Err(e) => {
                self.parsed = None;
                self.parse_error = Some(e.to_string());
            }
        }
        self.text = text;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parsed(&self) -> Option<&Value> {
        self.parsed.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.parsed.is_some()
    }

    /// Parser message for the current text, when invalid.
    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct EditSession {
    target: EditTarget,
    buffer: EditBuffer,
}

impl EditSession {
    /// Open on the whole document.
    ///
    /// Refused with [`DiagramError::NothingToEdit`] when the document has no
    /// captured data and no uploaded image.
    pub fn open(document: &Document, indent: usize) -> Result<Self> {
        if document.is_empty() {
            return Err(DiagramError::NothingToEdit);
        }
        let buffer = EditBuffer::from_value(document.to_value()?, indent)?;
        info!(entries = document.entry_count(), "edit session opened on document");
        Ok(Self {
            target: EditTarget::Document,
            buffer,
        })
    }

    /// Open on one captured tool entry.
    pub fn open_tool(document: &Document, key: &ToolKey, indent: usize) -> Result<Self> {
        let entry = document.entry(key).ok_or(DiagramError::NothingToEdit)?;
        let buffer = EditBuffer::from_value(entry.clone(), indent)?;
        info!(tool = %key, "edit session opened on tool entry");
        Ok(Self {
            target: EditTarget::Tool(key.clone()),
            buffer,
        })
    }

    pub fn target(&self) -> &EditTarget {
        &self.target
    }

    /// Whether committing this session replaces the entry under `key`.
    pub fn overwrites(&self, key: &ToolKey) -> bool {
        match &self.target {
            EditTarget::Document => true,
            EditTarget::Tool(target) => target == key,
        }
    }

    pub fn buffer(&self) -> &EditBuffer {
        &self.buffer
    }

    pub fn text(&self) -> &str {
        self.buffer.text()
    }

    pub fn is_valid(&self) -> bool {
        self.buffer.is_valid()
    }

    /// Replace the buffer text. Never fails; validity is tracked instead.
    pub fn on_text_change(&mut self, text: impl Into<String>) -> bool {
        self.buffer.set_text(text.into());
        debug!(valid = self.buffer.is_valid(), "edit buffer changed");
        self.buffer.is_valid()
    }

    /// Deliver the parsed buffer to `store`.
    ///
    /// The store is untouched on any error. On `Ok` the caller closes the
    /// session; on `Err` it stays open for correction.
    pub fn commit(&self, store: &mut ConsolidationStore, at: DateTime<Utc>) -> Result<()> {
        let parsed = self.buffer.parsed().ok_or_else(|| {
            DiagramError::invalid_json(
                self.buffer
                    .parse_error()
                    .unwrap_or("buffer does not contain valid JSON"),
            )
        })?;

        match &self.target {
            EditTarget::Document => store.commit_edit(parsed.clone(), at)?,
            EditTarget::Tool(key) => store.capture(key, parsed.clone(), at),
        }
        info!(edit_target = ?self.target, "edit committed");
        Ok(())
    }
}
