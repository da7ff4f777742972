//! Error types for the diagram workbench.
//!
//! Library crates use [`DiagramError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all workbench operations.
#[derive(Debug, thiserror::Error)]
pub enum DiagramError {
    /// A tool or description was requested before any image was uploaded.
    #[error("no image uploaded: upload an image before running analysis tools")]
    NoImage,

    /// The backend refused to issue a signed upload target, or its answer
    /// was missing `signedUrl` / `publicUrl`.
    #[error("signed upload URL error: {0}")]
    SignedUrl(String),

    /// The byte transfer to object storage did not succeed.
    #[error("storage upload error: {0}")]
    StorageUpload(String),

    /// A single tool invocation failed (backend 4xx/5xx or transport).
    #[error("{tool} analysis failed: {message}")]
    ToolInvocation { tool: String, message: String },

    /// The edit buffer does not hold a committable JSON document.
    #[error("invalid JSON: {message}")]
    InvalidJson { message: String },

    /// There is no captured data (and no uploaded image) to edit.
    #[error("nothing to edit: capture tool results first")]
    NothingToEdit,

    /// An edit session is already open.
    #[error("an edit session is already in progress")]
    EditInProgress,

    /// Commit or cancel was requested without an open edit session.
    #[error("no edit session is open")]
    NoEditSession,

    /// Capture was requested for a tool that has no successful result.
    #[error("nothing to capture for {tool}: the last run did not succeed")]
    NothingToCapture { tool: String },

    /// A tool id is not in the catalog.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of a tool invocation.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad document shape, bad URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DiagramError>;

impl DiagramError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an invalid-JSON error from any displayable message.
    pub fn invalid_json(msg: impl Into<String>) -> Self {
        Self::InvalidJson {
            message: msg.into(),
        }
    }

    /// Create a tool invocation error.
    pub fn tool_invocation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolInvocation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the user can recover by retrying or re-sequencing actions.
    ///
    /// Every failure in the workbench core leaves state valid, so only the
    /// ambient setup errors (config, I/O) are reported as non-recoverable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config { .. } | Self::Io { .. })
    }

    /// The message a front-end should show for this failure.
    ///
    /// Tool invocations show the backend message without the tool prefix,
    /// since the failing tool is already the one displaying it.
    pub fn user_message(&self) -> String {
        match self {
            Self::ToolInvocation { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
