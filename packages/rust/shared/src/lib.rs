//! Shared types, error model, and configuration for the diagram workbench.
//!
//! This crate is the foundation depended on by all other workspace crates.
//! It provides:
//! - [`DiagramError`]: the unified error type
//! - Domain types ([`Document`], [`DocumentMetadata`], [`ToolKey`], [`SessionId`])
//! - Configuration ([`AppConfig`], [`BackendConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackendConfig, ContextFieldConfig, EditorConfig, ToolEntryConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_backend_url,
};
pub use error::{DiagramError, Result};
pub use types::{
    DOCUMENT_VERSION, Document, DocumentMetadata, FileMeta, METADATA_KEY, SessionId, ToolKey,
    ToolResult, to_indented_json,
};
