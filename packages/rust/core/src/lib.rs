//! Analysis orchestration and consolidation for diagram images.
//!
//! This crate ties the backend seams to the per-tool run lifecycle, the
//! consolidated document, and the edit protocol:
//! - [`catalog`]: declared tools and their context dependencies
//! - [`context`]: context payloads for context-aware tools
//! - [`runner`]: per-tool Idle/Running/Success/Error state machine
//! - [`store`]: the consolidated document and its mutations
//! - [`edit`]: the exclusive edit transaction
//! - [`upload`]: signed-URL upload pipeline
//! - [`workbench`]: one image session composing all of the above

pub mod catalog;
pub mod clock;
pub mod context;
pub mod edit;
pub mod runner;
pub mod store;
pub mod upload;
pub mod workbench;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{ContextField, ToolCatalog, ToolSpec};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::build_context;
pub use edit::{EditBuffer, EditSession, EditTarget};
pub use runner::{RunState, RunStatus, RunTicket, ToolRunner};
pub use store::ConsolidationStore;
pub use upload::{SourceFile, UploadPipeline, UploadedImage, content_type_for};
pub use workbench::Workbench;
