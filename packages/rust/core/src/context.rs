//! Context assembly for context-aware tools.

use serde_json::{Map, Value};
use tracing::debug;

use diagram_shared::Document;

use crate::catalog::ToolSpec;

/// Collect the upstream captures `tool` declares into a `context_data` object.
///
/// Returns `None` when the tool takes no context or when none of its
/// upstream keys are present in `document`; an empty object is never sent.
pub fn build_context(document: &Document, tool: &ToolSpec) -> Option<Map<String, Value>> {
    if !tool.uses_context() {
        return None;
    }

    let context: Map<String, Value> = tool
        .context
        .iter()
        .filter_map(|dep| {
            document
                .entry(&dep.source)
                .map(|value| (dep.field.clone(), value.clone()))
        })
        .collect();

    debug!(
        tool = %tool.id,
        fields = context.len(),
        declared = tool.context.len(),
        "assembled tool context"
    );

    (!context.is_empty()).then_some(context)
}
