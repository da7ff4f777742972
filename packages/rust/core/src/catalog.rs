//! Fixed catalog of analysis tools.
//!
//! Each entry declares its display title and, for context-aware tools, the
//! explicit mapping from upstream tool captures to `context_data` fields.

use tracing::debug;

use diagram_shared::{DiagramError, Result, ToolEntryConfig, ToolKey};

/// One upstream capture a tool consumes, and the field it is sent under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextField {
    /// Document key of the upstream tool.
    pub source: ToolKey,
    /// Field name inside `context_data`.
    pub field: String,
}

impl ContextField {
    pub fn new(source_tool_id: &str, field: &str) -> Self {
        Self {
            source: ToolKey::from_tool_id(source_tool_id),
            field: field.to_string(),
        }
    }
}

/// A declared tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    /// Stable id used in `/analyze/{id}`.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Upstream dependencies; empty for tools that take only the image.
    pub context: Vec<ContextField>,
}

impl ToolSpec {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            context: Vec::new(),
        }
    }

    /// Add an upstream dependency.
    pub fn with_context(mut self, source_tool_id: &str, field: &str) -> Self {
        self.context.push(ContextField::new(source_tool_id, field));
        self
    }

    /// Document key this tool captures under.
    pub fn key(&self) -> ToolKey {
        ToolKey::from_tool_id(&self.id)
    }

    /// Whether requests for this tool carry `context_data`.
    pub fn uses_context(&self) -> bool {
        !self.context.is_empty()
    }
}

impl From<&ToolEntryConfig> for ToolSpec {
    fn from(entry: &ToolEntryConfig) -> Self {
        let mut spec = ToolSpec::new(&entry.id, &entry.title);
        for field in &entry.context {
            spec = spec.with_context(&field.source, &field.field);
        }
        spec
    }
}

/// The ordered set of tools a workbench offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCatalog {
    tools: Vec<ToolSpec>,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ToolCatalog {
    /// The tools the analysis backend ships with.
    pub fn builtin() -> Self {
        Self {
            tools: vec![
                ToolSpec::new("ocr", "OCR Results"),
                ToolSpec::new("nodes", "Node Detection (LLM)"),
                ToolSpec::new("edges", "Edge Detection (LLM)"),
                ToolSpec::new("edges-fewshot", "Edge Detection (Few-Shot LLM)")
                    .with_context("ocr", "ocr_results")
                    .with_context("nodes", "node_results"),
            ],
        }
    }

    /// Build a catalog from explicit specs. Duplicate keys are rejected.
    pub fn from_specs(tools: Vec<ToolSpec>) -> Result<Self> {
        let mut catalog = Self { tools: Vec::new() };
        for spec in tools {
            if catalog.position(&spec.key()).is_some() {
                return Err(DiagramError::config(format!("duplicate tool id '{}'", spec.id)));
            }
            catalog.tools.push(spec);
        }
        catalog.validate()?;
        Ok(catalog)
    }

    /// Apply `[[tools]]` entries: same key replaces, new key appends.
    pub fn with_overrides(mut self, entries: &[ToolEntryConfig]) -> Result<Self> {
        for entry in entries {
            if entry.id.trim().is_empty() {
                return Err(DiagramError::config("tool entry with empty id"));
            }
            let spec = ToolSpec::from(entry);
            match self.position(&spec.key()) {
                Some(idx) => {
                    debug!(tool = %spec.id, "overriding built-in tool");
                    self.tools[idx] = spec;
                }
                None => {
                    debug!(tool = %spec.id, "adding configured tool");
                    self.tools.push(spec);
                }
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Every context source must be another catalog tool, each field name is
    /// used once per tool, and dependencies must not form a cycle.
    fn validate(&self) -> Result<()> {
        for spec in &self.tools {
            let key = spec.key();
            let mut fields: Vec<&str> = Vec::new();
            for dep in &spec.context {
                if dep.source == key {
                    return Err(DiagramError::config(format!(
                        "tool '{}' takes context from itself",
                        spec.id
                    )));
                }
                if self.position(&dep.source).is_none() {
                    return Err(DiagramError::config(format!(
                        "tool '{}' takes context from unknown tool '{}'",
                        spec.id, dep.source
                    )));
                }
                if fields.contains(&dep.field.as_str()) {
                    return Err(DiagramError::config(format!(
                        "tool '{}' declares context field '{}' more than once",
                        spec.id, dep.field
                    )));
                }
                fields.push(&dep.field);
            }
        }
        layered(self.tools.iter().collect()).map(|_| ())
    }

    /// Group `tool_ids` into stages: each tool comes after every requested
    /// tool it takes context from, and tools within a stage are independent.
    /// An empty request means the whole catalog; repeated ids appear once.
    pub fn run_stages(&self, tool_ids: &[&str]) -> Result<Vec<Vec<&ToolSpec>>> {
        let mut requested: Vec<&ToolSpec> = Vec::new();
        if tool_ids.is_empty() {
            requested.extend(self.tools.iter());
        } else {
            for id in tool_ids {
                let spec = self.get(id.trim())?;
                if !requested.iter().any(|s| s.id == spec.id) {
                    requested.push(spec);
                }
            }
        }
        layered(requested)
    }

    /// Look up a tool by id (hyphen/underscore spelling both resolve).
    pub fn get(&self, tool_id: &str) -> Result<&ToolSpec> {
        self.position(&ToolKey::from_tool_id(tool_id))
            .map(|idx| &self.tools[idx])
            .ok_or_else(|| DiagramError::UnknownTool(tool_id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub(crate) fn position(&self, key: &ToolKey) -> Option<usize> {
        self.tools.iter().position(|t| &t.key() == key)
    }
}

/// Topological layering of `pending`, keeping its order within a layer.
/// Dependencies on tools outside `pending` are already satisfied.
fn layered(mut pending: Vec<&ToolSpec>) -> Result<Vec<Vec<&ToolSpec>>> {
    let requested: Vec<ToolKey> = pending.iter().map(|s| s.key()).collect();
    let mut placed: Vec<ToolKey> = Vec::new();
    let mut stages = Vec::new();

    while !pending.is_empty() {
        let (ready, blocked): (Vec<&ToolSpec>, Vec<&ToolSpec>) =
            pending.into_iter().partition(|spec| {
                spec.context
                    .iter()
                    .all(|dep| !requested.contains(&dep.source) || placed.contains(&dep.source))
            });
        if ready.is_empty() {
            let ids: Vec<&str> = blocked.iter().map(|s| s.id.as_str()).collect();
            return Err(DiagramError::config(format!(
                "tool context dependencies form a cycle: {}",
                ids.join(", ")
            )));
        }
        placed.extend(ready.iter().map(|s| s.key()));
        stages.push(ready);
        pending = blocked;
    }
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagram_shared::ContextFieldConfig;

    #[test]
    fn builtin_catalog_order_and_flags() {
        let catalog = ToolCatalog::builtin();
        let ids: Vec<&str> = catalog.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["ocr", "nodes", "edges", "edges-fewshot"]);

        assert!(!catalog.get("ocr").unwrap().uses_context());
        let fewshot = catalog.get("edges-fewshot").unwrap();
        assert!(fewshot.uses_context());
        assert_eq!(fewshot.key().as_str(), "edges_fewshot");
        assert_eq!(fewshot.context[1], ContextField::new("nodes", "node_results"));
    }

    #[test]
    fn lookup_accepts_either_spelling() {
        let catalog = ToolCatalog::builtin();
        assert_eq!(catalog.get("edges_fewshot").unwrap().id, "edges-fewshot");
        assert!(matches!(
            catalog.get("ports"),
            Err(DiagramError::UnknownTool(id)) if id == "ports"
        ));
    }

    #[test]
    fn overrides_replace_and_append() {
        let entries = vec![
            ToolEntryConfig {
                id: "edges".into(),
                title: "Edges (with OCR)".into(),
                context: vec![ContextFieldConfig {
                    source: "ocr".into(),
                    field: "ocr_results".into(),
                }],
            },
            ToolEntryConfig {
                id: "ports".into(),
                title: "Port Detection".into(),
                context: vec![],
            },
        ];
        let catalog = ToolCatalog::builtin().with_overrides(&entries).unwrap();
        assert_eq!(catalog.len(), 5);
        let edges = catalog.get("edges").unwrap();
        assert_eq!(edges.title, "Edges (with OCR)");
        assert!(edges.uses_context());
        assert_eq!(catalog.iter().last().unwrap().id, "ports");
    }

    #[test]
    fn duplicate_specs_rejected() {
        let err = ToolCatalog::from_specs(vec![
            ToolSpec::new("edges-fewshot", "A"),
            ToolSpec::new("edges_fewshot", "B"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    fn entry(id: &str, context: &[(&str, &str)]) -> ToolEntryConfig {
        ToolEntryConfig {
            id: id.into(),
            title: id.into(),
            context: context
                .iter()
                .map(|(source, field)| ContextFieldConfig {
                    source: (*source).into(),
                    field: (*field).into(),
                })
                .collect(),
        }
    }

    fn stage_ids(stages: Vec<Vec<&ToolSpec>>) -> Vec<Vec<&str>> {
        stages
            .into_iter()
            .map(|stage| stage.into_iter().map(|s| s.id.as_str()).collect())
            .collect()
    }

    #[test]
    fn stages_follow_chained_dependencies() {
        let catalog = ToolCatalog::builtin()
            .with_overrides(&[entry("summary", &[("edges-fewshot", "edge_results")])])
            .unwrap();

        let stages = stage_ids(catalog.run_stages(&[]).unwrap());
        assert_eq!(
            stages,
            vec![
                vec!["ocr", "nodes", "edges"],
                vec!["edges-fewshot"],
                vec!["summary"],
            ]
        );
    }

    #[test]
    fn stages_ignore_dependencies_outside_the_request() {
        let catalog = ToolCatalog::builtin()
            .with_overrides(&[entry("summary", &[("edges-fewshot", "edge_results")])])
            .unwrap();

        let stages = stage_ids(catalog.run_stages(&["summary", "nodes", "edges-fewshot"]).unwrap());
        assert_eq!(
            stages,
            vec![vec!["nodes"], vec!["edges-fewshot"], vec!["summary"]]
        );

        let stages = stage_ids(catalog.run_stages(&["summary", "ocr", "ocr"]).unwrap());
        assert_eq!(stages, vec![vec!["summary", "ocr"]]);
    }

    #[test]
    fn dependency_cycles_rejected() {
        let err = ToolCatalog::builtin()
            .with_overrides(&[
                entry("layout", &[("legend", "legend_results")]),
                entry("legend", &[("layout", "layout_results")]),
            ])
            .unwrap_err();
        assert!(matches!(err, DiagramError::Config { .. }));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn invalid_context_declarations_rejected() {
        let bad = [
            entry("summary", &[("summary", "own_results")]),
            entry("summary", &[("ports", "port_results")]),
            entry("summary", &[("ocr", "results"), ("nodes", "results")]),
        ];
        for config in bad {
            let err = ToolCatalog::builtin().with_overrides(&[config]).unwrap_err();
            assert!(matches!(err, DiagramError::Config { .. }), "{err}");
        }
    }
}
