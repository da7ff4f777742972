//! Application configuration for the diagram workbench.
//!
//! User config lives at `~/.diagram/diagram.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DiagramError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "diagram.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".diagram";

// ---------------------------------------------------------------------------
// Config structs (matching diagram.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Analysis backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Edit buffer formatting.
    #[serde(default)]
    pub editor: EditorConfig,

    /// Extra or overriding tool catalog entries.
    #[serde(default)]
    pub tools: Vec<ToolEntryConfig>,
}

/// `[backend]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the analysis backend.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for analyze calls, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Timeout for the signed-URL request and the storage transfer, in seconds.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".into()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_upload_timeout_secs() -> u64 {
    60
}

/// `[editor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Indentation width used when formatting the edit buffer.
    #[serde(default = "default_indent")]
    pub indent: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            indent: default_indent(),
        }
    }
}

fn default_indent() -> usize {
    2
}

/// `[[tools]]` entry: declares a tool or overrides a built-in one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntryConfig {
    /// Stable tool id, as used in `/analyze/{id}`.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Upstream captures this tool consumes as context.
    #[serde(default)]
    pub context: Vec<ContextFieldConfig>,
}

/// One upstream dependency of a context-aware tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFieldConfig {
    /// Tool id whose captured result is read.
    pub source: String,
    /// Field name the result is sent under in `context_data`.
    pub field: String,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.diagram/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DiagramError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.diagram/diagram.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DiagramError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DiagramError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DiagramError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DiagramError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DiagramError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Parse and check the configured backend base URL.
pub fn validate_backend_url(config: &AppConfig) -> Result<Url> {
    let raw = config.backend.base_url.trim_end_matches('/');
    let url = Url::parse(raw)
        .map_err(|e| DiagramError::config(format!("invalid backend base_url '{raw}': {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(DiagramError::config(format!(
            "backend base_url must be http or https, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("base_url"));
        assert!(toml_str.contains("http://localhost:5000"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.backend.timeout_secs, 120);
        assert_eq!(parsed.editor.indent, 2);
        assert!(parsed.tools.is_empty());
    }

    #[test]
    fn config_with_tools() {
        let toml_str = r#"
[backend]
base_url = "https://diagrams.example.com"

[[tools]]
id = "ports"
title = "Port Detection"
context = [
  { source = "nodes", field = "node_results" },
]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.backend.base_url, "https://diagrams.example.com");
        assert_eq!(config.backend.upload_timeout_secs, 60);
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].context[0].field, "node_results");
    }

    #[test]
    fn backend_url_validation() {
        let mut config = AppConfig::default();
        config.backend.base_url = "http://localhost:5000/".into();
        let url = validate_backend_url(&config).expect("valid url");
        assert_eq!(url.host_str(), Some("localhost"));

        config.backend.base_url = "ftp://files.example.com".into();
        let err = validate_backend_url(&config).unwrap_err();
        assert!(err.to_string().contains("http or https"));

        config.backend.base_url = "not a url".into();
        assert!(validate_backend_url(&config).is_err());
    }

    #[test]
    fn load_config_from_missing_file_is_io_error() {
        let err = load_config_from(Path::new("/nonexistent/diagram.toml")).unwrap_err();
        assert!(matches!(err, DiagramError::Io { .. }));
    }
}
