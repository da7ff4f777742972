//! Seams to the external collaborators of the workbench.
//!
//! The analysis backend issues signed upload targets and runs tools against
//! an image URL; object storage receives the raw file bytes. Both are traits
//! so the core can be driven by [`HttpBackend`] in production and by
//! in-process fakes in tests.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use diagram_shared::{FileMeta, Result, ToolResult};

pub use http::{BackendOptions, HttpBackend};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of `POST /generate-upload-url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    pub filename: String,
    pub content_type: String,
}

impl From<&FileMeta> for UploadUrlRequest {
    fn from(file: &FileMeta) -> Self {
        Self {
            filename: file.name.clone(),
            content_type: file.content_type.clone(),
        }
    }
}

/// A one-time upload target and the URL the file will be served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUpload {
    pub signed_url: String,
    pub public_url: String,
}

/// Body of `POST /analyze/{toolId}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeRequest {
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_data: Option<Map<String, Value>>,
}

/// Body of `POST /analyze` (whole-diagram description).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescribeRequest {
    pub image_url: String,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    #[serde(default)]
    description: Option<String>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The analysis backend's HTTP surface.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Ask for a signed upload target for the given file.
    async fn request_upload_url(&self, request: &UploadUrlRequest) -> Result<SignedUpload>;

    /// Run one tool against an image and return its raw JSON body.
    async fn analyze_tool(&self, tool_id: &str, request: &AnalyzeRequest) -> Result<ToolResult>;

    /// Produce a free-text description of the whole diagram.
    async fn describe(&self, request: &DescribeRequest) -> Result<String>;
}

/// Direct client-to-storage transfer through a signed URL.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// PUT `bytes` to `signed_url` with the declared content type.
    async fn put_object(&self, signed_url: &str, content_type: &str, bytes: Vec<u8>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Error body helpers
// ---------------------------------------------------------------------------

/// Pull the most specific message out of a backend error body.
///
/// Prefers `error` over `message`. Non-string values are rendered as JSON.
/// Returns `None` when the body is not JSON or carries neither field.
pub fn backend_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let obj = value.as_object()?;

    ["error", "message"]
        .iter()
        .filter_map(|field| obj.get(*field))
        .find_map(|v| match v {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
}
