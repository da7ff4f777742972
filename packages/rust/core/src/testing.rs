//! In-process backend used by workbench tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use diagram_backend::{
    AnalysisBackend, AnalyzeRequest, DescribeRequest, ObjectStorage, SignedUpload,
    UploadUrlRequest,
};
use diagram_shared::{DiagramError, Result, ToolResult};

/// Scripted backend: fixed answers per tool, records every analyze request.
pub(crate) struct FakeBackend {
    public_url: String,
    storage_error: Option<String>,
    description: String,
    tools: HashMap<String, std::result::Result<ToolResult, String>>,
    requests: Mutex<Vec<(String, Value)>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            public_url: "https://store/x.png".into(),
            storage_error: None,
            description: String::new(),
            tools: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_public_url(mut self, url: &str) -> Self {
        self.public_url = url.into();
        self
    }

    pub(crate) fn with_tool(mut self, tool_id: &str, outcome: Result<ToolResult>) -> Self {
        let outcome = outcome.map_err(|e| e.user_message());
        self.tools.insert(tool_id.into(), outcome);
        self
    }

    pub(crate) fn with_description(mut self, description: &str) -> Self {
        self.description = description.into();
        self
    }

    pub(crate) fn failing_storage(mut self, message: &str) -> Self {
        self.storage_error = Some(message.into());
        self
    }

    pub(crate) fn analyze_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Request bodies sent for `tool_id`, as JSON.
    pub(crate) fn requests_for(&self, tool_id: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == tool_id)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl AnalysisBackend for FakeBackend {
    async fn request_upload_url(&self, request: &UploadUrlRequest) -> Result<SignedUpload> {
        Ok(SignedUpload {
            signed_url: format!("https://signed.example/{}", request.filename),
            public_url: self.public_url.clone(),
        })
    }

    async fn analyze_tool(&self, tool_id: &str, request: &AnalyzeRequest) -> Result<ToolResult> {
        let body = serde_json::to_value(request).unwrap();
        self.requests.lock().unwrap().push((tool_id.to_string(), body));

        match self.tools.get(tool_id) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(DiagramError::tool_invocation(tool_id, message.clone())),
            None => Err(DiagramError::tool_invocation(tool_id, "HTTP 404 Not Found")),
        }
    }

    async fn describe(&self, _request: &DescribeRequest) -> Result<String> {
        Ok(self.description.clone())
    }
}

#[async_trait]
impl ObjectStorage for FakeBackend {
    async fn put_object(&self, _signed_url: &str, _content_type: &str, _bytes: Vec<u8>) -> Result<()> {
        match &self.storage_error {
            Some(message) => Err(DiagramError::StorageUpload(format!("HTTP 403: {message}"))),
            None => Ok(()),
        }
    }
}
