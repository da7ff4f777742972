//! reqwest-backed implementation of the backend and storage seams.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use diagram_shared::{AppConfig, DiagramError, Result, ToolResult, validate_backend_url};

use crate::{
    AnalysisBackend, AnalyzeRequest, DescribeRequest, DescribeResponse, ObjectStorage,
    SignedUpload, UploadUrlRequest, backend_error_message,
};

/// User-Agent string for backend requests.
const USER_AGENT: &str = concat!("diagram-workbench/", env!("CARGO_PKG_VERSION"));

/// Default timeout for analyze calls (models can be slow).
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default timeout for the signed-URL request and the storage PUT.
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60;

/// Longest slice of a non-JSON error body echoed back in messages.
const MAX_ERROR_SNIPPET: usize = 200;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Timeouts for the HTTP backend.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Timeout for analyze/describe requests in seconds.
    pub timeout_secs: u64,
    /// Timeout for upload-related requests in seconds.
    pub upload_timeout_secs: u64,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT_SECS,
        }
    }
}

impl From<&AppConfig> for BackendOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout_secs: config.backend.timeout_secs,
            upload_timeout_secs: config.backend.upload_timeout_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

/// Talks to the analysis backend and to object storage over HTTP.
///
/// Cheap to clone: the underlying client is reference counted.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: String,
    opts: BackendOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSignedUpload {
    #[serde(default)]
    signed_url: Option<String>,
    #[serde(default)]
    public_url: Option<String>,
}

impl HttpBackend {
    /// Create a backend client for the given base URL.
    pub fn new(base_url: &Url, opts: BackendOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DiagramError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base: base_url.as_str().trim_end_matches('/').to_string(),
            opts,
        })
    }

    /// Create a backend client from the resolved application config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let url = validate_backend_url(config)?;
        Self::new(&url, BackendOptions::from(config))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.opts.timeout_secs)
    }

    fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.opts.upload_timeout_secs)
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    #[instrument(skip_all, fields(filename = %request.filename))]
    async fn request_upload_url(&self, request: &UploadUrlRequest) -> Result<SignedUpload> {
        let url = self.endpoint("generate-upload-url");
        debug!(%url, content_type = %request.content_type, "requesting signed upload url");

        let response = self
            .client
            .post(&url)
            .timeout(self.upload_timeout())
            .json(request)
            .send()
            .await
            .map_err(|e| DiagramError::SignedUrl(format!("{url}: {e}")))?;

        let body = read_success_body(response)
            .await
            .map_err(DiagramError::SignedUrl)?;

        let raw: RawSignedUpload = serde_json::from_str(&body)
            .map_err(|e| DiagramError::SignedUrl(format!("malformed response: {e}")))?;

        match (non_blank(raw.signed_url), non_blank(raw.public_url)) {
            (Some(signed_url), Some(public_url)) => {
                info!(%public_url, "signed upload url issued");
                Ok(SignedUpload {
                    signed_url,
                    public_url,
                })
            }
            (signed, public) => {
                let mut missing = Vec::new();
                if signed.is_none() {
                    missing.push("signedUrl");
                }
                if public.is_none() {
                    missing.push("publicUrl");
                }
                Err(DiagramError::SignedUrl(format!(
                    "response is missing {}",
                    missing.join(" and ")
                )))
            }
        }
    }

    #[instrument(skip_all, fields(tool = tool_id))]
    async fn analyze_tool(&self, tool_id: &str, request: &AnalyzeRequest) -> Result<ToolResult> {
        let url = self.endpoint(&format!("analyze/{tool_id}"));
        debug!(
            %url,
            with_context = request.context_data.is_some(),
            "calling analyze endpoint"
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout())
            .json(request)
            .send()
            .await
            .map_err(|e| DiagramError::tool_invocation(tool_id, e.to_string()))?;

        let body = read_success_body(response)
            .await
            .map_err(|message| DiagramError::tool_invocation(tool_id, message))?;

        // Tools may answer with plain text; keep it as a JSON string.
        let result = serde_json::from_str(&body).unwrap_or(ToolResult::String(body));
        Ok(result)
    }

    #[instrument(skip_all)]
    async fn describe(&self, request: &DescribeRequest) -> Result<String> {
        let url = self.endpoint("analyze");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout())
            .json(request)
            .send()
            .await
            .map_err(|e| DiagramError::tool_invocation("describe", e.to_string()))?;

        let body = read_success_body(response)
            .await
            .map_err(|message| DiagramError::tool_invocation("describe", message))?;

        let parsed: DescribeResponse = serde_json::from_str(&body).map_err(|e| {
            DiagramError::tool_invocation("describe", format!("malformed response: {e}"))
        })?;

        Ok(parsed.description.unwrap_or_default())
    }
}

#[async_trait]
impl ObjectStorage for HttpBackend {
    #[instrument(skip_all, fields(content_type = %content_type, bytes = bytes.len()))]
    async fn put_object(&self, signed_url: &str, content_type: &str, bytes: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .put(signed_url)
            .timeout(self.upload_timeout())
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| DiagramError::StorageUpload(e.to_string()))?;

        read_success_body(response)
            .await
            .map(|_| ())
            .map_err(DiagramError::StorageUpload)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read the body of a 2xx response, or turn a non-2xx one into the most
/// specific message available.
async fn read_success_body(response: Response) -> std::result::Result<String, String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| format!("failed to read response body: {e}"))?;

    if status.is_success() {
        return Ok(body);
    }

    warn!(%status, "backend returned an error status");
    Err(backend_error_message(&body).unwrap_or_else(|| status_message(status, &body)))
}

fn status_message(status: StatusCode, body: &str) -> String {
    let snippet: String = body.trim().chars().take(MAX_ERROR_SNIPPET).collect();
    if snippet.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {snippet}")
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> HttpBackend {
        let url = Url::parse(&server.uri()).unwrap();
        HttpBackend::new(&url, BackendOptions::default()).unwrap()
    }

    fn upload_request() -> UploadUrlRequest {
        UploadUrlRequest {
            filename: "site.png".into(),
            content_type: "image/png".into(),
        }
    }

    #[tokio::test]
    async fn signed_url_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-upload-url"))
            .and(body_json(json!({"filename": "site.png", "contentType": "image/png"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedUrl": format!("{}/bucket/abc.png?sig=1", server.uri()),
                "publicUrl": "https://store/abc.png",
            })))
            .mount(&server)
            .await;

        let signed = backend_for(&server)
            .request_upload_url(&upload_request())
            .await
            .unwrap();
        assert_eq!(signed.public_url, "https://store/abc.png");
        assert!(signed.signed_url.ends_with("?sig=1"));
    }

    #[tokio::test]
    async fn signed_url_missing_field_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-upload-url"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"signedUrl": "https://s/put"})),
            )
            .mount(&server)
            .await;

        let err = backend_for(&server)
            .request_upload_url(&upload_request())
            .await
            .unwrap_err();
        match err {
            DiagramError::SignedUrl(msg) => assert!(msg.contains("publicUrl")),
            other => panic!("expected SignedUrl, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn signed_url_backend_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-upload-url"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "GCS client not initialized on server."
            })))
            .mount(&server)
            .await;

        let err = backend_for(&server)
            .request_upload_url(&upload_request())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "signed upload URL error: GCS client not initialized on server."
        );
    }

    #[tokio::test]
    async fn put_object_sends_declared_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bucket/abc.png"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let signed_url = format!("{}/bucket/abc.png", server.uri());
        backend_for(&server)
            .put_object(&signed_url, "image/png", vec![0x89, b'P', b'N', b'G'])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn put_object_failure_is_storage_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(403).set_body_string("<Error>SignatureDoesNotMatch</Error>"),
            )
            .mount(&server)
            .await;

        let signed_url = format!("{}/bucket/abc.png", server.uri());
        let err = backend_for(&server)
            .put_object(&signed_url, "image/png", vec![1, 2, 3])
            .await
            .unwrap_err();
        match err {
            DiagramError::StorageUpload(msg) => {
                assert!(msg.contains("403"));
                assert!(msg.contains("SignatureDoesNotMatch"));
            }
            other => panic!("expected StorageUpload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn analyze_tool_returns_raw_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze/ocr"))
            .and(body_json(json!({"image_url": "https://store/x.png"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"blocks": [{"text": "CSR"}]})),
            )
            .mount(&server)
            .await;

        let request = AnalyzeRequest {
            image_url: "https://store/x.png".into(),
            context_data: None,
        };
        let result = backend_for(&server)
            .analyze_tool("ocr", &request)
            .await
            .unwrap();
        assert_eq!(result, json!({"blocks": [{"text": "CSR"}]}));
    }

    #[tokio::test]
    async fn analyze_tool_prefers_backend_error_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze/nodes"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "Could not retrieve image",
                "message": "Bad Request",
            })))
            .mount(&server)
            .await;

        let request = AnalyzeRequest {
            image_url: "https://store/x.png".into(),
            context_data: None,
        };
        let err = backend_for(&server)
            .analyze_tool("nodes", &request)
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Could not retrieve image");
        assert!(matches!(err, DiagramError::ToolInvocation { ref tool, .. } if tool == "nodes"));
    }

    #[tokio::test]
    async fn analyze_tool_without_error_body_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze/edges"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let request = AnalyzeRequest {
            image_url: "https://store/x.png".into(),
            context_data: None,
        };
        let err = backend_for(&server)
            .analyze_tool("edges", &request)
            .await
            .unwrap_err();
        assert!(err.user_message().starts_with("HTTP 502"));
    }

    #[tokio::test]
    async fn describe_reads_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .and(body_json(json!({"image_url": "https://store/x.png"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "description": "A router connected to a baseband unit.",
                "url": "https://store/x.png",
            })))
            .mount(&server)
            .await;

        let description = backend_for(&server)
            .describe(&DescribeRequest {
                image_url: "https://store/x.png".into(),
            })
            .await
            .unwrap();
        assert_eq!(description, "A router connected to a baseband unit.");
    }
}
