//! Two-phase upload: signed target from the backend, then a direct PUT to
//! object storage. No retries; every failure is returned to the caller.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use diagram_backend::{AnalysisBackend, ObjectStorage, UploadUrlRequest};
use diagram_shared::{DiagramError, FileMeta, Result};

/// Fallback when the extension says nothing about the content.
const OCTET_STREAM: &str = "application/octet-stream";

/// A local file ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub meta: FileMeta,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    /// Wrap in-memory bytes with an explicit content type.
    pub fn from_bytes(name: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            meta: FileMeta {
                name: name.to_string(),
                content_type: content_type.to_string(),
                size: bytes.len() as u64,
            },
            bytes,
        }
    }

    /// Read a file from disk, deriving its content type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DiagramError::io(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DiagramError::validation(format!("{} has no file name", path.display()))
            })?;
        Ok(Self::from_bytes(&name, content_type_for(path), bytes))
    }
}

/// MIME type for common diagram image extensions.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        _ => OCTET_STREAM,
    }
}

/// Where an uploaded file can be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub source_url: String,
}

/// Runs the signed-URL request and the storage transfer.
#[derive(Clone)]
pub struct UploadPipeline {
    backend: Arc<dyn AnalysisBackend>,
    storage: Arc<dyn ObjectStorage>,
}

impl UploadPipeline {
    pub fn new(backend: Arc<dyn AnalysisBackend>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { backend, storage }
    }

    /// Upload `file` and return its public URL.
    #[instrument(skip_all, fields(file = %file.meta.name, size = file.meta.size))]
    pub async fn upload(&self, file: &SourceFile) -> Result<UploadedImage> {
        let signed = self
            .backend
            .request_upload_url(&UploadUrlRequest::from(&file.meta))
            .await?;

        self.storage
            .put_object(&signed.signed_url, &file.meta.content_type, file.bytes.clone())
            .await?;

        info!(public_url = %signed.public_url, "upload complete");
        Ok(UploadedImage {
            source_url: signed.public_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagram_backend::{BackendOptions, HttpBackend};
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_bytes, body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pipeline_for(server: &MockServer) -> UploadPipeline {
        let url = Url::parse(&server.uri()).unwrap();
        let http = Arc::new(HttpBackend::new(&url, BackendOptions::default()).unwrap());
        UploadPipeline::new(http.clone(), http)
    }

    fn png() -> SourceFile {
        SourceFile::from_bytes("site.png", "image/png", b"\x89PNG".to_vec())
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for(Path::new("a/site.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("scan.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("flow.svg")), "image/svg+xml");
        assert_eq!(content_type_for(Path::new("README")), OCTET_STREAM);
    }

    #[tokio::test]
    async fn from_path_reads_bytes_and_name() {
        let dir = std::env::temp_dir().join(format!("diagram-upload-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("diagram.jpg");
        std::fs::write(&path, b"jpegdata").unwrap();

        let file = SourceFile::from_path(&path).await.unwrap();
        assert_eq!(file.meta.name, "diagram.jpg");
        assert_eq!(file.meta.content_type, "image/jpeg");
        assert_eq!(file.meta.size, 8);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn from_path_missing_file_is_io_error() {
        let err = SourceFile::from_path(Path::new("/nonexistent/diagram.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, DiagramError::Io { .. }));
    }

    #[tokio::test]
    async fn upload_runs_both_phases() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-upload-url"))
            .and(body_json(json!({"filename": "site.png", "contentType": "image/png"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedUrl": format!("{}/bucket/u1.png?X-Goog-Signature=abc", server.uri()),
                "publicUrl": "https://store/x.png",
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/bucket/u1.png"))
            .and(header("content-type", "image/png"))
            .and(body_bytes(b"\x89PNG".to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let uploaded = pipeline_for(&server).upload(&png()).await.unwrap();
        assert_eq!(uploaded.source_url, "https://store/x.png");
    }

    #[tokio::test]
    async fn signed_url_failure_skips_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-upload-url"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "Missing 'filename' or 'contentType' in request"
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = pipeline_for(&server).upload(&png()).await.unwrap_err();
        assert!(matches!(err, DiagramError::SignedUrl(_)));
    }

    #[tokio::test]
    async fn storage_rejection_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-upload-url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedUrl": format!("{}/bucket/u2.png", server.uri()),
                "publicUrl": "https://store/u2.png",
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = pipeline_for(&server).upload(&png()).await.unwrap_err();
        match err {
            DiagramError::StorageUpload(msg) => assert!(msg.contains("403")),
            other => panic!("expected StorageUpload, got {other:?}"),
        }
    }
}
