//! Typed calls against the analysis backend.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use agrosentinel_common::{Coordinates, Error, PendingId, PendingWrite, Result};

use crate::request::{Body, FilePart, Request, IDEMPOTENCY_KEY};
use crate::transport::Transport;

/// Metadata key holding the capture's content type.
pub const META_CONTENT_TYPE: &str = "content_type";
/// Metadata key holding the capture's file name.
pub const META_FILE_NAME: &str = "file_name";

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";
const LIVE_FILE_NAME: &str = "scan.jpg";
const REPLAY_FILE_NAME: &str = "offline-scan.jpg";

/// One image submitted for analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisUpload {
    pub image: Bytes,
    pub coordinates: Coordinates,
    pub language: String,
    pub file_name: String,
    pub content_type: String,
    /// Lets the server drop duplicates; a replay reuses the live key.
    pub idempotency_key: Option<PendingId>,
}

impl AnalysisUpload {
    /// Upload for a capture delivered straight away.
    pub fn live(image: impl Into<Bytes>, coordinates: Coordinates, language: &str) -> Self {
        Self {
            image: image.into(),
            coordinates,
            language: language.to_string(),
            file_name: LIVE_FILE_NAME.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            idempotency_key: None,
        }
    }

    /// Tag the upload so the server can recognise a later replay of it.
    pub fn with_idempotency_key(mut self, key: PendingId) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Upload replaying a queued write.
    pub fn replay(pending: &PendingWrite, language: &str) -> Self {
        let context = &pending.context;
        Self {
            image: Bytes::from(pending.binary_payload.clone()),
            coordinates: context.coordinates,
            language: language.to_string(),
            file_name: context
                .metadata_str(META_FILE_NAME)
                .unwrap_or(REPLAY_FILE_NAME)
                .to_string(),
            content_type: context
                .metadata_str(META_CONTENT_TYPE)
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            idempotency_key: Some(pending.id),
        }
    }
}

/// Backend operations used by the coordinator and the façade.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    /// Build an endpoint URL from path segments and query pairs.
    ///
    /// Segments are percent-encoded individually.
    fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url>;

    /// GET a JSON document.
    ///
    /// # Errors
    /// - `Transport` if unreachable
    /// - `Server` / `Rejected` for failure statuses
    async fn get_json(&self, url: &Url) -> Result<Value>;

    /// POST a JSON document and decode the JSON reply. Never queued.
    async fn post_json(&self, url: &Url, body: &Value) -> Result<Value>;

    /// Submit an image for disease and risk analysis.
    async fn analyze(&self, upload: &AnalysisUpload) -> Result<Value>;

    /// Classify an image without risk scoring.
    async fn predict(&self, image: Bytes, language: &str) -> Result<Value>;
}

/// [`AnalysisApi`] over any [`Transport`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base: Url,
}

impl ApiClient {
    /// Create a client rooted at `base` (e.g. `https://host/api`).
    ///
    /// # Errors
    /// - `base` cannot carry a path (e.g. `data:` URLs)
    pub fn new(transport: Arc<dyn Transport>, mut base: Url) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!(
                "API base URL cannot be a base: {}",
                base
            )));
        }
        // Drop a trailing slash so segment pushes never produce "//".
        if base.path().ends_with('/') && base.path() != "/" {
            let trimmed = base.path().trim_end_matches('/').to_string();
            base.set_path(&trimmed);
        }
        Ok(Self { transport, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn image_part(image: Bytes, file_name: &str, content_type: &str) -> Body {
        Body::Multipart(FilePart {
            field: "file".to_string(),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            data: image,
        })
    }

    async fn exchange(&self, request: Request) -> Result<Value> {
        self.transport.fetch(&request).await?.into_json()
    }
}

#[async_trait]
impl AnalysisApi for ApiClient {
    fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::InvalidInput("API base URL cannot be a base".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn get_json(&self, url: &Url) -> Result<Value> {
        self.exchange(Request::get(url.clone())).await
    }

    async fn post_json(&self, url: &Url, body: &Value) -> Result<Value> {
        self.exchange(Request::post(url.clone(), Body::Json(body.clone())))
            .await
    }

    async fn analyze(&self, upload: &AnalysisUpload) -> Result<Value> {
        let url = self.endpoint(
            &["analyze"],
            &[
                ("latitude", upload.coordinates.latitude.to_string()),
                ("longitude", upload.coordinates.longitude.to_string()),
                ("lang", upload.language.clone()),
            ],
        )?;

        let mut request = Request::post(
            url,
            Self::image_part(upload.image.clone(), &upload.file_name, &upload.content_type),
        );
        if let Some(key) = upload.idempotency_key {
            request = request.with_header(IDEMPOTENCY_KEY, key.to_string());
        }

        self.exchange(request).await
    }

    async fn predict(&self, image: Bytes, language: &str) -> Result<Value> {
        let url = self.endpoint(&["predict"], &[("lang", language.to_string())])?;
        let request = Request::post(
            url,
            Self::image_part(image, LIVE_FILE_NAME, DEFAULT_CONTENT_TYPE),
        );
        self.exchange(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use agrosentinel_common::{ErrorKind, WriteContext};
    use reqwest::{Method, StatusCode};

    fn client(transport: Arc<MemoryTransport>) -> ApiClient {
        ApiClient::new(transport, Url::parse("http://localhost/api/").unwrap()).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let api = client(Arc::new(MemoryTransport::new()));
        let url = api
            .endpoint(&["remedies", "Leaf Mold"], &[("lang", "hi".to_string())])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost/api/remedies/Leaf%20Mold?lang=hi");
    }

    #[tokio::test]
    async fn test_replay_carries_idempotency_key() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route_json(
            Method::POST,
            "/api/analyze",
            StatusCode::OK,
            serde_json::json!({ "disease": "healthy" }),
        );
        let api = client(transport.clone());

        let coords = Coordinates::new(17.38, 78.48).unwrap();
        let pending = PendingWrite::new(vec![1, 2, 3], WriteContext::new(coords));
        api.analyze(&AnalysisUpload::replay(&pending, "te"))
            .await
            .unwrap();

        let sent = transport.requests_to(Method::POST, "/api/analyze");
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].header(IDEMPOTENCY_KEY),
            Some(pending.id.to_string().as_str())
        );
        let query: Vec<(String, String)> = sent[0].url.query_pairs().into_owned().collect();
        assert!(query.contains(&("lang".to_string(), "te".to_string())));
        match &sent[0].body {
            Body::Multipart(part) => {
                assert_eq!(part.field, "file");
                assert_eq!(part.file_name, REPLAY_FILE_NAME);
                assert_eq!(part.data.as_ref(), &[1, 2, 3]);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_live_and_replay_share_idempotency_key() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route_json(
            Method::POST,
            "/api/analyze",
            StatusCode::OK,
            serde_json::json!({}),
        );
        let api = client(transport.clone());

        let coords = Coordinates::new(1.0, 2.0).unwrap();
        let id = PendingId::generate();
        api.analyze(&AnalysisUpload::live(vec![9], coords, "en").with_idempotency_key(id))
            .await
            .unwrap();
        let pending = PendingWrite::with_id(id, vec![9], WriteContext::new(coords));
        api.analyze(&AnalysisUpload::replay(&pending, "en"))
            .await
            .unwrap();

        let keys: Vec<_> = transport
            .requests_to(Method::POST, "/api/analyze")
            .iter()
            .map(|r| r.header(IDEMPOTENCY_KEY).map(str::to_string))
            .collect();
        assert_eq!(keys, vec![Some(id.to_string()), Some(id.to_string())]);
    }

    #[tokio::test]
    async fn test_post_json_sends_document() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route_json(
            Method::POST,
            "/api/chat/send",
            StatusCode::OK,
            serde_json::json!({ "response": "Remove infected leaves." }),
        );
        let api = client(transport.clone());

        let url = api.endpoint(&["chat", "send"], &[]).unwrap();
        let body = serde_json::json!({ "message": "Yellow spots?", "language": "en" });
        let reply = api.post_json(&url, &body).await.unwrap();
        assert_eq!(reply["response"], "Remove infected leaves.");

        let sent = transport.requests_to(Method::POST, "/api/chat/send");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, Body::Json(body));
    }

    #[tokio::test]
    async fn test_failure_statuses_become_errors() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route_json(
            Method::POST,
            "/api/predict",
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({ "detail": "Not a leaf" }),
        );
        let api = client(transport);

        let err = api.predict(Bytes::from_static(b"x"), "en").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }
}
