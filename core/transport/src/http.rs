//! reqwest-backed transport.

use async_trait::async_trait;
use reqwest::{multipart, Client};
use std::time::Duration;
use tracing::debug;

use agrosentinel_common::{Error, Result};

use crate::request::{Body, Request, Response};
use crate::transport::Transport;

/// Default bound on one exchange, connect through body.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = "AgroSentinel/0.1";

/// HTTP transport over a shared reqwest client.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    /// Create a transport whose exchanges time out after `timeout`.
    ///
    /// # Errors
    /// - The TLS backend could not be initialised
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    fn build(&self, request: &Request) -> Result<reqwest::RequestBuilder> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            Body::Empty => builder,
            Body::Bytes(bytes) => builder.body(bytes.clone()),
            Body::Json(value) => builder.json(value),
            Body::Multipart(part) => {
                let file = multipart::Part::bytes(part.data.to_vec())
                    .file_name(part.file_name.clone())
                    .mime_str(&part.content_type)
                    .map_err(|e| {
                        Error::InvalidInput(format!(
                            "Invalid content type '{}': {}",
                            part.content_type, e
                        ))
                    })?;
                builder.multipart(multipart::Form::new().part(part.field.clone(), file))
            }
        };

        Ok(builder)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, request: &Request) -> Result<Response> {
        debug!("{} {}", request.method, request.url);

        let response = self
            .build(request)?
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Request to {} failed: {}", request.url, e)))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read response body: {}", e)))?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
