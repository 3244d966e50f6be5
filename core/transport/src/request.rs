//! Transport-level request and response types.

use bytes::Bytes;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use agrosentinel_common::{Error, Result};

/// Header carrying the pending-write id on replayed deliveries.
pub const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    /// Anything else (asset, API call).
    #[default]
    Subresource,
}

/// A single file part of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Json(Value),
    Multipart(FilePart),
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            mode: RequestMode::Subresource,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A top-level document load.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn post(url: Url, body: Body) -> Self {
        Self {
            body,
            ..Self::new(Method::POST, url)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the verb is side-effect free.
    pub fn is_safe(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD || self.method == Method::OPTIONS
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Canonical request identity: verb plus URL without fragment.
    ///
    /// Two requests with the same identity share a cache slot.
    pub fn identity(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }
}

/// A received (or synthesized) response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A JSON response with the given status.
    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(value.to_string()),
        }
    }

    /// The response returned when neither network nor cache can answer.
    pub fn offline(message: &str) -> Self {
        Self::json(
            StatusCode::SERVICE_UNAVAILABLE,
            &serde_json::json!({
                "error": "offline",
                "message": message,
                "offline": true,
            }),
        )
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether this is the synthesized offline payload.
    pub fn is_offline_placeholder(&self) -> bool {
        self.status == StatusCode::SERVICE_UNAVAILABLE
            && serde_json::from_slice::<Value>(&self.body)
                .map(|v| v.get("offline") == Some(&Value::Bool(true)))
                .unwrap_or(false)
    }

    /// Decode the body as JSON.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
    }

    /// Decode a 2xx body as JSON, or turn the status into an error.
    ///
    /// The error message prefers the server's `detail` or `message` field.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T> {
        if self.is_success() {
            return self.body_json();
        }

        let message = serde_json::from_slice::<Value>(&self.body)
            .ok()
            .and_then(|v| {
                ["detail", "message", "error"]
                    .iter()
                    .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or_else(|| default_message(self.status));

        Err(Error::from_status(self.status.as_u16(), message))
    }
}

fn default_message(status: StatusCode) -> String {
    if status.is_server_error() {
        "Server error. Please try again later.".to_string()
    } else {
        format!("Request failed with status {}", status)
    }
}
