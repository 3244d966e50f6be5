//! Network access for the AgroSentinel sync engine.
//!
//! This crate provides:
//! - [`Transport`]: the raw request/response seam
//! - [`HttpTransport`]: the reqwest implementation
//! - [`MemoryTransport`]: a scripted in-memory implementation for tests
//! - [`AnalysisApi`] / [`ApiClient`]: typed backend calls over any transport

pub mod api;
pub mod http;
pub mod memory;
pub mod request;
pub mod transport;

pub use api::{AnalysisApi, AnalysisUpload, ApiClient, META_CONTENT_TYPE, META_FILE_NAME};
pub use http::{HttpTransport, DEFAULT_TIMEOUT};
pub use memory::{MemoryTransport, Reply};
pub use request::{Body, FilePart, Request, RequestMode, Response, IDEMPOTENCY_KEY};
pub use reqwest::{Method, StatusCode};
pub use transport::Transport;
pub use url::Url;
