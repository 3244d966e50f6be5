//! Transport trait definition.

use async_trait::async_trait;

use agrosentinel_common::Result;

use crate::request::{Request, Response};

/// Raw request/response exchange with the network.
///
/// Any status the server sends back, including 4xx and 5xx, is a successful
/// exchange and comes back as a [`Response`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Perform one exchange.
    ///
    /// # Errors
    /// - `Error::Transport` if the network is unreachable or the exchange
    ///   timed out
    async fn fetch(&self, request: &Request) -> Result<Response>;
}
