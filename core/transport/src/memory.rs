//! In-memory scripted transport for testing.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use agrosentinel_common::{Error, Result};

use crate::request::{Request, Response};
use crate::transport::Transport;

/// One scripted reply, consumed by a single exchange.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Response),
    /// Fail as if the host were unreachable.
    Unreachable,
    /// Answer after a delay.
    Delayed(Duration, Response),
}

type RouteKey = (Method, String);

/// Scripted transport.
///
/// Replies are matched on verb and URL path. One-shot scripted replies are
/// consumed first, in order; after that the route's standing response
/// answers; unknown routes get 404. While offline every exchange fails with
/// a transport error. Every exchange is logged, online or not.
pub struct MemoryTransport {
    online: AtomicBool,
    routes: Mutex<HashMap<RouteKey, Response>>,
    scripted: Mutex<HashMap<RouteKey, VecDeque<Reply>>>,
    log: Mutex<Vec<Request>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryTransport {
    /// Create an online transport with no routes.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            routes: Mutex::new(HashMap::new()),
            scripted: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Set the standing response for a route.
    pub fn route(&self, method: Method, path: &str, response: Response) {
        lock(&self.routes).insert((method, path.to_string()), response);
    }

    /// Set a standing JSON response for a route.
    pub fn route_json(&self, method: Method, path: &str, status: StatusCode, body: Value) {
        self.route(method, path, Response::json(status, &body));
    }

    /// Queue a one-shot reply for a route.
    pub fn script(&self, method: Method, path: &str, reply: Reply) {
        lock(&self.scripted)
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// All requests seen so far.
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.log).clone()
    }

    /// Requests seen for one route.
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<Request> {
        lock(&self.log)
            .iter()
            .filter(|r| r.method == method && r.url.path() == path)
            .cloned()
            .collect()
    }

    fn next_reply(&self, key: &RouteKey) -> Reply {
        if let Some(reply) = lock(&self.scripted)
            .get_mut(key)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }

        match lock(&self.routes).get(key) {
            Some(response) => Reply::Respond(response.clone()),
            None => Reply::Respond(Response::json(
                StatusCode::NOT_FOUND,
                &serde_json::json!({ "detail": "Not Found" }),
            )),
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, request: &Request) -> Result<Response> {
        lock(&self.log).push(request.clone());

        if !self.is_online() {
            return Err(Error::Transport("Network unreachable".to_string()));
        }

        let key = (request.method.clone(), request.url.path().to_string());
        match self.next_reply(&key) {
            Reply::Respond(response) => Ok(response),
            Reply::Unreachable => Err(Error::Transport(format!(
                "Connection to {} refused",
                request.url
            ))),
            Reply::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn get(path: &str) -> Request {
        Request::get(Url::parse("http://localhost").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_scripted_replies_before_route() {
        let transport = MemoryTransport::new();
        transport.route_json(
            Method::GET,
            "/api/languages",
            StatusCode::OK,
            serde_json::json!({ "languages": ["en"] }),
        );
        transport.script(Method::GET, "/api/languages", Reply::Unreachable);

        assert!(transport.fetch(&get("/api/languages")).await.is_err());
        let response = transport.fetch(&get("/api/languages")).await.unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_offline_fails_and_logs() {
        let transport = MemoryTransport::new();
        transport.set_online(false);

        let err = transport.fetch(&get("/index.html")).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(transport.requests_to(Method::GET, "/index.html").len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let transport = MemoryTransport::new();
        let response = transport.fetch(&get("/missing")).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}
