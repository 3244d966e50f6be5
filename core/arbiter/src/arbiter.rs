//! The network arbiter: request strategies and lifecycle.

use futures::future::try_join_all;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use agrosentinel_common::{ArbiterEndpoint, Error, Result, SkipWaitingInbox};
use agrosentinel_sync::{ConnectivitySubscription, Transition};
use agrosentinel_transport::{Request, Response, Transport, Url};

use crate::cache::ByteCache;
use crate::classify::{classify, RequestClass};
use crate::config::ArbiterConfig;

/// Background-sync tag that asks attached contexts to drain.
pub const SYNC_SCANS_TAG: &str = "sync-scans";

/// Lifecycle of one arbiter version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created, shell not cached yet.
    Parsed,
    /// Shell cached; waiting to take over.
    Waiting,
    /// Controlling attached contexts.
    Active,
}

/// Outcome of [`Arbiter::activate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Generations removed before claiming.
    pub deleted_generations: Vec<String>,
    /// Contexts attached at claim time.
    pub claimed_contexts: usize,
}

/// Intercepts requests and resolves them per resource class.
pub struct Arbiter {
    transport: Arc<dyn Transport>,
    cache: Arc<ByteCache>,
    config: ArbiterConfig,
    origin: Url,
    endpoint: ArbiterEndpoint,
    state: Mutex<LifecycleState>,
}

impl Arbiter {
    /// Create an arbiter serving `origin`.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<ByteCache>,
        config: ArbiterConfig,
        origin: Url,
        endpoint: ArbiterEndpoint,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            cache,
            config,
            origin,
            endpoint,
            state: Mutex::new(LifecycleState::Parsed),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ByteCache> {
        &self.cache
    }

    fn asset_url(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| Error::InvalidInput(format!("Invalid asset path '{}': {}", path, e)))
    }

    // ============ LIFECYCLE ============

    /// Pre-cache the shell.
    ///
    /// All assets are fetched first and committed together; if any fetch
    /// fails or returns a failure status, nothing is cached and the arbiter
    /// stays un-installed so the host can retry.
    pub async fn install(&self) -> Result<()> {
        info!("Installing arbiter");

        let requests = self
            .config
            .shell_assets
            .iter()
            .map(|path| self.asset_url(path).map(Request::get))
            .collect::<Result<Vec<_>>>()?;

        let responses = try_join_all(requests.iter().map(|request| async move {
            let response = self.transport.fetch(request).await?;
            if !response.is_success() {
                return Err(Error::from_status(
                    response.status.as_u16(),
                    format!("Shell asset {} failed", request.url.path()),
                ));
            }
            Ok((request.identity(), response))
        }))
        .await
        .map_err(|e| {
            warn!("Install aborted: {}", e);
            e
        })?;

        debug!("Caching {} shell assets", responses.len());
        self.cache.put_all(&self.config.static_generation, responses);

        let mut state = self.lock_state();
        if *state == LifecycleState::Parsed {
            *state = LifecycleState::Waiting;
        }
        Ok(())
    }

    /// Delete stale generations, then claim attached contexts.
    ///
    /// # Errors
    /// - Called before a successful install
    pub fn activate(&self) -> Result<Activation> {
        if self.state() == LifecycleState::Parsed {
            return Err(Error::InvalidInput(
                "Cannot activate before install".to_string(),
            ));
        }

        info!("Activating arbiter");
        let allow = self.config.allow_list();
        let mut deleted_generations = Vec::new();
        for name in self.cache.generation_names() {
            if !allow.contains(&name.as_str()) {
                info!("Deleting old cache generation: {}", name);
                self.cache.delete_generation(&name);
                deleted_generations.push(name);
            }
        }

        *self.lock_state() = LifecycleState::Active;
        let claimed_contexts = self.endpoint.attached_contexts();
        debug!("Claimed {} contexts", claimed_contexts);

        Ok(Activation {
            deleted_generations,
            claimed_contexts,
        })
    }

    /// Activate now if installed and waiting. Returns whether it activated.
    pub fn skip_waiting(&self) -> Result<bool> {
        if self.state() != LifecycleState::Waiting {
            return Ok(false);
        }
        self.activate().map(|_| true)
    }

    // ============ SIGNALS ============

    /// React to a connectivity transition.
    ///
    /// Returns the number of contexts asked to drain.
    pub fn on_connectivity(&self, transition: Transition) -> usize {
        match transition {
            Transition::Online => {
                let reached = self.endpoint.broadcast_sync_scans();
                info!("Back online, asked {} contexts to sync", reached);
                reached
            }
            Transition::Offline => 0,
        }
    }

    /// React to a background-sync event.
    pub fn on_background_sync(&self, tag: &str) -> usize {
        if tag != SYNC_SCANS_TAG {
            debug!("Ignoring background sync tag {}", tag);
            return 0;
        }
        self.endpoint.broadcast_sync_scans()
    }

    /// Serve `SkipWaiting` requests and connectivity transitions until both
    /// sources close.
    pub async fn run(
        self: Arc<Self>,
        mut inbox: SkipWaitingInbox,
        mut transitions: ConnectivitySubscription,
    ) {
        let mut inbox_open = true;
        let mut transitions_open = true;

        while inbox_open || transitions_open {
            tokio::select! {
                message = inbox.recv(), if inbox_open => match message {
                    Some(_) => {
                        if let Err(e) = self.skip_waiting() {
                            warn!("Skip waiting failed: {}", e);
                        }
                    }
                    None => inbox_open = false,
                },
                transition = transitions.recv(), if transitions_open => match transition {
                    Some(transition) => {
                        self.on_connectivity(transition);
                    }
                    None => transitions_open = false,
                },
            }
        }
        debug!("Arbiter loop finished");
    }

    // ============ REQUESTS ============

    /// Resolve a request.
    ///
    /// Until activated the arbiter does not control anything and requests go
    /// straight to the network.
    pub async fn handle(&self, request: &Request) -> Result<Response> {
        if self.state() != LifecycleState::Active {
            return self.transport.fetch(request).await;
        }

        match classify(&self.config, request) {
            RequestClass::Write => self.transport.fetch(request).await,
            RequestClass::Navigation => self.navigate(request).await,
            RequestClass::Static => self.cache_first(request).await,
            RequestClass::ApiRead => Ok(self.network_first(request).await),
        }
    }

    /// Cache hit, else network with a copy stored on success.
    ///
    /// # Errors
    /// - Network failure for a non-navigational request with no cache hit
    pub async fn cache_first(&self, request: &Request) -> Result<Response> {
        let identity = request.identity();
        if let Some(cached) = self.cache.lookup(&identity) {
            return Ok(cached);
        }

        match self.transport.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.cache
                        .put(&self.config.static_generation, identity, response.clone());
                }
                Ok(response)
            }
            Err(e) if request.is_navigation() => self.shell().ok_or(e),
            Err(e) => Err(e),
        }
    }

    /// Network with a copy stored on success, else cache, else the
    /// synthesized offline response. Never fails.
    pub async fn network_first(&self, request: &Request) -> Response {
        let identity = request.identity();
        match self.transport.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    let evicted = self.cache.put_bounded(
                        &self.config.api_generation,
                        identity,
                        response.clone(),
                        self.config.max_api_entries,
                    );
                    if evicted > 0 {
                        debug!(evicted, "API cache at limit");
                    }
                }
                response
            }
            Err(e) => {
                debug!("Network-first fallback for {}: {}", request.url, e);
                self.cache
                    .lookup(&identity)
                    .unwrap_or_else(|| Response::offline(&self.config.offline_message))
            }
        }
    }

    async fn navigate(&self, request: &Request) -> Result<Response> {
        match self.transport.fetch(request).await {
            Ok(response) => Ok(response),
            Err(e) => self.shell().ok_or(e),
        }
    }

    /// The cached shell document.
    fn shell(&self) -> Option<Response> {
        let url = self.asset_url(&self.config.shell_document).ok()?;
        self.cache
            .lookup_in(&self.config.static_generation, &Request::get(url).identity())
    }
}
