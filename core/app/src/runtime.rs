//! Wiring of the store, arbiter, coordinator and scheduler into one running
//! application.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use agrosentinel_arbiter::{Arbiter, ByteCache};
use agrosentinel_common::{message_channel, AppEndpoint, Result};
use agrosentinel_store::Store;
use agrosentinel_sync::{ConnectivityMonitor, SyncCoordinator, SyncScheduler};
use agrosentinel_transport::{AnalysisApi, ApiClient, Transport};

use crate::client::Client;
use crate::config::AppConfig;

/// A running application: the façade plus its background tasks.
pub struct App {
    client: Client,
    arbiter: Arc<Arbiter>,
    connectivity: Arc<ConnectivityMonitor>,
    scheduler: SyncScheduler,
    endpoint: AppEndpoint,
    arbiter_task: JoinHandle<()>,
    scheduler_task: JoinHandle<()>,
}

impl App {
    /// Open the store and start the arbiter and sync scheduler.
    ///
    /// The arbiter is installed and activated when the shell can be fetched.
    /// An install failure is logged and the arbiter keeps passing requests
    /// through; the rest of the application is unaffected.
    ///
    /// # Errors
    /// - Invalid configuration
    /// - The store cannot be opened or migrated
    pub async fn start(
        config: AppConfig,
        transport: Arc<dyn Transport>,
        initially_online: bool,
    ) -> Result<Self> {
        config.validate()?;
        info!(transport = transport.name(), online = initially_online, "Starting application");

        let store = match &config.store_path {
            Some(path) => Store::open(path).await?,
            None => Store::open_default().await?,
        };

        let connectivity = Arc::new(ConnectivityMonitor::new(initially_online));
        let api: Arc<dyn AnalysisApi> =
            Arc::new(ApiClient::new(transport.clone(), config.api_base()?)?);

        let (arbiter_endpoint, inbox) = message_channel();
        // Attach before the arbiter activates so it claims this context.
        let scheduler_endpoint = arbiter_endpoint.attach();
        let endpoint = arbiter_endpoint.attach();

        let arbiter = Arc::new(Arbiter::new(
            transport,
            Arc::new(ByteCache::new()),
            config.arbiter.clone(),
            config.origin_url()?,
            arbiter_endpoint,
        )?);
        if initially_online {
            match arbiter.install().await {
                Ok(()) => {
                    arbiter.activate()?;
                }
                Err(e) => warn!("Arbiter not installed, requests pass through: {}", e),
            }
        }
        let arbiter_task = tokio::spawn(
            arbiter
                .clone()
                .run(inbox, connectivity.subscribe()),
        );

        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            api.clone(),
            connectivity.clone(),
            config.sync.clone(),
        ));
        let (scheduler, handle) = SyncScheduler::new(coordinator.clone());
        let scheduler_task = tokio::spawn(handle.with_sync_scans(scheduler_endpoint).run());

        let client = Client::new(store, api, connectivity.clone(), coordinator, config);

        Ok(Self {
            client,
            arbiter,
            connectivity,
            scheduler,
            endpoint,
            arbiter_task,
            scheduler_task,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    /// Report a platform connectivity signal. Returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.connectivity.set_online(online)
    }

    /// Ask the arbiter to activate an installed version immediately.
    pub fn request_skip_waiting(&self) -> Result<()> {
        self.endpoint.request_skip_waiting()
    }

    /// Stop the scheduler, then the arbiter.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        if let Err(e) = self.scheduler_task.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
        self.arbiter_task.abort();
        info!("Application stopped");
    }
}
