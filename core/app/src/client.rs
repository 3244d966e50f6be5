//! Client façade: the only surface presentation code calls.
//!
//! Every call settles to an [`Outcome`]. Transport failures are absorbed by
//! queueing (writes) or the response cache (reads) and never reach the
//! caller as errors.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use agrosentinel_common::{
    CompletedRecord, Coordinates, DeadLetter, Error, NewRecord, Outcome, PendingId,
    PendingReceipt, PendingWrite, Result, WriteContext, DEFAULT_LANGUAGE, LANGUAGE_SETTING,
};
use agrosentinel_store::Store;
use agrosentinel_sync::{ConnectivityMonitor, DrainOutcome, SyncCoordinator, SyncStatus, TriggerReason};
use agrosentinel_transport::{AnalysisApi, AnalysisUpload, Request, Url, META_CONTENT_TYPE};

use crate::config::AppConfig;

/// Acknowledgment shown when a capture is queued.
pub const PENDING_MESSAGE: &str = "Scan saved! It will be analyzed when you reconnect.";

const LANGUAGES_KEY: &str = "languages";
const LOCAL_HISTORY_LIMIT: usize = 50;

/// How a read consults the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Live fetch when online; any cached copy when the network fails.
    NetworkFirst,
    /// Cached copy younger than `ttl`, else a live fetch, else any cached copy.
    CacheFirst { ttl: Duration },
}

/// A language the backend can answer in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Language {
    fn new(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            name: Some(name.to_string()),
        }
    }

    /// Languages offered when the backend list is unavailable.
    pub fn defaults() -> Vec<Language> {
        vec![
            Language::new("en", "English"),
            Language::new("hi", "हिंदी"),
            Language::new("te", "తెలుగు"),
            Language::new("ta", "தமிழ்"),
            Language::new("kn", "ಕನ್ನಡ"),
        ]
    }
}

/// Scans near a location.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationHistory {
    /// Server-side history for the location.
    Remote(Value),
    /// Most recent local records, served when the server is unreachable.
    Local(Vec<CompletedRecord>),
}

/// Entry point for presentation code.
#[derive(Clone)]
pub struct Client {
    store: Store,
    api: Arc<dyn AnalysisApi>,
    connectivity: Arc<ConnectivityMonitor>,
    coordinator: Arc<SyncCoordinator>,
    config: AppConfig,
}

impl Client {
    pub fn new(
        store: Store,
        api: Arc<dyn AnalysisApi>,
        connectivity: Arc<ConnectivityMonitor>,
        coordinator: Arc<SyncCoordinator>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            api,
            connectivity,
            coordinator,
            config,
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn offline<T>(&self) -> Outcome<T> {
        Outcome::Offline(self.config.arbiter.offline_message.clone())
    }

    /// Run one network exchange under the configured request timeout.
    async fn bounded<T>(&self, exchange: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.config.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport(format!(
                "Request timed out after {}ms",
                self.config.request_timeout.as_millis()
            ))),
        }
    }

    // ============ WRITES ============

    /// Submit a capture for disease and risk analysis.
    ///
    /// Online, the capture is delivered straight away and the result stored
    /// as a completed record. If the network fails, or the device is
    /// offline, the capture is queued and `Pending` is returned. Server
    /// failures are surfaced and nothing is queued.
    pub async fn analyze(&self, image: impl Into<Bytes>, coordinates: Coordinates) -> Outcome<Value> {
        self.analyze_as(image, coordinates, None).await
    }

    /// Like [`Client::analyze`], recording the capture's content type for
    /// a later replay.
    pub async fn analyze_as(
        &self,
        image: impl Into<Bytes>,
        coordinates: Coordinates,
        content_type: Option<&str>,
    ) -> Outcome<Value> {
        settle(self.try_analyze(image.into(), coordinates, content_type).await)
    }

    async fn try_analyze(
        &self,
        image: Bytes,
        coordinates: Coordinates,
        content_type: Option<&str>,
    ) -> Result<Outcome<Value>> {
        if image.is_empty() {
            return Err(Error::InvalidInput("Image is empty".to_string()));
        }

        // One id for the live attempt and any replay, so the server can
        // drop a replay of an upload it already processed.
        let id = PendingId::generate();
        if !self.is_online() {
            return self.queue(id, image, coordinates, content_type).await;
        }

        let language = self.current_language().await?;
        let mut upload = AnalysisUpload::live(image.clone(), coordinates, &language)
            .with_idempotency_key(id);
        if let Some(content_type) = content_type {
            upload.content_type = content_type.to_string();
        }

        match self.bounded(self.api.analyze(&upload)).await {
            Ok(payload) => {
                let record = self
                    .store
                    .insert_record(NewRecord::live(payload.clone(), coordinates))
                    .await?;
                info!(record = record.id, "Analysis delivered live");
                Ok(Outcome::Ok(payload))
            }
            Err(err) if err.is_transport() => {
                warn!("Live analysis failed, queueing: {}", err);
                self.queue(id, image, coordinates, content_type).await
            }
            Err(err) => Err(err),
        }
    }

    async fn queue(
        &self,
        id: PendingId,
        image: Bytes,
        coordinates: Coordinates,
        content_type: Option<&str>,
    ) -> Result<Outcome<Value>> {
        let mut context = WriteContext::new(coordinates);
        if let Some(content_type) = content_type {
            context = context.with_metadata(META_CONTENT_TYPE, content_type);
        }
        let write = PendingWrite::with_id(id, image.to_vec(), context);
        let enqueued_at = write.enqueued_at;
        let id = self.store.enqueue(write).await?;

        info!(id = %id, "Capture queued for sync");
        Ok(Outcome::Pending(PendingReceipt {
            id,
            enqueued_at,
            message: PENDING_MESSAGE.to_string(),
        }))
    }

    /// Classify a capture without risk scoring. Online only; never queued.
    pub async fn predict(&self, image: impl Into<Bytes>) -> Outcome<Value> {
        if !self.is_online() {
            return self.offline();
        }
        let image = image.into();
        settle(
            async {
                let language = self.current_language().await?;
                let payload = self.bounded(self.api.predict(image, &language)).await?;
                Ok::<_, Error>(Outcome::Ok(payload))
            }
            .await,
        )
    }

    // ============ READS ============

    /// GET a JSON document from the API under `policy`.
    ///
    /// Responses are cached under the request's canonical identity.
    pub async fn read_json(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
        policy: ReadPolicy,
    ) -> Outcome<Value> {
        settle(
            async {
                let url = self.api.endpoint(segments, query)?;
                let key = Request::get(url.clone()).identity();
                self.read_through(&key, &url, policy).await
            }
            .await,
        )
    }

    /// [`Client::read_json`] cache-first with the configured window.
    pub async fn read_cached(&self, segments: &[&str], query: &[(&str, String)]) -> Outcome<Value> {
        let ttl = self.config.cache_ttls.cache_first;
        self.read_json(segments, query, ReadPolicy::CacheFirst { ttl })
            .await
    }

    async fn read_through(&self, key: &str, url: &Url, policy: ReadPolicy) -> Result<Outcome<Value>> {
        if let ReadPolicy::CacheFirst { ttl } = policy {
            if let Some(entry) = self.store.get_fresh(key, chrono_ttl(ttl)?).await? {
                debug!("Cache hit for {}", key);
                return Ok(Outcome::Ok(entry.value));
            }
        }

        if self.is_online() {
            match self.bounded(self.api.get_json(url)).await {
                Ok(value) => {
                    self.store.put_cache(key, &value).await?;
                    return Ok(Outcome::Ok(value));
                }
                Err(err) if err.is_transport() => {
                    warn!("Live read of {} failed: {}", url.path(), err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(match self.store.get_cache(key).await? {
            Some(entry) => {
                debug!("Serving cached copy of {} from {}", key, entry.cached_at);
                Outcome::Ok(entry.value)
            }
            None => self.offline(),
        })
    }

    /// Weather at `coordinates`.
    ///
    /// Cached copies are tagged with `"cached": true`. Offline, a copy up to
    /// `weather_offline` old is served; after a failed live fetch, up to
    /// `weather_on_error` old.
    pub async fn weather(&self, coordinates: Coordinates) -> Outcome<Value> {
        settle(self.try_weather(coordinates).await)
    }

    async fn try_weather(&self, coordinates: Coordinates) -> Result<Outcome<Value>> {
        let key = format!("weather_{}", coordinates.cache_fragment());
        let ttls = &self.config.cache_ttls;

        if !self.is_online() {
            return Ok(match self.store.get_fresh(&key, chrono_ttl(ttls.weather_offline)?).await? {
                Some(entry) => Outcome::Ok(mark_cached(entry.value)),
                None => self.offline(),
            });
        }

        let url = self.api.endpoint(&["weather"], &coordinate_query(coordinates))?;
        match self.bounded(self.api.get_json(&url)).await {
            Ok(value) => {
                self.store.put_cache(&key, &value).await?;
                Ok(Outcome::Ok(value))
            }
            Err(err) => {
                warn!("Weather fetch failed: {}", err);
                match self.store.get_fresh(&key, chrono_ttl(ttls.weather_on_error)?).await? {
                    Some(entry) => Ok(Outcome::Ok(mark_cached(entry.value))),
                    None => Err(err),
                }
            }
        }
    }

    /// Languages the backend answers in.
    ///
    /// Falls back to the cached list, then to [`Language::defaults`]; only a
    /// store failure makes this anything but `Ok`.
    pub async fn languages(&self) -> Outcome<Vec<Language>> {
        settle(self.try_languages().await)
    }

    async fn try_languages(&self) -> Result<Outcome<Vec<Language>>> {
        if self.is_online() {
            match self.fetch_languages().await {
                Ok(languages) => {
                    self.store
                        .put_cache(LANGUAGES_KEY, &serde_json::to_value(&languages)?)
                        .await?;
                    return Ok(Outcome::Ok(languages));
                }
                Err(err) => warn!("Language list unavailable: {}", err),
            }
        }

        let cached = self
            .store
            .get_cache(LANGUAGES_KEY)
            .await?
            .and_then(|entry| serde_json::from_value(entry.value).ok());
        Ok(Outcome::Ok(cached.unwrap_or_else(Language::defaults)))
    }

    async fn fetch_languages(&self) -> Result<Vec<Language>> {
        let url = self.api.endpoint(&["languages"], &[])?;
        let mut body = self.bounded(self.api.get_json(&url)).await?;
        let list = body
            .get_mut("languages")
            .map(Value::take)
            .ok_or_else(|| Error::Serialization("Missing 'languages' field".to_string()))?;
        Ok(serde_json::from_value(list)?)
    }

    /// Scans recorded near `coordinates`, or the local history when the
    /// server cannot be reached.
    pub async fn location_history(&self, coordinates: Coordinates) -> Outcome<LocationHistory> {
        settle(self.try_location_history(coordinates).await)
    }

    async fn try_location_history(&self, coordinates: Coordinates) -> Result<Outcome<LocationHistory>> {
        if self.is_online() {
            let url = self
                .api
                .endpoint(&["history", "location"], &coordinate_query(coordinates))?;
            match self.bounded(self.api.get_json(&url)).await {
                Ok(value) => return Ok(Outcome::Ok(LocationHistory::Remote(value))),
                Err(err) => warn!("Location history unavailable, using local records: {}", err),
            }
        }
        let records = self.store.list_records(LOCAL_HISTORY_LIMIT).await?;
        Ok(Outcome::Ok(LocationHistory::Local(records)))
    }

    /// Remedy advice for a disease. `Ok(None)` when it cannot be fetched.
    pub async fn remedy(&self, disease: &str) -> Outcome<Option<Value>> {
        if !self.is_online() {
            return Outcome::Ok(None);
        }
        let fetched = async {
            let url = self.api.endpoint(&["remedies", disease], &[])?;
            self.bounded(self.api.get_json(&url)).await
        }
        .await;
        match fetched {
            Ok(value) => Outcome::Ok(Some(value)),
            Err(err) => {
                debug!("No remedy for {}: {}", disease, err);
                Outcome::Ok(None)
            }
        }
    }

    // ============ CHAT ============

    /// Send a message to the farming assistant in the current language.
    ///
    /// Online only; nothing is queued or cached. A network failure settles
    /// to `Offline`.
    pub async fn chat(&self, message: &str, session_id: Option<&str>) -> Outcome<Value> {
        if message.trim().is_empty() {
            return Outcome::from_error(Error::InvalidInput("Message is empty".to_string()));
        }
        if !self.is_online() {
            return self.offline();
        }
        let sent = async {
            let language = self.current_language().await?;
            let url = self.api.endpoint(&["chat", "send"], &[])?;
            let body = serde_json::json!({
                "message": message,
                "language": language,
                "session_id": session_id,
            });
            self.bounded(self.api.post_json(&url, &body)).await
        }
        .await;
        self.online_only(sent)
    }

    /// Starter questions for the assistant.
    pub async fn quick_questions(&self) -> Outcome<Value> {
        self.chat_listing("quick-questions").await
    }

    /// Follow-up suggestions for the assistant.
    pub async fn chat_suggestions(&self) -> Outcome<Value> {
        self.chat_listing("suggestions").await
    }

    async fn chat_listing(&self, name: &str) -> Outcome<Value> {
        if !self.is_online() {
            return self.offline();
        }
        let fetched = async {
            let language = self.current_language().await?;
            let url = self.api.endpoint(&["chat", name], &[("language", language)])?;
            self.bounded(self.api.get_json(&url)).await
        }
        .await;
        self.online_only(fetched)
    }

    fn online_only(&self, result: Result<Value>) -> Outcome<Value> {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(err) if err.is_transport() => {
                debug!("Assistant unreachable: {}", err);
                self.offline()
            }
            Err(err) => Outcome::from_error(err),
        }
    }

    // ============ LOCAL STATE ============

    /// Completed analyses, newest first.
    pub async fn history(&self, limit: usize) -> Outcome<Vec<CompletedRecord>> {
        self.store.list_records(limit).await.map_err(Error::from).into()
    }

    pub async fn clear_history(&self) -> Outcome<()> {
        self.store.clear_records().await.map_err(Error::from).into()
    }

    pub async fn pending_count(&self) -> Outcome<u64> {
        self.store.count_pending().await.map_err(Error::from).into()
    }

    /// Drain the queue now.
    ///
    /// `Offline` when there is no network; `Ok(AlreadyRunning)` when a drain
    /// is in flight.
    pub async fn sync_now(&self) -> Outcome<DrainOutcome> {
        match self.coordinator.trigger(TriggerReason::Requested).await {
            Ok(DrainOutcome::Offline) => self.offline(),
            other => other.into(),
        }
    }

    pub async fn status(&self) -> Outcome<SyncStatus> {
        self.coordinator.status().await.into()
    }

    /// Language sent with analyses, including replays.
    pub async fn language(&self) -> Outcome<String> {
        self.current_language().await.into()
    }

    async fn current_language(&self) -> Result<String> {
        let value = self
            .store
            .get_setting_or(LANGUAGE_SETTING, Value::from(DEFAULT_LANGUAGE))
            .await?;
        Ok(value.as_str().unwrap_or(DEFAULT_LANGUAGE).to_string())
    }

    /// Persist the preferred language code (e.g. `"hi"`).
    pub async fn set_language(&self, code: &str) -> Outcome<()> {
        let valid = !code.is_empty()
            && code.len() <= 16
            && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Outcome::from_error(Error::InvalidInput(format!(
                "Invalid language code: {:?}",
                code
            )));
        }
        self.store
            .set_setting(LANGUAGE_SETTING, &Value::from(code))
            .await
            .map_err(Error::from)
            .into()
    }

    // ============ DEAD LETTERS ============

    pub async fn dead_letters(&self) -> Outcome<Vec<DeadLetter>> {
        self.store.list_dead_letters().await.map_err(Error::from).into()
    }

    /// Put a dead letter back at its original queue position with a fresh
    /// attempt budget. `Ok(false)` if no such dead letter exists.
    pub async fn requeue_dead_letter(&self, id: PendingId) -> Outcome<bool> {
        self.store.requeue_dead_letter(id).await.map_err(Error::from).into()
    }

    pub async fn discard_dead_letter(&self, id: PendingId) -> Outcome<bool> {
        self.store.discard_dead_letter(id).await.map_err(Error::from).into()
    }

    /// Drop cached responses older than the retention window.
    pub async fn prune_cache(&self) -> Outcome<usize> {
        settle(
            async {
                let cutoff = chrono::Utc::now() - chrono_ttl(self.config.cache_ttls.retention)?;
                Ok::<_, Error>(Outcome::Ok(self.store.purge_cache(cutoff).await?))
            }
            .await,
        )
    }
}

fn settle<T>(result: Result<Outcome<T>>) -> Outcome<T> {
    result.unwrap_or_else(Outcome::from_error)
}

fn chrono_ttl(ttl: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(ttl)
        .map_err(|_| Error::InvalidInput(format!("Cache window out of range: {:?}", ttl)))
}

fn coordinate_query(coordinates: Coordinates) -> [(&'static str, String); 2] {
    [
        ("latitude", coordinates.latitude.to_string()),
        ("longitude", coordinates.longitude.to_string()),
    ]
}

fn mark_cached(mut value: Value) -> Value {
    if let Some(object) = value.as_object_mut() {
        object.insert("cached".to_string(), Value::Bool(true));
    }
    value
}
