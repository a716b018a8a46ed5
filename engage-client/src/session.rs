//! Session - the main interface for engage-sync.
//!
//! A [`Session`] owns every long-lived piece of the sync core for one run of
//! the host application. It is created with [`Session::init`] and torn down
//! with [`Session::shutdown`]; there is no global state.
//!
//! # Architecture
//!
//! ```text
//! host ─ apply_campaigns ─→ EligibilityEngine ─ required assets ─→ AssetSyncManager ─→ DiskStore
//!      ─ eligible_campaigns ←──────── evaluate(now, store snapshot) ←───────────────────────┘
//!      ─ track ─→ EventQueue ─→ Dispatcher ─→ Transport
//!                     ↑ flush task (timer, watermark, backoff)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let session = Session::init(config, downloader, transport, Arc::new(SystemClock)).await?;
//!
//! let report = session.apply_campaigns(payload).wait().await;
//! let eligible = session.eligible_campaigns();
//! session.track("event", parameters, payload).await?;
//!
//! session.shutdown().await;
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use engage_assets::{
    AssetStore, AssetSyncManager, DiskStore, Downloader, PruneReport, ReconcileHandle, StoreError,
};
use engage_core::{
    Clock, EligibilityEngine, EligibilityResult, GenerationId, Ineligibility, RegistrationTracker,
};
use engage_types::{Attributes, CampaignId, CampaignPayload, SequenceNumber, SessionId};
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::config::{Config, ConfigError, PUSH_TOKEN_FILE};
use crate::dispatcher::{spawn_flush_task, Dispatcher, FlushOutcome};
use crate::push::{select_provider, PushError, TokenProvider};
use crate::queue::{write_atomic, EventQueue, QueueError};
use crate::transport::Transport;

/// Event type used to re-announce device identity.
pub const DEVICE_UPDATE_EVENT: &str = "device_update";

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The asset cache could not be opened.
    #[error("asset store error: {0}")]
    Store(#[from] StoreError),

    /// The event queue could not be opened or written.
    #[error("event queue error: {0}")]
    Queue(#[from] QueueError),

    /// Push token handling failed.
    #[error("push error: {0}")]
    Push(#[from] PushError),
}

/// Explicit context for one run of the sync core.
pub struct Session<D, T>
where
    D: Downloader + 'static,
    T: Transport + 'static,
{
    config: Config,
    clock: Arc<dyn Clock>,
    store: Arc<DiskStore>,
    assets: AssetSyncManager<Arc<DiskStore>, D>,
    engine: RwLock<EligibilityEngine>,
    queue: Arc<EventQueue>,
    dispatcher: Arc<Dispatcher<T>>,
    wake: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    registration: tokio::sync::Mutex<RegistrationTracker>,
    provider: Mutex<Option<Arc<dyn TokenProvider>>>,
}

impl<D, T> Session<D, T>
where
    D: Downloader + 'static,
    T: Transport + 'static,
{
    /// Open the cache and the event queue and start the background workers.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn init(
        config: Config,
        downloader: D,
        transport: T,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let store = DiskStore::open(config.storage.assets_dir())
            .await?
            .with_sync_writes(config.assets.sync_writes);
        let store = Arc::new(store);

        let queue = EventQueue::open(
            config.storage.events_dir(),
            config.events.queue_options(),
            Arc::clone(&clock),
        )
        .await?;
        let queue = Arc::new(queue);
        let registration = load_registration(&config.storage.push_token_file()).await;

        let assets = AssetSyncManager::new(
            Arc::clone(&store),
            downloader,
            config.assets.sync_config(),
        );

        let session_id = SessionId::new();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            transport,
            session_id,
            config.device.identity(),
            config.events.dispatch_config(),
        ));

        let wake = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let flush_task = spawn_flush_task(Arc::clone(&dispatcher), Arc::clone(&wake), shutdown_rx);

        tracing::info!(
            "Session {} started: {} cached assets, {} pending events",
            session_id,
            store.snapshot().len(),
            queue.len().await
        );

        Ok(Self {
            config,
            clock,
            store,
            assets,
            engine: RwLock::new(EligibilityEngine::new()),
            queue,
            dispatcher,
            wake,
            shutdown,
            flush_task: Mutex::new(Some(flush_task)),
            registration: tokio::sync::Mutex::new(registration),
            provider: Mutex::new(None),
        })
    }

    fn engine(&self) -> RwLockReadGuard<'_, EligibilityEngine> {
        self.engine.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn provider(&self) -> MutexGuard<'_, Option<Arc<dyn TokenProvider>>> {
        self.provider.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id sent with every event batch of this session.
    pub fn session_id(&self) -> SessionId {
        self.dispatcher.session()
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The asset cache.
    pub fn store(&self) -> &Arc<DiskStore> {
        &self.store
    }

    /// The asset sync manager.
    pub fn assets(&self) -> &AssetSyncManager<Arc<DiskStore>, D> {
        &self.assets
    }

    /// The durable event queue.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// The event dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher<T>> {
        &self.dispatcher
    }

    /// The active campaign generation.
    pub fn generation(&self) -> GenerationId {
        self.engine().generation()
    }

    // =========================================================================
    // Campaigns and assets
    // =========================================================================

    /// Replace the campaign set and start fetching its assets.
    ///
    /// Campaigns become eligible as their assets land; the returned handle
    /// reports which assets could not be fetched.
    pub fn apply_campaigns(&self, payload: CampaignPayload) -> ReconcileHandle {
        let (generation, required) = {
            let mut engine = self.engine.write().unwrap_or_else(PoisonError::into_inner);
            let generation = engine.load_generation(payload.campaigns);
            (generation, engine.required_assets())
        };

        let cdn_root = if payload.cdn_root.is_empty() {
            self.config.assets.cdn_root.as_str()
        } else {
            payload.cdn_root.as_str()
        };

        tracing::info!(
            "Loaded campaign generation {} ({} required assets)",
            generation.value(),
            required.len()
        );
        self.assets.reconcile_from(cdn_root, required)
    }

    /// Evaluate the active generation against the cache and the clock.
    pub fn eligible_campaigns(&self) -> EligibilityResult {
        let assets_on_disk = self.store.snapshot();
        self.engine().evaluate(self.clock.now(), &assets_on_disk)
    }

    /// Why each campaign of the active generation is (not) eligible.
    pub fn explain_campaigns(&self) -> BTreeMap<CampaignId, Option<Ineligibility>> {
        let assets_on_disk = self.store.snapshot();
        self.engine().explain(self.clock.now(), &assets_on_disk)
    }

    /// Delete cached assets the active generation no longer references.
    pub async fn prune_assets(&self) -> PruneReport {
        let keep = self.engine().required_digests();
        self.store.prune(&keep).await
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Queue an event for delivery.
    ///
    /// Wakes the flush task once the queue reaches the flush watermark.
    pub async fn track(
        &self,
        event_type: &str,
        parameters: Attributes,
        payload: Attributes,
    ) -> Result<SequenceNumber, SessionError> {
        let sequence = self.queue.enqueue(event_type, parameters, payload).await?;

        if self.queue.len().await >= self.config.events.flush_watermark {
            self.wake.notify_one();
        }
        Ok(sequence)
    }

    /// Deliver the oldest pending batch now.
    pub async fn flush(&self) -> FlushOutcome {
        self.dispatcher.flush().await
    }

    // =========================================================================
    // Push registration
    // =========================================================================

    /// Pick the first available push provider for [`refresh_token`](Self::refresh_token).
    ///
    /// Returns the selected provider's name.
    pub fn use_push_providers(&self, providers: &[Arc<dyn TokenProvider>]) -> Option<String> {
        let selected = select_provider(providers);
        let name = selected.as_ref().map(|p| p.name().to_string());
        *self.provider() = selected;
        name
    }

    /// Record a token reported by `provider`.
    ///
    /// A new token is announced with a `device_update` event, whose sequence
    /// number is returned. Repeated or empty tokens change nothing.
    pub async fn register_token(
        &self,
        provider: &str,
        token: &str,
    ) -> Result<Option<SequenceNumber>, SessionError> {
        let mut registration = self.registration.lock().await;

        // Only remember the token once the announcement is queued
        let mut updated = registration.clone();
        if !updated.observe(token).is_changed() {
            return Ok(None);
        }

        let mut parameters = Attributes::new();
        parameters.insert("push_token".into(), token.trim().into());
        parameters.insert("push_provider".into(), provider.into());

        let sequence = self
            .queue
            .enqueue(DEVICE_UPDATE_EVENT, parameters, Attributes::new())
            .await?;
        *registration = updated;

        // A lost file only means the token is announced again next start
        let data_dir = &self.config.storage.data_dir;
        if let Err(e) = write_atomic(data_dir, PUSH_TOKEN_FILE, token.trim().as_bytes()).await {
            tracing::warn!("Failed to persist push token: {}", e);
        }

        tracing::info!("Push token changed ({}); device update queued", provider);
        Ok(Some(sequence))
    }

    /// Ask the selected provider for its current token and register it.
    pub async fn refresh_token(&self) -> Result<Option<SequenceNumber>, SessionError> {
        let provider = self.provider().clone().ok_or(PushError::NoProvider)?;

        match provider.acquire_token().await? {
            Some(token) => self.register_token(provider.name(), &token).await,
            None => Ok(None),
        }
    }

    /// The last registered push token.
    pub async fn push_token(&self) -> Option<String> {
        self.registration.lock().await.current().map(str::to_owned)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the background workers.
    ///
    /// Stops the flush task, makes one last best-effort flush, then stops the
    /// download workers. Pending events stay on disk for the next session.
    pub async fn shutdown(&self) {
        let task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return;
        };

        let _ = self.shutdown.send(true);
        if let Err(e) = task.await {
            tracing::warn!("Flush task ended abnormally: {}", e);
        }

        match self.dispatcher.flush().await {
            FlushOutcome::Failed { error, .. } => {
                tracing::warn!("Final flush failed: {}; events kept for next session", error)
            }
            outcome => tracing::debug!("Final flush: {:?}", outcome),
        }

        self.assets.shutdown();
        tracing::info!("Session {} stopped", self.session_id());
    }
}

impl<D, T> Drop for Session<D, T>
where
    D: Downloader + 'static,
    T: Transport + 'static,
{
    fn drop(&mut self) {
        if let Some(task) = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl<D, T> std::fmt::Debug for Session<D, T>
where
    D: Downloader + 'static,
    T: Transport + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Restore the token announced by a previous session.
async fn load_registration(path: &Path) -> RegistrationTracker {
    match tokio::fs::read_to_string(path).await {
        Ok(token) if !token.trim().is_empty() => RegistrationTracker::with_token(token.trim()),
        Ok(_) => RegistrationTracker::new(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistrationTracker::new(),
        Err(e) => {
            tracing::warn!("Failed to read push token {}: {}", path.display(), e);
            RegistrationTracker::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::StaticTokenProvider;
    use crate::transport::MockTransport;
    use engage_assets::MockDownloader;
    use engage_core::ManualClock;
    use engage_types::Timestamp;
    use tempfile::TempDir;

    async fn session(dir: &TempDir) -> Session<MockDownloader, MockTransport> {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        Session::init(
            config,
            MockDownloader::new(),
            MockTransport::new(),
            Arc::new(ManualClock::new(Timestamp::from_millis(0))),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn init_creates_storage_layout() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;

        assert!(dir.path().join("assets").is_dir());
        assert!(dir.path().join("events").is_dir());
        assert!(session.eligible_campaigns().is_empty());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.assets.max_attempts = 0;

        let result = Session::init(
            config,
            MockDownloader::new(),
            MockTransport::new(),
            Arc::new(ManualClock::default()),
        )
        .await;
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn same_token_twice_enqueues_one_update() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;

        let first = session.register_token("fcm", "tok-1").await.unwrap();
        let second = session.register_token("fcm", "tok-1").await.unwrap();
        let empty = session.register_token("fcm", "  ").await.unwrap();

        assert!(first.is_some());
        assert_eq!(second, None);
        assert_eq!(empty, None);

        let events = session.queue().pending_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, DEVICE_UPDATE_EVENT);
        assert_eq!(events[0].parameters["push_token"], "tok-1");
        assert_eq!(events[0].parameters["push_provider"], "fcm");
        assert_eq!(session.push_token().await.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn known_token_is_not_announced_after_restart() {
        let dir = TempDir::new().unwrap();
        {
            let session = session(&dir).await;
            assert!(session.register_token("fcm", "tok-1").await.unwrap().is_some());
            session.shutdown().await;
        }

        // The final flush may have delivered the first update
        let session = session(&dir).await;
        let queued = session.queue().len().await;
        assert_eq!(session.push_token().await.as_deref(), Some("tok-1"));
        assert_eq!(session.register_token("fcm", "tok-1").await.unwrap(), None);
        assert_eq!(session.queue().len().await, queued);

        assert!(session.register_token("fcm", "tok-2").await.unwrap().is_some());
        assert_eq!(session.queue().len().await, queued + 1);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn refresh_token_uses_selected_provider() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;

        assert!(matches!(
            session.refresh_token().await,
            Err(SessionError::Push(PushError::NoProvider))
        ));

        let unavailable = StaticTokenProvider::new("fcm");
        unavailable.set_available(false);
        let hms = StaticTokenProvider::new("hms");
        let providers: Vec<Arc<dyn TokenProvider>> =
            vec![Arc::new(unavailable), Arc::new(hms.clone())];
        assert_eq!(session.use_push_providers(&providers).as_deref(), Some("hms"));

        // No token yet
        assert_eq!(session.refresh_token().await.unwrap(), None);

        hms.set_token("tok-hms");
        assert!(session.refresh_token().await.unwrap().is_some());
        assert!(session.refresh_token().await.unwrap().is_none());

        hms.set_token("tok-hms-2");
        assert!(session.refresh_token().await.unwrap().is_some());
        assert_eq!(session.queue().len().await, 2);
    }
}
