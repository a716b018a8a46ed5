//! Asset reconciliation and download coordination.
//!
//! [`AssetSyncManager::reconcile`] takes the set of assets a campaign
//! generation needs, works out which ones are missing from the store, and
//! queues a download for each. It returns immediately with a
//! [`ReconcileHandle`] the caller can await.
//!
//! # Guarantees
//!
//! - At most one download per digest is in flight. A second reconcile asking
//!   for a digest that is already downloading attaches to the running task.
//! - At most `max_parallel_downloads` transfers run at once. Excess work waits
//!   in arrival order.
//! - Received bytes are hashed and compared with the requested digest before
//!   they reach the store.
//! - One failed asset never aborts its siblings.
//!
//! In-flight downloads are keyed by digest only. A reconcile for a newer
//! campaign generation does not cancel downloads started for an older one;
//! they still land in the cache and a later prune removes them.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use engage_core::Backoff;
use engage_types::{AssetRef, Digest};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::digest::DigestAlgorithm;
use crate::downloader::Downloader;
use crate::error::AssetFailure;
use crate::store::AssetStore;

/// Final state of one download task. `None` while the task is running.
type TaskState = Option<Result<(), AssetFailure>>;

/// Settings for [`AssetSyncManager`].
#[derive(Debug, Clone)]
pub struct AssetSyncConfig {
    /// URL prefix under which asset names are downloadable.
    pub cdn_root: String,
    /// Size of the download worker pool.
    pub max_parallel_downloads: usize,
    /// Attempts per asset before it is reported as failed.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Backoff,
    /// Hash used to verify downloaded bytes.
    pub algorithm: DigestAlgorithm,
}

impl Default for AssetSyncConfig {
    fn default() -> Self {
        Self {
            cdn_root: String::new(),
            max_parallel_downloads: 4,
            max_attempts: 3,
            backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(30))
                .with_jitter(Duration::from_millis(250)),
            algorithm: DigestAlgorithm::default(),
        }
    }
}

/// Outcome of one reconcile call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Assets downloaded and stored by this reconcile.
    pub succeeded: Vec<AssetRef>,
    /// Assets that could not be fetched, with the reason.
    pub failed: Vec<(AssetRef, AssetFailure)>,
    /// Desired assets that were already in the store.
    pub already_present: usize,
}

impl ReconcileReport {
    /// True when no asset failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Refs that failed, without the reasons.
    pub fn failed_refs(&self) -> Vec<&AssetRef> {
        self.failed.iter().map(|(asset, _)| asset).collect()
    }
}

/// Pending result of [`AssetSyncManager::reconcile`].
#[derive(Debug)]
pub struct ReconcileHandle {
    tasks: Vec<(AssetRef, watch::Receiver<TaskState>)>,
    already_present: usize,
}

impl ReconcileHandle {
    /// Number of assets this reconcile is waiting on.
    pub fn pending(&self) -> usize {
        self.tasks
            .iter()
            .filter(|(_, rx)| rx.borrow().is_none())
            .count()
    }

    /// True when every download this reconcile depends on has finished.
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    /// Wait for every download to reach a terminal state.
    pub async fn wait(self) -> ReconcileReport {
        let mut report = ReconcileReport {
            already_present: self.already_present,
            ..ReconcileReport::default()
        };

        for (asset, mut rx) in self.tasks {
            let state: Result<TaskState, _> = rx.wait_for(Option::is_some).await.map(|s| s.clone());
            // An Err means the worker dropped the task without finishing it
            let outcome = state
                .ok()
                .flatten()
                .unwrap_or(Err(AssetFailure::Cancelled));
            match outcome {
                Ok(()) => report.succeeded.push(asset),
                Err(failure) => report.failed.push((asset, failure)),
            }
        }

        report
    }

    /// Run `f` with the report once every download has finished.
    pub fn on_complete<F>(self, f: F) -> JoinHandle<()>
    where
        F: FnOnce(ReconcileReport) + Send + 'static,
    {
        tokio::spawn(async move { f(self.wait().await) })
    }
}

struct Job {
    asset: AssetRef,
    url: String,
    done: watch::Sender<TaskState>,
}

struct Shared<S, D> {
    store: S,
    downloader: D,
    config: AssetSyncConfig,
    in_flight: DashMap<Digest, watch::Receiver<TaskState>>,
}

impl<S: AssetStore, D: Downloader> Shared<S, D> {
    async fn download(&self, job: &Job) -> Result<(), AssetFailure> {
        let digest = &job.asset.digest;
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!("Fetching {} (attempt {}/{})", job.url, attempt, max_attempts);

            let failure = match self.downloader.fetch(&job.url).await {
                Ok(bytes) => {
                    let actual = self.config.algorithm.digest(&bytes);
                    if actual == *digest {
                        // Store failures are not worth refetching for
                        return self.store.put(digest, &bytes).await.map_err(|e| {
                            tracing::error!("Failed to store asset {}: {}", job.asset.name, e);
                            AssetFailure::from(e)
                        });
                    }
                    AssetFailure::Integrity {
                        expected: digest.clone(),
                        actual,
                    }
                }
                Err(e) => AssetFailure::from(e),
            };

            if attempt >= max_attempts {
                tracing::error!(
                    "Giving up on asset {} after {} attempts: {}",
                    job.asset.name,
                    attempt,
                    failure
                );
                return Err(failure);
            }

            let delay = self.config.backoff.delay(attempt);
            tracing::warn!(
                "Asset {} attempt {} failed: {}; retrying in {:?}",
                job.asset.name,
                attempt,
                failure,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Reconciles desired assets against a store using a bounded worker pool.
///
/// Must be created inside a tokio runtime; the workers are spawned on it.
pub struct AssetSyncManager<S, D> {
    shared: Arc<Shared<S, D>>,
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, D> AssetSyncManager<S, D>
where
    S: AssetStore + 'static,
    D: Downloader + 'static,
{
    /// Start a manager with `config.max_parallel_downloads` workers.
    pub fn new(store: S, downloader: D, config: AssetSyncConfig) -> Self {
        let worker_count = config.max_parallel_downloads.max(1);
        let shared = Arc::new(Shared {
            store,
            downloader,
            config,
            in_flight: DashMap::new(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..worker_count)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&shared), Arc::clone(&rx))))
            .collect();

        tracing::info!("Asset sync started with {} download workers", worker_count);

        Self {
            shared,
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.shared.store
    }

    /// The active configuration.
    pub fn config(&self) -> &AssetSyncConfig {
        &self.shared.config
    }

    /// Number of digests currently queued or downloading.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.len()
    }

    /// Fetch every asset in `desired` that the store lacks, using the
    /// configured CDN root.
    pub fn reconcile<I>(&self, desired: I) -> ReconcileHandle
    where
        I: IntoIterator<Item = AssetRef>,
    {
        let cdn_root = self.shared.config.cdn_root.clone();
        self.reconcile_from(&cdn_root, desired)
    }

    /// Fetch every asset in `desired` that the store lacks from `cdn_root`.
    pub fn reconcile_from<I>(&self, cdn_root: &str, desired: I) -> ReconcileHandle
    where
        I: IntoIterator<Item = AssetRef>,
    {
        let desired: BTreeSet<AssetRef> = desired.into_iter().collect();
        let mut handle = ReconcileHandle {
            tasks: Vec::new(),
            already_present: 0,
        };
        let mut queued = 0usize;

        for asset in desired {
            if self.shared.store.has(&asset.digest) {
                handle.already_present += 1;
                continue;
            }

            let rx = match self.shared.in_flight.entry(asset.digest.clone()) {
                Entry::Occupied(entry) => {
                    tracing::debug!("Attaching to in-flight download of {}", asset.digest);
                    entry.get().clone()
                }
                Entry::Vacant(entry) => {
                    // A worker may have finished between the check above and
                    // taking the entry lock
                    if self.shared.store.has(&asset.digest) {
                        handle.already_present += 1;
                        continue;
                    }

                    let (done, rx) = watch::channel(None);
                    entry.insert(rx.clone());

                    let job = Job {
                        url: asset_url(cdn_root, &asset.name),
                        asset: asset.clone(),
                        done,
                    };
                    if !self.submit(job) {
                        // Dropping the job closed its channel; waiters see Cancelled
                        self.shared.in_flight.remove(&asset.digest);
                    }
                    queued += 1;
                    rx
                }
            };

            handle.tasks.push((asset, rx));
        }

        tracing::info!(
            "Reconcile: {} present, {} missing ({} new downloads)",
            handle.already_present,
            handle.tasks.len(),
            queued
        );
        handle
    }

    fn submit(&self, job: Job) -> bool {
        match lock(&self.jobs).as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    /// Stop the download workers.
    ///
    /// Queued and running downloads are dropped; their waiters observe
    /// [`AssetFailure::Cancelled`]. Later reconciles fail the same way.
    pub fn shutdown(&self) {
        lock(&self.jobs).take();
        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for worker in &workers {
            worker.abort();
        }
        self.shared.in_flight.clear();
        if !workers.is_empty() {
            tracing::info!("Asset sync stopped");
        }
    }
}

impl<S, D> Drop for AssetSyncManager<S, D> {
    fn drop(&mut self) {
        for worker in lock(&self.workers).drain(..) {
            worker.abort();
        }
    }
}

impl<S, D> std::fmt::Debug for AssetSyncManager<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetSyncManager")
            .field("config", &self.shared.config)
            .field("in_flight", &self.shared.in_flight.len())
            .finish()
    }
}

async fn worker_loop<S, D>(
    id: usize,
    shared: Arc<Shared<S, D>>,
    jobs: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
) where
    S: AssetStore,
    D: Downloader,
{
    loop {
        // The lock is fair, so idle workers take jobs in turn
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else {
            tracing::debug!("Download worker {} exiting", id);
            break;
        };

        let outcome = shared.download(&job).await;
        if outcome.is_ok() {
            tracing::debug!("Worker {} stored {}", id, job.asset.name);
        }

        // Publish before removing so late attachers still see the outcome
        job.done.send_replace(Some(outcome));
        shared.in_flight.remove(&job.asset.digest);
    }
}

fn asset_url(cdn_root: &str, name: &str) -> String {
    format!("{}{}", cdn_root, name)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
