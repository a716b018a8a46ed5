//! # engage-assets
//!
//! Campaign asset cache and download coordination for engage-sync.
//!
//! Campaigns reference images and fonts by content digest. This crate keeps
//! those assets in a content-addressed cache and fetches whatever a campaign
//! generation needs but the cache lacks.
//!
//! ## Flow
//!
//! ```text
//! desired {(name, digest)} → missing = desired - store → worker pool
//!                                                           ↓
//!                         store.put(digest) ← verify digest ← fetch(cdn_root + name)
//! ```
//!
//! 1. [`AssetSyncManager::reconcile`] diffs the desired set against the store
//! 2. Each missing digest gets exactly one download task, shared by every
//!    reconcile that asks for it
//! 3. Downloaded bytes are hashed with the configured [`DigestAlgorithm`]
//! 4. Only matching bytes are written, atomically, to the [`AssetStore`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use engage_sync_assets::{AssetSyncConfig, AssetSyncManager, DiskStore, MockDownloader};
//!
//! let store = DiskStore::open("/var/cache/engage/assets").await?;
//! let manager = AssetSyncManager::new(store, MockDownloader::new(), AssetSyncConfig::default());
//! let report = manager.reconcile(desired).wait().await;
//! for (asset, failure) in &report.failed {
//!     eprintln!("{} failed: {}", asset.name, failure);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod digest;
mod disk;
mod downloader;
mod error;
mod store;
mod sync;

pub use digest::DigestAlgorithm;
pub use disk::DiskStore;
pub use downloader::{Downloader, MockDownloader};
pub use error::{AssetFailure, DownloadError, FailureKind, StoreError};
pub use store::{AssetStore, MemoryStore, PruneReport};
pub use sync::{AssetSyncConfig, AssetSyncManager, ReconcileHandle, ReconcileReport};
