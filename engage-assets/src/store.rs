//! Content-addressed asset storage.
//!
//! This module provides a trait for storing campaign assets addressed by
//! their content digest, plus a memory-based implementation for testing.
//! The on-disk implementation lives in [`crate::disk`].
//!
//! Presence queries (`has`, `snapshot`) are answered from an in-memory index
//! and never touch the disk. Writes go through `put`, which only indexes a
//! digest once its bytes are fully in place.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use engage_types::Digest;

use crate::error::{FailureKind, StoreError};

/// Result of a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Digests whose files were deleted.
    pub removed: Vec<Digest>,
    /// Digests that could not be deleted. They stay indexed.
    pub failed: Vec<Digest>,
}

/// Trait for content-addressed asset storage.
///
/// All implementations key content by its digest. The digest is verified by
/// the caller before `put`; the store trusts it.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Check if an asset is present. O(1), in-memory.
    fn has(&self, digest: &Digest) -> bool;

    /// Consistent copy of every digest currently present.
    fn snapshot(&self) -> HashSet<Digest>;

    /// Store `bytes` under `digest`.
    ///
    /// The digest becomes visible to `has` only after the bytes are
    /// completely stored.
    async fn put(&self, digest: &Digest, bytes: &[u8]) -> Result<(), StoreError>;

    /// Read an asset's bytes.
    ///
    /// Returns `NotFound` if the digest is not in the store.
    async fn read(&self, digest: &Digest) -> Result<Vec<u8>, StoreError>;

    /// Remove an asset.
    ///
    /// Returns `Ok(true)` if removed, `Ok(false)` if not found.
    async fn remove(&self, digest: &Digest) -> Result<bool, StoreError>;

    /// Rebuild the index from the backing storage.
    async fn load(&self) -> Result<HashSet<Digest>, StoreError>;

    /// Remove every asset not in `keep`.
    ///
    /// Best-effort: a digest that cannot be removed is logged and reported,
    /// and pruning continues with the rest.
    async fn prune(&self, keep: &HashSet<Digest>) -> PruneReport {
        let mut stale: Vec<Digest> = self.snapshot().difference(keep).cloned().collect();
        stale.sort();

        let mut report = PruneReport::default();
        for digest in stale {
            match self.remove(&digest).await {
                Ok(true) => report.removed.push(digest),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to prune asset {}: {}", digest, e);
                    report.failed.push(digest);
                }
            }
        }

        if !report.removed.is_empty() {
            tracing::info!("Pruned {} stale assets", report.removed.len());
        }
        report
    }
}

#[async_trait]
impl<S: AssetStore + ?Sized> AssetStore for Arc<S> {
    fn has(&self, digest: &Digest) -> bool {
        (**self).has(digest)
    }

    fn snapshot(&self) -> HashSet<Digest> {
        (**self).snapshot()
    }

    async fn put(&self, digest: &Digest, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).put(digest, bytes).await
    }

    async fn read(&self, digest: &Digest) -> Result<Vec<u8>, StoreError> {
        (**self).read(digest).await
    }

    async fn remove(&self, digest: &Digest) -> Result<bool, StoreError> {
        (**self).remove(digest).await
    }

    async fn load(&self) -> Result<HashSet<Digest>, StoreError> {
        (**self).load().await
    }

    async fn prune(&self, keep: &HashSet<Digest>) -> PruneReport {
        (**self).prune(keep).await
    }
}

/// In-memory asset store for testing.
///
/// Stores assets in a thread-safe HashMap. Not persistent - all data
/// is lost when the store is dropped. Clones share the same contents.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    assets: HashMap<Digest, Vec<u8>>,
    puts: usize,
    fail_next_put: Option<FailureKind>,
    fail_removes: HashSet<Digest>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the number of assets currently stored.
    pub fn len(&self) -> usize {
        self.lock().assets.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().assets.is_empty()
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.lock().puts
    }

    /// Cause the next `put()` to fail with an error of the given class.
    pub fn fail_next_put(&self, kind: FailureKind) {
        self.lock().fail_next_put = Some(kind);
    }

    /// Cause every `remove()` of `digest` to fail.
    pub fn fail_remove(&self, digest: Digest) {
        self.lock().fail_removes.insert(digest);
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    fn has(&self, digest: &Digest) -> bool {
        self.lock().assets.contains_key(digest)
    }

    fn snapshot(&self) -> HashSet<Digest> {
        self.lock().assets.keys().cloned().collect()
    }

    async fn put(&self, digest: &Digest, bytes: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let path = PathBuf::from(digest.as_str());

        match inner.fail_next_put.take() {
            Some(FailureKind::Capacity) => {
                return Err(StoreError::Capacity {
                    path,
                    source: io::Error::new(io::ErrorKind::Other, "no space left on device"),
                });
            }
            Some(_) => {
                return Err(StoreError::Io {
                    path,
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
                });
            }
            None => {}
        }

        inner.assets.insert(digest.clone(), bytes.to_vec());
        inner.puts += 1;
        Ok(())
    }

    async fn read(&self, digest: &Digest) -> Result<Vec<u8>, StoreError> {
        self.lock()
            .assets
            .get(digest)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                digest: digest.clone(),
            })
    }

    async fn remove(&self, digest: &Digest) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.fail_removes.contains(digest) {
            return Err(StoreError::Io {
                path: PathBuf::from(digest.as_str()),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
            });
        }
        Ok(inner.assets.remove(digest).is_some())
    }

    async fn load(&self) -> Result<HashSet<Digest>, StoreError> {
        Ok(self.snapshot())
    }
}
