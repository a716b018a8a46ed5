//! On-disk asset store.
//!
//! Layout: one file per asset directly under the cache directory, named by
//! the digest. Nothing else is needed for correctness; the directory listing
//! is the source of truth and `load()` rebuilds the index from it.
//!
//! Writes go to a hidden `.{digest}.{uuid}.part` file first, are synced, and
//! are then renamed over the final name. A crash at any point leaves either
//! no file or a complete file under the digest name; leftover `.part` files
//! are swept by the next `load()`.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use engage_types::Digest;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;
use crate::store::AssetStore;

const TEMP_SUFFIX: &str = ".part";

/// Content-addressed asset cache in a filesystem directory.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    index: RwLock<HashSet<Digest>>,
    sync_writes: bool,
}

impl DiskStore {
    /// Create a store rooted at `root` without touching the disk.
    ///
    /// The index starts empty; call [`AssetStore::load`] before use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: RwLock::new(HashSet::new()),
            sync_writes: true,
        }
    }

    /// Create the directory if needed and load the index.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root)
            .await
            .map_err(|e| StoreError::from_io(&store.root, e))?;
        store.load().await?;
        Ok(store)
    }

    /// Skip fsync before rename. Faster, but a power loss may leave an empty
    /// file under the final name on some filesystems.
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Cache directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of an asset.
    pub fn path_for(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.as_str())
    }

    fn temp_path_for(&self, digest: &Digest) -> PathBuf {
        let nonce = uuid::Uuid::new_v4().simple();
        self.root
            .join(format!(".{}.{}{}", digest.as_str(), nonce, TEMP_SUFFIX))
    }

    fn index(&self) -> RwLockReadGuard<'_, HashSet<Digest>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_mut(&self) -> RwLockWriteGuard<'_, HashSet<Digest>> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn write_atomic(&self, path: &Path, temp: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let mut file = fs::File::create(temp)
            .await
            .map_err(|e| StoreError::from_io(temp, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StoreError::from_io(temp, e))?;
        if self.sync_writes {
            file.sync_all()
                .await
                .map_err(|e| StoreError::from_io(temp, e))?;
        }
        drop(file);

        fs::rename(temp, path)
            .await
            .map_err(|e| StoreError::from_io(path, e))
    }
}

#[async_trait]
impl AssetStore for DiskStore {
    fn has(&self, digest: &Digest) -> bool {
        self.index().contains(digest)
    }

    fn snapshot(&self) -> HashSet<Digest> {
        self.index().clone()
    }

    async fn put(&self, digest: &Digest, bytes: &[u8]) -> Result<(), StoreError> {
        // Same digest, same bytes
        if self.has(digest) {
            return Ok(());
        }

        let path = self.path_for(digest);
        let temp = self.temp_path_for(digest);

        if let Err(e) = self.write_atomic(&path, &temp, bytes).await {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove temp file {}: {}", temp.display(), cleanup);
                }
            }
            return Err(e);
        }

        self.index_mut().insert(digest.clone());
        tracing::debug!("Stored asset {} ({} bytes)", digest, bytes.len());
        Ok(())
    }

    async fn read(&self, digest: &Digest) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(digest);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Deleted behind our back
                self.index_mut().remove(digest);
                Err(StoreError::NotFound {
                    digest: digest.clone(),
                })
            }
            Err(e) => Err(StoreError::from_io(&path, e)),
        }
    }

    async fn remove(&self, digest: &Digest) -> Result<bool, StoreError> {
        let path = self.path_for(digest);
        let existed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(StoreError::from_io(&path, e)),
        };

        let indexed = self.index_mut().remove(digest);
        Ok(existed || indexed)
    }

    async fn load(&self) -> Result<HashSet<Digest>, StoreError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::from_io(&self.root, e))?;

        let mut found = HashSet::new();
        let mut swept = 0usize;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::from_io(&self.root, e))?
        {
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };

            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                match fs::remove_file(&path).await {
                    Ok(()) => swept += 1,
                    Err(e) => tracing::warn!("Failed to sweep {}: {}", path.display(), e),
                }
                continue;
            }

            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }

            match Digest::parse(&name) {
                Ok(digest) => {
                    found.insert(digest);
                }
                Err(_) => tracing::debug!("Ignoring non-asset file {}", path.display()),
            }
        }

        let dropped = {
            let mut index = self.index_mut();
            let dropped = index.difference(&found).count();
            *index = found.clone();
            dropped
        };

        tracing::info!(
            "Asset cache loaded from {}: {} assets ({} stale index entries dropped, {} partial writes swept)",
            self.root.display(),
            found.len(),
            dropped,
            swept
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn digest(s: &str) -> Digest {
        Digest::parse(s).unwrap()
    }

    async fn open_temp() -> (TempDir, DiskStore) {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_has_and_read() {
        let (_dir, store) = open_temp().await;

        store.put(&digest("d1"), b"png bytes").await.unwrap();

        assert!(store.has(&digest("d1")));
        assert_eq!(store.read(&digest("d1")).await.unwrap(), b"png bytes");
        assert!(store.path_for(&digest("d1")).exists());
    }

    #[tokio::test]
    async fn put_leaves_no_temp_files() {
        let (dir, store) = open_temp().await;
        store.put(&digest("d1"), b"x").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["d1".to_string()]);
    }

    #[tokio::test]
    async fn presence_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let store = DiskStore::open(dir.path()).await.unwrap();
            store.put(&digest("aa"), b"a").await.unwrap();
            store.put(&digest("bb"), b"b").await.unwrap();
        }

        let reopened = DiskStore::open(dir.path()).await.unwrap();
        assert!(reopened.has(&digest("aa")));
        assert!(reopened.has(&digest("bb")));
        assert_eq!(reopened.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn load_drops_entries_without_files() {
        let (_dir, store) = open_temp().await;
        store.put(&digest("aa"), b"a").await.unwrap();
        store.put(&digest("bb"), b"b").await.unwrap();

        // Manual tampering
        std::fs::remove_file(store.path_for(&digest("aa"))).unwrap();
        assert!(store.has(&digest("aa")));

        let loaded = store.load().await.unwrap();
        assert!(!store.has(&digest("aa")));
        assert!(store.has(&digest("bb")));
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn load_sweeps_partial_writes_and_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".d1.0123abcd.part"), b"trunc").unwrap();
        std::fs::write(dir.path().join("README.txt"), b"hi").unwrap();
        std::fs::create_dir(dir.path().join("abcdef")).unwrap();
        std::fs::write(dir.path().join("d2"), b"complete").unwrap();

        let store = DiskStore::open(dir.path()).await.unwrap();

        assert!(!dir.path().join(".d1.0123abcd.part").exists());
        assert!(!store.has(&digest("d1")));
        assert!(store.has(&digest("d2")));
        assert!(!store.has(&digest("abcdef")));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn remove_deletes_file_and_index_entry() {
        let (_dir, store) = open_temp().await;
        store.put(&digest("d1"), b"x").await.unwrap();

        assert!(store.remove(&digest("d1")).await.unwrap());
        assert!(!store.has(&digest("d1")));
        assert!(!store.path_for(&digest("d1")).exists());
        assert!(!store.remove(&digest("d1")).await.unwrap());
    }

    #[tokio::test]
    async fn read_of_vanished_file_is_not_found() {
        let (_dir, store) = open_temp().await;
        store.put(&digest("d1"), b"x").await.unwrap();
        std::fs::remove_file(store.path_for(&digest("d1"))).unwrap();

        let result = store.read(&digest("d1")).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert!(!store.has(&digest("d1")));
    }

    #[tokio::test]
    async fn prune_removes_unreferenced_files() {
        let (_dir, store) = open_temp().await;
        for d in ["aa", "bb", "cc"] {
            store.put(&digest(d), d.as_bytes()).await.unwrap();
        }

        let keep: HashSet<Digest> = [digest("cc")].into_iter().collect();
        let report = store.prune(&keep).await;

        assert_eq!(report.removed, vec![digest("aa"), digest("bb")]);
        assert!(!store.path_for(&digest("aa")).exists());
        assert!(store.path_for(&digest("cc")).exists());
    }

    #[tokio::test]
    async fn put_into_missing_directory_fails_with_io() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path().join("does-not-exist"));

        let result = store.put(&digest("d1"), b"x").await;
        assert!(matches!(result, Err(StoreError::Io { .. })));
        assert!(!store.has(&digest("d1")));
    }
}
