//! Downloader abstraction for asset transfer.
//!
//! The sync manager calls [`Downloader::fetch`] once per attempt and never
//! inspects how the bytes arrive. Production code plugs in an HTTP client;
//! tests use [`MockDownloader`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::DownloadError;

/// Fetches the bytes behind a URL.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch the full body at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

#[async_trait]
impl<D: Downloader + ?Sized> Downloader for Arc<D> {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        (**self).fetch(url).await
    }
}

/// Mock downloader for testing.
///
/// Serves canned bodies, injects failures, and records every request.
/// URLs that were never registered answer with status 404.
#[derive(Debug, Default, Clone)]
pub struct MockDownloader {
    inner: Arc<Mutex<MockDownloaderInner>>,
}

#[derive(Debug, Default)]
struct MockDownloaderInner {
    bodies: HashMap<String, Vec<u8>>,
    failures: HashMap<String, VecDeque<DownloadError>>,
    requests: Vec<String>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    active: usize,
    max_active: usize,
}

impl MockDownloader {
    /// Create a new mock downloader.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockDownloaderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `body` for `url`.
    pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.lock().bodies.insert(url.into(), body.into());
    }

    /// Fail the next request for `url` with `error`. Calls stack up in order.
    pub fn fail_next(&self, url: impl Into<String>, error: DownloadError) {
        self.lock()
            .failures
            .entry(url.into())
            .or_default()
            .push_back(error);
    }

    /// Make every request take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Park every request until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.lock().gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` parked (or future) requests proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.lock().gate {
            gate.add_permits(n);
        }
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// Number of requests made for `url`.
    pub fn request_count(&self, url: &str) -> usize {
        self.lock().requests.iter().filter(|u| *u == url).count()
    }

    /// Highest number of requests that were in progress at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.lock().max_active
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let (gate, delay) = {
            let mut inner = self.lock();
            inner.requests.push(url.to_string());
            inner.active += 1;
            inner.max_active = inner.max_active.max(inner.active);
            (inner.gate.clone(), inner.delay)
        };

        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        inner.active -= 1;

        if let Some(error) = inner.failures.get_mut(url).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        inner
            .bodies
            .get(url)
            .cloned()
            .ok_or(DownloadError::Status(404))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_registered_bodies() {
        let downloader = MockDownloader::new();
        downloader.serve("https://cdn/icon.png", b"icon".to_vec());

        assert_eq!(downloader.fetch("https://cdn/icon.png").await.unwrap(), b"icon");
        assert_eq!(
            downloader.fetch("https://cdn/missing.png").await,
            Err(DownloadError::Status(404))
        );
        assert_eq!(downloader.requests().len(), 2);
    }

    #[tokio::test]
    async fn failures_are_consumed_in_order() {
        let downloader = MockDownloader::new();
        downloader.serve("u", b"ok".to_vec());
        downloader.fail_next("u", DownloadError::Network("reset".into()));
        downloader.fail_next("u", DownloadError::Status(503));

        assert_eq!(downloader.fetch("u").await, Err(DownloadError::Network("reset".into())));
        assert_eq!(downloader.fetch("u").await, Err(DownloadError::Status(503)));
        assert_eq!(downloader.fetch("u").await.unwrap(), b"ok");
        assert_eq!(downloader.request_count("u"), 3);
    }

    #[tokio::test]
    async fn hold_parks_requests_until_released() {
        let downloader = MockDownloader::new();
        downloader.serve("u", b"ok".to_vec());
        downloader.hold();

        let fetching = {
            let downloader = downloader.clone();
            tokio::spawn(async move { downloader.fetch("u").await })
        };
        tokio::task::yield_now().await;
        assert!(!fetching.is_finished());

        downloader.release(1);
        assert_eq!(fetching.await.unwrap().unwrap(), b"ok");
    }
}
