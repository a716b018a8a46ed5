//! Push token providers.
//!
//! Each push service the device might support is a [`TokenProvider`]. At
//! startup [`select_provider`] picks the first one that is available; its
//! tokens then feed a single
//! [`RegistrationTracker`](engage_core::RegistrationTracker) in the session.
//!
//! The vendor registration handshake itself lives outside this crate.
//! Providers only report whether they can run and what the current token is.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

/// Push registration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// No provider is available on this device.
    #[error("no push provider available")]
    NoProvider,

    /// The provider could not produce a token.
    #[error("{provider} failed to acquire a token: {message}")]
    Acquire {
        /// Provider name.
        provider: String,
        /// Provider-specific reason.
        message: String,
    },
}

/// A push service that can hand out registration tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Short provider name, sent along with the token.
    fn name(&self) -> &str;

    /// Whether this provider can run on the current device.
    fn is_available(&self) -> bool;

    /// Fetch the current token. `Ok(None)` means no token yet.
    async fn acquire_token(&self) -> Result<Option<String>, PushError>;
}

/// Pick the first available provider, in priority order.
pub fn select_provider(providers: &[Arc<dyn TokenProvider>]) -> Option<Arc<dyn TokenProvider>> {
    let selected = providers.iter().find(|p| p.is_available()).cloned();
    match &selected {
        Some(provider) => tracing::info!("Selected push provider {}", provider.name()),
        None => tracing::info!(
            "No push provider available ({} checked)",
            providers.len()
        ),
    }
    selected
}

/// Provider whose token is set by the host, e.g. from a platform callback.
///
/// Also serves as the provider double in tests. Clones share state.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    name: String,
    inner: Arc<Mutex<StaticInner>>,
}

#[derive(Debug)]
struct StaticInner {
    available: bool,
    token: Option<String>,
    fail_next: Option<String>,
}

impl StaticTokenProvider {
    /// Create an available provider with no token.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(StaticInner {
                available: true,
                token: None,
                fail_next: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StaticInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the provider (un)available.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Set the token returned by `acquire_token`.
    pub fn set_token(&self, token: impl Into<String>) {
        self.lock().token = Some(token.into());
    }

    /// Cause the next `acquire_token()` to fail.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.lock().available
    }

    async fn acquire_token(&self) -> Result<Option<String>, PushError> {
        let mut inner = self.lock();
        if let Some(message) = inner.fail_next.take() {
            return Err(PushError::Acquire {
                provider: self.name.clone(),
                message,
            });
        }
        Ok(inner.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_first_available_provider() {
        let fcm = StaticTokenProvider::new("fcm");
        fcm.set_available(false);
        let hms = StaticTokenProvider::new("hms");
        let adm = StaticTokenProvider::new("adm");

        let providers: Vec<Arc<dyn TokenProvider>> =
            vec![Arc::new(fcm), Arc::new(hms), Arc::new(adm)];

        let selected = select_provider(&providers).unwrap();
        assert_eq!(selected.name(), "hms");
    }

    #[test]
    fn no_available_provider() {
        let fcm = StaticTokenProvider::new("fcm");
        fcm.set_available(false);
        let providers: Vec<Arc<dyn TokenProvider>> = vec![Arc::new(fcm)];

        assert!(select_provider(&providers).is_none());
        assert!(select_provider(&[]).is_none());
    }

    #[tokio::test]
    async fn static_provider_returns_token_and_failures() {
        let provider = StaticTokenProvider::new("fcm");
        assert_eq!(provider.acquire_token().await.unwrap(), None);

        provider.set_token("tok-1");
        provider.fail_next("service unavailable");
        assert!(matches!(
            provider.acquire_token().await,
            Err(PushError::Acquire { .. })
        ));
        assert_eq!(provider.acquire_token().await.unwrap(), Some("tok-1".into()));
    }
}
