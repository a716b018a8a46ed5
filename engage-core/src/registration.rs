//! Push registration token debounce.
//!
//! Token providers can report the same token many times (app resume, token
//! refresh callbacks). Device identity is only re-announced when the token
//! actually changes.

/// Outcome of observing a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenChange {
    /// Empty tokens are ignored.
    Ignored,
    /// Same as the last known token.
    Unchanged,
    /// A new token; the previous one is returned.
    Changed {
        /// Token before this change, if any.
        previous: Option<String>,
    },
}

impl TokenChange {
    /// Check if the token changed.
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Remembers the last registration token.
#[derive(Debug, Clone, Default)]
pub struct RegistrationTracker {
    current: Option<String>,
}

impl RegistrationTracker {
    /// Create a tracker with no known token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker seeded with a previously persisted token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            current: Some(token.into()),
        }
    }

    /// Record a token reported by a provider.
    pub fn observe(&mut self, token: &str) -> TokenChange {
        let token = token.trim();
        if token.is_empty() {
            return TokenChange::Ignored;
        }
        if self.current.as_deref() == Some(token) {
            return TokenChange::Unchanged;
        }
        let previous = self.current.replace(token.to_string());
        TokenChange::Changed { previous }
    }

    /// The last known token.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_token_is_a_change() {
        let mut tracker = RegistrationTracker::new();
        assert_eq!(tracker.observe("tok-1"), TokenChange::Changed { previous: None });
        assert_eq!(tracker.current(), Some("tok-1"));
    }

    #[test]
    fn same_token_is_debounced() {
        let mut tracker = RegistrationTracker::new();
        tracker.observe("tok-1");
        assert_eq!(tracker.observe("tok-1"), TokenChange::Unchanged);
    }

    #[test]
    fn empty_token_is_ignored() {
        let mut tracker = RegistrationTracker::with_token("tok-1");
        assert_eq!(tracker.observe(""), TokenChange::Ignored);
        assert_eq!(tracker.observe("   "), TokenChange::Ignored);
        assert_eq!(tracker.current(), Some("tok-1"));
    }

    #[test]
    fn new_token_reports_previous() {
        let mut tracker = RegistrationTracker::with_token("tok-1");
        let change = tracker.observe("tok-2");
        assert!(change.is_changed());
        assert_eq!(
            change,
            TokenChange::Changed {
                previous: Some("tok-1".to_string())
            }
        );
    }
}
