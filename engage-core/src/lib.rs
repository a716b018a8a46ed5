//! # engage-core
//!
//! Pure logic for engage-sync (no I/O, instant tests).
//!
//! This crate implements the decision logic of the sync core without any
//! network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Time is always supplied by the caller through a
//! [`Clock`], never read implicitly. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (downloads, disk, event delivery) is performed by
//! `engage-assets` and `engage-client`, which drive these structures.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod clock;
pub mod eligibility;
pub mod pending;
pub mod registration;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use eligibility::{EligibilityEngine, EligibilityResult, GenerationId, Ineligibility};
pub use pending::{Batch, BatchLimits, PendingEvents};
pub use registration::{RegistrationTracker, TokenChange};
