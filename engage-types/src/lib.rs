//! # engage-types
//!
//! Data model for the engage-sync core.
//!
//! This crate provides the foundational types used across all engage-sync crates:
//! - [`Digest`], [`CampaignId`], [`SequenceNumber`], [`SessionId`], [`Timestamp`] - Identity and ordering types
//! - [`AssetRef`], [`Campaign`], [`CampaignPayload`] - Campaign definitions from the server
//! - [`EventRecord`] - Behavioral events queued for delivery
//! - [`BatchEnvelope`] - Wire body of one event delivery attempt
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod campaign;
mod envelope;
mod error;
mod event;
mod ids;

pub use campaign::{AssetRef, Campaign, CampaignPayload, DisplayWindow};
pub use envelope::BatchEnvelope;
pub use error::TypesError;
pub use event::{Attributes, EventRecord};
pub use ids::{CampaignId, Digest, SequenceNumber, SessionId, Timestamp};
