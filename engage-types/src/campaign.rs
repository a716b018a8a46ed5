//! Campaign definitions delivered by the server.
//!
//! A [`CampaignPayload`] is one sync response. Every payload is a complete
//! generation: it replaces the previous campaign set wholesale.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::{CampaignId, Digest, Timestamp, TypesError};

/// A named asset pinned to specific content.
///
/// Identity is the `(name, digest)` pair: the same name with another digest
/// is a different asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    /// File name on the CDN, relative to the payload's `cdn_root`.
    pub name: String,
    /// Content digest of the asset bytes.
    pub digest: Digest,
}

impl AssetRef {
    /// Create a new asset reference.
    pub fn new(name: impl Into<String>, digest: Digest) -> Self {
        Self {
            name: name.into(),
            digest,
        }
    }
}

/// Time window during which a campaign may be displayed.
///
/// Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayWindow {
    /// First instant the campaign may be shown.
    pub start: Timestamp,
    /// Last instant the campaign may be shown.
    pub end: Timestamp,
}

impl DisplayWindow {
    /// Create a new window.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check whether `now` lies within the window.
    pub fn contains(&self, now: Timestamp) -> bool {
        self.start <= now && now <= self.end
    }
}

/// A campaign definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Server-assigned identifier.
    pub id: CampaignId,
    /// Assets that must all be cached before the campaign can be shown.
    #[serde(default)]
    pub required_assets: BTreeSet<AssetRef>,
    /// When the campaign may be shown.
    pub window: DisplayWindow,
}

impl Campaign {
    /// Required assets whose digest is absent from `on_disk`.
    pub fn missing_assets<'a>(&'a self, on_disk: &HashSet<Digest>) -> Vec<&'a AssetRef> {
        self.required_assets
            .iter()
            .filter(|asset| !on_disk.contains(&asset.digest))
            .collect()
    }
}

/// Campaign section of a server sync response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignPayload {
    /// URL prefix under which asset names are downloadable.
    pub cdn_root: String,
    /// The complete campaign set for this generation.
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
}

impl CampaignPayload {
    /// Decode a payload from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::JsonDecode)
    }

    /// Encode the payload as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, TypesError> {
        serde_json::to_vec(self).map_err(TypesError::JsonEncode)
    }
}
