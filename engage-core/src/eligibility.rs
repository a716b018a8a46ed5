//! Campaign eligibility for engage-sync.
//!
//! This module decides which campaigns of the active generation may be shown:
//! - A campaign is eligible only inside its display window
//! - Every required asset must already be cached (no partial display)
//! - Results are tagged with the generation they were computed for
//!
//! The engine never reads a clock or touches the cache itself. Callers pass
//! `now` and a snapshot of the cached digests, so the same inputs always
//! produce the same answer.

use std::collections::{BTreeMap, HashSet};

use engage_types::{AssetRef, Campaign, CampaignId, Digest, Timestamp};

/// Identifies one loaded campaign generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GenerationId(u64);

impl GenerationId {
    /// Get the numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Why a campaign is not eligible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    /// The display window has not opened yet.
    NotStarted {
        /// Window start.
        starts_at: Timestamp,
    },
    /// The display window has closed.
    Ended {
        /// Window end.
        ended_at: Timestamp,
    },
    /// Some required assets are not cached.
    MissingAssets {
        /// The assets that are still missing.
        missing: Vec<AssetRef>,
    },
}

/// Eligibility of every campaign in one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityResult {
    generation: GenerationId,
    eligible: BTreeMap<CampaignId, bool>,
}

impl EligibilityResult {
    /// The generation this result was computed against.
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    /// Eligibility of a campaign. Unknown campaigns are never eligible.
    pub fn is_eligible(&self, id: CampaignId) -> bool {
        self.eligible.get(&id).copied().unwrap_or(false)
    }

    /// Ids of all eligible campaigns, ascending.
    pub fn eligible_ids(&self) -> Vec<CampaignId> {
        self.eligible
            .iter()
            .filter_map(|(id, eligible)| eligible.then_some(*id))
            .collect()
    }

    /// Full mapping from campaign id to eligibility.
    pub fn as_map(&self) -> &BTreeMap<CampaignId, bool> {
        &self.eligible
    }

    /// Number of campaigns evaluated.
    pub fn len(&self) -> usize {
        self.eligible.len()
    }

    /// Check if no campaigns were evaluated.
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }
}

/// Holds the active campaign generation and evaluates it.
#[derive(Debug, Clone, Default)]
pub struct EligibilityEngine {
    generation: GenerationId,
    campaigns: Vec<Campaign>,
}

impl EligibilityEngine {
    /// Create an engine with an empty generation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire active campaign set.
    ///
    /// Results computed for earlier generations become stale. When a payload
    /// lists the same campaign id twice, the first definition wins.
    pub fn load_generation(&mut self, campaigns: Vec<Campaign>) -> GenerationId {
        let mut seen = HashSet::new();
        self.campaigns = campaigns
            .into_iter()
            .filter(|campaign| seen.insert(campaign.id))
            .collect();
        self.generation = GenerationId(self.generation.0 + 1);
        self.generation
    }

    /// The active generation.
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    /// Campaigns of the active generation.
    pub fn campaigns(&self) -> &[Campaign] {
        &self.campaigns
    }

    /// Check whether a result still reflects the active generation.
    pub fn is_current(&self, result: &EligibilityResult) -> bool {
        result.generation == self.generation
    }

    /// Evaluate every campaign against `now` and the cached digests.
    pub fn evaluate(&self, now: Timestamp, assets_on_disk: &HashSet<Digest>) -> EligibilityResult {
        let eligible = self
            .campaigns
            .iter()
            .map(|campaign| (campaign.id, check(campaign, now, assets_on_disk).is_none()))
            .collect();

        EligibilityResult {
            generation: self.generation,
            eligible,
        }
    }

    /// Like [`evaluate`](Self::evaluate), but reports why each ineligible
    /// campaign was rejected. Eligible campaigns map to `None`.
    pub fn explain(
        &self,
        now: Timestamp,
        assets_on_disk: &HashSet<Digest>,
    ) -> BTreeMap<CampaignId, Option<Ineligibility>> {
        self.campaigns
            .iter()
            .map(|campaign| (campaign.id, check(campaign, now, assets_on_disk)))
            .collect()
    }

    /// Every asset referenced by the active generation.
    ///
    /// This is the desired set for an asset reconcile.
    pub fn required_assets(&self) -> HashSet<AssetRef> {
        self.campaigns
            .iter()
            .flat_map(|campaign| campaign.required_assets.iter().cloned())
            .collect()
    }

    /// Every digest referenced by the active generation.
    ///
    /// This is the keep set when pruning the cache.
    pub fn required_digests(&self) -> HashSet<Digest> {
        self.campaigns
            .iter()
            .flat_map(|campaign| campaign.required_assets.iter().map(|a| a.digest.clone()))
            .collect()
    }
}

fn check(
    campaign: &Campaign,
    now: Timestamp,
    assets_on_disk: &HashSet<Digest>,
) -> Option<Ineligibility> {
    if now < campaign.window.start {
        return Some(Ineligibility::NotStarted {
            starts_at: campaign.window.start,
        });
    }
    if now > campaign.window.end {
        return Some(Ineligibility::Ended {
            ended_at: campaign.window.end,
        });
    }

    let missing: Vec<AssetRef> = campaign
        .missing_assets(assets_on_disk)
        .into_iter()
        .cloned()
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(Ineligibility::MissingAssets { missing })
    }
}
