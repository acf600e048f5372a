use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{compare_post_ids, Identity};
use crate::progression::{score_delta, ActivityKind, Score};

/// Occurrence counts per activity kind plus the score they produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounters {
    #[serde(default)]
    pub primary_posts: u64,
    #[serde(default)]
    pub secondary_posts: u64,
    #[serde(default)]
    pub reposts: u64,
    #[serde(default)]
    pub reactions: u64,
    #[serde(default)]
    pub score: Score,
}

impl ActivityCounters {
    pub fn record(&mut self, kind: ActivityKind, count: u64, delta: Score) {
        let slot = match kind {
            ActivityKind::PrimaryPost => &mut self.primary_posts,
            ActivityKind::SecondaryPost => &mut self.secondary_posts,
            ActivityKind::Repost => &mut self.reposts,
            ActivityKind::Reaction => &mut self.reactions,
        };
        *slot = slot.saturating_add(count);
        self.score += delta;
    }
}

/// The single global engagement record.
///
/// Loaded at the start of an invocation, mutated in memory and written back
/// once at the end. `version` is the optimistic-concurrency token checked by
/// the state store on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementState {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub cumulative_score: Score,
    #[serde(default = "default_level")]
    pub current_level: u32,
    #[serde(default)]
    pub latest_seen_post_id: Option<String>,
    #[serde(default)]
    pub lifetime: ActivityCounters,
    #[serde(default)]
    pub period: ActivityCounters,
    #[serde(default)]
    pub last_daily_report_date: Option<String>,
    #[serde(default)]
    pub last_progression_update_month: Option<String>,
    #[serde(default)]
    pub prev_period_primary_count: u64,
    #[serde(default)]
    pub daily_media_attached: bool,
    #[serde(default)]
    pub total_received_reactions: u64,
    #[serde(default)]
    pub total_received_shares: u64,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

fn default_level() -> u32 {
    1
}

impl Default for EngagementState {
    fn default() -> Self {
        Self {
            version: 0,
            cumulative_score: Score::ZERO,
            current_level: default_level(),
            latest_seen_post_id: None,
            lifetime: ActivityCounters::default(),
            period: ActivityCounters::default(),
            last_daily_report_date: None,
            last_progression_update_month: None,
            prev_period_primary_count: 0,
            daily_media_attached: false,
            total_received_reactions: 0,
            total_received_shares: 0,
            last_updated: Utc::now(),
        }
    }
}

pub fn activity_for(identity: Identity) -> ActivityKind {
    match identity {
        Identity::Primary => ActivityKind::PrimaryPost,
        Identity::Secondary => ActivityKind::SecondaryPost,
    }
}

impl EngagementState {
    /// Credit `count` occurrences of `kind` to the score and both counter scopes.
    pub fn grant(&mut self, kind: ActivityKind, count: u64) -> Score {
        let delta = score_delta(kind, count);
        self.cumulative_score += delta;
        self.lifetime.record(kind, count, delta);
        self.period.record(kind, count, delta);
        delta
    }

    /// Close the reporting period: remember how active it was, then zero the
    /// period counters and the media allowance together.
    pub fn reset_period(&mut self) {
        self.prev_period_primary_count = self.period.primary_posts;
        self.period = ActivityCounters::default();
        self.daily_media_attached = false;
    }

    /// Move the watermark forward; older or equal ids are ignored.
    pub fn advance_watermark(&mut self, candidate: &str) {
        let newer = match self.latest_seen_post_id.as_deref() {
            Some(current) => compare_post_ids(candidate, current).is_gt(),
            None => true,
        };
        if newer {
            self.latest_seen_post_id = Some(candidate.to_string());
        }
    }

    /// Apply the bot's current engagement totals and return the increase in
    /// (reactions, shares) since the last observation, clamped at zero.
    pub fn observe_engagement_totals(&mut self, reactions: u64, shares: u64) -> (u64, u64) {
        let new_reactions = reactions.saturating_sub(self.total_received_reactions);
        let new_shares = shares.saturating_sub(self.total_received_shares);
        self.total_received_reactions = reactions;
        self.total_received_shares = shares;
        (new_reactions, new_shares)
    }
}

/// Result of a version-checked save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { version: u64 },
    /// Another writer saved first; `current` is the stored version.
    Stale { current: u64 },
}

/// Durable home of the singleton [`EngagementState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_state(&self) -> Result<Option<EngagementState>>;

    /// Overwrite the record if its stored version still equals
    /// `expected_version` (0 when no record exists yet).
    async fn save_state(&self, state: &EngagementState, expected_version: u64)
        -> Result<SaveOutcome>;
}
