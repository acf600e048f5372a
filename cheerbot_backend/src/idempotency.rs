//! At-most-once gate for per-post actions.
//!
//! The guard relies on a single conditional insert: whichever invocation
//! creates the `(post_id, action_kind)` record owns the action. Records carry
//! an expiry for storage reclamation only; existence alone decides ownership.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classifier::Identity;

pub const RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    QuotePrimary,
    QuoteSecondary,
    RepostPrimary,
    RepostSecondary,
    FillerContent,
    WeeklyExtra,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::QuotePrimary => "quote_primary",
            ActionKind::QuoteSecondary => "quote_secondary",
            ActionKind::RepostPrimary => "repost_primary",
            ActionKind::RepostSecondary => "repost_secondary",
            ActionKind::FillerContent => "filler_content",
            ActionKind::WeeklyExtra => "weekly_extra",
        }
    }

    pub fn quote(identity: Identity) -> Self {
        match identity {
            Identity::Primary => ActionKind::QuotePrimary,
            Identity::Secondary => ActionKind::QuoteSecondary,
        }
    }

    pub fn repost(identity: Identity) -> Self {
        match identity {
            Identity::Primary => ActionKind::RepostPrimary,
            Identity::Secondary => ActionKind::RepostSecondary,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub post_id: String,
    pub action_kind: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            expires_at: now + Duration::hours(RETENTION_HOURS),
        }
    }
}

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    AlreadyExists,
}

/// Durable key-value store supporting insert-if-absent.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Insert the record unless the key already exists. Any failure other than
    /// the key existing is returned as an error.
    async fn put_if_absent(&self, key: &IdempotencyKey, record: &IdempotencyRecord)
        -> Result<PutOutcome>;

    /// Delete records whose expiry has passed; returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Acquisition {
    Acquired,
    AlreadyProcessed,
}

pub struct IdempotencyGuard<'a> {
    store: &'a dyn IdempotencyStore,
}

impl<'a> IdempotencyGuard<'a> {
    pub fn new(store: &'a dyn IdempotencyStore) -> Self {
        Self { store }
    }

    /// Claim `(post_id, action_kind)`. Store failures are returned as `Err`
    /// and must be treated as transient by the caller.
    pub async fn acquire(
        &self,
        post_id: &str,
        action_kind: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<Acquisition> {
        let key = IdempotencyKey {
            post_id: post_id.to_string(),
            action_kind,
        };
        match self
            .store
            .put_if_absent(&key, &IdempotencyRecord::new(now))
            .await?
        {
            PutOutcome::Inserted => Ok(Acquisition::Acquired),
            PutOutcome::AlreadyExists => {
                tracing::debug!("Post {} already handled for {}", post_id, action_kind);
                Ok(Acquisition::AlreadyProcessed)
            }
        }
    }
}
