//! In-memory collaborators shared by the crate's tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::agent_client::{AgentRequest, AgentResponse, TextAgent};
use crate::classifier::{compare_post_ids, ClassifiedPost};
use crate::idempotency::{IdempotencyKey, IdempotencyRecord, IdempotencyStore, PutOutcome};
use crate::platform::{EngagementTotals, OutboundPost, PostPlatform, PublishedPost};
use crate::progression::{LevelThreshold, ProgressionSource};
use crate::state::{EngagementState, SaveOutcome, StateStore};

#[derive(Default)]
pub struct MemoryIdempotencyStore {
    pub records: Mutex<HashMap<IdempotencyKey, IdempotencyRecord>>,
    /// Post ids whose insert fails as if the store were unreachable.
    pub fail_for: Mutex<HashSet<String>>,
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn put_if_absent(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
    ) -> Result<PutOutcome> {
        if self.fail_for.lock().expect("lock").contains(&key.post_id) {
            anyhow::bail!("store unavailable for {}", key.post_id);
        }
        let mut records = self.records.lock().expect("lock");
        if records.contains_key(key) {
            return Ok(PutOutcome::AlreadyExists);
        }
        records.insert(key.clone(), record.clone());
        Ok(PutOutcome::Inserted)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.lock().expect("lock");
        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        Ok(before - records.len())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    pub state: Mutex<Option<EngagementState>>,
    /// Simulates a concurrent writer bumping the version before our save.
    pub bump_before_save: Mutex<bool>,
}

impl MemoryStateStore {
    pub fn snapshot(&self) -> Option<EngagementState> {
        self.state.lock().expect("lock").clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_state(&self) -> Result<Option<EngagementState>> {
        Ok(self.snapshot())
    }

    async fn save_state(
        &self,
        state: &EngagementState,
        expected_version: u64,
    ) -> Result<SaveOutcome> {
        let mut stored = self.state.lock().expect("lock");
        if *self.bump_before_save.lock().expect("lock") {
            let mut other = stored.clone().unwrap_or_default();
            other.version += 1;
            *stored = Some(other);
        }
        let current = stored.as_ref().map(|s| s.version).unwrap_or(0);
        if current != expected_version {
            return Ok(SaveOutcome::Stale { current });
        }
        let mut saved = state.clone();
        saved.version = expected_version + 1;
        *stored = Some(saved);
        Ok(SaveOutcome::Saved {
            version: expected_version + 1,
        })
    }
}

pub struct FixedTable(pub Vec<LevelThreshold>);

impl FixedTable {
    pub fn from_pairs(pairs: &[(u32, u64)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|&(level, threshold)| LevelThreshold { level, threshold })
                .collect(),
        )
    }
}

#[async_trait]
impl ProgressionSource for FixedTable {
    async fn load_progression_table(&self) -> Result<Vec<LevelThreshold>> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct FakePlatform {
    pub timelines: Mutex<HashMap<String, Vec<ClassifiedPost>>>,
    /// Return every post regardless of `since_id`.
    pub ignore_since: bool,
    pub failing_timelines: Mutex<HashSet<String>>,
    pub totals: Mutex<Option<EngagementTotals>>,
    pub published: Mutex<Vec<OutboundPost>>,
    /// Publishing text containing any of these fragments fails.
    pub failing_fragments: Mutex<Vec<String>>,
    pub profile_names: Mutex<Vec<String>>,
    pub profile_images: Mutex<Vec<Vec<u8>>>,
    pub uploads: Mutex<Vec<Vec<u8>>>,
    pub timeline_requests: Mutex<Vec<(String, Option<String>)>>,
}

impl FakePlatform {
    pub fn with_timeline(self, user_id: &str, posts: Vec<ClassifiedPost>) -> Self {
        self.timelines
            .lock()
            .expect("lock")
            .insert(user_id.to_string(), posts);
        self
    }

    pub fn published(&self) -> Vec<OutboundPost> {
        self.published.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PostPlatform for FakePlatform {
    async fn user_timeline(
        &self,
        user_id: &str,
        since_id: Option<&str>,
        _max_results: u32,
    ) -> Result<Vec<ClassifiedPost>> {
        self.timeline_requests
            .lock()
            .expect("lock")
            .push((user_id.to_string(), since_id.map(str::to_string)));
        if self.failing_timelines.lock().expect("lock").contains(user_id) {
            anyhow::bail!("timeline unavailable for {}", user_id);
        }
        let posts = self
            .timelines
            .lock()
            .expect("lock")
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        Ok(posts
            .into_iter()
            .filter(|post| match (since_id, self.ignore_since) {
                (Some(since), false) => compare_post_ids(&post.id, since).is_gt(),
                _ => true,
            })
            .collect())
    }

    async fn own_engagement_totals(
        &self,
        _user_id: &str,
        _max_results: u32,
    ) -> Result<EngagementTotals> {
        match *self.totals.lock().expect("lock") {
            Some(totals) => Ok(totals),
            None => anyhow::bail!("metrics unavailable"),
        }
    }

    async fn publish(&self, post: &OutboundPost) -> Result<PublishedPost> {
        let failing = self.failing_fragments.lock().expect("lock");
        if failing.iter().any(|fragment| post.text.contains(fragment.as_str())) {
            anyhow::bail!("publish rejected");
        }
        let mut published = self.published.lock().expect("lock");
        published.push(post.clone());
        Ok(PublishedPost {
            id: format!("out-{}", published.len()),
            text: post.text.clone(),
        })
    }

    async fn update_profile_name(&self, name: &str) -> Result<()> {
        self.profile_names
            .lock()
            .expect("lock")
            .push(name.to_string());
        Ok(())
    }

    async fn update_profile_image(&self, image: &[u8]) -> Result<()> {
        self.profile_images
            .lock()
            .expect("lock")
            .push(image.to_vec());
        Ok(())
    }

    async fn upload_media(&self, bytes: &[u8]) -> Result<String> {
        let mut uploads = self.uploads.lock().expect("lock");
        uploads.push(bytes.to_vec());
        Ok(format!("media-{}", uploads.len()))
    }
}

/// Answers by the request's `request_type` context entry; unknown types fail.
#[derive(Default)]
pub struct ScriptedAgent {
    pub replies: Mutex<HashMap<String, String>>,
    pub requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn reply(self, request_type: &str, text: &str) -> Self {
        self.replies
            .lock()
            .expect("lock")
            .insert(request_type.to_string(), text.to_string());
        self
    }

    pub fn request_types(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|r| r.context.get("request_type").cloned())
            .collect()
    }
}

#[async_trait]
impl TextAgent for ScriptedAgent {
    async fn invoke(&self, request: &AgentRequest) -> AgentResponse {
        self.requests.lock().expect("lock").push(request.clone());
        let kind = request
            .context
            .get("request_type")
            .cloned()
            .unwrap_or_default();
        match self.replies.lock().expect("lock").get(&kind) {
            Some(text) => AgentResponse::ok("test-session".to_string(), text.clone()),
            None => AgentResponse::failed("test-session".to_string(), "agent timed out"),
        }
    }
}

pub fn post(id: &str, author: &str) -> ClassifiedPost {
    ClassifiedPost {
        id: id.to_string(),
        text: format!("post {}", id),
        author_id: author.to_string(),
        is_reply: false,
        is_repost: false,
        is_quote: false,
        created_at: None,
        referenced_post_id: None,
    }
}

pub fn reply(id: &str, author: &str) -> ClassifiedPost {
    ClassifiedPost {
        is_reply: true,
        ..post(id, author)
    }
}

pub fn repost(id: &str, author: &str) -> ClassifiedPost {
    ClassifiedPost {
        is_repost: true,
        ..post(id, author)
    }
}
