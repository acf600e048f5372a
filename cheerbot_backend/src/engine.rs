//! Engagement orchestration: one invocation of the bot.
//!
//! An invocation loads the state record and progression table, reacts to new
//! posts from both watched identities, settles level changes and time-gated
//! content, then writes the state back with a version check. Only failures
//! to load or save are fatal; every outbound action fails on its own.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::agent_client::{AgentRequest, TextAgent};
use crate::avatar::LevelImageCompositor;
use crate::classifier::{
    compare_post_ids, max_post_id, original_and_quotes, reposts_only, ClassifiedPost, Identity,
    TrackedIdentities,
};
use crate::config::EngineConfig;
use crate::error::FatalError;
use crate::idempotency::{Acquisition, ActionKind, IdempotencyGuard, IdempotencyStore};
use crate::platform::{OutboundPost, PostPlatform, MAX_POST_CHARS};
use crate::progression::{ActivityKind, LevelTransition, ProgressionSource, ProgressionTable, Score};
use crate::sanitizer::sanitize;
use crate::schedule;
use crate::state::{activity_for, EngagementState, SaveOutcome, StateStore};
use crate::templates::{
    parse_emotion, prefixed_within_budget, Persona, ANALYSIS_PREFIX, FILLER_PREFIX,
    NOTHING_NEW_MARKER, WEEKLY_PREFIX,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Full pass: both timelines, passive metrics and the daily summary.
    #[default]
    DailyReport,
    /// Frequent pass during peak hours: primary timeline and gated filler only.
    CoreTime,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::DailyReport => "daily_report",
            ExecutionMode::CoreTime => "core_time",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily_report" => Ok(ExecutionMode::DailyReport),
            "core_time" => Ok(ExecutionMode::CoreTime),
            other => Err(format!(
                "unknown execution mode '{}'; expected daily_report or core_time",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Quote,
    LevelAnnouncement,
    DailySummary,
    Analysis,
    Filler,
    WeeklyExtra,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Quote => "quote",
            ContentKind::LevelAnnouncement => "level_announcement",
            ContentKind::DailySummary => "daily_summary",
            ContentKind::Analysis => "analysis",
            ContentKind::Filler => "filler",
            ContentKind::WeeklyExtra => "weekly_extra",
        }
    }
}

/// Observable milestones of an invocation, published on the event channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    InvocationStarted {
        mode: ExecutionMode,
    },
    PostDetected {
        identity: Identity,
        post_id: String,
        action: ActionKind,
    },
    ScoreGained {
        kind: ActivityKind,
        count: u64,
        delta: Score,
    },
    LevelUp {
        from: u32,
        to: u32,
    },
    ProfileUpdated {
        name: String,
    },
    ProfileImageUpdated {
        level: u32,
    },
    ContentPosted {
        content: ContentKind,
        post_id: String,
    },
    TransientError {
        action: String,
        message: String,
    },
    InvocationFinished {
        summary: InvocationSummary,
    },
}

/// What one invocation did, returned to the caller and logged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvocationSummary {
    pub execution_mode: ExecutionMode,
    pub primary_posts: u64,
    pub secondary_posts: u64,
    pub reposts: u64,
    pub new_reactions: u64,
    pub new_shares: u64,
    pub quotes_posted: u64,
    pub score_gained: Score,
    pub cumulative_score: Score,
    pub previous_level: u32,
    pub new_level: u32,
    pub level_up: bool,
    pub profile_updated: bool,
    pub daily_summary_posted: bool,
    pub analysis_posted: bool,
    pub filler_posted: bool,
    pub weekly_extra_posted: bool,
    pub skipped_posts: u64,
    pub deferred_posts: u64,
    pub transient_errors: u64,
    pub state_version: u64,
}

/// Non-secret settings the engine needs at run time.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub identities: TrackedIdentities,
    pub bot_user_id: String,
    pub persona: Persona,
    pub poll_max_results: u32,
    pub metrics_sample_size: u32,
    pub media_dir: Option<PathBuf>,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            identities: TrackedIdentities::new(
                config.primary_user_id.clone(),
                config.secondary_user_id.clone(),
            ),
            bot_user_id: config.bot_user_id.clone(),
            persona: config.persona(),
            poll_max_results: config.poll_max_results,
            metrics_sample_size: config.metrics_sample_size,
            media_dir: config.media_dir.as_ref().map(PathBuf::from),
        }
    }
}

pub struct EngagementEngine {
    settings: EngineSettings,
    state_store: Arc<dyn StateStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    progression: Arc<dyn ProgressionSource>,
    platform: Arc<dyn PostPlatform>,
    agent: Arc<dyn TextAgent>,
    compositor: Option<Arc<dyn LevelImageCompositor>>,
    event_tx: Option<flume::Sender<EngineEvent>>,
}

impl EngagementEngine {
    pub fn new(
        settings: EngineSettings,
        state_store: Arc<dyn StateStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        progression: Arc<dyn ProgressionSource>,
        platform: Arc<dyn PostPlatform>,
        agent: Arc<dyn TextAgent>,
    ) -> Self {
        Self {
            settings,
            state_store,
            idempotency,
            progression,
            platform,
            agent,
            compositor: None,
            event_tx: None,
        }
    }

    /// Also change the profile picture on the monthly profile update.
    pub fn with_compositor(mut self, compositor: Arc<dyn LevelImageCompositor>) -> Self {
        self.compositor = Some(compositor);
        self
    }

    pub fn with_events(mut self, event_tx: flume::Sender<EngineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Current persisted state, for read-only inspection.
    pub async fn current_state(&self) -> Result<EngagementState, FatalError> {
        self.state_store
            .load_state()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| FatalError::store("load engagement state", e))
    }

    /// Run one invocation at instant `now`.
    pub async fn run_invocation(
        &self,
        mode: ExecutionMode,
        now: DateTime<Utc>,
    ) -> Result<InvocationSummary, FatalError> {
        tracing::info!("Starting {} invocation", mode);
        self.emit(EngineEvent::InvocationStarted { mode });

        let loaded = self
            .state_store
            .load_state()
            .await
            .map_err(|e| FatalError::store("load engagement state", e))?;
        let expected_version = loaded.as_ref().map(|state| state.version).unwrap_or(0);
        let rows = self
            .progression
            .load_progression_table()
            .await
            .map_err(|e| FatalError::store("load progression table", e))?;
        let table = ProgressionTable::new(rows)?;

        let mut run = Invocation::new(self, &table, loaded.unwrap_or_default(), mode, now);

        if mode == ExecutionMode::DailyReport {
            run.collect_passive_engagement().await;
        }
        run.process_identity(Identity::Primary).await;
        if mode == ExecutionMode::DailyReport {
            run.process_identity(Identity::Secondary).await;
        }
        run.advance_watermark();
        run.settle_level().await;
        if mode == ExecutionMode::DailyReport {
            run.maybe_post_daily_summary().await;
        }
        run.maybe_post_filler_content().await;

        let (mut state, mut summary) = run.finish();
        state.last_updated = now;

        match self
            .state_store
            .save_state(&state, expected_version)
            .await
            .map_err(|e| FatalError::store("save engagement state", e))?
        {
            SaveOutcome::Saved { version } => summary.state_version = version,
            SaveOutcome::Stale { current } => {
                tracing::error!(
                    "Engagement state moved from version {} to {} during this invocation",
                    expected_version,
                    current
                );
                return Err(FatalError::StateConflict {
                    expected: expected_version,
                    current,
                });
            }
        }

        match self.idempotency.purge_expired(now).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!("Purged {} expired processed-post records", removed),
            Err(e) => tracing::warn!("Failed to purge expired records: {:#}", e),
        }

        tracing::info!(
            "Finished {} invocation: {} quotes, +{} score, level {}",
            mode,
            summary.quotes_posted,
            summary.score_gained,
            summary.new_level
        );
        self.emit(EngineEvent::InvocationFinished {
            summary: summary.clone(),
        });
        Ok(summary)
    }
}

fn is_post_action(action: ActionKind) -> bool {
    !matches!(action, ActionKind::FillerContent | ActionKind::WeeklyExtra)
}

/// Working set for a single invocation.
struct Invocation<'a> {
    engine: &'a EngagementEngine,
    table: &'a ProgressionTable,
    state: EngagementState,
    summary: InvocationSummary,
    now: DateTime<Utc>,
    since_id: Option<String>,
    fetched_ids: Vec<String>,
    deferred_ids: Vec<String>,
    poll_failed: bool,
    score_before: Score,
}

impl<'a> Invocation<'a> {
    fn new(
        engine: &'a EngagementEngine,
        table: &'a ProgressionTable,
        state: EngagementState,
        mode: ExecutionMode,
        now: DateTime<Utc>,
    ) -> Self {
        let summary = InvocationSummary {
            execution_mode: mode,
            previous_level: state.current_level,
            new_level: state.current_level,
            ..InvocationSummary::default()
        };
        Self {
            engine,
            table,
            since_id: state.latest_seen_post_id.clone(),
            score_before: state.cumulative_score,
            state,
            summary,
            now,
            fetched_ids: Vec::new(),
            deferred_ids: Vec::new(),
            poll_failed: false,
        }
    }

    fn settings(&self) -> &'a EngineSettings {
        &self.engine.settings
    }

    fn guard(&self) -> IdempotencyGuard<'a> {
        IdempotencyGuard::new(self.engine.idempotency.as_ref())
    }

    fn transient(&mut self, action: &str, error: anyhow::Error) {
        tracing::warn!("{} failed: {:#}", action, error);
        self.summary.transient_errors += 1;
        self.engine.emit(EngineEvent::TransientError {
            action: action.to_string(),
            message: format!("{:#}", error),
        });
    }

    fn grant(&mut self, kind: ActivityKind, count: u64) {
        if count == 0 {
            return;
        }
        let delta = self.state.grant(kind, count);
        self.summary.score_gained += delta;
        match kind {
            ActivityKind::PrimaryPost => self.summary.primary_posts += count,
            ActivityKind::SecondaryPost => self.summary.secondary_posts += count,
            ActivityKind::Repost | ActivityKind::Reaction => {}
        }
        self.engine.emit(EngineEvent::ScoreGained { kind, count, delta });
    }

    async fn collect_passive_engagement(&mut self) {
        let settings = self.settings();
        let totals = match self
            .engine
            .platform
            .own_engagement_totals(&settings.bot_user_id, settings.metrics_sample_size)
            .await
        {
            Ok(totals) => totals,
            Err(e) => {
                self.transient("engagement_metrics", e);
                return;
            }
        };

        let (reactions, shares) = self
            .state
            .observe_engagement_totals(totals.reactions, totals.shares);
        self.summary.new_reactions = reactions;
        self.summary.new_shares = shares;
        self.grant(ActivityKind::Reaction, reactions);
        self.grant(ActivityKind::Repost, shares);
    }

    async fn process_identity(&mut self, identity: Identity) {
        let settings = self.settings();
        let user_id = settings.identities.user_id(identity);
        let fetched = self
            .engine
            .platform
            .user_timeline(user_id, self.since_id.as_deref(), settings.poll_max_results)
            .await;
        let posts = match fetched {
            Ok(posts) => posts,
            Err(e) => {
                self.poll_failed = true;
                self.transient(&format!("poll_{}", identity.as_str()), e);
                return;
            }
        };
        self.fetched_ids.extend(posts.iter().map(|post| post.id.clone()));

        let mut originals: Vec<ClassifiedPost> = original_and_quotes(&posts)
            .into_iter()
            .filter(|post| settings.identities.classify(post) == Some(identity))
            .collect();
        originals.sort_by(|a, b| compare_post_ids(&a.id, &b.id));
        for post in &originals {
            self.handle_original(identity, post).await;
        }

        let mut reposts: Vec<ClassifiedPost> = reposts_only(&posts)
            .into_iter()
            .filter(|post| settings.identities.identity_of_author(post) == Some(identity))
            .collect();
        reposts.sort_by(|a, b| compare_post_ids(&a.id, &b.id));
        for post in &reposts {
            self.handle_repost(identity, post).await;
        }
    }

    /// Acquire the action for a post; `false` means skip it.
    async fn claim(&mut self, post_id: &str, action: ActionKind) -> bool {
        let acquired = self.guard().acquire(post_id, action, self.now).await;
        match acquired {
            Ok(Acquisition::Acquired) => true,
            Ok(Acquisition::AlreadyProcessed) => {
                if is_post_action(action) {
                    self.summary.skipped_posts += 1;
                }
                false
            }
            Err(e) => {
                // Date-keyed content has no post to refetch.
                if is_post_action(action) {
                    self.deferred_ids.push(post_id.to_string());
                }
                self.transient(&format!("acquire_{}", action), e);
                false
            }
        }
    }

    async fn handle_original(&mut self, identity: Identity, post: &ClassifiedPost) {
        let action = ActionKind::quote(identity);
        if !self.claim(&post.id, action).await {
            return;
        }
        tracing::info!("New {} post {}", identity.as_str(), post.id);
        self.engine.emit(EngineEvent::PostDetected {
            identity,
            post_id: post.id.clone(),
            action,
        });

        let reply = self.compose_quote(identity, post).await;
        let mut outbound = OutboundPost::quoting(reply, &post.id);

        let attach_media = identity == Identity::Primary && !self.state.daily_media_attached;
        if attach_media {
            if let Some(media_id) = self.emotion_media(&outbound.text).await {
                outbound.media_ids.push(media_id);
            }
        }

        match self.engine.platform.publish(&outbound).await {
            Ok(published) => {
                if !outbound.media_ids.is_empty() {
                    self.state.daily_media_attached = true;
                }
                self.summary.quotes_posted += 1;
                self.engine.emit(EngineEvent::ContentPosted {
                    content: ContentKind::Quote,
                    post_id: published.id,
                });
                self.grant(activity_for(identity), 1);
            }
            // The record stays: a quote that may have been half-sent is not retried.
            Err(e) => self.transient(&format!("quote_{}", identity.as_str()), e),
        }
    }

    async fn compose_quote(&mut self, identity: Identity, post: &ClassifiedPost) -> String {
        let persona = &self.settings().persona;
        let response = self
            .engine
            .agent
            .invoke(&persona.quote_request(identity, &post.text))
            .await;

        if response.success {
            let text = sanitize(&response.text);
            if !text.is_empty() {
                return persona.fit(&text);
            }
            tracing::warn!("Agent returned an empty reply for post {}", post.id);
        } else {
            let message = response.error.unwrap_or_else(|| "unknown error".to_string());
            self.transient("generate_quote", anyhow::anyhow!(message));
        }
        persona.fit(&persona.fallback_quote(identity))
    }

    async fn emotion_media(&mut self, reply: &str) -> Option<String> {
        let dir = self.settings().media_dir.as_ref()?;
        let response = self
            .engine
            .agent
            .invoke(&self.settings().persona.emotion_request(reply))
            .await;
        if !response.success {
            let message = response.error.unwrap_or_default();
            self.transient("classify_emotion", anyhow::anyhow!(message));
            return None;
        }
        let emotion = parse_emotion(&sanitize(&response.text))?;

        let path = dir.join(format!("{}.png", emotion));
        let bytes = match tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
        {
            Ok(bytes) => bytes,
            Err(e) => {
                self.transient("read_media", e);
                return None;
            }
        };

        match self.engine.platform.upload_media(&bytes).await {
            Ok(media_id) => {
                tracing::debug!("Attached {} image as media {}", emotion, media_id);
                Some(media_id)
            }
            Err(e) => {
                self.transient("upload_media", e);
                None
            }
        }
    }

    async fn handle_repost(&mut self, identity: Identity, post: &ClassifiedPost) {
        let action = ActionKind::repost(identity);
        if !self.claim(&post.id, action).await {
            return;
        }
        self.engine.emit(EngineEvent::PostDetected {
            identity,
            post_id: post.id.clone(),
            action,
        });
        self.summary.reposts += 1;
        self.grant(ActivityKind::Repost, 1);
    }

    /// Move the watermark to the newest fetched post, but never past a post
    /// whose claim failed, so it is fetched again next time. A failed poll
    /// holds it where it was.
    fn advance_watermark(&mut self) {
        self.summary.deferred_posts = self.deferred_ids.len() as u64;
        if self.poll_failed {
            tracing::info!(
                "Holding watermark at {:?} after a failed poll",
                self.since_id
            );
            return;
        }
        let oldest_deferred = self
            .deferred_ids
            .iter()
            .min_by(|a, b| compare_post_ids(a, b))
            .cloned();
        let candidate = max_post_id(
            self.fetched_ids
                .iter()
                .map(String::as_str)
                .filter(|id| match oldest_deferred.as_deref() {
                    Some(deferred) => compare_post_ids(id, deferred).is_lt(),
                    None => true,
                }),
        )
        .map(str::to_string);

        if let Some(candidate) = candidate {
            self.state.advance_watermark(&candidate);
        }
    }

    async fn settle_level(&mut self) {
        let after = self.state.cumulative_score;
        let reached = self.table.level_for(after);
        self.state.current_level = reached;
        self.summary.new_level = reached;
        let Some(transition) = self
            .table
            .transition(self.score_before, after)
            .filter(LevelTransition::is_level_up)
        else {
            return;
        };

        tracing::info!(
            "Level up {} -> {} ({} levels)",
            transition.from,
            transition.to,
            transition.levels_gained()
        );
        self.summary.level_up = true;
        self.engine.emit(EngineEvent::LevelUp {
            from: transition.from,
            to: transition.to,
        });

        let persona = &self.settings().persona;
        let xp_to_next = self.table.xp_to_next(reached, after);
        let progress = self.table.level_progress(after);
        let announcement = OutboundPost::text(persona.level_up(&self.state, xp_to_next, progress));
        match self.engine.platform.publish(&announcement).await {
            Ok(published) => self.engine.emit(EngineEvent::ContentPosted {
                content: ContentKind::LevelAnnouncement,
                post_id: published.id,
            }),
            Err(e) => self.transient("level_announcement", e),
        }

        if !schedule::should_update_progression(
            self.state.last_progression_update_month.as_deref(),
            self.now,
        ) {
            tracing::debug!("Profile already updated this month");
            return;
        }
        let image_updated = self.update_profile_image(reached).await;
        let name = persona.profile_name(reached);
        let name_updated = match self.engine.platform.update_profile_name(&name).await {
            Ok(()) => {
                self.engine.emit(EngineEvent::ProfileUpdated { name });
                true
            }
            Err(e) => {
                self.transient("profile_update", e);
                false
            }
        };
        if image_updated || name_updated {
            self.state.last_progression_update_month =
                Some(schedule::local_month_string(self.now));
            self.summary.profile_updated = true;
        }
    }

    async fn update_profile_image(&mut self, level: u32) -> bool {
        let engine = self.engine;
        let Some(compositor) = engine.compositor.as_ref() else {
            return false;
        };
        let image = match compositor.compose(level).await {
            Ok(image) => image,
            Err(e) => {
                self.transient("compose_profile_image", e);
                return false;
            }
        };
        match engine.platform.update_profile_image(&image).await {
            Ok(()) => {
                self.engine.emit(EngineEvent::ProfileImageUpdated { level });
                true
            }
            Err(e) => {
                self.transient("profile_image_update", e);
                false
            }
        }
    }

    async fn maybe_post_daily_summary(&mut self) {
        if !schedule::should_post_daily_summary(
            self.state.last_daily_report_date.as_deref(),
            self.now,
        ) {
            return;
        }

        let persona = &self.settings().persona;
        let xp_to_next = self
            .table
            .xp_to_next(self.state.current_level, self.state.cumulative_score);
        let report = OutboundPost::text(persona.daily_report(&self.state, xp_to_next));
        let published = match self.engine.platform.publish(&report).await {
            Ok(published) => published,
            Err(e) => {
                self.transient("daily_summary", e);
                return;
            }
        };

        self.state.last_daily_report_date = Some(schedule::local_date_string(self.now));
        self.state.reset_period();
        self.summary.daily_summary_posted = true;
        self.engine.emit(EngineEvent::ContentPosted {
            content: ContentKind::DailySummary,
            post_id: published.id.clone(),
        });

        self.post_analysis(&published.id).await;
    }

    async fn post_analysis(&mut self, summary_post_id: &str) {
        let settings = self.settings();
        let request = settings
            .persona
            .analysis_request(&settings.identities.primary_user_id);
        let Some(body) = self.generate("analysis", &request).await else {
            return;
        };

        let reply = OutboundPost::replying(
            prefixed_within_budget(ANALYSIS_PREFIX, &body, MAX_POST_CHARS),
            summary_post_id,
        );
        match self.engine.platform.publish(&reply).await {
            Ok(published) => {
                self.summary.analysis_posted = true;
                self.engine.emit(EngineEvent::ContentPosted {
                    content: ContentKind::Analysis,
                    post_id: published.id,
                });
            }
            Err(e) => self.transient("analysis", e),
        }
    }

    /// Ask the agent and sanitize; `None` when it failed or said nothing.
    async fn generate(
        &mut self,
        action: &str,
        request: &AgentRequest,
    ) -> Option<String> {
        let response = self.engine.agent.invoke(request).await;
        if !response.success {
            let message = response.error.unwrap_or_else(|| "unknown error".to_string());
            self.transient(action, anyhow::anyhow!(message));
            return None;
        }
        let body = sanitize(&response.text);
        (!body.is_empty()).then_some(body)
    }

    /// Filler and weekly content are claimed only after the agent produced a body.
    async fn maybe_post_filler_content(&mut self) {
        if !schedule::should_post_filler_content(self.state.prev_period_primary_count, self.now) {
            return;
        }
        let date_key = schedule::local_date_string(self.now);
        let settings = self.settings();
        let primary_id = settings.identities.primary_user_id.as_str();

        let request = settings.persona.filler_request(primary_id);
        match self.generate("filler_content", &request).await {
            Some(body) if body.contains(NOTHING_NEW_MARKER) => {
                tracing::info!("No new filler content today");
            }
            Some(body) => {
                if self.claim(&date_key, ActionKind::FillerContent).await {
                    let text = prefixed_within_budget(FILLER_PREFIX, &body, MAX_POST_CHARS);
                    if self
                        .publish_content(ContentKind::Filler, OutboundPost::text(text))
                        .await
                    {
                        self.summary.filler_posted = true;
                    }
                }
            }
            None => {}
        }

        if !schedule::should_post_weekly_extra(self.now) {
            return;
        }
        let latest = self
            .state
            .latest_seen_post_id
            .clone()
            .unwrap_or_else(|| "0".to_string());
        let request = settings.persona.weekly_request(primary_id, &latest);
        let Some(body) = self.generate("weekly_extra", &request).await else {
            return;
        };
        if !self.claim(&date_key, ActionKind::WeeklyExtra).await {
            return;
        }
        let text = prefixed_within_budget(WEEKLY_PREFIX, &body, MAX_POST_CHARS);
        if self
            .publish_content(ContentKind::WeeklyExtra, OutboundPost::text(text))
            .await
        {
            self.summary.weekly_extra_posted = true;
        }
    }

    async fn publish_content(&mut self, content: ContentKind, post: OutboundPost) -> bool {
        match self.engine.platform.publish(&post).await {
            Ok(published) => {
                self.engine.emit(EngineEvent::ContentPosted {
                    content,
                    post_id: published.id,
                });
                true
            }
            Err(e) => {
                self.transient(content.as_str(), e);
                false
            }
        }
    }

    fn finish(mut self) -> (EngagementState, InvocationSummary) {
        self.summary.cumulative_score = self.state.cumulative_score;
        self.summary.new_level = self.state.current_level;
        (self.state, self.summary)
    }
}
