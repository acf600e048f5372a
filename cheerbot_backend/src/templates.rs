//! Post bodies, prompts and fallback texts.

use crate::agent_client::AgentRequest;
use crate::classifier::Identity;
use crate::platform::MAX_POST_CHARS;
use crate::progression::{score_delta, ActivityKind};
use crate::sanitizer::truncate_to_budget;
use crate::state::EngagementState;

pub const ANALYSIS_PREFIX: &str = "🔍 今日のポスト分析\n";
pub const FILLER_PREFIX: &str = "🎬 新着動画\n";
pub const WEEKLY_PREFIX: &str = "🌏 今週の翻訳\n";

/// The agent answers with this when a search turned up nothing new.
pub const NOTHING_NEW_MARKER: &str = "新着なし";

/// Emotion keys the agent may pick for a reply; each maps to `<key>.png`.
pub const EMOTIONS: [&str; 5] = ["joy", "love", "surprise", "cheer", "calm"];

const ELLIPSIS: &str = "...";

/// Names and hashtags that shape every generated post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub display_name: String,
    pub primary_name: String,
    pub secondary_name: String,
    pub hashtags: String,
}

impl Persona {
    fn identity_name(&self, identity: Identity) -> &str {
        match identity {
            Identity::Primary => &self.primary_name,
            Identity::Secondary => &self.secondary_name,
        }
    }

    pub fn quote_request(&self, identity: Identity, post_text: &str) -> AgentRequest {
        let prompt = format!(
            "あなたは「{name}」というキャラクターで、{target}を応援しているファンです。\n\
             次の投稿に、キャラクターらしく明るい応援コメントを返してください。\n\n\
             {post}\n\n\
             制約:\n\
             - 絵文字は1〜2個まで\n\
             - 文末に「{tags}」を含めること\n\
             - ハッシュタグを含めて{limit}文字以内\n\
             - Markdown記法は使わないこと",
            name = self.display_name,
            target = self.identity_name(identity),
            post = post_text,
            tags = self.hashtags,
            limit = MAX_POST_CHARS,
        );
        AgentRequest::new(prompt)
            .with_context("request_type", "quote")
            .with_context("identity", identity.as_str())
    }

    pub fn fallback_quote(&self, identity: Identity) -> String {
        format!(
            "{}の投稿を見つけたよ！今日も応援してる✨ {}",
            self.identity_name(identity),
            self.hashtags
        )
    }

    pub fn emotion_request(&self, reply_text: &str) -> AgentRequest {
        let prompt = format!(
            "次の文章の感情を {} のいずれか1語だけで答えてください。\n\n{}",
            EMOTIONS.join(", "),
            reply_text
        );
        AgentRequest::new(prompt).with_context("request_type", "emotion")
    }

    pub fn analysis_request(&self, primary_user_id: &str) -> AgentRequest {
        let prompt = format!(
            "ユーザーID {} の最新ポストへのリプライを分析して、ファンの反応を\
             ポジティブな内容を中心に短い日本語のプレーンテキストで要約してください。\
             件数などの数値を含め、絵文字は1〜2個まで、Markdown記法は使わないでください。",
            primary_user_id
        );
        AgentRequest::new(prompt)
            .with_context("request_type", "ego_search")
            .with_context("user_id", primary_user_id)
    }

    pub fn filler_request(&self, primary_user_id: &str) -> AgentRequest {
        let prompt = format!(
            "{}に関する過去24時間以内の新着動画を探して、見つかったら1件をタイトルとURLで\
             紹介してください。見つからなければ「{}」とだけ答えてください。",
            self.primary_name, NOTHING_NEW_MARKER
        );
        AgentRequest::new(prompt)
            .with_context("request_type", "video_search")
            .with_context("user_id", primary_user_id)
    }

    pub fn weekly_request(&self, primary_user_id: &str, latest_post_id: &str) -> AgentRequest {
        let prompt = format!(
            "{}の今週いちばん反応の多かったポストを英語に翻訳して、原文の雰囲気を残して\
             紹介してください。Markdown記法は使わないでください。",
            self.primary_name
        );
        AgentRequest::new(prompt)
            .with_context("request_type", "translation")
            .with_context("user_id", primary_user_id)
            .with_context("latest_post_id", latest_post_id)
    }

    pub fn daily_report(&self, state: &EngagementState, xp_to_next: Option<u64>) -> String {
        let period = &state.period;
        let text = format!(
            "今日の活動報告📝\n\
             {primary}の投稿：{p}回\n\
             {secondary}の投稿：{s}回\n\
             いいね：{r}回\n\
             リポスト：{rp}回\n\
             今日の獲得XP：{score} XP\n\
             現在Lv.{level} → {next}\n\
             {tags}",
            primary = self.primary_name,
            p = period.primary_posts,
            secondary = self.secondary_name,
            s = period.secondary_posts,
            r = period.reactions,
            rp = period.reposts,
            score = period.score,
            level = state.current_level,
            next = next_level_label(xp_to_next),
            tags = self.hashtags,
        );
        self.fit(&text)
    }

    /// `progress` is the percent already covered toward the next level.
    pub fn level_up(
        &self,
        state: &EngagementState,
        xp_to_next: Option<u64>,
        progress: f64,
    ) -> String {
        let lifetime = &state.lifetime;
        let next = match xp_to_next {
            Some(_) => format!("{}（進捗{:.0}%）", next_level_label(xp_to_next), progress),
            None => next_level_label(None),
        };
        let text = format!(
            "レベルが{level}にあがった🎉\n\
             {primary}の投稿：{p} XP\n\
             {secondary}の投稿：{s} XP\n\
             いいね：{r} XP\n\
             リポスト：{rp} XP\n\
             {next}\n\
             {tags}",
            level = state.current_level,
            primary = self.primary_name,
            p = score_delta(ActivityKind::PrimaryPost, lifetime.primary_posts),
            secondary = self.secondary_name,
            s = score_delta(ActivityKind::SecondaryPost, lifetime.secondary_posts),
            r = score_delta(ActivityKind::Reaction, lifetime.reactions),
            rp = score_delta(ActivityKind::Repost, lifetime.reposts),
            next = next,
            tags = self.hashtags,
        );
        self.fit(&text)
    }

    pub fn profile_name(&self, level: u32) -> String {
        format!("{} Lv.{}", self.display_name, level)
    }

    /// Fit a post to the length limit without losing the hashtags.
    pub fn fit(&self, text: &str) -> String {
        fit_with_hashtags(text, &self.hashtags, MAX_POST_CHARS)
    }
}

fn next_level_label(xp_to_next: Option<u64>) -> String {
    match xp_to_next {
        Some(xp) => format!("次まで{} XP", xp),
        None => "レベルMAX".to_string(),
    }
}

/// Shorten `text` to `max_len` characters, keeping `hashtags` at the end and
/// marking the cut with an ellipsis.
pub fn fit_with_hashtags(text: &str, hashtags: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }

    let tag_len = hashtags.chars().count();
    if hashtags.is_empty() || tag_len + 1 + ELLIPSIS.len() >= max_len {
        let budget = max_len.saturating_sub(ELLIPSIS.len());
        let head: String = text.chars().take(budget).collect();
        return if budget == 0 {
            text.chars().take(max_len).collect()
        } else {
            format!("{}{}", head, ELLIPSIS)
        };
    }

    let content = text.replace(hashtags, "");
    let content = content.trim();
    let room = max_len - tag_len - 1;
    if content.chars().count() <= room {
        return format!("{} {}", content, hashtags);
    }

    let head: String = content.chars().take(room - ELLIPSIS.len()).collect();
    format!("{}{} {}", head.trim_end(), ELLIPSIS, hashtags)
}

/// Prefix a generated body, cutting the body so the whole post fits.
pub fn prefixed_within_budget(prefix: &str, body: &str, max_len: usize) -> String {
    let room = max_len.saturating_sub(prefix.chars().count());
    format!("{}{}", prefix, truncate_to_budget(body, room))
}

/// Pick the first known emotion key mentioned in an agent answer.
pub fn parse_emotion(answer: &str) -> Option<&'static str> {
    let lowered = answer.to_lowercase();
    EMOTIONS.iter().copied().find(|emotion| lowered.contains(emotion))
}
