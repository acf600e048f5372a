use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classifier::{ApiPost, ClassifiedPost};
use crate::http_client::build_http_client;

/// Hard limit on outbound post length, in characters.
pub const MAX_POST_CHARS: usize = 140;

// ========================================================================
// Platform API Types
// ========================================================================

#[derive(Debug, Clone, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    data: Vec<MetricsPost>,
}

#[derive(Debug, Clone, Deserialize)]
struct MetricsPost {
    #[serde(flatten)]
    post: ApiPost,
    #[serde(default)]
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicMetrics {
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
}

#[derive(Debug, Clone, Serialize)]
struct CreatePostBody<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<ReplySettings<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quote_tweet_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<MediaSettings<'a>>,
}

#[derive(Debug, Clone, Serialize)]
struct ReplySettings<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct MediaSettings<'a> {
    media_ids: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct CreatePostResponse {
    data: PublishedPost,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaUploadResponse {
    media_id_string: String,
}

/// A post the engine wants to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundPost {
    pub text: String,
    pub reply_to_id: Option<String>,
    pub quoted_id: Option<String>,
    pub media_ids: Vec<String>,
}

impl OutboundPost {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn quoting(text: impl Into<String>, quoted_id: &str) -> Self {
        Self {
            text: text.into(),
            quoted_id: Some(quoted_id.to_string()),
            ..Self::default()
        }
    }

    pub fn replying(text: impl Into<String>, reply_to_id: &str) -> Self {
        Self {
            text: text.into(),
            reply_to_id: Some(reply_to_id.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishedPost {
    pub id: String,
    #[serde(default)]
    pub text: String,
}

/// Summed public metrics over the bot's recent posts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngagementTotals {
    pub reactions: u64,
    pub shares: u64,
}

/// Everything the engine needs from the social platform.
#[async_trait]
pub trait PostPlatform: Send + Sync {
    /// Posts by `user_id` newer than `since_id`, newest first.
    async fn user_timeline(
        &self,
        user_id: &str,
        since_id: Option<&str>,
        max_results: u32,
    ) -> Result<Vec<ClassifiedPost>>;

    /// Reaction and share totals across the account's most recent posts.
    async fn own_engagement_totals(&self, user_id: &str, max_results: u32)
        -> Result<EngagementTotals>;

    async fn publish(&self, post: &OutboundPost) -> Result<PublishedPost>;

    async fn update_profile_name(&self, name: &str) -> Result<()>;

    async fn update_profile_image(&self, image: &[u8]) -> Result<()>;

    /// Upload an image and return its media id.
    async fn upload_media(&self, bytes: &[u8]) -> Result<String>;
}

// ========================================================================
// HTTP implementation
// ========================================================================

pub struct XApiClient {
    base_url: String,
    upload_url: String,
    token: String,
    client: Client,
}

impl XApiClient {
    pub fn new(
        base_url: String,
        upload_url: String,
        token: String,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
            token,
            client: build_http_client(Some(timeout))?,
        })
    }

    async fn fetch_timeline(
        &self,
        user_id: &str,
        since_id: Option<&str>,
        max_results: u32,
    ) -> Result<Vec<MetricsPost>> {
        let url = format!("{}/2/users/{}/tweets", self.base_url, user_id);
        // The API accepts 5..=100 results per page.
        let mut query = vec![
            ("max_results", max_results.clamp(5, 100).to_string()),
            (
                "tweet.fields",
                "created_at,author_id,referenced_tweets,public_metrics".to_string(),
            ),
        ];
        if let Some(since_id) = since_id {
            query.push(("since_id", since_id.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Failed to fetch timeline for {}", user_id))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to fetch timeline: {} - {}", status, body);
        }

        let timeline: TimelineResponse = response.json().await?;
        Ok(timeline.data)
    }
}

#[async_trait]
impl PostPlatform for XApiClient {
    async fn user_timeline(
        &self,
        user_id: &str,
        since_id: Option<&str>,
        max_results: u32,
    ) -> Result<Vec<ClassifiedPost>> {
        let posts = self.fetch_timeline(user_id, since_id, max_results).await?;
        Ok(posts
            .into_iter()
            .map(|entry| ClassifiedPost::from_api(entry.post, user_id))
            .collect())
    }

    async fn own_engagement_totals(
        &self,
        user_id: &str,
        max_results: u32,
    ) -> Result<EngagementTotals> {
        let posts = self.fetch_timeline(user_id, None, max_results).await?;
        Ok(posts
            .iter()
            .filter_map(|entry| entry.public_metrics.as_ref())
            .fold(EngagementTotals::default(), |totals, metrics| EngagementTotals {
                reactions: totals.reactions + metrics.like_count,
                shares: totals.shares + metrics.retweet_count,
            }))
    }

    async fn publish(&self, post: &OutboundPost) -> Result<PublishedPost> {
        let length = post.text.chars().count();
        if length > MAX_POST_CHARS {
            anyhow::bail!("Post text is {} characters, limit is {}", length, MAX_POST_CHARS);
        }

        let url = format!("{}/2/tweets", self.base_url);
        let body = CreatePostBody {
            text: &post.text,
            reply: post
                .reply_to_id
                .as_deref()
                .map(|id| ReplySettings { in_reply_to_tweet_id: id }),
            quote_tweet_id: post.quoted_id.as_deref(),
            media: (!post.media_ids.is_empty()).then_some(MediaSettings {
                media_ids: &post.media_ids,
            }),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("Failed to send post")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to create post: {} - {}", status, body);
        }

        let created: CreatePostResponse = response.json().await?;
        Ok(created.data)
    }

    async fn update_profile_name(&self, name: &str) -> Result<()> {
        let url = format!("{}/1.1/account/update_profile.json", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .form(&[("name", name)])
            .send()
            .await
            .context("Failed to update profile")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to update profile: {} - {}", status, body);
        }
        Ok(())
    }

    async fn update_profile_image(&self, image: &[u8]) -> Result<()> {
        let url = format!("{}/1.1/account/update_profile_image.json", self.base_url);
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .form(&[("image", encoded.as_str())])
            .send()
            .await
            .context("Failed to update profile image")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to update profile image: {} - {}", status, body);
        }
        Ok(())
    }

    async fn upload_media(&self, bytes: &[u8]) -> Result<String> {
        let url = format!("{}/1.1/media/upload.json", self.upload_url);
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .form(&[("media_data", encoded.as_str())])
            .send()
            .await
            .context("Failed to upload media")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to upload media: {} - {}", status, body);
        }

        let uploaded: MediaUploadResponse = response.json().await?;
        Ok(uploaded.media_id_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Form, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn spawn_platform() -> XApiClient {
        let app = Router::new()
            .route(
                "/2/users/:id/tweets",
                get(
                    |Path(id): Path<String>, Query(query): Query<HashMap<String, String>>| async move {
                        let since = query.get("since_id").cloned().unwrap_or_default();
                        Json(json!({
                            "data": [
                                {
                                    "id": "20",
                                    "text": format!("from {} since {}", id, since),
                                    "public_metrics": {"like_count": 3, "retweet_count": 1}
                                },
                                {
                                    "id": "19",
                                    "text": "RT",
                                    "author_id": id,
                                    "referenced_tweets": [{"type": "retweeted", "id": "7"}],
                                    "public_metrics": {"like_count": 2, "retweet_count": 0}
                                }
                            ]
                        }))
                    },
                ),
            )
            .route(
                "/2/tweets",
                post(|Json(body): Json<Value>| async move {
                    let quoted = body["quote_tweet_id"].as_str().unwrap_or("none").to_string();
                    Json(json!({"data": {"id": "99", "text": quoted}}))
                }),
            )
            .route(
                "/1.1/account/update_profile_image.json",
                post(|Form(form): Form<HashMap<String, String>>| async move {
                    let decoded = form.get("image").and_then(|image| {
                        base64::engine::general_purpose::STANDARD.decode(image).ok()
                    });
                    if decoded.as_deref() == Some(b"level-png".as_slice()) {
                        StatusCode::OK
                    } else {
                        StatusCode::BAD_REQUEST
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let base = format!("http://{}", listener.local_addr().expect("local addr"));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        XApiClient::new(base.clone(), base, "token".to_string(), Duration::from_secs(5))
            .expect("client")
    }

    #[tokio::test]
    async fn timeline_posts_are_classified() {
        let client = spawn_platform().await;
        let posts = client
            .user_timeline("100", Some("10"), 20)
            .await
            .expect("timeline");

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].author_id, "100");
        assert_eq!(posts[0].text, "from 100 since 10");
        assert!(posts[1].is_repost);
    }

    #[tokio::test]
    async fn engagement_totals_sum_public_metrics() {
        let client = spawn_platform().await;
        let totals = client
            .own_engagement_totals("300", 100)
            .await
            .expect("totals");
        assert_eq!(totals, EngagementTotals { reactions: 5, shares: 1 });
    }

    #[tokio::test]
    async fn publish_sends_quote_id_and_rejects_long_text() {
        let client = spawn_platform().await;
        let published = client
            .publish(&OutboundPost::quoting("nice", "42"))
            .await
            .expect("publish");
        assert_eq!(published.id, "99");
        assert_eq!(published.text, "42");

        let too_long = OutboundPost::text("あ".repeat(MAX_POST_CHARS + 1));
        assert!(client.publish(&too_long).await.is_err());
    }

    #[tokio::test]
    async fn profile_image_is_sent_base64_encoded() {
        let client = spawn_platform().await;
        client
            .update_profile_image(b"level-png")
            .await
            .expect("image accepted");

        let err = client
            .update_profile_image(b"other")
            .await
            .expect_err("image rejected");
        assert!(err.to_string().contains("400"));
    }
}
