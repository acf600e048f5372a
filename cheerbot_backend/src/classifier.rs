//! Post classification for the two watched identities.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Which watched account a post belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Primary,
    Secondary,
}

impl Identity {
    pub fn as_str(self) -> &'static str {
        match self {
            Identity::Primary => "primary",
            Identity::Secondary => "secondary",
        }
    }
}

/// The ids of the two watched accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedIdentities {
    pub primary_user_id: String,
    pub secondary_user_id: String,
}

impl TrackedIdentities {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary_user_id: primary.into(),
            secondary_user_id: secondary.into(),
        }
    }

    pub fn user_id(&self, identity: Identity) -> &str {
        match identity {
            Identity::Primary => &self.primary_user_id,
            Identity::Secondary => &self.secondary_user_id,
        }
    }

    /// Identity by author alone; used to attribute reposts.
    pub fn identity_of_author(&self, post: &ClassifiedPost) -> Option<Identity> {
        if post.author_id == self.primary_user_id {
            Some(Identity::Primary)
        } else if post.author_id == self.secondary_user_id {
            Some(Identity::Secondary)
        } else {
            None
        }
    }

    /// A post belongs to an identity when that identity authored it and it is
    /// neither a reply nor a repost. Quote posts count.
    pub fn classify(&self, post: &ClassifiedPost) -> Option<Identity> {
        if post.is_reply || post.is_repost {
            return None;
        }
        self.identity_of_author(post)
    }
}

/// An immutable view of one platform post with its structural flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedPost {
    pub id: String,
    pub text: String,
    pub author_id: String,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub is_repost: bool,
    #[serde(default)]
    pub is_quote: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub referenced_post_id: Option<String>,
}

/// Raw post shape as returned by the platform's v2 timeline endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPost {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub referenced_tweets: Vec<ApiReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ClassifiedPost {
    /// Build from an API post. `fallback_author` is used when the payload
    /// omits `author_id`, which happens for single-user timelines.
    pub fn from_api(post: ApiPost, fallback_author: &str) -> Self {
        let mut classified = ClassifiedPost {
            author_id: post
                .author_id
                .unwrap_or_else(|| fallback_author.to_string()),
            id: post.id,
            text: post.text,
            is_reply: false,
            is_repost: false,
            is_quote: false,
            created_at: post.created_at,
            referenced_post_id: None,
        };

        for reference in post.referenced_tweets {
            match reference.kind.as_str() {
                "quoted" => classified.is_quote = true,
                "replied_to" => classified.is_reply = true,
                "retweeted" => classified.is_repost = true,
                _ => continue,
            }
            classified.referenced_post_id.get_or_insert(reference.id);
        }

        classified
    }
}

/// Posts that are neither replies nor reposts (quotes included).
pub fn original_and_quotes(posts: &[ClassifiedPost]) -> Vec<ClassifiedPost> {
    posts
        .iter()
        .filter(|post| !post.is_reply && !post.is_repost)
        .cloned()
        .collect()
}

pub fn reposts_only(posts: &[ClassifiedPost]) -> Vec<ClassifiedPost> {
    posts.iter().filter(|post| post.is_repost).cloned().collect()
}

/// Compare two decimal id strings by numeric value without parsing them.
pub fn compare_post_ids(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Numerically greatest id in the batch.
pub fn max_post_id<'a, I>(ids: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    ids.into_iter().max_by(|a, b| compare_post_ids(a, b))
}
