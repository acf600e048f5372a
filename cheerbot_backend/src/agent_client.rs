//! Client for the external text-generation agent.
//!
//! The agent may answer with a plain body, a JSON object or an event stream.
//! Bodies are always collected in full before decoding; a multi-byte
//! character split across two chunks would otherwise be corrupted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::http_client::build_http_client;

/// One request to the agent: a prompt plus free-form string context.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentRequest {
    pub prompt: String,
    pub context: BTreeMap<String, String>,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// Outcome of one agent call. Failures are values, not errors: a failed
/// generation only affects the action that asked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub success: bool,
    pub text: String,
    pub error: Option<String>,
    pub session_id: String,
}

impl AgentResponse {
    pub fn ok(session_id: String, text: String) -> Self {
        Self {
            success: true,
            text,
            error: None,
            session_id,
        }
    }

    pub fn failed(session_id: String, error: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            error: Some(error.into()),
            session_id,
        }
    }
}

#[async_trait]
pub trait TextAgent: Send + Sync {
    async fn invoke(&self, request: &AgentRequest) -> AgentResponse;
}

/// Join raw body chunks and decode once.
pub fn decode_chunks<I, B>(chunks: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut buffer = Vec::new();
    for chunk in chunks {
        buffer.extend_from_slice(chunk.as_ref());
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Strip `data:` framing from an event-stream body and drop blank lines.
pub fn decode_event_stream(body: &str) -> String {
    body.lines()
        .map(|line| {
            line.strip_prefix("data: ")
                .or_else(|| line.strip_prefix("data:"))
                .unwrap_or(line)
        })
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct HttpTextAgent {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpTextAgent {
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url,
            token,
            client: build_http_client(Some(timeout))?,
        })
    }

    async fn send(&self, request: &AgentRequest, session_id: &str) -> Result<String> {
        let mut req = self
            .client
            .post(&self.url)
            .header("X-Session-Id", session_id)
            .json(request);
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let response = req.send().await.context("Failed to reach text agent")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Text agent returned error {}: {}", status, body);
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("text/event-stream"))
            .unwrap_or(false);

        let mut stream = response.bytes_stream();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.context("Text agent stream interrupted")?);
        }
        let body = decode_chunks(&chunks);

        Ok(if is_event_stream {
            decode_event_stream(&body)
        } else {
            body
        })
    }
}

#[async_trait]
impl TextAgent for HttpTextAgent {
    async fn invoke(&self, request: &AgentRequest) -> AgentResponse {
        let session_id = format!("cheerbot-{}", uuid::Uuid::new_v4());
        match self.send(request, &session_id).await {
            Ok(text) => AgentResponse::ok(session_id, text),
            Err(e) => {
                tracing::warn!("Text agent call failed ({}): {:#}", session_id, e);
                AgentResponse::failed(session_id, format!("{:#}", e))
            }
        }
    }
}
