//! Token-budgeted documentation delivery server for coding agents.
//!
//! `guidepost` serves a small fixed set of development guidelines — coding
//! rules, development skills, and steering instructions — to LLM-powered
//! clients, treating the client's context window as a finite budget. Every
//! response is measured in estimated tokens, optionally truncated down to a
//! configured ceiling while preserving document structure, and recorded to
//! an append-only usage ledger for later analysis.
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Estimate and budget tokens:** see [`budget::estimate_tokens`] and
//!   [`budget::content_stats`]. The whole crate uses one fixed
//!   chars-per-token rule so budget comparisons stay self-consistent.
//!
//! - **Shrink a document to a budget:** see [`truncate::optimize_content`]
//!   for structure-preserving truncation and [`truncate::outline`] for
//!   header summaries.
//!
//! - **Serve documents:** see [`server::GuidelinesServer`] for the tool
//!   dispatch surface, [`docs::DocumentStore`] for memoized file loads, and
//!   [`cache::CacheStore`] for the prebuilt multi-format cache.
//!
//! - **Ask for tailored guidance:** see [`GuidanceClient`] for the chat
//!   completions transport and [`guidance`] for prompt assembly and query
//!   classification.
//!
//! - **Analyze usage:** see [`ledger::UsageLedger`] for call/rating records
//!   and [`analytics`] for offline feedback analysis and token reports.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`budget`] | Token estimation and document statistics |
//! | [`truncate`] | Structure-preserving truncation and outlining |
//! | [`docs`] | Document names, memoized loading |
//! | [`cache`] | Multi-format prebuilt cache (json, gzip, bincode) |
//! | [`ledger`] | Append-only usage and rating records |
//! | [`analytics`] | Offline feedback analysis and token reports |
//! | [`guidance`] | Query classification and guidance prompt assembly |
//! | [`server`] | Tool dispatch and response pipeline |
//! | [`config`] | TOML configuration with full defaults |

pub mod analytics;
pub mod budget;
pub mod cache;
pub mod config;
pub mod docs;
pub mod guidance;
pub mod ledger;
pub mod server;
pub mod truncate;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Environment variable holding the chat completions API key.
pub const API_KEY_ENV: &str = "OPENROUTER_KEY";

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Request and response types ─────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted from
/// serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from [`GuidanceClient::chat`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics reported by the API.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct GuidanceClient {
    client: reqwest::Client,
    api_key: String,
}

impl GuidanceClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("guidepost/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    /// Create a client from the `OPENROUTER_KEY` environment variable.
    ///
    /// Returns `Ok(None)` when the variable is unset; the server then runs
    /// in degraded mode with direct document tools only.
    pub fn from_env() -> Result<Option<Self>, String> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Ok(Some(Self::new(key)?)),
            _ => Ok(None),
        }
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}",
            body.model.as_deref().unwrap_or("(none)"),
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;

        if let Some(err) = parsed.error {
            return Err(format!("OpenRouter API error: {}", err.message));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        match choice {
            Some(c) => Ok(ChatCompletion {
                content: c.message.content,
                usage: parsed.usage,
                finish_reason: c.finish_reason,
            }),
            None => Ok(ChatCompletion {
                content: None,
                usage: parsed.usage,
                finish_reason: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content, "hello");

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);
    }

    #[test]
    fn chat_request_skips_defaulted_fields() {
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("model").is_none());
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn raw_response_parses_api_error() {
        let raw: RawChatResponse =
            serde_json::from_str(r#"{"error": {"message": "over quota"}}"#).unwrap();
        assert_eq!(raw.error.unwrap().message, "over quota");
        assert!(raw.choices.is_none());
    }

    #[test]
    fn raw_response_parses_choice() {
        let raw: RawChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}}"#,
        )
        .unwrap();
        let choice = raw.choices.unwrap().into_iter().next().unwrap();
        assert_eq!(choice.message.content.as_deref(), Some("hi"));
        assert_eq!(raw.usage.unwrap().total_tokens, Some(12));
    }
}
