//! Quick replies and real-time feedback.
//!
//! Both are best-effort: the controller logs failures and carries on with
//! "no suggestions" / "no feedback".

use crate::config::ApiConfig;
use crate::error::{Result, SessionError};
use crate::events::{Feedback, FeedbackCategory, FeedbackSeverity, Message, PracticeMode};
use crate::llm::LlmMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// Upper bound on suggestions shown to the user
pub const MAX_QUICK_REPLIES: usize = 3;

/// Payload shared by both auxiliary endpoints
#[derive(Debug, Clone, Serialize)]
pub struct AssistRequest {
    pub mode: PracticeMode,
    pub messages: Vec<LlmMessage>,
}

impl AssistRequest {
    pub fn new(mode: PracticeMode, window: &[Message]) -> Self {
        Self {
            mode,
            messages: window
                .iter()
                .map(|m| LlmMessage::new(m.role.as_str(), m.content.clone()))
                .collect(),
        }
    }
}

/// Feedback endpoint result; `None` is the explicit "nothing to say" sentinel
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    Feedback(Feedback),
    None,
}

#[async_trait]
pub trait AssistClient: Send + Sync {
    async fn quick_replies(&self, request: AssistRequest) -> Result<Vec<String>>;

    async fn feedback(&self, request: AssistRequest) -> Result<FeedbackOutcome>;
}

/// Trim, drop blanks and duplicates, cap the list
pub fn tidy_quick_replies(replies: Vec<String>) -> Vec<String> {
    let mut tidy: Vec<String> = Vec::new();
    for reply in replies {
        let reply = reply.trim().trim_matches('"').trim().to_string();
        if reply.is_empty() || tidy.contains(&reply) {
            continue;
        }
        tidy.push(reply);
        if tidy.len() == MAX_QUICK_REPLIES {
            break;
        }
    }
    tidy
}

#[derive(Debug, Deserialize)]
struct QuickReplyBody {
    #[serde(default, alias = "quickReplies", alias = "suggestions")]
    replies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FeedbackBody {
    #[serde(default)]
    feedback: Option<RawFeedback>,
    #[serde(default, alias = "noFeedback")]
    no_feedback: bool,
}

#[derive(Debug, Deserialize)]
struct RawFeedback {
    #[serde(default)]
    category: Option<String>,
    message: String,
    #[serde(default)]
    severity: Option<String>,
}

/// Decode the feedback endpoint body
pub fn parse_feedback_body(body: &serde_json::Value) -> Result<FeedbackOutcome> {
    let body: FeedbackBody = serde_json::from_value(body.clone())?;
    if body.no_feedback {
        return Ok(FeedbackOutcome::None);
    }

    let Some(raw) = body.feedback else {
        return Ok(FeedbackOutcome::None);
    };
    if raw.message.trim().is_empty() {
        return Ok(FeedbackOutcome::None);
    }

    let category = match raw.category.as_deref().map(str::to_lowercase).as_deref() {
        Some("clarity") => FeedbackCategory::Clarity,
        Some("structure") => FeedbackCategory::Structure,
        Some("confidence") => FeedbackCategory::Confidence,
        Some("relevance") => FeedbackCategory::Relevance,
        Some("tone") => FeedbackCategory::Tone,
        _ => FeedbackCategory::General,
    };
    let severity = match raw.severity.as_deref().map(str::to_lowercase).as_deref() {
        Some("warning") | Some("high") => FeedbackSeverity::Warning,
        Some("suggestion") | Some("medium") => FeedbackSeverity::Suggestion,
        _ => FeedbackSeverity::Info,
    };

    Ok(FeedbackOutcome::Feedback(Feedback {
        category,
        message: raw.message.trim().to_string(),
        severity,
    }))
}

/// HTTP client for the `quick-replies` and `realtime-feedback` edge functions
#[derive(Clone)]
pub struct HttpAssistClient {
    config: ApiConfig,
    client: reqwest::Client,
}

impl HttpAssistClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SessionError::auxiliary(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    async fn post(&self, function: &str, request: &AssistRequest) -> Result<serde_json::Value> {
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| SessionError::auxiliary("no API URL configured"))?;
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let url = format!("{}/{}", base.trim_end_matches('/'), function);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("apikey", api_key)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::auxiliary(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SessionError::auxiliary(format!("{} failed ({}): {}", function, status, error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| SessionError::auxiliary(e.to_string()))
    }
}

#[async_trait]
impl AssistClient for HttpAssistClient {
    async fn quick_replies(&self, request: AssistRequest) -> Result<Vec<String>> {
        let body = self.post("quick-replies", &request).await?;
        let body: QuickReplyBody = serde_json::from_value(body)?;
        Ok(tidy_quick_replies(body.replies))
    }

    async fn feedback(&self, request: AssistRequest) -> Result<FeedbackOutcome> {
        let body = self.post("realtime-feedback", &request).await?;
        parse_feedback_body(&body)
    }
}

/// Assist client that never suggests anything; used when the features are off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAssist;

#[async_trait]
impl AssistClient for DisabledAssist {
    async fn quick_replies(&self, _request: AssistRequest) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn feedback(&self, _request: AssistRequest) -> Result<FeedbackOutcome> {
        Ok(FeedbackOutcome::None)
    }
}
