use super::{
    ConversationBackend, ConversationRecord, ConversationSummary, NewConversation, StoredConversation,
    SupportingDocuments,
};
use crate::error::{Result, SessionError};
use crate::events::{Message, MessageRole, MessageStatus, PracticeMode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// PostgREST-style backend with `conversations` and `messages` tables
#[derive(Clone)]
pub struct RestBackend {
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ConversationInsert<'a> {
    user_id: &'a str,
    mode: PracticeMode,
    title: &'a str,
    message_count: usize,
    duration_secs: i64,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resume_text: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ConversationRow {
    id: String,
    user_id: String,
    mode: PracticeMode,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message_count: Option<usize>,
    #[serde(default)]
    duration_secs: Option<i64>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    job_description: Option<String>,
    #[serde(default)]
    resume_text: Option<String>,
}

impl From<ConversationRow> for ConversationRecord {
    fn from(row: ConversationRow) -> Self {
        ConversationRecord {
            title: row.title.unwrap_or_else(|| row.mode.display_name().to_string()),
            message_count: row.message_count.unwrap_or(0),
            duration_secs: row.duration_secs.unwrap_or(0),
            updated_at: row.updated_at.unwrap_or(row.created_at),
            id: row.id,
            user_id: row.user_id,
            mode: row.mode,
            created_at: row.created_at,
            documents: SupportingDocuments {
                job_description: row.job_description,
                resume_text: row.resume_text,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageRow {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    conversation_id: String,
    role: MessageRole,
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
}

impl MessageRow {
    fn into_message(self) -> Message {
        Message {
            id: self
                .client_id
                .or(self.id)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            role: self.role,
            content: self.content,
            timestamp: self.created_at,
            audio_ref: self.audio_url,
            status: MessageStatus::Final,
        }
    }
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, access_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SessionError::persistence(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token,
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", bearer))
            .header("Content-Type", "application/json")
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| SessionError::persistence(format!("{}: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SessionError::persistence(format!("{} failed ({}): {}", what, status, error_text)));
        }
        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| SessionError::persistence(format!("{}: unreadable response: {}", what, e)))
    }
}

#[async_trait]
impl ConversationBackend for RestBackend {
    async fn create_session(&self, conversation: &NewConversation) -> Result<String> {
        let insert = ConversationInsert {
            user_id: &conversation.user_id,
            mode: conversation.mode,
            title: &conversation.title,
            message_count: 0,
            duration_secs: 0,
            created_at: conversation.started_at,
            job_description: conversation.documents.job_description.as_deref(),
            resume_text: conversation.documents.resume_text.as_deref(),
        };

        let builder = self
            .request(reqwest::Method::POST, &self.table_url("conversations"))
            .header("Prefer", "return=representation")
            .json(&insert);
        let response = self.send(builder, "create conversation").await?;
        let rows: Vec<ConversationRow> = Self::json(response, "create conversation").await?;

        rows.into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| SessionError::persistence("create conversation returned no row"))
    }

    async fn append_message(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let row = MessageRow {
            id: None,
            conversation_id: conversation_id.to_string(),
            role: message.role,
            content: message.content.clone(),
            created_at: message.timestamp,
            audio_url: message.audio_ref.clone(),
            client_id: Some(message.id.clone()),
        };

        let builder = self
            .request(reqwest::Method::POST, &self.table_url("messages"))
            .header("Prefer", "return=minimal")
            .json(&row);
        self.send(builder, "append message").await?;
        Ok(())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let builder = self
            .request(reqwest::Method::DELETE, &self.table_url("messages"))
            .query(&[
                ("conversation_id", format!("eq.{}", conversation_id)),
                ("client_id", format!("eq.{}", message_id)),
            ])
            .header("Prefer", "return=minimal");
        self.send(builder, "delete message").await?;
        Ok(())
    }

    async fn update_summary(&self, conversation_id: &str, summary: &ConversationSummary) -> Result<()> {
        let body = serde_json::json!({
            "message_count": summary.message_count,
            "duration_secs": summary.duration_secs,
            "updated_at": summary.last_message_at,
        });

        let builder = self
            .request(reqwest::Method::PATCH, &self.table_url("conversations"))
            .query(&[("id", format!("eq.{}", conversation_id))])
            .header("Prefer", "return=minimal")
            .json(&body);
        self.send(builder, "update conversation").await?;
        Ok(())
    }

    async fn load_conversation(&self, conversation_id: &str) -> Result<StoredConversation> {
        let builder = self
            .request(reqwest::Method::GET, &self.table_url("conversations"))
            .query(&[("id", format!("eq.{}", conversation_id)), ("select", "*".to_string())]);
        let response = self.send(builder, "load conversation").await?;
        let rows: Vec<ConversationRow> = Self::json(response, "load conversation").await?;
        let record: ConversationRecord = rows
            .into_iter()
            .next()
            .ok_or_else(|| SessionError::persistence(format!("conversation '{}' not found", conversation_id)))?
            .into();

        let builder = self
            .request(reqwest::Method::GET, &self.table_url("messages"))
            .query(&[
                ("conversation_id", format!("eq.{}", conversation_id)),
                ("order", "created_at.asc".to_string()),
                ("select", "*".to_string()),
            ]);
        let response = self.send(builder, "load messages").await?;
        let rows: Vec<MessageRow> = Self::json(response, "load messages").await?;

        Ok(StoredConversation {
            record,
            messages: rows.into_iter().map(MessageRow::into_message).collect(),
        })
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>> {
        let builder = self
            .request(reqwest::Method::GET, &self.table_url("conversations"))
            .query(&[
                ("user_id", format!("eq.{}", user_id)),
                ("order", "updated_at.desc".to_string()),
                ("select", "*".to_string()),
            ]);
        let response = self.send(builder, "list conversations").await?;
        let rows: Vec<ConversationRow> = Self::json(response, "list conversations").await?;
        Ok(rows.into_iter().map(ConversationRecord::from).collect())
    }
}
