//! Write-through persistence for practice sessions.
//!
//! The in-memory store is the source of truth for the active session; the
//! backend only ever receives best-effort copies.

mod local;
mod rest;

pub use local::LocalBackend;
pub use rest::RestBackend;

use crate::error::{Result, SessionError};
use crate::events::{Message, PracticeMode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Documents used to build a specialised interview prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportingDocuments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_text: Option<String>,
}

/// Row created the first time a message is sent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewConversation {
    pub user_id: String,
    pub mode: PracticeMode,
    pub title: String,
    #[serde(flatten)]
    pub documents: SupportingDocuments,
    pub started_at: DateTime<Utc>,
}

/// Denormalized counters kept on the conversation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub message_count: usize,
    pub duration_secs: i64,
    pub last_message_at: DateTime<Utc>,
}

/// Durable conversation row as read back from a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub user_id: String,
    pub mode: PracticeMode,
    pub title: String,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub duration_secs: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub documents: SupportingDocuments,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredConversation {
    pub record: ConversationRecord,
    pub messages: Vec<Message>,
}

/// Row-oriented store for conversations and their messages.
///
/// Any relational or document store that can create a session, append a
/// message, update counters and read a conversation back satisfies this.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Create the conversation row and return its identifier
    async fn create_session(&self, conversation: &NewConversation) -> Result<String>;

    async fn append_message(&self, conversation_id: &str, message: &Message) -> Result<()>;

    /// Remove a message that was superseded, e.g. by a regenerated reply
    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()>;

    async fn update_summary(&self, conversation_id: &str, summary: &ConversationSummary) -> Result<()>;

    async fn load_conversation(&self, conversation_id: &str) -> Result<StoredConversation>;

    /// Conversations of one user, most recently updated first
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>>;
}

/// Per-session adapter between the controller and a backend.
///
/// Guest sessions get an adapter without a backend and never touch storage.
pub struct SessionPersistence {
    backend: Option<Arc<dyn ConversationBackend>>,
    initialized: bool,
    remote_id: Option<String>,
    pending: Vec<JoinHandle<()>>,
}

impl SessionPersistence {
    pub fn new(backend: Option<Arc<dyn ConversationBackend>>, user_id: Option<&str>) -> Self {
        Self {
            backend: user_id.and(backend),
            initialized: false,
            remote_id: None,
            pending: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    /// Create the remote row on first use. At most one attempt per session instance.
    pub async fn ensure_session(&mut self, conversation: NewConversation) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        if self.initialized {
            return;
        }
        self.initialized = true;

        match backend.create_session(&conversation).await {
            Ok(id) => {
                tracing::info!(conversation_id = %id, mode = conversation.mode.id(), "created remote conversation");
                self.remote_id = Some(id);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to create remote conversation; continuing in memory only");
            }
        }
    }

    /// Fire-and-forget copy of one message
    pub fn append_message_record(&mut self, message: &Message) {
        let Some((backend, id)) = self.target() else {
            return;
        };
        let message = message.clone();
        self.spawn(async move {
            if let Err(e) = backend.append_message(&id, &message).await {
                tracing::warn!(conversation_id = %id, message_id = %message.id, error = %e, "failed to persist message");
            }
        });
    }

    /// Fire-and-forget removal of one message.
    ///
    /// Runs after every write queued before it, so the message it removes has
    /// already been appended.
    pub fn remove_message_record(&mut self, message: &Message) {
        let Some((backend, id)) = self.target() else {
            return;
        };
        let earlier: Vec<JoinHandle<()>> = self.pending.drain(..).collect();
        let message_id = message.id.clone();
        self.spawn(async move {
            for handle in earlier {
                let _ = handle.await;
            }
            if let Err(e) = backend.delete_message(&id, &message_id).await {
                tracing::warn!(conversation_id = %id, message_id = %message_id, error = %e, "failed to remove superseded message");
            }
        });
    }

    /// Fire-and-forget counter update
    pub fn update_session_summary(&mut self, summary: ConversationSummary) {
        let Some((backend, id)) = self.target() else {
            return;
        };
        self.spawn(async move {
            if let Err(e) = backend.update_summary(&id, &summary).await {
                tracing::warn!(conversation_id = %id, error = %e, "failed to update conversation summary");
            }
        });
    }

    /// Read a stored conversation back
    pub async fn load(&self, conversation_id: &str) -> Result<StoredConversation> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| SessionError::persistence("guest sessions have no stored conversations"))?;
        backend.load_conversation(conversation_id).await
    }

    /// Point subsequent writes at an existing remote conversation
    pub fn bind(&mut self, conversation_id: impl Into<String>) {
        self.initialized = true;
        self.remote_id = Some(conversation_id.into());
    }

    /// Forget the remote binding; the next message creates a fresh row
    pub fn reset(&mut self) {
        self.initialized = false;
        self.remote_id = None;
    }

    /// Wait for every outstanding write to finish
    pub async fn flush(&mut self) {
        for handle in self.pending.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "persistence task panicked");
            }
        }
    }

    fn target(&self) -> Option<(Arc<dyn ConversationBackend>, String)> {
        Some((self.backend.clone()?, self.remote_id.clone()?))
    }

    fn spawn<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.pending.retain(|h| !h.is_finished());
        self.pending.push(tokio::spawn(fut));
    }
}
