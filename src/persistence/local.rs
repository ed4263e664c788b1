use super::{ConversationBackend, ConversationRecord, ConversationSummary, NewConversation, StoredConversation};
use crate::error::{Result, SessionError};
use crate::events::Message;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Conversations as JSON files under a data directory.
///
/// Layout: `<data_dir>/<conversation_id>/conversation.json` holds the record,
/// `messages.jsonl` holds one message per line in append order.
pub struct LocalBackend {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalBackend {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn conversation_dir(&self, conversation_id: &str) -> Result<PathBuf> {
        if conversation_id.is_empty()
            || !conversation_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SessionError::persistence(format!("invalid conversation id '{}'", conversation_id)));
        }
        Ok(self.data_dir.join(conversation_id))
    }

    async fn read_record(&self, dir: &Path) -> Result<ConversationRecord> {
        let record_path = dir.join("conversation.json");
        let content = fs::read_to_string(&record_path).await.map_err(|e| {
            SessionError::persistence(format!("failed to read {}: {}", record_path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Raw `messages.jsonl`; a conversation with no file yet has no messages
    async fn read_message_lines(&self, dir: &Path) -> Result<String> {
        let path = dir.join("messages.jsonl");
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(SessionError::persistence(format!("failed to read {}: {}", path.display(), e))),
        }
    }

    async fn write_record(&self, dir: &Path, record: &ConversationRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record)?;
        let tmp_path = dir.join("conversation.json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, dir.join("conversation.json")).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationBackend for LocalBackend {
    async fn create_session(&self, conversation: &NewConversation) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let id = Uuid::new_v4().to_string();
        let dir = self.conversation_dir(&id)?;
        fs::create_dir_all(&dir).await?;

        let now = Utc::now();
        let record = ConversationRecord {
            id: id.clone(),
            user_id: conversation.user_id.clone(),
            mode: conversation.mode,
            title: conversation.title.clone(),
            message_count: 0,
            duration_secs: 0,
            created_at: conversation.started_at,
            updated_at: now,
            documents: conversation.documents.clone(),
        };
        self.write_record(&dir, &record).await?;
        fs::write(dir.join("messages.jsonl"), "").await?;

        Ok(id)
    }

    async fn append_message(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let dir = self.conversation_dir(conversation_id)?;
        if !fs::try_exists(&dir).await? {
            return Err(SessionError::persistence(format!("conversation '{}' not found", conversation_id)));
        }

        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("messages.jsonl"))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let dir = self.conversation_dir(conversation_id)?;
        let content = self.read_message_lines(&dir).await?;

        let mut kept = String::with_capacity(content.len());
        for line in content.lines() {
            let superseded = serde_json::from_str::<Message>(line).is_ok_and(|m| m.id == message_id);
            if !superseded && !line.trim().is_empty() {
                kept.push_str(line);
                kept.push('\n');
            }
        }

        let tmp_path = dir.join("messages.jsonl.tmp");
        fs::write(&tmp_path, kept).await?;
        fs::rename(&tmp_path, dir.join("messages.jsonl")).await?;
        Ok(())
    }

    async fn update_summary(&self, conversation_id: &str, summary: &ConversationSummary) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let dir = self.conversation_dir(conversation_id)?;
        let mut record = self.read_record(&dir).await?;

        record.message_count = summary.message_count;
        record.duration_secs = summary.duration_secs;
        record.updated_at = summary.last_message_at;
        self.write_record(&dir, &record).await
    }

    async fn load_conversation(&self, conversation_id: &str) -> Result<StoredConversation> {
        let dir = self.conversation_dir(conversation_id)?;
        let record = self.read_record(&dir).await?;

        let content = self.read_message_lines(&dir).await?;
        let mut messages = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!(conversation_id, line = line_no + 1, error = %e, "skipping unreadable message"),
            }
        }

        Ok(StoredConversation { record, messages })
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>> {
        let mut records = Vec::new();
        if !fs::try_exists(&self.data_dir).await? {
            return Ok(records);
        }

        let mut entries = fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match self.read_record(&path).await {
                Ok(record) if record.user_id == user_id => records.push(record),
                Ok(_) => {}
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "skipping conversation directory"),
            }
        }

        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }
}
