//! Ordered message store for one practice session.

use crate::error::{Result, SessionError};
use crate::events::{Message, MessageRole, MessageStatus, PracticeMode};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Counters kept alongside the messages
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub token_count: u64,
}

impl SessionMetadata {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            start_time: now,
            last_activity: now,
            message_count: 0,
            token_count: 0,
        }
    }

    pub fn duration_secs(&self) -> i64 {
        (self.last_activity - self.start_time).num_seconds().max(0)
    }
}

/// Append-only message sequence plus its metadata.
///
/// At most one message is in progress at a time and it is always the last one.
#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
    metadata: SessionMetadata,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            metadata: SessionMetadata::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn has_in_progress(&self) -> bool {
        self.messages.last().is_some_and(Message::is_in_progress)
    }

    /// Insert at the end. No reordering, no dedup.
    pub fn append(&mut self, message: Message) -> Result<&Message> {
        if self.has_in_progress() {
            return Err(SessionError::invalid_state(
                "cannot append while an assistant reply is in progress",
            ));
        }
        self.push(message);
        Ok(&self.messages[self.messages.len() - 1])
    }

    /// Open an empty in-progress assistant message
    pub fn begin_assistant(&mut self) -> Result<&Message> {
        self.append(Message::placeholder())
    }

    /// Overwrite the content of the in-progress assistant message
    pub fn replace_last(&mut self, content: &str) -> Result<()> {
        let last = self.in_progress_mut()?;
        last.content.clear();
        last.content.push_str(content);
        self.metadata.last_activity = Utc::now();
        Ok(())
    }

    /// Mark the in-progress message final
    pub fn finalize_last(&mut self) -> Result<&Message> {
        let now = Utc::now();
        let last = self.in_progress_mut()?;
        last.status = MessageStatus::Final;
        last.timestamp = now;
        self.metadata.last_activity = now;
        Ok(&self.messages[self.messages.len() - 1])
    }

    /// Drop the in-progress message if it never received text.
    ///
    /// Returns whether a message was removed. A placeholder that already has
    /// text is finalized instead so the partial reply stays visible.
    pub fn discard_in_progress(&mut self) -> bool {
        let (in_progress, empty) = match self.messages.last() {
            Some(last) => (last.is_in_progress(), last.content.is_empty()),
            None => (false, false),
        };

        if in_progress && empty {
            self.messages.pop();
            self.metadata.message_count = self.messages.len();
            true
        } else {
            if in_progress {
                let _ = self.finalize_last();
            }
            false
        }
    }

    /// Remove the last finalized message
    pub fn pop_last(&mut self) -> Result<Message> {
        if self.has_in_progress() {
            return Err(SessionError::invalid_state("last message is still in progress"));
        }
        let message = self
            .messages
            .pop()
            .ok_or_else(|| SessionError::invalid_state("no messages to remove"))?;
        self.metadata.message_count = self.messages.len();
        self.metadata.last_activity = Utc::now();
        Ok(message)
    }

    pub fn record_tokens(&mut self, tokens: u64) {
        self.metadata.token_count += tokens;
    }

    /// Empty the sequence and reset metadata
    pub fn clear(&mut self) {
        self.messages.clear();
        self.metadata = SessionMetadata::new();
    }

    /// Swap in a previously stored conversation
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.clear();
        if let Some(first) = messages.first() {
            self.metadata.start_time = first.timestamp;
        }
        for mut message in messages {
            message.status = MessageStatus::Final;
            self.push(message);
        }
        if let Some(last) = self.messages.last() {
            self.metadata.last_activity = last.timestamp;
        }
    }

    /// Last `n` finalized messages, oldest first
    pub fn window(&self, n: usize) -> Vec<Message> {
        let finished: Vec<&Message> = self.messages.iter().filter(|m| !m.is_in_progress()).collect();
        let start = finished.len().saturating_sub(n);
        finished[start..].iter().map(|m| (*m).clone()).collect()
    }

    pub fn count_role(&self, role: MessageRole) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    fn push(&mut self, message: Message) {
        self.metadata.last_activity = message.timestamp.max(self.metadata.last_activity);
        self.messages.push(message);
        self.metadata.message_count = self.messages.len();
    }

    fn in_progress_mut(&mut self) -> Result<&mut Message> {
        match self.messages.last_mut() {
            Some(last) if last.role == MessageRole::Assistant && last.is_in_progress() => Ok(last),
            _ => Err(SessionError::invalid_state(
                "last message is not an in-progress assistant message",
            )),
        }
    }
}

/// Everything the controller knows about the active conversation
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub mode: PracticeMode,
    /// Absent for guest sessions
    pub user_id: Option<String>,
    pub store: MessageStore,
}

impl SessionContext {
    pub fn new(mode: PracticeMode, user_id: Option<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            mode,
            user_id,
            store: MessageStore::new(),
        }
    }

    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }
}
