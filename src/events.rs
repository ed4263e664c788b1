use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Conversation templates a session can run in
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PracticeMode {
    /// Mock job interview
    InterviewPractice,
    /// Structured argument on a motion
    Debate,
    /// Casual conversation
    SmallTalk,
    /// Rehearse a talk and field questions
    Presentation,
    /// Difficult conversation, e.g. salary or conflict
    Negotiation,
}

impl PracticeMode {
    pub fn display_name(&self) -> &'static str {
        match self {
            PracticeMode::InterviewPractice => "Interview Practice",
            PracticeMode::Debate => "Debate",
            PracticeMode::SmallTalk => "Small Talk",
            PracticeMode::Presentation => "Presentation",
            PracticeMode::Negotiation => "Negotiation",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PracticeMode::InterviewPractice => "Answer interview questions tailored to a role",
            PracticeMode::Debate => "Argue a position against a sparring partner",
            PracticeMode::SmallTalk => "Keep a relaxed everyday conversation going",
            PracticeMode::Presentation => "Present an idea and handle audience questions",
            PracticeMode::Negotiation => "Practice asking for what you want under pressure",
        }
    }

    /// Identifier used on the wire and in stored records.
    pub fn id(&self) -> &'static str {
        self.into()
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a message in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Assistant reply still receiving chunks
    InProgress,
    Final,
}

/// A single message in a practice conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Reference to recorded or synthesized audio for this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    pub status: MessageStatus,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            audio_ref: None,
            status: MessageStatus::Final,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Empty assistant message that grows while a reply streams in.
    pub fn placeholder() -> Self {
        Self {
            status: MessageStatus::InProgress,
            ..Self::assistant(String::new())
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == MessageStatus::InProgress
    }
}

/// Controller lifecycle, as seen by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Idle,
    AwaitingResponse,
    Streaming,
    SingleShot,
    Error,
}

/// Category of a real-time coaching note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCategory {
    Clarity,
    Structure,
    Confidence,
    Relevance,
    Tone,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSeverity {
    Info,
    Suggestion,
    Warning,
}

/// One piece of periodic feedback about the user's recent turns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub category: FeedbackCategory,
    pub message: String,
    pub severity: FeedbackSeverity,
}

/// Snapshot of the session published to the UI after every mutation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub is_streaming: bool,
    pub error: Option<String>,
    pub quick_replies: Vec<String>,
    pub feedback: Option<Feedback>,
    pub state: ControllerState,
}

impl SessionView {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_mode_ids_round_trip_through_strum() {
        for mode in PracticeMode::iter() {
            assert_eq!(PracticeMode::from_str(mode.id()).unwrap(), mode);
        }
        assert_eq!(PracticeMode::InterviewPractice.id(), "interview-practice");
    }

    #[test]
    fn test_mode_serializes_as_kebab_case() {
        let json = serde_json::to_string(&PracticeMode::SmallTalk).unwrap();
        assert_eq!(json, "\"small-talk\"");
    }

    #[test]
    fn test_placeholder_is_in_progress_assistant() {
        let message = Message::placeholder();
        assert_eq!(message.role, MessageRole::Assistant);
        assert!(message.is_in_progress());
        assert!(message.content.is_empty());
    }
}
