use crate::events::{Feedback, Message, MessageRole, SessionView};

/// Turns successive session snapshots into terminal output.
///
/// Only the difference since the previous snapshot is emitted, so a streamed
/// reply appears as it grows instead of being reprinted per chunk. User
/// messages are not echoed while typing; they are printed only when the
/// transcript is replaced (load, clear) or rewritten (regenerate).
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    printed: Vec<String>,
    /// Id and byte length already shown of the message being streamed
    partial: Option<(String, usize)>,
    last_error: Option<String>,
    last_replies: Vec<String>,
    last_feedback: Option<Feedback>,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, view: &SessionView) -> String {
        let mut out = String::new();

        let common = self
            .printed
            .iter()
            .zip(view.messages.iter())
            .take_while(|(id, message)| **id == message.id)
            .count();
        let rewritten = common < self.printed.len();
        if rewritten {
            self.printed.truncate(common);
            if self.partial.as_ref().is_some_and(|(id, _)| !view.messages.iter().any(|m| &m.id == id)) {
                out.push('\n');
            }
            self.partial = None;
            if view.messages.is_empty() {
                out.push_str("🧹 Conversation cleared.\n\n");
            } else if common == view.messages.len() {
                out.push_str("↻ New answer:\n");
            }
        }

        let replay = rewritten || (self.printed.is_empty() && self.partial.is_none());
        for message in view.messages.iter().skip(self.printed.len()) {
            match message.role {
                MessageRole::User => {
                    if replay && view.messages.len() > 1 {
                        out.push_str(&format!("🧑 You: {}\n\n", message.content));
                    }
                    self.printed.push(message.id.clone());
                }
                MessageRole::System => {
                    out.push_str(&format!("ℹ️  {}\n\n", message.content));
                    self.printed.push(message.id.clone());
                }
                MessageRole::Assistant => {
                    if !self.write_assistant(message, &mut out) {
                        break;
                    }
                }
            }
        }

        if view.error != self.last_error {
            if let Some(error) = &view.error {
                out.push_str(&format!("❌ {}\n\n", error));
            }
            self.last_error = view.error.clone();
        }

        if view.quick_replies != self.last_replies {
            if !view.quick_replies.is_empty() {
                out.push_str(&format!("💡 Try: {}\n\n", view.quick_replies.join("  |  ")));
            }
            self.last_replies = view.quick_replies.clone();
        }

        if view.feedback != self.last_feedback {
            if let Some(feedback) = &view.feedback {
                out.push_str(&format!("📝 {:?}: {}\n\n", feedback.category, feedback.message));
            }
            self.last_feedback = view.feedback.clone();
        }

        out
    }

    /// Returns false while the message is still streaming
    fn write_assistant(&mut self, message: &Message, out: &mut String) -> bool {
        let shown = match &self.partial {
            Some((id, shown)) if *id == message.id => *shown,
            _ => {
                if message.content.is_empty() && message.is_in_progress() {
                    return false;
                }
                out.push_str("🤖 ");
                self.partial = Some((message.id.clone(), 0));
                0
            }
        };

        let fresh = message.content.get(shown..).unwrap_or_default();
        out.push_str(fresh);

        if message.is_in_progress() {
            self.partial = Some((message.id.clone(), message.content.len()));
            return false;
        }

        out.push_str("\n\n");
        self.partial = None;
        self.printed.push(message.id.clone());
        true
    }
}
