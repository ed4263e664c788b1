use std::time::Duration;
use tokio::time::Instant;

/// Decides when periodic feedback is worth requesting.
///
/// Both conditions must hold: enough new user messages since the last
/// request, and at least `min_interval` since the last request.
#[derive(Debug, Clone)]
pub struct FeedbackScheduler {
    every_n_messages: usize,
    min_interval: Duration,
    messages_since: usize,
    last_request: Option<Instant>,
}

impl FeedbackScheduler {
    pub fn new(every_n_messages: usize, min_interval: Duration) -> Self {
        Self {
            every_n_messages: every_n_messages.max(1),
            min_interval,
            messages_since: 0,
            last_request: None,
        }
    }

    /// Count a user message
    pub fn record_user_message(&mut self) {
        self.messages_since += 1;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        if self.messages_since < self.every_n_messages {
            return false;
        }
        match self.last_request {
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
            None => true,
        }
    }

    /// Claim the slot if due; callers then issue the request
    pub fn try_claim(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.messages_since = 0;
        self.last_request = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.messages_since = 0;
        self.last_request = None;
    }
}
