#![allow(dead_code)]

use async_trait::async_trait;
use rehearse::assist::{AssistClient, AssistRequest, FeedbackOutcome};
use rehearse::delivery::ResponseDeliveryStrategy;
use rehearse::error::{Result, SessionError};
use rehearse::events::{Feedback, FeedbackCategory, FeedbackSeverity, Message, SessionView};
use rehearse::llm::{CompletionClient, CompletionRequest, CompletionResponse, LlmMessage, StreamChunk, TokenUsage};
use rehearse::persistence::{
    ConversationBackend, ConversationRecord, ConversationSummary, NewConversation, StoredConversation,
};
use rehearse::session::{ControllerSettings, SessionController, SessionOptions, SessionServices};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// What the fake model does for one request
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    ReplyWithUsage(String, u32),
    Fail(String),
    Chunks(Vec<StreamChunk>),
    /// Send these chunks, then stall until cancelled
    Stall(Vec<StreamChunk>),
}

pub fn reply(text: &str) -> Script {
    Script::Reply(text.to_string())
}

pub fn accumulated(parts: &[&str]) -> Script {
    let mut chunks: Vec<StreamChunk> = parts.iter().map(|p| StreamChunk::partial(*p)).collect();
    if let Some(last) = parts.last() {
        chunks.push(StreamChunk::complete(*last));
    }
    Script::Chunks(chunks)
}

pub struct ScriptedCompletion {
    configured: bool,
    scripts: Mutex<VecDeque<Script>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
    observer: OnceLock<watch::Receiver<SessionView>>,
    pub loading_seen: Mutex<Vec<bool>>,
}

impl ScriptedCompletion {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        let completion = Self::blank();
        *completion.scripts.lock().unwrap() = scripts.into();
        Arc::new(completion)
    }

    pub fn unconfigured() -> Arc<Self> {
        Arc::new(Self {
            configured: false,
            ..Self::blank()
        })
    }

    fn blank() -> Self {
        Self {
            configured: true,
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            observer: OnceLock::new(),
            loading_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Record `is_loading` as seen from inside each request
    pub fn observe(&self, rx: watch::Receiver<SessionView>) {
        let _ = self.observer.set(rx);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    fn next(&self, request: CompletionRequest) -> Script {
        if let Some(rx) = self.observer.get() {
            self.loading_seen.lock().unwrap().push(rx.borrow().is_loading);
        }
        self.requests.lock().unwrap().push(request);
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Reply("ok".to_string()))
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn complete(&self, request: CompletionRequest, cancel: CancellationToken) -> Result<CompletionResponse> {
        let response = |text: String, usage: Option<TokenUsage>| CompletionResponse {
            message: LlmMessage::new("assistant", text),
            usage,
        };
        match self.next(request) {
            Script::Reply(text) => Ok(response(text, None)),
            Script::ReplyWithUsage(text, total) => Ok(response(
                text,
                Some(TokenUsage {
                    total_tokens: total,
                    ..Default::default()
                }),
            )),
            Script::Fail(error) => Err(SessionError::remote(error)),
            Script::Chunks(chunks) => Ok(response(
                chunks.last().map(|c| c.text.clone()).unwrap_or_default(),
                None,
            )),
            Script::Stall(_) => {
                cancel.cancelled().await;
                Err(SessionError::Cancelled)
            }
        }
    }

    async fn stream(&self, request: CompletionRequest, cancel: CancellationToken) -> Result<mpsc::Receiver<StreamChunk>> {
        let (chunks, stall) = match self.next(request) {
            Script::Reply(text) | Script::ReplyWithUsage(text, _) => (vec![StreamChunk::complete(text)], false),
            Script::Fail(error) => return Err(SessionError::remote(error)),
            Script::Chunks(chunks) => (chunks, false),
            Script::Stall(chunks) => (chunks, true),
        };

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
            if stall {
                cancel.cancelled().await;
            }
        });
        Ok(rx)
    }
}

#[derive(Default)]
pub struct FakeAssist {
    pub replies: Mutex<Option<Vec<String>>>,
    pub fail_replies: bool,
    /// Never answer quick-reply requests
    pub stall_replies: bool,
    pub feedback_calls: Mutex<usize>,
    pub quick_reply_calls: Mutex<usize>,
}

impl FakeAssist {
    pub fn with_replies(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(Some(replies.iter().map(|r| r.to_string()).collect())),
            ..Default::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_replies: true,
            ..Default::default()
        })
    }

    pub fn stalled() -> Arc<Self> {
        Arc::new(Self {
            stall_replies: true,
            ..Default::default()
        })
    }

    pub fn quick_reply_calls(&self) -> usize {
        *self.quick_reply_calls.lock().unwrap()
    }
}

#[async_trait]
impl AssistClient for FakeAssist {
    async fn quick_replies(&self, _request: AssistRequest) -> Result<Vec<String>> {
        *self.quick_reply_calls.lock().unwrap() += 1;
        if self.stall_replies {
            std::future::pending::<()>().await;
        }
        if self.fail_replies {
            return Err(SessionError::auxiliary("quick replies down"));
        }
        Ok(self.replies.lock().unwrap().clone().unwrap_or_default())
    }

    async fn feedback(&self, _request: AssistRequest) -> Result<FeedbackOutcome> {
        *self.feedback_calls.lock().unwrap() += 1;
        Ok(FeedbackOutcome::Feedback(Feedback {
            category: FeedbackCategory::Structure,
            message: "Lead with the result, then the details.".to_string(),
            severity: FeedbackSeverity::Suggestion,
        }))
    }
}

#[derive(Default)]
pub struct RecordingBackend {
    pub creates: Mutex<Vec<NewConversation>>,
    pub appends: Mutex<Vec<(String, Message)>>,
    pub summaries: Mutex<Vec<ConversationSummary>>,
    pub deletes: Mutex<Vec<String>>,
}

impl RecordingBackend {
    pub fn create_count(&self) -> usize {
        self.creates.lock().unwrap().len()
    }

    pub fn append_count(&self) -> usize {
        self.appends.lock().unwrap().len()
    }

    pub fn appended_contents(&self) -> Vec<String> {
        let mut contents: Vec<String> = self
            .appends
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.content.clone())
            .collect();
        contents.sort();
        contents
    }
}

#[async_trait]
impl ConversationBackend for RecordingBackend {
    async fn create_session(&self, conversation: &NewConversation) -> Result<String> {
        self.creates.lock().unwrap().push(conversation.clone());
        Ok("remote-1".to_string())
    }

    async fn append_message(&self, conversation_id: &str, message: &Message) -> Result<()> {
        self.appends
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), message.clone()));
        Ok(())
    }

    async fn delete_message(&self, _conversation_id: &str, message_id: &str) -> Result<()> {
        self.deletes.lock().unwrap().push(message_id.to_string());
        Ok(())
    }

    async fn update_summary(&self, _conversation_id: &str, summary: &ConversationSummary) -> Result<()> {
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }

    async fn load_conversation(&self, conversation_id: &str) -> Result<StoredConversation> {
        Err(SessionError::persistence(format!("conversation '{}' not found", conversation_id)))
    }

    async fn list_conversations(&self, _user_id: &str) -> Result<Vec<ConversationRecord>> {
        Ok(Vec::new())
    }
}

/// Wait until `condition` holds on the published view
pub async fn view_where(session: &SessionController, condition: impl FnMut(&SessionView) -> bool) -> SessionView {
    let mut rx = session.subscribe();
    let view = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(condition))
        .await
        .expect("view never reached the expected state")
        .unwrap()
        .clone();
    view
}

pub fn settings(delivery: ResponseDeliveryStrategy) -> ControllerSettings {
    ControllerSettings {
        model: "test-model".to_string(),
        max_tokens: 256,
        temperature: 0.5,
        delivery,
        quick_replies: true,
        feedback: false,
        context_window: 6,
        feedback_every_n_messages: 3,
        feedback_min_interval: Duration::ZERO,
    }
}

pub fn controller(
    settings: ControllerSettings,
    options: SessionOptions,
    completion: Arc<ScriptedCompletion>,
    assist: Arc<dyn AssistClient>,
    backend: Option<Arc<dyn ConversationBackend>>,
) -> Arc<SessionController> {
    let controller = Arc::new(SessionController::new(
        settings,
        options,
        SessionServices {
            completion: completion.clone(),
            assist,
            backend,
        },
    ));
    completion.observe(controller.subscribe());
    controller
}
