//! Orchestration for one active practice conversation.
//!
//! One writer per session: every mutation runs under `inner`, an async mutex
//! that hands out the session state in FIFO order. Readers never lock; they
//! watch `SessionView` snapshots published after each mutation.

use super::feedback::FeedbackScheduler;
use super::store::{MessageStore, SessionContext};
use crate::assist::{self, AssistClient, AssistRequest, FeedbackOutcome};
use crate::config::Config;
use crate::delivery::ResponseDeliveryStrategy;
use crate::error::{Result, SessionError};
use crate::events::{ControllerState, Message, MessageRole, PracticeMode, SessionView};
use crate::llm::{CompletionClient, CompletionRequest, LlmMessage};
use crate::persistence::{ConversationBackend, ConversationSummary, NewConversation, SessionPersistence, SupportingDocuments};
use crate::prompts::{self, DocumentAnalysis};
use crate::streaming::{StreamAccumulator, StreamOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tunables the controller reads once at construction
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub delivery: ResponseDeliveryStrategy,
    pub quick_replies: bool,
    pub feedback: bool,
    /// Recent messages sent with quick-reply and feedback requests
    pub context_window: usize,
    pub feedback_every_n_messages: usize,
    pub feedback_min_interval: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.api.model.clone(),
            max_tokens: config.api.max_tokens,
            temperature: config.api.temperature,
            delivery: ResponseDeliveryStrategy::select(&config.delivery),
            quick_replies: config.assist.quick_replies,
            feedback: config.assist.feedback,
            context_window: config.assist.context_window.max(1),
            feedback_every_n_messages: config.assist.feedback_every_n_messages,
            feedback_min_interval: Duration::from_secs(config.assist.feedback_min_interval_secs),
        }
    }
}

/// What the session is about; fixed for its lifetime
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub mode: PracticeMode,
    /// Signed-in user; `None` makes this a guest session
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub documents: SupportingDocuments,
    /// Résumé/job analysis used to tailor interview practice
    pub analysis: Option<DocumentAnalysis>,
}

impl SessionOptions {
    pub fn guest(mode: PracticeMode) -> Self {
        Self {
            mode,
            user_id: None,
            title: None,
            documents: SupportingDocuments::default(),
            analysis: None,
        }
    }

    pub fn for_user(mode: PracticeMode, user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::guest(mode)
        }
    }
}

/// Remote collaborators handed to a controller
#[derive(Clone)]
pub struct SessionServices {
    pub completion: Arc<dyn CompletionClient>,
    pub assist: Arc<dyn AssistClient>,
    pub backend: Option<Arc<dyn ConversationBackend>>,
}

/// Per-call knobs for `send_message`
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// System prompt to use for this exchange instead of the mode prompt
    pub system_override: Option<String>,
}

struct SessionInner {
    context: SessionContext,
    persistence: SessionPersistence,
    feedback: FeedbackScheduler,
    title: String,
    documents: SupportingDocuments,
    /// One-time prompt for the first exchange
    first_exchange_prompt: Option<String>,
    /// Prompt that produced the most recent reply; reused by regenerate
    last_prompt: Option<String>,
}

pub struct SessionController {
    settings: ControllerSettings,
    options: SessionOptions,
    completion: Arc<dyn CompletionClient>,
    assist: Arc<dyn AssistClient>,
    inner: Mutex<SessionInner>,
    view_tx: Arc<watch::Sender<SessionView>>,
    shutdown: CancellationToken,
    exchange: std::sync::Mutex<Option<CancellationToken>>,
    /// Bumped by every exchange, clear and load; auxiliary results carry the
    /// value they were started under
    generation: Arc<AtomicU64>,
}

/// Detached quick-reply and feedback refresh for one finished exchange
struct AuxiliaryRefresh {
    assist: Arc<dyn AssistClient>,
    view_tx: Arc<watch::Sender<SessionView>>,
    generation: Arc<AtomicU64>,
    started_under: u64,
    shutdown: CancellationToken,
    quick_replies: bool,
    feedback_due: bool,
    mode: PracticeMode,
    window: Vec<Message>,
}

impl SessionController {
    pub fn new(settings: ControllerSettings, options: SessionOptions, services: SessionServices) -> Self {
        let context = SessionContext::new(options.mode, options.user_id.clone());
        let persistence = SessionPersistence::new(services.backend, options.user_id.as_deref());
        let title = options
            .title
            .clone()
            .unwrap_or_else(|| default_title(options.mode));

        tracing::debug!(
            session_id = %context.session_id,
            mode = options.mode.id(),
            guest = context.is_guest(),
            delivery = ?settings.delivery,
            "session created"
        );

        let inner = SessionInner {
            feedback: FeedbackScheduler::new(settings.feedback_every_n_messages, settings.feedback_min_interval),
            first_exchange_prompt: prompts::interview_prompt(options.mode, options.analysis.as_ref()),
            documents: options.documents.clone(),
            last_prompt: None,
            title,
            context,
            persistence,
        };
        let (view_tx, _) = watch::channel(SessionView::default());

        Self {
            settings,
            options,
            completion: services.completion,
            assist: services.assist,
            inner: Mutex::new(inner),
            view_tx: Arc::new(view_tx),
            shutdown: CancellationToken::new(),
            exchange: std::sync::Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Latest snapshot
    pub fn view(&self) -> SessionView {
        self.view_tx.borrow().clone()
    }

    /// Receive a snapshot after every mutation
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    pub fn mode(&self) -> PracticeMode {
        self.options.mode
    }

    /// Copy of the session state; waits for any in-flight exchange
    pub async fn context(&self) -> SessionContext {
        self.inner.lock().await.context.clone()
    }

    /// Identifier of the backing remote conversation, once created
    pub async fn remote_id(&self) -> Option<String> {
        self.inner.lock().await.persistence.remote_id().map(str::to_string)
    }

    /// Append `text` as a user message and fetch the assistant's reply.
    ///
    /// Empty `text` is a silent priming call: nothing is appended for the
    /// user and the assistant speaks first.
    pub async fn send_message(&self, text: &str, options: SendOptions) -> Result<()> {
        self.ensure_configured()?;

        let mut inner = self.inner.lock().await;
        let cancel = self.begin_exchange();

        let text = text.trim();
        if !text.is_empty() {
            let message = match inner.context.store.append(Message::user(text)) {
                Ok(message) => message.clone(),
                Err(e) => {
                    self.end_exchange();
                    return Err(e);
                }
            };
            inner.feedback.record_user_message();
            self.publish_messages(&inner.context.store);
            self.persist_message(&mut inner, &message, &cancel).await;
        } else {
            tracing::debug!("priming call, no user message appended");
        }

        let prompt = options
            .system_override
            .or_else(|| inner.first_exchange_prompt.clone())
            .unwrap_or_else(|| prompts::mode_prompt(inner.context.mode).to_string());

        self.complete_exchange(inner, prompt, cancel).await
    }

    /// Drop the last assistant reply and ask for a new one to the same prompt.
    ///
    /// The dropped reply is removed from the backend too, so a reload shows
    /// only the replacement.
    pub async fn regenerate_response(&self) -> Result<()> {
        self.ensure_configured()?;

        let mut inner = self.inner.lock().await;
        let store = &inner.context.store;
        let regenerable = store.len() >= 2
            && store
                .last()
                .is_some_and(|m| m.role == MessageRole::Assistant && !m.is_in_progress());
        if !regenerable {
            return Err(SessionError::invalid_state(
                "regenerate needs at least two messages ending with an assistant reply",
            ));
        }

        let popped = inner.context.store.pop_last()?;
        inner.persistence.remove_message_record(&popped);
        let cancel = self.begin_exchange();
        tracing::debug!(message_id = %popped.id, "regenerating assistant reply");
        self.publish_messages(&inner.context.store);

        let prompt = inner
            .last_prompt
            .clone()
            .unwrap_or_else(|| prompts::mode_prompt(inner.context.mode).to_string());

        self.complete_exchange(inner, prompt, cancel).await
    }

    /// Cancel whatever is in flight and start over with an empty conversation
    pub async fn clear_conversation(&self) {
        self.cancel_response();
        let mut inner = self.inner.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);

        inner.context = SessionContext::new(self.options.mode, self.options.user_id.clone());
        inner.persistence.reset();
        inner.feedback.reset();
        inner.first_exchange_prompt = prompts::interview_prompt(self.options.mode, self.options.analysis.as_ref());
        inner.last_prompt = None;
        inner.title = self
            .options
            .title
            .clone()
            .unwrap_or_else(|| default_title(self.options.mode));

        self.view_tx.send_replace(SessionView::default());
        tracing::info!(session_id = %inner.context.session_id, "conversation cleared");
    }

    /// Replace the session with a stored conversation and continue writing to it
    pub async fn load_conversation(&self, conversation_id: &str) -> Result<()> {
        self.cancel_response();
        let mut inner = self.inner.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.view_tx.send_modify(|v| {
            v.is_loading = true;
            v.error = None;
        });

        let loaded = tokio::select! {
            _ = self.shutdown.cancelled() => Err(SessionError::Cancelled),
            loaded = inner.persistence.load(conversation_id) => loaded,
        };

        let stored = match loaded {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "failed to load conversation");
                self.fail(&e);
                return Err(e);
            }
        };

        inner.context.mode = stored.record.mode;
        inner.context.store.replace_all(stored.messages);
        inner.persistence.bind(stored.record.id.clone());
        inner.feedback.reset();
        inner.first_exchange_prompt = None;
        inner.last_prompt = None;
        inner.title = stored.record.title;
        inner.documents = stored.record.documents;

        let messages = inner.context.store.messages().to_vec();
        self.view_tx.send_modify(|v| {
            v.messages = messages;
            v.is_loading = false;
            v.is_streaming = false;
            v.quick_replies.clear();
            v.feedback = None;
            v.state = ControllerState::Idle;
        });

        tracing::info!(conversation_id, messages = inner.context.store.len(), "conversation loaded");
        Ok(())
    }

    /// Cancel the in-flight exchange, if any. Partial text stays in the store.
    pub fn cancel_response(&self) {
        let exchange = self.exchange.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = exchange.as_ref() {
            token.cancel();
        }
    }

    /// Tear the session down: cancel everything and wait for pending writes
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut inner = self.inner.lock().await;
        inner.persistence.flush().await;
        tracing::debug!(session_id = %inner.context.session_id, "session shut down");
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.completion.is_configured() {
            return Ok(());
        }
        let err = SessionError::not_configured("completion API URL or key missing");
        self.fail(&err);
        Err(err)
    }

    async fn complete_exchange(
        &self,
        mut inner: MutexGuard<'_, SessionInner>,
        prompt: String,
        cancel: CancellationToken,
    ) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.view_tx.send_modify(|v| {
            v.is_loading = true;
            v.is_streaming = false;
            v.error = None;
            v.quick_replies.clear();
            v.state = ControllerState::AwaitingResponse;
        });

        let request = self.build_request(&inner.context, prompt.clone());
        let result = match self.settings.delivery {
            ResponseDeliveryStrategy::Stream => self.deliver_streaming(&mut inner, request, &cancel).await,
            ResponseDeliveryStrategy::SingleShot => self.deliver_single_shot(&mut inner, request, &cancel).await,
        };
        self.end_exchange();

        match result {
            Ok(()) => {
                inner.first_exchange_prompt = None;
                inner.last_prompt = Some(prompt);
                self.view_tx.send_modify(|v| {
                    v.is_loading = false;
                    v.is_streaming = false;
                    v.state = ControllerState::Idle;
                });

                let refresh = AuxiliaryRefresh {
                    assist: self.assist.clone(),
                    view_tx: self.view_tx.clone(),
                    generation: self.generation.clone(),
                    started_under: generation,
                    shutdown: self.shutdown.clone(),
                    quick_replies: self.settings.quick_replies,
                    feedback_due: self.settings.feedback && inner.feedback.try_claim(Instant::now()),
                    mode: inner.context.mode,
                    window: inner.context.store.window(self.settings.context_window),
                };
                drop(inner);

                tokio::spawn(refresh.run());
                Ok(())
            }
            Err(SessionError::Cancelled) => {
                tracing::info!("response cancelled");
                self.view_tx.send_modify(|v| {
                    v.is_loading = false;
                    v.is_streaming = false;
                    v.state = ControllerState::Idle;
                });
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(error = %e, "exchange failed");
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn deliver_single_shot(
        &self,
        inner: &mut SessionInner,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.set_state(ControllerState::SingleShot, false);
        let started = Instant::now();

        let response = tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            response = self.completion.complete(request, cancel.clone()) => response,
        }?;

        let message = inner.context.store.append(Message::assistant(response.message.content))?.clone();
        if let Some(usage) = response.usage {
            inner.context.store.record_tokens(u64::from(usage.total_tokens));
        }
        self.publish_messages(&inner.context.store);

        tracing::info!(
            latency_ms = started.elapsed().as_millis() as u64,
            chars = message.content.len(),
            "assistant reply received"
        );
        self.persist_message(inner, &message, cancel).await;
        Ok(())
    }

    async fn deliver_streaming(
        &self,
        inner: &mut SessionInner,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        inner.context.store.begin_assistant()?;
        self.publish_messages(&inner.context.store);
        self.set_state(ControllerState::Streaming, true);

        let opened = tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            rx = self.completion.stream(request, cancel.clone()) => rx,
        };
        let rx = match opened {
            Ok(rx) => rx,
            Err(e) => {
                inner.context.store.discard_in_progress();
                self.publish_messages(&inner.context.store);
                return Err(e);
            }
        };

        let outcome = StreamAccumulator::new()
            .consume(rx, &mut inner.context.store, cancel, |store| self.publish_messages(store))
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                inner.context.store.discard_in_progress();
                self.publish_messages(&inner.context.store);
                return Err(e);
            }
        };

        let last_assistant = inner
            .context
            .store
            .last()
            .filter(|m| m.role == MessageRole::Assistant)
            .cloned();

        match outcome {
            StreamOutcome::Completed { text, latency } => {
                tracing::info!(
                    latency_ms = latency.as_millis() as u64,
                    chars = text.len(),
                    "assistant reply streamed"
                );
                if let Some(message) = last_assistant {
                    self.persist_message(inner, &message, cancel).await;
                }
                Ok(())
            }
            StreamOutcome::Failed { partial, error } => {
                if !partial.is_empty() {
                    if let Some(message) = last_assistant {
                        self.persist_message(inner, &message, cancel).await;
                    }
                }
                Err(SessionError::remote(error))
            }
            StreamOutcome::Cancelled { partial } => {
                if !partial.is_empty() {
                    if let Some(message) = last_assistant {
                        self.persist_message(inner, &message, &CancellationToken::new()).await;
                    }
                }
                Err(SessionError::Cancelled)
            }
        }
    }

    /// Lazily create the remote row, then copy the message and counters
    async fn persist_message(&self, inner: &mut SessionInner, message: &Message, cancel: &CancellationToken) {
        if !inner.persistence.is_enabled() {
            return;
        }

        if inner.persistence.remote_id().is_none() {
            if let Some(user_id) = inner.context.user_id.clone() {
                let conversation = NewConversation {
                    user_id,
                    mode: inner.context.mode,
                    title: inner.title.clone(),
                    documents: inner.documents.clone(),
                    started_at: inner.context.store.metadata().start_time,
                };
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = inner.persistence.ensure_session(conversation) => {}
                }
            }
        }

        inner.persistence.append_message_record(message);
        let metadata = inner.context.store.metadata();
        inner.persistence.update_session_summary(ConversationSummary {
            message_count: metadata.message_count,
            duration_secs: metadata.duration_secs(),
            last_message_at: metadata.last_activity,
        });
    }

    fn build_request(&self, context: &SessionContext, system_prompt: String) -> CompletionRequest {
        let messages = context
            .store
            .messages()
            .iter()
            .filter(|m| !m.is_in_progress() && !m.content.is_empty())
            .map(|m| LlmMessage::new(m.role.as_str(), m.content.clone()))
            .collect();

        CompletionRequest::new(self.settings.model.clone(), messages)
            .with_max_tokens(self.settings.max_tokens)
            .with_temperature(self.settings.temperature)
            .with_system_prompt(Some(system_prompt))
            .streaming(self.settings.delivery.is_streaming())
    }

    fn begin_exchange(&self) -> CancellationToken {
        let token = self.shutdown.child_token();
        *self.exchange.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        token
    }

    fn end_exchange(&self) {
        *self.exchange.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn publish_messages(&self, store: &MessageStore) {
        let messages = store.messages().to_vec();
        self.view_tx.send_modify(|v| v.messages = messages);
    }

    fn set_state(&self, state: ControllerState, streaming: bool) {
        self.view_tx.send_modify(|v| {
            v.state = state;
            v.is_streaming = streaming;
        });
    }

    fn fail(&self, err: &SessionError) {
        let message = err.user_message();
        self.view_tx.send_modify(|v| {
            v.is_loading = false;
            v.is_streaming = false;
            v.error = Some(message);
            v.state = ControllerState::Error;
        });
    }
}

impl AuxiliaryRefresh {
    /// Quick replies and, when due, feedback. Results from a superseded
    /// exchange are dropped.
    async fn run(self) {
        let quick = async {
            if !self.quick_replies {
                return None;
            }
            match self.assist.quick_replies(AssistRequest::new(self.mode, &self.window)).await {
                Ok(replies) => Some(assist::tidy_quick_replies(replies)),
                Err(e) => {
                    tracing::warn!(error = %e, "quick replies unavailable");
                    Some(Vec::new())
                }
            }
        };
        let feedback = async {
            if !self.feedback_due {
                return None;
            }
            match self.assist.feedback(AssistRequest::new(self.mode, &self.window)).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::warn!(error = %e, "feedback unavailable");
                    None
                }
            }
        };

        let (replies, feedback) = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            results = async { tokio::join!(quick, feedback) } => results,
        };

        // Checked under the channel lock so a newer exchange's reset always wins
        self.view_tx.send_if_modified(|v| {
            if self.generation.load(Ordering::SeqCst) != self.started_under {
                tracing::debug!("dropping auxiliary results from a superseded exchange");
                return false;
            }
            if let Some(replies) = replies {
                v.quick_replies = replies;
            }
            if let Some(FeedbackOutcome::Feedback(feedback)) = feedback {
                v.feedback = Some(feedback);
            }
            true
        });
    }
}

fn default_title(mode: PracticeMode) -> String {
    format!("{} ({})", mode.display_name(), chrono::Local::now().format("%b %-d, %H:%M"))
}
