use crate::config::ApiConfig;
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Message in a completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Request to send to the completion proxy
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<LlmMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<LlmMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: 1000,
            temperature: 0.7,
            system_prompt: None,
            stream: false,
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Non-streaming completion result
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub message: LlmMessage,
    pub usage: Option<TokenUsage>,
}

/// One unit of a streamed completion.
///
/// `text` always carries the full text accumulated so far, never a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub text: String,
    pub is_complete: bool,
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_complete: false,
            error: None,
        }
    }

    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_complete: true,
            error: None,
        }
    }

    pub fn failed(text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_complete: false,
            error: Some(error.into()),
        }
    }
}

/// Remote completion API as seen by the session controller
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Whether the remote endpoint and credentials are present
    fn is_configured(&self) -> bool;

    /// Single blocking completion
    async fn complete(&self, request: CompletionRequest, cancel: CancellationToken) -> Result<CompletionResponse>;

    /// Streamed completion; chunks arrive on the returned channel in order
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamChunk>>;
}

/// HTTP client for the completion edge function
#[derive(Clone)]
pub struct HttpCompletionClient {
    config: ApiConfig,
    client: reqwest::Client,
    /// Longest silence tolerated between two reads of a streamed body
    idle_timeout: Duration,
}

impl HttpCompletionClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SessionError::not_configured(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            idle_timeout: timeout,
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn endpoint(&self) -> Result<String> {
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| SessionError::not_configured("no API URL configured"))?;
        Ok(format!("{}/chat-completion", base.trim_end_matches('/')))
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| SessionError::not_configured("no API key configured"))
    }

    async fn post(&self, request: &CompletionRequest) -> Result<reqwest::Response> {
        let url = self.endpoint()?;
        let api_key = self.api_key()?;

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("apikey", api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SessionError::remote(format!("completion API error ({}): {}", status, error_text)));
        }

        Ok(response)
    }

    /// Fold a Server-Sent Events body into accumulated-text chunks
    async fn process_sse_stream(
        response: reqwest::Response,
        tx: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
        idle_timeout: Duration,
    ) {
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut assistant_text = String::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("completion stream cancelled");
                    return;
                }
                next = tokio::time::timeout(idle_timeout, stream.next()) => next,
            };

            let bytes = match next {
                Ok(Some(Ok(bytes))) => bytes,
                Ok(Some(Err(e))) => {
                    let _ = tx.send(StreamChunk::failed(assistant_text, e.to_string())).await;
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("completion stream idle for {:?}", idle_timeout);
                    let error = format!("stream stalled for {}s", idle_timeout.as_secs_f32());
                    let _ = tx.send(StreamChunk::failed(assistant_text, error)).await;
                    return;
                }
            };

            for data in decoder.push(&bytes) {
                match fold_sse_data(&data, &mut assistant_text) {
                    SseStep::Delta => {
                        if tx.send(StreamChunk::partial(assistant_text.clone())).await.is_err() {
                            return;
                        }
                    }
                    SseStep::Done => {
                        let _ = tx.send(StreamChunk::complete(assistant_text)).await;
                        return;
                    }
                    SseStep::Error(error) => {
                        let _ = tx.send(StreamChunk::failed(assistant_text, error)).await;
                        return;
                    }
                    SseStep::Skip => {}
                }
            }
        }

        // Flush any remaining buffer line (without newline)
        if let Some(data) = decoder.finish() {
            if let SseStep::Error(error) = fold_sse_data(&data, &mut assistant_text) {
                let _ = tx.send(StreamChunk::failed(assistant_text, error)).await;
                return;
            }
        }

        let _ = tx.send(StreamChunk::complete(assistant_text)).await;
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    fn is_configured(&self) -> bool {
        self.endpoint().is_ok() && self.api_key().is_ok_and(|k| !k.trim().is_empty())
    }

    async fn complete(&self, request: CompletionRequest, cancel: CancellationToken) -> Result<CompletionResponse> {
        let request = request.streaming(false);

        let timeout = self.request_timeout();
        let exchange = async {
            let response = self.post(&request).await?;
            Ok::<_, SessionError>(response.json().await?)
        };

        let body: serde_json::Value = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            response = tokio::time::timeout(timeout, exchange) => response
                .map_err(|_| SessionError::remote(format!("request timed out after {}s", timeout.as_secs())))??,
        };

        parse_completion_body(&body)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let request = request.streaming(true);
        let (tx, rx) = mpsc::channel(256);

        let timeout = self.request_timeout();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            response = tokio::time::timeout(timeout, self.post(&request)) => response
                .map_err(|_| SessionError::remote(format!("no response after {}s", timeout.as_secs())))??,
        };

        tokio::spawn(Self::process_sse_stream(response, tx, cancel, self.idle_timeout));
        Ok(rx)
    }
}

/// Parse a non-streaming body. Accepts the proxy's `{message, usage}` shape
/// and the raw OpenAI `{choices: [{message}], usage}` shape.
pub fn parse_completion_body(body: &serde_json::Value) -> Result<CompletionResponse> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(SessionError::remote(message));
    }

    let message = body
        .get("message")
        .or_else(|| body.get("choices").and_then(|c| c.get(0)).and_then(|c| c.get("message")))
        .ok_or_else(|| SessionError::remote("completion response has no message"))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| SessionError::remote("completion message has no content"))?;
    let role = message.get("role").and_then(|r| r.as_str()).unwrap_or("assistant");

    let usage = body
        .get("usage")
        .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());

    Ok(CompletionResponse {
        message: LlmMessage::new(role, content),
        usage,
    })
}

/// Splits a byte stream into SSE `data:` payloads.
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character cut by a network read is decoded only once both halves arrived.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, get back the payloads of every complete `data:` line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }

        payloads
    }

    /// Payload of a trailing line that never got its newline
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    line.trim()
        .strip_prefix("data:")
        .map(|data| data.trim_start().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseStep {
    /// Text was appended to the accumulator
    Delta,
    Done,
    Error(String),
    Skip,
}

/// Apply one SSE payload to the accumulated assistant text
pub fn fold_sse_data(data: &str, assistant_text: &mut String) -> SseStep {
    if data == "[DONE]" {
        return SseStep::Done;
    }

    let Ok(chunk) = serde_json::from_str::<serde_json::Value>(data) else {
        return SseStep::Skip;
    };

    if let Some(error) = chunk.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return SseStep::Error(message);
    }

    let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
        return SseStep::Skip;
    };

    let mut step = SseStep::Skip;
    if let Some(content) = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
    {
        if !content.is_empty() {
            assistant_text.push_str(content);
            step = SseStep::Delta;
        }
    }

    match choice.get("finish_reason").and_then(|v| v.as_str()) {
        Some("stop") | Some("length") if step == SseStep::Skip => SseStep::Done,
        _ => step,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_stub::{StubResponse, StubServer};
    use serde_json::json;

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let payloads = decoder.push(b":1}\n\ndata: [DONE]\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_flushes_trailing_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\ndata: [DONE]").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("[DONE]"));
    }

    #[test]
    fn test_fold_accumulates_deltas() {
        let mut text = String::new();
        let first = json!({"choices": [{"delta": {"content": "Hi"}}]}).to_string();
        let second = json!({"choices": [{"delta": {"content": " there"}}]}).to_string();

        assert_eq!(fold_sse_data(&first, &mut text), SseStep::Delta);
        assert_eq!(fold_sse_data(&second, &mut text), SseStep::Delta);
        assert_eq!(text, "Hi there");
    }

    #[test]
    fn test_fold_recognises_done_and_errors() {
        let mut text = "partial".to_string();
        let stop = json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}).to_string();
        let error = json!({"error": {"message": "rate limited"}}).to_string();

        assert_eq!(fold_sse_data("[DONE]", &mut text), SseStep::Done);
        assert_eq!(fold_sse_data(&stop, &mut text), SseStep::Done);
        assert_eq!(fold_sse_data(&error, &mut text), SseStep::Error("rate limited".to_string()));
        assert_eq!(fold_sse_data("not json", &mut text), SseStep::Skip);
        assert_eq!(text, "partial");
    }

    #[test]
    fn test_parse_proxy_and_openai_bodies() {
        let proxy = json!({
            "message": {"role": "assistant", "content": "Hi! How can I help?"},
            "usage": {"prompt_tokens": 10, "completion_tokens": 6, "total_tokens": 16}
        });
        let parsed = parse_completion_body(&proxy).unwrap();
        assert_eq!(parsed.message.content, "Hi! How can I help?");
        assert_eq!(parsed.usage.map(|u| u.total_tokens), Some(16));

        let openai = json!({"choices": [{"message": {"role": "assistant", "content": "Hello"}}]});
        let parsed = parse_completion_body(&openai).unwrap();
        assert_eq!(parsed.message.content, "Hello");
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn test_parse_error_body() {
        let body = json!({"error": {"message": "model overloaded"}});
        let err = parse_completion_body(&body).unwrap_err();
        assert_eq!(err, SessionError::remote("model overloaded"));
    }

    #[test]
    fn test_decoder_joins_character_split_across_reads() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        let cut = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&line[..cut]).is_empty());
        let payloads = decoder.push(&line[cut..]);

        let mut text = String::new();
        assert_eq!(fold_sse_data(&payloads[0], &mut text), SseStep::Delta);
        assert_eq!(text, "café");
    }

    fn client_for(url: &str) -> HttpCompletionClient {
        let config = ApiConfig {
            base_url: Some(url.to_string()),
            api_key: Some("test-key".to_string()),
            ..crate::config::Config::default().api
        };
        HttpCompletionClient::new(config).unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("test-model", vec![LlmMessage::new("user", "Hi")])
    }

    async fn drain(mut rx: mpsc::Receiver<StreamChunk>) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    fn delta(content: &str) -> String {
        format!("data: {}\n\n", json!({"choices": [{"delta": {"content": content}}]}))
    }

    #[tokio::test]
    async fn test_stream_keeps_multibyte_text_split_by_the_network() {
        let body = format!("{}{}data: [DONE]\n\n", delta("café "), delta("😀"));
        let bytes = body.into_bytes();
        let cut = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let emoji = bytes.iter().position(|b| *b == 0xF0).unwrap() + 2;
        let server = StubServer::start(vec![StubResponse::event_stream(vec![
            bytes[..cut].to_vec(),
            bytes[cut..emoji].to_vec(),
            bytes[emoji..].to_vec(),
        ])])
        .await;

        let rx = client_for(&server.url).stream(request(), CancellationToken::new()).await.unwrap();
        let chunks = drain(rx).await;

        let last = chunks.last().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.text, "café 😀");
        assert!(chunks.iter().all(|c| !c.text.contains('\u{FFFD}')));

        let requests = server.requests().await;
        assert!(requests[0].starts_with("POST /chat-completion "));
        assert!(requests[0].contains("\"stream\":true"));
        assert!(requests[0].to_lowercase().contains("authorization: bearer test-key"));
    }

    #[tokio::test]
    async fn test_stream_folds_deltas_until_done() {
        let body = format!("{}: keep-alive\n\n{}data: [DONE]\n\n{}", delta("Tell me"), delta(" more"), delta("ignored"));
        let server = StubServer::start(vec![StubResponse::event_stream(vec![body.into_bytes()])]).await;

        let rx = client_for(&server.url).stream(request(), CancellationToken::new()).await.unwrap();
        let texts: Vec<(String, bool)> = drain(rx).await.into_iter().map(|c| (c.text, c.is_complete)).collect();

        assert_eq!(
            texts,
            vec![
                ("Tell me".to_string(), false),
                ("Tell me more".to_string(), false),
                ("Tell me more".to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_error_payload_keeps_partial_text() {
        let error = format!("data: {}\n\n", json!({"error": {"message": "rate limited"}}));
        let server = StubServer::start(vec![StubResponse::event_stream(vec![
            delta("Half an").into_bytes(),
            error.into_bytes(),
        ])])
        .await;

        let rx = client_for(&server.url).stream(request(), CancellationToken::new()).await.unwrap();
        let last = drain(rx).await.pop().unwrap();

        assert_eq!(last.text, "Half an");
        assert_eq!(last.error.as_deref(), Some("rate limited"));
        assert!(!last.is_complete);
    }

    #[tokio::test]
    async fn test_stream_reports_idle_connection() {
        let server = StubServer::start(vec![
            StubResponse::event_stream(vec![delta("Still").into_bytes()]).holding(Duration::from_secs(2)),
        ])
        .await;

        let client = client_for(&server.url).with_idle_timeout(Duration::from_millis(200));
        let rx = client.stream(request(), CancellationToken::new()).await.unwrap();
        let last = drain(rx).await.pop().unwrap();

        assert_eq!(last.text, "Still");
        assert!(last.error.unwrap().contains("stalled"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_remote_error() {
        let server = StubServer::start(vec![
            StubResponse::json("503 Service Unavailable", json!({"error": "warming up"})),
            StubResponse::json("401 Unauthorized", json!({"error": "bad key"})),
        ])
        .await;
        let client = client_for(&server.url);

        let err = client.stream(request(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::Remote(ref m) if m.contains("503") && m.contains("warming up")));

        let err = client.complete(request(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::Remote(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn test_complete_parses_body_and_sends_non_streaming_request() {
        let server = StubServer::start(vec![StubResponse::json(
            "200 OK",
            json!({
                "message": {"role": "assistant", "content": "Walk me through it."},
                "usage": {"total_tokens": 21}
            }),
        )])
        .await;

        let response = client_for(&server.url)
            .complete(request().with_system_prompt(Some("Be brief".to_string())), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.message.content, "Walk me through it.");
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(21));

        let requests = server.requests().await;
        assert!(requests[0].contains("\"stream\":false"));
        assert!(requests[0].contains("\"system_prompt\":\"Be brief\""));
    }

    #[test]
    fn test_unconfigured_client_reports_it() {
        let client = HttpCompletionClient::new(crate::config::Config::default().api).unwrap();
        assert!(!client.is_configured());
    }
}
