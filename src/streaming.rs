use crate::error::Result;
use crate::llm::StreamChunk;
use crate::session::store::MessageStore;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What a single chunk did to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEffect {
    /// Placeholder content replaced with the accumulated text
    Updated,
    /// Reply finalized
    Completed,
    /// Chunk carried an error; consumption must stop
    Failed(String),
    /// Arrived after completion and was dropped
    Ignored,
}

/// How a streamed reply ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { text: String, latency: Duration },
    /// Partial text (possibly empty) stays in the store
    Failed { partial: String, error: String },
    Cancelled { partial: String },
}

/// Folds accumulated-text chunks into the in-progress assistant message.
///
/// The store must already hold the placeholder opened by `begin_assistant`.
#[derive(Debug)]
pub struct StreamAccumulator {
    started: Instant,
    text: String,
    is_complete: bool,
    chunks: usize,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            text: String::new(),
            is_complete: false,
            chunks: 0,
        }
    }

    /// Apply one chunk to the store
    pub fn apply(&mut self, chunk: StreamChunk, store: &mut MessageStore) -> Result<ChunkEffect> {
        if self.is_complete {
            return Ok(ChunkEffect::Ignored);
        }
        self.chunks += 1;

        if let Some(error) = chunk.error {
            if !chunk.text.is_empty() {
                self.text = chunk.text;
                store.replace_last(&self.text)?;
            }
            store.discard_in_progress();
            return Ok(ChunkEffect::Failed(error));
        }

        if chunk.text != self.text {
            self.text = chunk.text;
            store.replace_last(&self.text)?;
        }

        if chunk.is_complete {
            store.finalize_last()?;
            self.is_complete = true;
            return Ok(ChunkEffect::Completed);
        }

        Ok(ChunkEffect::Updated)
    }

    /// Drain `rx` into the store until completion, error, cancellation or end of stream.
    ///
    /// `on_update` runs after every store change so observers can re-render.
    pub async fn consume<F>(
        mut self,
        mut rx: mpsc::Receiver<StreamChunk>,
        store: &mut MessageStore,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<StreamOutcome>
    where
        F: FnMut(&MessageStore),
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = rx.recv() => Some(chunk),
            };

            let chunk = match next {
                None => {
                    store.discard_in_progress();
                    on_update(store);
                    tracing::debug!(chunks = self.chunks, "stream cancelled");
                    return Ok(StreamOutcome::Cancelled { partial: self.text });
                }
                Some(None) => {
                    // Sender went away without a completion chunk
                    StreamChunk::complete(self.text.clone())
                }
                Some(Some(chunk)) => chunk,
            };

            match self.apply(chunk, store)? {
                ChunkEffect::Updated | ChunkEffect::Ignored => on_update(store),
                ChunkEffect::Completed => {
                    on_update(store);
                    let latency = self.started.elapsed();
                    tracing::debug!(chunks = self.chunks, latency_ms = latency.as_millis() as u64, "stream complete");
                    return Ok(StreamOutcome::Completed {
                        text: self.text,
                        latency,
                    });
                }
                ChunkEffect::Failed(error) => {
                    on_update(store);
                    return Ok(StreamOutcome::Failed {
                        partial: self.text,
                        error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Message, MessageRole};

    fn store_with_placeholder() -> MessageStore {
        let mut store = MessageStore::new();
        store.append(Message::user("Hello")).unwrap();
        store.begin_assistant().unwrap();
        store
    }

    async fn feed(chunks: Vec<StreamChunk>) -> mpsc::Receiver<StreamChunk> {
        let (tx, rx) = mpsc::channel(16);
        for chunk in chunks {
            tx.send(chunk).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn test_accumulated_chunks_produce_one_message() {
        let mut store = store_with_placeholder();
        let rx = feed(vec![
            StreamChunk::partial("H"),
            StreamChunk::partial("Hi"),
            StreamChunk::partial("Hi there"),
            StreamChunk::complete("Hi there"),
        ])
        .await;

        let mut updates = 0;
        let outcome = StreamAccumulator::new()
            .consume(rx, &mut store, &CancellationToken::new(), |_| updates += 1)
            .await
            .unwrap();

        assert!(matches!(outcome, StreamOutcome::Completed { ref text, .. } if text == "Hi there"));
        assert_eq!(updates, 4);
        assert_eq!(store.len(), 2);
        assert_eq!(store.count_role(MessageRole::Assistant), 1);
        let last = store.last().unwrap();
        assert_eq!(last.content, "Hi there");
        assert!(!last.is_in_progress());
    }

    #[test]
    fn test_chunks_after_completion_are_ignored() {
        let mut store = store_with_placeholder();
        let mut acc = StreamAccumulator::new();

        acc.apply(StreamChunk::complete("done"), &mut store).unwrap();
        let effect = acc.apply(StreamChunk::partial("done and more"), &mut store).unwrap();

        assert_eq!(effect, ChunkEffect::Ignored);
        assert_eq!(store.last().unwrap().content, "done");
    }

    #[tokio::test]
    async fn test_error_keeps_partial_text() {
        let mut store = store_with_placeholder();
        let rx = feed(vec![
            StreamChunk::partial("Par"),
            StreamChunk::failed("Partial", "connection reset"),
            StreamChunk::complete("never applied"),
        ])
        .await;

        let outcome = StreamAccumulator::new()
            .consume(rx, &mut store, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(
            outcome,
            StreamOutcome::Failed {
                partial: "Partial".to_string(),
                error: "connection reset".to_string()
            }
        );
        assert_eq!(store.last().unwrap().content, "Partial");
        assert!(!store.has_in_progress());
    }

    #[tokio::test]
    async fn test_error_before_any_text_drops_placeholder() {
        let mut store = store_with_placeholder();
        let rx = feed(vec![StreamChunk::failed("", "upstream 500")]).await;

        let outcome = StreamAccumulator::new()
            .consume(rx, &mut store, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert!(matches!(outcome, StreamOutcome::Failed { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.last().unwrap().role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_closed_stream_without_completion_finalizes_last_text() {
        let mut store = store_with_placeholder();
        let rx = feed(vec![StreamChunk::partial("Hi"), StreamChunk::partial("Hi you")]).await;

        let outcome = StreamAccumulator::new()
            .consume(rx, &mut store, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert!(matches!(outcome, StreamOutcome::Completed { ref text, .. } if text == "Hi you"));
        assert!(!store.has_in_progress());
    }

    #[tokio::test]
    async fn test_cancellation_stops_consumption() {
        let mut store = store_with_placeholder();
        let (tx, rx) = mpsc::channel(4);
        tx.send(StreamChunk::partial("Hal")).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = StreamAccumulator::new()
            .consume(rx, &mut store, &cancel, |_| {})
            .await
            .unwrap();

        assert!(matches!(outcome, StreamOutcome::Cancelled { .. }));
        assert!(!store.has_in_progress());
        drop(tx);
    }
}
