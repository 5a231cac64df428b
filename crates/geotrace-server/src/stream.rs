//! Hop sinks: where enriched records go once they are ready.
//!
//! [`SseSink`] writes each record as one server-sent event. [`CollectSink`]
//! keeps them in memory for the batch JSON endpoint.

use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use geotrace_core::{HopRecord, TraceSummary};
use std::convert::Infallible;
use thiserror::Error;
use tokio::sync::mpsc;

/// Event name of a hop frame.
pub const HOP_EVENT: &str = "hop";

/// Event name of the terminal error frame.
pub const ERROR_EVENT: &str = "error";

/// Event name of the completion frame.
pub const DONE_EVENT: &str = "done";

/// Errors writing to a sink.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The sink already sent its terminal frame.
    #[error("stream already closed")]
    Closed,

    /// The client went away.
    #[error("client disconnected")]
    Disconnected,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination of one trace's output.
#[async_trait]
pub trait HopSink: Send + Sync {
    /// Writes one hop record.
    async fn emit(&mut self, record: &HopRecord) -> Result<(), StreamError>;

    /// Writes the terminal error frame and closes the sink.
    async fn emit_error(&mut self, message: &str) -> Result<(), StreamError>;

    /// Writes the completion frame and closes the sink.
    async fn finish(&mut self, summary: TraceSummary) -> Result<(), StreamError>;

    /// Resolves once the reader is gone. Sinks that cannot lose their
    /// reader never resolve.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

/// Server-sent events sink. Holds at most one undelivered frame.
pub struct SseSink {
    tx: Option<mpsc::Sender<Event>>,
}

impl SseSink {
    fn pair() -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx: Some(tx) }, rx)
    }

    async fn send(&mut self, event: Event) -> Result<(), StreamError> {
        let tx = self.tx.as_ref().ok_or(StreamError::Closed)?;
        tx.send(event).await.map_err(|_| StreamError::Disconnected)
    }

    async fn send_last(&mut self, event: Event) -> Result<(), StreamError> {
        let result = self.send(event).await;
        self.tx = None;
        result
    }
}

#[async_trait]
impl HopSink for SseSink {
    async fn emit(&mut self, record: &HopRecord) -> Result<(), StreamError> {
        let data = serde_json::to_string(record)?;
        self.send(Event::default().event(HOP_EVENT).data(data)).await
    }

    async fn emit_error(&mut self, message: &str) -> Result<(), StreamError> {
        let data = serde_json::json!({ "error": message }).to_string();
        self.send_last(Event::default().event(ERROR_EVENT).data(data))
            .await
    }

    async fn finish(&mut self, summary: TraceSummary) -> Result<(), StreamError> {
        let data = serde_json::to_string(&summary)?;
        self.send_last(Event::default().event(DONE_EVENT).data(data))
            .await
    }

    async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending::<()>().await,
        }
    }
}

/// Creates a sink and the response streaming whatever is written to it.
///
/// The response ends once the sink is closed or dropped. Keep-alive
/// comments are sent while no frame is pending.
pub fn sse_channel() -> (
    SseSink,
    Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>,
) {
    let (sink, rx) = SseSink::pair();
    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });
    (sink, Sse::new(events).keep_alive(KeepAlive::default()))
}

/// In-memory sink for non-streaming responses.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub records: Vec<HopRecord>,
    pub error: Option<String>,
    pub summary: Option<TraceSummary>,
}

impl CollectSink {
    fn is_closed(&self) -> bool {
        self.error.is_some() || self.summary.is_some()
    }
}

#[async_trait]
impl HopSink for CollectSink {
    async fn emit(&mut self, record: &HopRecord) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        self.records.push(record.clone());
        Ok(())
    }

    async fn emit_error(&mut self, message: &str) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        self.error = Some(message.to_string());
        Ok(())
    }

    async fn finish(&mut self, summary: TraceSummary) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        self.summary = Some(summary);
        Ok(())
    }
}
