//! Server-sent-event client for in-flight completions.

pub mod event;

use std::time::Duration;

use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::errors::{AppError, AppResult};
use crate::models::ChatMessage;

pub use event::{decode_frame, ControlEvent, Delta, StreamFrame};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Receives the events of one stream, in arrival order.
pub trait StreamObserver: Send + 'static {
    fn on_delta(&mut self, delta: Delta);

    /// Called for every control event except `Done`.
    fn on_control(&mut self, control: ControlEvent);

    /// Called exactly once when the stream completes; nothing follows it.
    fn on_done(&mut self, message: ChatMessage);
}

/// How a stream task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `Done` arrived and was delivered.
    Completed,
    /// The connection failed more than the retry budget allows in a row.
    /// `on_done` was never called.
    RetriesExhausted { errors: u32 },
    Cancelled,
}

/// Handle to a running stream task. Dropping it leaves the task running.
#[derive(Debug)]
pub struct StreamHandle {
    stream_id: String,
    task: JoinHandle<StreamOutcome>,
}

impl StreamHandle {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub async fn join(self) -> StreamOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => StreamOutcome::Cancelled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionStreamClient {
    http: reqwest::Client,
    base_uri: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl CompletionStreamClient {
    pub fn new(http: reqwest::Client, base_uri: impl Into<String>) -> Self {
        Self {
            http,
            base_uri: base_uri.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn stream_url(&self, stream_id: &str) -> String {
        format!("{}/completions/prompt/sse/{stream_id}", self.base_uri)
    }

    /// Opens the event stream for `stream_id` on a background task and feeds
    /// its events to `observer`.
    pub fn open_stream<O: StreamObserver>(&self, stream_id: &str, observer: O) -> StreamHandle {
        let client = self.clone();
        let id = stream_id.to_string();
        let span = info_span!("completion_stream", stream_id = %id);
        let task = tokio::spawn(async move { client.run(&id, observer).await }.instrument(span));

        StreamHandle { stream_id: stream_id.to_string(), task }
    }

    async fn run<O: StreamObserver>(&self, stream_id: &str, mut observer: O) -> StreamOutcome {
        let url = self.stream_url(stream_id);
        let mut consecutive_errors = 0u32;

        loop {
            match self.consume(&url, &mut observer, &mut consecutive_errors).await {
                Ok(()) => {
                    info!("Stream {stream_id} completed");
                    return StreamOutcome::Completed;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors > self.max_retries {
                        warn!(
                            "Giving up on stream {stream_id} after {consecutive_errors} consecutive errors: {e}"
                        );
                        return StreamOutcome::RetriesExhausted { errors: consecutive_errors };
                    }
                    debug!(
                        "Stream {stream_id} error {consecutive_errors}/{}: {e}; reconnecting",
                        self.max_retries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Reads one connection. Returns `Ok` only after `Done` was delivered; any
    /// other end of the connection is an error the caller may retry.
    async fn consume<O: StreamObserver>(
        &self,
        url: &str,
        observer: &mut O,
        consecutive_errors: &mut u32,
    ) -> AppResult<()> {
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::BackendStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let mut events = std::pin::pin!(response.bytes_stream().eventsource());
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(EventStreamError::Transport(e)) => return Err(AppError::Network(e)),
                Err(e) => return Err(AppError::protocol(e.to_string())),
            };
            *consecutive_errors = 0;

            if event.data.is_empty() {
                continue;
            }
            match decode_frame(&event.data) {
                Ok(StreamFrame::Delta(delta)) => observer.on_delta(delta),
                Ok(StreamFrame::Control(control)) => observer.on_control(control),
                Ok(StreamFrame::Done(message)) => {
                    observer.on_done(message);
                    return Ok(());
                }
                Err(e) => warn!("Skipping stream event: {e}"),
            }
        }

        Err(AppError::StreamClosed)
    }
}
