//! One synthesis session: connect, request, stream to the sink, close.

use super::connection::SynthesisConnector;
use super::wire::{SynthesisEvent, SynthesisRequest};
use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Destination for audio chunks, in arrival order.
#[async_trait]
pub trait AudioSink: Send {
    async fn push(&mut self, chunk: Bytes) -> Result<(), SynthesisError>;

    /// End of an utterance.
    async fn flush(&mut self) -> Result<(), SynthesisError> {
        Ok(())
    }
}

/// Sink that keeps every chunk in memory.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    chunks: Vec<Bytes>,
    flushes: usize,
}

impl BufferSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    #[must_use]
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// All audio concatenated.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

#[async_trait]
impl AudioSink for BufferSink {
    async fn push(&mut self, chunk: Bytes) -> Result<(), SynthesisError> {
        self.chunks.push(chunk);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SynthesisError> {
        self.flushes += 1;
        Ok(())
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Finishing,
    TimedOut,
    Errored,
    Closed,
}

/// Why a successful stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEnd {
    /// Explicit finish event.
    Finished,
    /// No event for the idle window after at least one event.
    IdleTimeout,
    /// The service closed the connection.
    ServerClosed,
}

/// Summary of a completed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SynthesisOutcome {
    pub end: StreamEnd,
    pub chunks: usize,
    pub bytes: usize,
}

/// State for a single utterance.
///
/// The idle timer is reset on every received event and is the only timeout
/// in the stream. The connection is closed on every terminal transition.
#[derive(Debug)]
pub struct SynthesisSession {
    state: SessionState,
    expected_sample_rate: u32,
    expected_channels: u16,
    accumulated_bytes: usize,
    chunks: usize,
    last_event_at: Option<Instant>,
    idle_timeout: Duration,
}

impl SynthesisSession {
    #[must_use]
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            state: SessionState::Idle,
            expected_sample_rate: config.sample_rate,
            expected_channels: config.channels,
            accumulated_bytes: 0,
            chunks: 0,
            last_event_at: None,
            idle_timeout: config.idle_timeout(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    #[must_use]
    pub fn accumulated_bytes(&self) -> usize {
        self.accumulated_bytes
    }

    #[must_use]
    pub fn last_event_at(&self) -> Option<Instant> {
        self.last_event_at
    }

    /// Run one utterance to completion.
    ///
    /// # Errors
    ///
    /// [`SynthesisError::Transport`] or [`SynthesisError::Remote`] abort the
    /// stream; [`SynthesisError::Timeout`] if nothing at all arrived within
    /// the idle window; [`SynthesisError::Cancelled`] if `cancel` fired.
    /// Audio already pushed to the sink stays there in every case.
    pub async fn run(
        &mut self,
        connector: &dyn SynthesisConnector,
        request: &SynthesisRequest,
        sink: &mut dyn AudioSink,
        cancel: &CancellationToken,
    ) -> Result<SynthesisOutcome, SynthesisError> {
        self.state = SessionState::Connecting;
        // The handshake and the start frame share one idle window.
        let handshake_deadline = Instant::now() + self.idle_timeout;
        let mut connection = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.state = SessionState::Closed;
                return Err(SynthesisError::Cancelled);
            }
            () = tokio::time::sleep_until(handshake_deadline) => {
                error!(idle = ?self.idle_timeout, "synthesis connect timed out");
                self.state = SessionState::Closed;
                return Err(SynthesisError::Timeout);
            }
            connected = connector.connect() => match connected {
                Ok(connection) => connection,
                Err(e) => {
                    error!(error = %e, "synthesis connect failed");
                    self.state = SessionState::Closed;
                    return Err(e);
                }
            },
        };

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SynthesisError::Cancelled),
            () = tokio::time::sleep_until(handshake_deadline) => Err(SynthesisError::Timeout),
            sent = connection.send_request(request) => sent,
        };
        if let Err(e) = sent {
            if e != SynthesisError::Cancelled {
                error!(error = %e, "synthesis request failed");
            }
            connection.close().await;
            self.state = SessionState::Closed;
            return Err(e);
        }
        info!(
            chars = request.text.chars().count(),
            sample_rate = self.expected_sample_rate,
            channels = self.expected_channels,
            "synthesis streaming"
        );
        self.state = SessionState::Streaming;

        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        let result = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("synthesis cancelled");
                    break Err(SynthesisError::Cancelled);
                }
                event = connection.next_event() => {
                    let now = Instant::now();
                    match event {
                        None => {
                            debug!("synthesis connection closed by service");
                            self.state = SessionState::Finishing;
                            break Ok(StreamEnd::ServerClosed);
                        }
                        Some(Err(e)) => break Err(e),
                        Some(Ok(event)) => {
                            self.last_event_at = Some(now);
                            idle.as_mut().reset(now + self.idle_timeout);
                            match event {
                                SynthesisEvent::Audio(chunk) => {
                                    if chunk.is_empty() {
                                        continue;
                                    }
                                    let len = chunk.len();
                                    if let Err(e) = sink.push(chunk).await {
                                        break Err(e);
                                    }
                                    self.chunks += 1;
                                    self.accumulated_bytes += len;
                                    debug!(bytes = len, total = self.accumulated_bytes, "audio chunk");
                                }
                                SynthesisEvent::Finish => {
                                    self.state = SessionState::Finishing;
                                    break Ok(StreamEnd::Finished);
                                }
                                SynthesisEvent::Error(message) => {
                                    break Err(SynthesisError::Remote(message));
                                }
                                SynthesisEvent::Other(name) => {
                                    debug!(event = %name, "ignoring synthesis event");
                                }
                            }
                        }
                    }
                }
                () = &mut idle => {
                    if self.last_event_at.is_none() {
                        break Err(SynthesisError::Timeout);
                    }
                    debug!(idle = ?self.idle_timeout, "no events; assuming complete");
                    self.state = SessionState::TimedOut;
                    break Ok(StreamEnd::IdleTimeout);
                }
            }
        };

        connection.close().await;
        let result = match result {
            Ok(end) => sink.flush().await.map(|()| SynthesisOutcome {
                end,
                chunks: self.chunks,
                bytes: self.accumulated_bytes,
            }),
            Err(e) => Err(e),
        };
        match &result {
            Ok(outcome) => info!(
                end = ?outcome.end,
                chunks = outcome.chunks,
                bytes = outcome.bytes,
                "synthesis complete"
            ),
            Err(SynthesisError::Cancelled) => {}
            Err(e) => {
                self.state = SessionState::Errored;
                error!(error = %e, chunks = self.chunks, "synthesis aborted");
            }
        }
        self.state = SessionState::Closed;
        result
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::tts::connection::{ScriptEnd, ScriptStep, ScriptedConnector};

    fn audio(n: u8) -> ScriptStep {
        ScriptStep::Event(SynthesisEvent::Audio(Bytes::from(vec![n; 10])))
    }

    async fn run(
        connector: &ScriptedConnector,
        cancel: &CancellationToken,
    ) -> (SynthesisSession, BufferSink, Result<SynthesisOutcome, SynthesisError>) {
        let config = SynthesisConfig::default();
        let mut session = SynthesisSession::new(&config);
        let mut sink = BufferSink::new();
        let request = SynthesisRequest::new("(calm) Hello there.", &config);
        let result = session.run(connector, &request, &mut sink, cancel).await;
        (session, sink, result)
    }

    #[tokio::test(start_paused = true)]
    async fn silence_after_chunks_completes_without_error() {
        let connector = ScriptedConnector::new().with_script(
            vec![audio(1), audio(2), audio(3), audio(4)],
            ScriptEnd::Hang,
        );
        let log = connector.log();
        let started = Instant::now();

        let (session, sink, result) = run(&connector, &CancellationToken::new()).await;

        let outcome = result.unwrap();
        assert_eq!(outcome.end, StreamEnd::IdleTimeout);
        assert_eq!(outcome.chunks, 4);
        assert_eq!(outcome.bytes, 40);
        assert_eq!(sink.chunks().len(), 4);
        assert_eq!(sink.chunks()[3][0], 4);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(log.closes(), 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_resets_on_every_event() {
        let connector = ScriptedConnector::new().with_script(
            vec![
                audio(1),
                ScriptStep::Delay(Duration::from_secs(4)),
                audio(2),
                ScriptStep::Delay(Duration::from_secs(4)),
                audio(3),
            ],
            ScriptEnd::Hang,
        );
        let (_, sink, result) = run(&connector, &CancellationToken::new()).await;
        assert_eq!(result.unwrap().chunks, 3);
        assert_eq!(sink.chunks().len(), 3);
    }

    #[tokio::test]
    async fn finish_event_and_server_close_both_complete() {
        let finished = ScriptedConnector::new().with_script(
            vec![audio(1), ScriptStep::Event(SynthesisEvent::Finish), audio(9)],
            ScriptEnd::Hang,
        );
        let (_, sink, result) = run(&finished, &CancellationToken::new()).await;
        assert_eq!(result.unwrap().end, StreamEnd::Finished);
        assert_eq!(sink.chunks().len(), 1);
        assert_eq!(sink.flushes(), 1);

        let closed = ScriptedConnector::new().with_script(vec![audio(1)], ScriptEnd::Close);
        let (_, _, result) = run(&closed, &CancellationToken::new()).await;
        assert_eq!(result.unwrap().end, StreamEnd::ServerClosed);
    }

    #[tokio::test]
    async fn error_event_aborts_but_keeps_partial_audio() {
        let connector = ScriptedConnector::new().with_script(
            vec![
                audio(1),
                audio(2),
                ScriptStep::Event(SynthesisEvent::Error("voice not found".into())),
                audio(3),
            ],
            ScriptEnd::Close,
        );
        let log = connector.log();
        let (session, sink, result) = run(&connector, &CancellationToken::new()).await;

        assert_eq!(
            result.unwrap_err(),
            SynthesisError::Remote("voice not found".into())
        );
        assert_eq!(sink.chunks().len(), 2);
        assert_eq!(sink.flushes(), 0);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn transport_failure_aborts() {
        let connector = ScriptedConnector::new().with_script(
            vec![audio(1), ScriptStep::Fail(SynthesisError::Transport("reset".into()))],
            ScriptEnd::Close,
        );
        let (_, sink, result) = run(&connector, &CancellationToken::new()).await;
        assert!(matches!(result, Err(SynthesisError::Transport(_))));
        assert_eq!(sink.chunks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_events_at_all_is_a_timeout() {
        let connector = ScriptedConnector::new().with_script(Vec::new(), ScriptEnd::Hang);
        let (_, sink, result) = run(&connector, &CancellationToken::new()).await;
        assert_eq!(result.unwrap_err(), SynthesisError::Timeout);
        assert!(sink.chunks().is_empty());
    }

    #[tokio::test]
    async fn cancellation_closes_the_connection() {
        let connector = ScriptedConnector::new().with_script(vec![audio(1)], ScriptEnd::Hang);
        let log = connector.log();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (_, _, result) = run(&connector, &cancel).await;
        assert_eq!(result.unwrap_err(), SynthesisError::Cancelled);
        // Cancelled before connecting: nothing was opened.
        assert_eq!(log.closes(), 0);
        assert!(log.requests().is_empty());
    }

    struct StalledConnector;

    #[async_trait]
    impl SynthesisConnector for StalledConnector {
        async fn connect(
            &self,
        ) -> Result<Box<dyn crate::tts::connection::SynthesisConnection>, SynthesisError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_handshake_times_out_within_idle_window() {
        let config = SynthesisConfig::default();
        let mut session = SynthesisSession::new(&config);
        let mut sink = BufferSink::new();
        let request = SynthesisRequest::new("Hello.", &config);
        let started = Instant::now();

        let result = session
            .run(&StalledConnector, &request, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(result.unwrap_err(), SynthesisError::Timeout);
        assert!(started.elapsed() >= config.idle_timeout());
        assert_eq!(session.state(), SessionState::Closed);
    }
}
