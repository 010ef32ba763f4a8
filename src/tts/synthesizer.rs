//! Per-agent narrator: at most one utterance streams at a time.

use super::connection::SynthesisConnector;
use super::session::{AudioSink, SynthesisOutcome, SynthesisSession};
use super::wire::SynthesisRequest;
use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Caller's view of one utterance.
#[derive(Debug)]
pub struct SynthesisHandle {
    cancel: CancellationToken,
    done: oneshot::Receiver<Result<SynthesisOutcome, SynthesisError>>,
}

impl SynthesisHandle {
    /// Stop this utterance. Its connection is closed by the session task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the utterance to finish.
    ///
    /// # Errors
    ///
    /// Whatever the session failed with; [`SynthesisError::Cancelled`] if
    /// it was interrupted or its task went away.
    pub async fn wait(self) -> Result<SynthesisOutcome, SynthesisError> {
        self.done.await.unwrap_or(Err(SynthesisError::Cancelled))
    }
}

struct InFlight {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Speaks utterances into one shared sink.
///
/// Starting a new utterance cancels the current one and waits for its
/// connection to close first, so two streams never overlap in the sink.
pub struct Synthesizer<S: AudioSink + 'static> {
    config: SynthesisConfig,
    connector: Arc<dyn SynthesisConnector>,
    sink: Arc<Mutex<S>>,
    current: Option<InFlight>,
}

impl<S: AudioSink + 'static> Synthesizer<S> {
    #[must_use]
    pub fn new(config: SynthesisConfig, connector: Arc<dyn SynthesisConnector>, sink: S) -> Self {
        Self {
            config,
            connector,
            sink: Arc::new(Mutex::new(sink)),
            current: None,
        }
    }

    /// Shared sink. Locked by the streaming task while an utterance runs.
    #[must_use]
    pub fn sink(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.sink)
    }

    /// Start speaking `text`, interrupting anything in flight.
    pub async fn speak(&mut self, text: impl Into<String>) -> SynthesisHandle {
        self.interrupt().await;

        let request = SynthesisRequest::new(text, &self.config);
        let cancel = CancellationToken::new();
        let (done_tx, done) = oneshot::channel();

        let task = tokio::spawn({
            let config = self.config.clone();
            let connector = Arc::clone(&self.connector);
            let sink = Arc::clone(&self.sink);
            let cancel = cancel.clone();
            async move {
                let mut session = SynthesisSession::new(&config);
                let mut sink = sink.lock().await;
                let result = session
                    .run(connector.as_ref(), &request, &mut *sink, &cancel)
                    .await;
                let _ = done_tx.send(result);
            }
        });

        self.current = Some(InFlight {
            cancel: cancel.clone(),
            task,
        });
        SynthesisHandle { cancel, done }
    }

    /// Cancel the in-flight utterance, if any, and wait until its
    /// connection is closed. Returns whether something was running.
    pub async fn interrupt(&mut self) -> bool {
        let Some(in_flight) = self.current.take() else {
            return false;
        };
        let running = !in_flight.task.is_finished();
        if running {
            info!("interrupting in-flight utterance");
        }
        in_flight.cancel.cancel();
        let _ = in_flight.task.await;
        running
    }

    /// Whether an utterance is still streaming.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|in_flight| !in_flight.task.is_finished())
    }
}
