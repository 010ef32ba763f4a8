//! Persistent connections to the synthesis service.

use super::wire::{SynthesisEvent, SynthesisRequest};
use crate::config::{API_KEY_ENV, SynthesisConfig};
use crate::error::{StoryError, SynthesisError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// One open synthesis stream.
#[async_trait]
pub trait SynthesisConnection: Send {
    async fn send_request(&mut self, request: &SynthesisRequest) -> Result<(), SynthesisError>;

    /// Next event; `None` once the service has closed the connection.
    async fn next_event(&mut self) -> Option<Result<SynthesisEvent, SynthesisError>>;

    /// Release the underlying transport. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens a fresh connection per utterance.
#[async_trait]
pub trait SynthesisConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SynthesisConnection>, SynthesisError>;
}

/// WebSocket connection to the live synthesis endpoint.
pub struct WsSynthesisConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl WsSynthesisConnection {
    /// Connect with bearer auth and the model header.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::Transport`] if the handshake fails.
    pub async fn connect(config: &SynthesisConfig, api_key: &str) -> Result<Self, SynthesisError> {
        let mut request = config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| SynthesisError::Transport(format!("invalid endpoint: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| SynthesisError::Transport(format!("invalid api key: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        if let Ok(model) = HeaderValue::from_str(&config.model) {
            request.headers_mut().insert("model", model);
        }

        debug!(endpoint = %config.endpoint, "connecting to synthesis service");
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SynthesisError::Transport(format!("connect failed: {e}")))?;
        Ok(Self { ws, closed: false })
    }
}

#[async_trait]
impl SynthesisConnection for WsSynthesisConnection {
    async fn send_request(&mut self, request: &SynthesisRequest) -> Result<(), SynthesisError> {
        let frame = request.start_frame()?;
        self.ws
            .send(Message::Binary(frame))
            .await
            .map_err(|e| SynthesisError::Transport(format!("send failed: {e}")))
    }

    async fn next_event(&mut self) -> Option<Result<SynthesisEvent, SynthesisError>> {
        loop {
            return match self.ws.next().await? {
                Ok(Message::Text(text)) => Some(SynthesisEvent::from_text(&text)),
                Ok(Message::Binary(data)) => Some(SynthesisEvent::from_binary(&data)),
                Ok(Message::Close(_))
                | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    None
                }
                Ok(_) => continue,
                Err(e) => Some(Err(SynthesisError::Transport(format!("read failed: {e}")))),
            };
        }
    }

    async fn close(&mut self) {
        if !std::mem::replace(&mut self.closed, true) {
            let _ = self.ws.close(None).await;
        }
    }
}

/// Production connector: one WebSocket per utterance.
#[derive(Clone)]
pub struct WsConnector {
    config: SynthesisConfig,
    api_key: String,
}

impl WsConnector {
    #[must_use]
    pub fn new(config: SynthesisConfig, api_key: impl Into<String>) -> Self {
        Self {
            config,
            api_key: api_key.into(),
        }
    }

    /// Connector using the API key from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Config`] when no key is set.
    pub fn from_env(config: SynthesisConfig) -> Result<Self, StoryError> {
        Self::with_key(config, SynthesisConfig::api_key())
    }

    fn with_key(config: SynthesisConfig, api_key: Option<String>) -> Result<Self, StoryError> {
        let api_key = api_key.ok_or_else(|| {
            StoryError::Config(format!("{API_KEY_ENV} is not set; streaming synthesis disabled"))
        })?;
        Ok(Self::new(config, api_key))
    }
}

#[async_trait]
impl SynthesisConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn SynthesisConnection>, SynthesisError> {
        let connection = WsSynthesisConnection::connect(&self.config, &self.api_key).await?;
        Ok(Box::new(connection))
    }
}

/// One step of a scripted connection.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(SynthesisEvent),
    /// Wait before the next step.
    Delay(Duration),
    Fail(SynthesisError),
}

/// What a scripted connection does once its steps run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Go silent forever.
    Hang,
    /// Close from the service side.
    Close,
}

/// Shared record of what scripted connections saw.
#[derive(Debug, Default)]
pub struct ScriptLog {
    requests: Mutex<Vec<SynthesisRequest>>,
    closes: AtomicUsize,
}

impl ScriptLog {
    /// Requests sent so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// How many connections were closed.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// In-memory connection replaying a fixed script.
#[derive(Debug)]
pub struct ScriptedConnection {
    steps: VecDeque<ScriptStep>,
    end: ScriptEnd,
    log: Arc<ScriptLog>,
    closed: bool,
}

impl ScriptedConnection {
    #[must_use]
    pub fn new(steps: Vec<ScriptStep>, end: ScriptEnd, log: Arc<ScriptLog>) -> Self {
        Self {
            steps: steps.into(),
            end,
            log,
            closed: false,
        }
    }
}

#[async_trait]
impl SynthesisConnection for ScriptedConnection {
    async fn send_request(&mut self, request: &SynthesisRequest) -> Result<(), SynthesisError> {
        if let Ok(mut requests) = self.log.requests.lock() {
            requests.push(request.clone());
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<SynthesisEvent, SynthesisError>> {
        loop {
            match self.steps.pop_front() {
                Some(ScriptStep::Event(event)) => return Some(Ok(event)),
                Some(ScriptStep::Fail(e)) => return Some(Err(e)),
                Some(ScriptStep::Delay(d)) => tokio::time::sleep(d).await,
                None => match self.end {
                    ScriptEnd::Close => return None,
                    ScriptEnd::Hang => std::future::pending::<()>().await,
                },
            }
        }
    }

    async fn close(&mut self) {
        if !std::mem::replace(&mut self.closed, true) {
            self.log.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Connector handing out scripted connections in order.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<(Vec<ScriptStep>, ScriptEnd)>>,
    log: Arc<ScriptLog>,
}

impl ScriptedConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the script for the next connection.
    #[must_use]
    pub fn with_script(self, steps: Vec<ScriptStep>, end: ScriptEnd) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back((steps, end));
        }
        self
    }

    #[must_use]
    pub fn log(&self) -> Arc<ScriptLog> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl SynthesisConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn SynthesisConnection>, SynthesisError> {
        let next = self
            .scripts
            .lock()
            .map_err(|_| SynthesisError::Transport("script lock poisoned".to_owned()))?
            .pop_front();
        match next {
            Some((steps, end)) => Ok(Box::new(ScriptedConnection::new(
                steps,
                end,
                Arc::clone(&self.log),
            ))),
            None => Err(SynthesisError::Transport(
                "connection refused: no script left".to_owned(),
            )),
        }
    }
}
