//! Streaming synthesis wire messages.
//!
//! Both directions are msgpack maps in binary frames. One `start` frame
//! carries the whole utterance. The service answers with `audio` events
//! (raw bytes), an optional `finish`/`done`/`end`, or `error`. JSON text
//! frames with base64 audio are also accepted.

use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Full utterance plus voice selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(rename = "reference_id")]
    pub voice_id: String,
    pub format: String,
    pub latency: String,
    /// Sent as a connection header, not in the start frame.
    #[serde(skip)]
    pub model: String,
}

#[derive(Serialize)]
struct StartFrame<'a> {
    event: &'static str,
    request: &'a SynthesisRequest,
}

impl SynthesisRequest {
    #[must_use]
    pub fn new(text: impl Into<String>, config: &SynthesisConfig) -> Self {
        Self {
            text: text.into(),
            voice_id: config.voice_id.clone(),
            format: config.format.clone(),
            latency: config.latency.clone(),
            model: config.model.clone(),
        }
    }

    /// The msgpack `start` frame: `{"event": "start", "request": {...}}`.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::Transport`] if serialization fails.
    pub fn start_frame(&self) -> Result<Vec<u8>, SynthesisError> {
        rmp_serde::to_vec_named(&StartFrame {
            event: "start",
            request: self,
        })
        .map_err(|e| SynthesisError::Transport(format!("failed to encode start frame: {e}")))
    }
}

/// One event received on a synthesis connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    /// Audio chunk, forwarded to the sink in arrival order. May be empty.
    Audio(Bytes),
    /// Explicit end of stream (`finish`, `done` or `end`).
    Finish,
    /// Service-reported failure.
    Error(String),
    /// Any other event name; keeps the stream alive but carries no audio.
    Other(String),
}

/// `audio` is raw bytes in msgpack frames and base64 text in JSON frames.
#[derive(Deserialize)]
struct WireEvent<A> {
    event: String,
    #[serde(default)]
    audio: Option<A>,
    #[serde(default)]
    message: Option<String>,
}

impl SynthesisEvent {
    /// Decode a msgpack binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::Transport`] if the frame is not a msgpack
    /// event map.
    pub fn from_binary(frame: &[u8]) -> Result<Self, SynthesisError> {
        let wire: WireEvent<ByteBuf> = rmp_serde::from_slice(frame)
            .map_err(|e| SynthesisError::Transport(format!("malformed event frame: {e}")))?;
        let audio = wire.audio.map(ByteBuf::into_vec).unwrap_or_default();
        Ok(Self::from_parts(wire.event, audio, wire.message))
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::Transport`] for malformed JSON or audio that
    /// is not valid base64.
    pub fn from_text(frame: &str) -> Result<Self, SynthesisError> {
        let wire: WireEvent<String> = serde_json::from_str(frame)
            .map_err(|e| SynthesisError::Transport(format!("malformed event frame: {e}")))?;
        let audio = match wire.audio.as_deref() {
            Some(encoded) if !encoded.is_empty() => BASE64
                .decode(encoded)
                .map_err(|e| SynthesisError::Transport(format!("invalid audio: {e}")))?,
            _ => Vec::new(),
        };
        Ok(Self::from_parts(wire.event, audio, wire.message))
    }

    fn from_parts(event: String, audio: Vec<u8>, message: Option<String>) -> Self {
        match event.as_str() {
            "audio" => Self::Audio(Bytes::from(audio)),
            "finish" | "done" | "end" => Self::Finish,
            "error" => Self::Error(message.unwrap_or_else(|| "Unknown error".to_owned())),
            _ => Self::Other(event),
        }
    }
}
