//! Speech synthesis: the narrator's streaming voice and one-shot character
//! previews.
//!
//! Streaming uses a persistent WebSocket per utterance. The service does not
//! reliably announce the end of a stream, so a session also ends after a
//! configurable quiet period (see [`SynthesisConfig::idle_timeout`]).
//!
//! [`SynthesisConfig::idle_timeout`]: crate::config::SynthesisConfig::idle_timeout

pub mod connection;
pub mod preview;
pub mod session;
pub mod synthesizer;
pub mod wire;

pub use connection::{
    ScriptEnd, ScriptLog, ScriptStep, ScriptedConnection, ScriptedConnector,
    SynthesisConnection, SynthesisConnector, WsConnector, WsSynthesisConnection,
};
pub use preview::{CharacterGender, PreviewClient};
pub use session::{
    AudioSink, BufferSink, SessionState, StreamEnd, SynthesisOutcome, SynthesisSession,
};
pub use synthesizer::{SynthesisHandle, Synthesizer};
pub use wire::{SynthesisEvent, SynthesisRequest};
