//! Storyva: voice-direction markup for narrated stories.
//!
//! A writer edits a story in a surface while a conversational agent
//! suggests expressive tags like `(sad)` or `(whispering)`. The crate holds
//! the pieces both sides share:
//!
//! - **Markup**: the fixed tag vocabulary and the per-sentence validator
//! - **Diffs**: content-addressed span replacements the writer accepts or rejects
//! - **Document**: the versioned buffer and its pending-diff queue
//! - **Sync**: the editor/agent message protocol over a pluggable transport
//! - **TTS**: streaming synthesis sessions and one-shot previews
//! - **Host**: a newline-delimited JSON command bridge for native surfaces

pub mod config;
pub mod diff;
pub mod document;
pub mod error;
pub mod host;
pub mod markup;
pub mod retrieval;
pub mod sync;
pub mod tts;

pub use config::StoryConfig;
pub use diff::{Diff, DiffId};
pub use document::DocumentState;
pub use error::{Result, StoryError};
