//! Error types for the storyva core.

use crate::diff::DiffId;

/// Top-level error type for the markup, sync and synthesis layers.
#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    /// Tag grammar violation.
    #[error("markup error: {0}")]
    Markup(#[from] MarkupError),

    /// Diff could not be applied.
    #[error("diff error: {0}")]
    Diff(#[from] ApplyError),

    /// Unified diff patch could not be parsed.
    #[error("patch error: {0}")]
    Patch(#[from] PatchParseError),

    /// Document seed or state error.
    #[error("document error: {0}")]
    Document(String),

    /// Synchronization protocol error (encoding, unexpected message).
    #[error("sync error: {0}")]
    Sync(String),

    /// Streaming or preview synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Retrieval collaborator error.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed host command payload.
    #[error("host command error: {0}")]
    Host(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SynthesisError> for StoryError {
    fn from(e: SynthesisError) -> Self {
        Self::Tts(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, StoryError>;

/// A single grammar violation found by the markup validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkupError {
    /// A parenthesized token that is not in the vocabulary.
    #[error("unknown tag '({0})'; check spelling against the tag vocabulary")]
    UnknownTag(String),

    /// More than three resolved tags in one sentence.
    #[error("sentence has {0} tags; at most 3 are allowed")]
    TooManyTags(usize),

    /// An emotion tag that is not part of the leading emotion run.
    #[error("emotion tag '({0})' must be at sentence start")]
    EmotionNotAtStart(String),

    /// Opening and closing parentheses do not pair up.
    #[error("mismatched parentheses: {open} opening, {close} closing")]
    UnbalancedParens { open: usize, close: usize },
}

impl MarkupError {
    /// Stable taxonomy code reported back to the proposing side.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTag(_) => "UnknownTag",
            Self::TooManyTags(_) => "TooManyTags",
            Self::EmotionNotAtStart(_) => "EmotionNotAtStart",
            Self::UnbalancedParens { .. } => "UnbalancedParens",
        }
    }
}

/// Failure to apply a diff to the document buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    /// The diff failed grammar validation and can never be applied.
    #[error("diff {0} is not valid markup")]
    InvalidDiff(DiffId),

    /// The original span no longer occurs in the current text.
    #[error("suggestion {0} no longer matches current text")]
    StaleDiff(DiffId),

    /// No pending diff with this id.
    #[error("no pending diff with id {0}")]
    UnknownDiff(DiffId),
}

impl ApplyError {
    /// Id of the diff this error refers to.
    #[must_use]
    pub fn diff_id(&self) -> &DiffId {
        match self {
            Self::InvalidDiff(id) | Self::StaleDiff(id) | Self::UnknownDiff(id) => id,
        }
    }
}

/// Unified diff text that does not describe a replacement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchParseError {
    #[error("no original (-) or proposed (+) lines found")]
    NoChanges,
    #[error("no original (-) lines found; the patch must include the text to replace")]
    MissingOriginal,
    #[error("no proposed (+) lines found; the patch must include the proposed text")]
    MissingProposed,
}

/// Streaming synthesis failure. Audio already pushed to the sink is kept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// Connection-level failure (connect, send, read).
    #[error("synthesis transport error: {0}")]
    Transport(String),

    /// Explicit `error` event from the remote service.
    #[error("synthesis service error: {0}")]
    Remote(String),

    /// No response at all before the idle window elapsed.
    #[error("synthesis timed out waiting for the service")]
    Timeout,

    /// Interrupted by a newer utterance or an explicit stop.
    #[error("synthesis cancelled")]
    Cancelled,
}
