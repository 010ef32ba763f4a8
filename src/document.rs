//! Authoritative, versioned document buffer owned by the editing surface.
//!
//! [`DocumentState`] is a value: every mutation consumes the current state
//! and returns the next one with a higher `version`. Diffs are addressed by
//! exact substring, never by offset, so a concurrent human edit makes a
//! suggestion fail safe ([`ApplyError::StaleDiff`]) instead of landing in the
//! wrong place.

use crate::diff::{Diff, DiffId};
use crate::error::ApplyError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Outcome of offering a diff to the pending queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New suggestion queued for the human.
    Enqueued(DiffId),
    /// Already pending or already consumed; ignored.
    Duplicate(DiffId),
    /// Failed grammar validation; never shown as actionable.
    Rejected(DiffId),
}

/// The editable text plus its queue of unapplied suggestions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    text: String,
    pending_diffs: Vec<Diff>,
    version: u64,
    /// Ids applied, rejected or discarded as stale this session.
    #[serde(skip)]
    consumed: HashSet<DiffId>,
}

impl DocumentState {
    /// Empty document at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Document seeded with initial text at version 0.
    #[must_use]
    pub fn seeded(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Seed from session metadata of the form `{"story_text": "..."}`.
    ///
    /// Missing or malformed metadata yields an empty document; a bad seed
    /// must not prevent the session from starting.
    #[must_use]
    pub fn from_session_metadata(metadata: &str) -> Self {
        #[derive(Deserialize)]
        struct Metadata {
            #[serde(default)]
            story_text: String,
        }

        if metadata.trim().is_empty() {
            return Self::new();
        }
        match serde_json::from_str::<Metadata>(metadata) {
            Ok(m) => {
                info!(chars = m.story_text.len(), "seeded document from session metadata");
                Self::seeded(m.story_text)
            }
            Err(e) => {
                warn!(error = %e, "failed to parse session metadata; starting empty");
                Self::new()
            }
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn pending_diffs(&self) -> &[Diff] {
        &self.pending_diffs
    }

    #[must_use]
    pub fn pending(&self, id: &DiffId) -> Option<&Diff> {
        self.pending_diffs.iter().find(|d| d.id() == id)
    }

    /// Whether this id was seen before: pending now or already consumed.
    #[must_use]
    pub fn has_seen(&self, id: &DiffId) -> bool {
        self.consumed.contains(id) || self.pending(id).is_some()
    }

    /// Replace the buffer with a human edit.
    ///
    /// Pending diffs stay queued; each is re-checked when applied.
    #[must_use]
    pub fn edit(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self.version += 1;
        debug!(version = self.version, "document edited");
        self
    }

    /// Queue a proposal for the human. Duplicate ids are ignored, including
    /// ids of proposals already rejected as invalid.
    pub fn enqueue(&mut self, diff: Diff) -> EnqueueOutcome {
        let id = diff.id().clone();
        if self.has_seen(&id) {
            debug!(diff_id = %id, "ignoring duplicate diff proposal");
            return EnqueueOutcome::Duplicate(id);
        }
        if !diff.verify() {
            warn!(diff_id = %id, "dropping proposal that fails validation");
            self.consumed.insert(id.clone());
            return EnqueueOutcome::Rejected(id);
        }
        info!(diff_id = %id, summary = diff.summary(), "diff queued");
        self.pending_diffs.push(diff);
        EnqueueOutcome::Enqueued(id)
    }

    /// Accept a pending diff.
    ///
    /// A stale diff is discarded from the queue and not retried.
    ///
    /// # Errors
    ///
    /// [`ApplyError::UnknownDiff`] if the id is not pending,
    /// [`ApplyError::StaleDiff`] if its original span is gone.
    pub fn apply(mut self, id: &DiffId) -> Result<Self, (Self, ApplyError)> {
        let Some(pos) = self.pending_diffs.iter().position(|d| d.id() == id) else {
            return Err((self, ApplyError::UnknownDiff(id.clone())));
        };
        let diff = self.pending_diffs.remove(pos);
        self.consumed.insert(id.clone());
        match apply_diff(self, &diff) {
            Ok(next) => Ok(next),
            Err((state, e)) => {
                warn!(diff_id = %id, "suggestion no longer matches current text; discarded");
                Err((state, e))
            }
        }
    }

    /// Dismiss a pending diff without touching the buffer.
    ///
    /// # Errors
    ///
    /// [`ApplyError::UnknownDiff`] if the id is not pending.
    pub fn reject(mut self, id: &DiffId) -> Result<Self, (Self, ApplyError)> {
        let Some(pos) = self.pending_diffs.iter().position(|d| d.id() == id) else {
            return Err((self, ApplyError::UnknownDiff(id.clone())));
        };
        self.pending_diffs.remove(pos);
        self.consumed.insert(id.clone());
        info!(diff_id = %id, "diff rejected");
        Ok(self)
    }

    /// Grounding block injected into the agent's context before each turn.
    #[must_use]
    pub fn context_block(&self) -> String {
        context_block(&self.text)
    }
}

/// Apply a diff directly to a state.
///
/// Replaces only the first occurrence of the original span, bumps the
/// version and drops the diff from the pending queue if present.
///
/// # Errors
///
/// [`ApplyError::InvalidDiff`] if the diff failed validation,
/// [`ApplyError::StaleDiff`] if the original span is not in the text. The
/// untouched state is handed back alongside the error.
pub fn apply_diff(
    mut state: DocumentState,
    diff: &Diff,
) -> Result<DocumentState, (DocumentState, ApplyError)> {
    if !diff.is_valid() {
        return Err((state, ApplyError::InvalidDiff(diff.id().clone())));
    }
    if !state.text.contains(diff.original_span()) {
        state.pending_diffs.retain(|d| d.id() != diff.id());
        return Err((state, ApplyError::StaleDiff(diff.id().clone())));
    }

    state.text = state
        .text
        .replacen(diff.original_span(), diff.proposed_span(), 1);
    state.version += 1;
    state.pending_diffs.retain(|d| d.id() != diff.id());
    info!(diff_id = %diff.id(), version = state.version, "diff applied");
    Ok(state)
}

/// Render the `<current_story>` block for a text.
#[must_use]
pub fn context_block(text: &str) -> String {
    if text.is_empty() {
        "<current_story>No story text yet. User hasn't pasted their story.</current_story>"
            .to_owned()
    } else {
        format!("<current_story>\n{text}\n</current_story>")
    }
}
