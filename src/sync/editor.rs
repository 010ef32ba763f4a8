//! Editor-side peer state.

use super::{Resolution, SyncEffect, SyncMessage};
use crate::diff::DiffId;
use crate::document::{DocumentState, EnqueueOutcome};
use crate::error::ApplyError;
use serde::Serialize;
use std::mem;
use tracing::{debug, warn};

/// One agent turn as shown in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    pub turn_id: String,
    pub text: String,
}

/// Point-in-time copy of the editor for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditorSnapshot {
    pub document: DocumentState,
    pub transcript: Vec<Utterance>,
}

/// The authoritative side of a session: document, pending suggestions and
/// the agent transcript.
///
/// Local mutations never touch the transport directly. They mark the
/// document dirty or queue a message; [`EditorSession::flush`] turns that
/// into the next batch of outbound messages, with at most one
/// `DocumentUpdate` carrying the latest text.
#[derive(Debug, Default)]
pub struct EditorSession {
    state: DocumentState,
    transcript: Vec<Utterance>,
    dirty: bool,
    outbox: Vec<SyncMessage>,
}

impl EditorSession {
    /// Start from an existing document. The first flush announces it.
    #[must_use]
    pub fn new(state: DocumentState) -> Self {
        Self {
            state,
            transcript: Vec::new(),
            dirty: true,
            outbox: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &DocumentState {
        &self.state
    }

    #[must_use]
    pub fn transcript(&self) -> &[Utterance] {
        &self.transcript
    }

    #[must_use]
    pub fn snapshot(&self) -> EditorSnapshot {
        EditorSnapshot {
            document: self.state.clone(),
            transcript: self.transcript.clone(),
        }
    }

    /// Replace the text with a human edit. Returns the new version.
    pub fn local_edit(&mut self, text: impl Into<String>) -> u64 {
        self.state = mem::take(&mut self.state).edit(text);
        self.dirty = true;
        self.state.version()
    }

    /// Accept a pending suggestion. Returns the new version.
    ///
    /// # Errors
    ///
    /// [`ApplyError::StaleDiff`] if the original span is gone (the diff is
    /// discarded and the agent told so), [`ApplyError::UnknownDiff`] if the
    /// id is not pending.
    pub fn accept(&mut self, id: &DiffId) -> Result<u64, ApplyError> {
        match mem::take(&mut self.state).apply(id) {
            Ok(next) => {
                self.state = next;
                self.dirty = true;
                self.resolve(id, Resolution::Applied);
                Ok(self.state.version())
            }
            Err((state, e)) => {
                self.state = state;
                if matches!(e, ApplyError::StaleDiff(_)) {
                    self.resolve(id, Resolution::Stale);
                }
                Err(e)
            }
        }
    }

    /// Dismiss a pending suggestion.
    ///
    /// # Errors
    ///
    /// [`ApplyError::UnknownDiff`] if the id is not pending.
    pub fn reject(&mut self, id: &DiffId) -> Result<(), ApplyError> {
        match mem::take(&mut self.state).reject(id) {
            Ok(next) => {
                self.state = next;
                self.resolve(id, Resolution::Rejected);
                Ok(())
            }
            Err((state, e)) => {
                self.state = state;
                Err(e)
            }
        }
    }

    /// Apply one inbound message from the agent.
    pub fn handle(&mut self, msg: SyncMessage) -> SyncEffect {
        match msg {
            SyncMessage::DiffProposal { diff } => match self.state.enqueue(diff) {
                EnqueueOutcome::Enqueued(id) => SyncEffect::Queued { id },
                EnqueueOutcome::Duplicate(_) => SyncEffect::Duplicate,
                EnqueueOutcome::Rejected(id) => {
                    self.resolve(&id, Resolution::Rejected);
                    SyncEffect::Rejected { id }
                }
            },
            SyncMessage::AgentUtterance { text, turn_id } => self.merge_utterance(text, turn_id),
            SyncMessage::ResyncRequest => {
                debug!("agent requested resync");
                self.dirty = true;
                SyncEffect::ResyncRequested
            }
            other => {
                warn!(kind = other.kind(), "editor ignoring message meant for the agent");
                SyncEffect::Ignored
            }
        }
    }

    /// Channel re-established: re-announce the current text.
    pub fn on_reconnect(&mut self) {
        self.dirty = true;
    }

    /// Drain everything waiting to go out, latest text first.
    pub fn flush(&mut self) -> Vec<SyncMessage> {
        let mut out = Vec::with_capacity(self.outbox.len() + 1);
        if mem::take(&mut self.dirty) {
            out.push(SyncMessage::DocumentUpdate {
                text: self.state.text().to_owned(),
                version: self.state.version(),
            });
        }
        out.append(&mut self.outbox);
        out
    }

    /// Put back messages the transport failed to deliver.
    ///
    /// Document updates are not kept verbatim; the next flush re-reads the
    /// current text instead.
    pub fn requeue(&mut self, unsent: Vec<SyncMessage>) {
        let mut kept = Vec::with_capacity(unsent.len() + self.outbox.len());
        for msg in unsent {
            if matches!(msg, SyncMessage::DocumentUpdate { .. }) {
                self.dirty = true;
            } else {
                kept.push(msg);
            }
        }
        kept.append(&mut self.outbox);
        self.outbox = kept;
    }

    fn resolve(&mut self, id: &DiffId, resolution: Resolution) {
        self.outbox.push(SyncMessage::DiffResolution {
            diff_id: id.clone(),
            resolution,
        });
    }

    fn merge_utterance(&mut self, text: String, turn_id: String) -> SyncEffect {
        if let Some(existing) = self.transcript.iter_mut().find(|u| u.turn_id == turn_id) {
            if existing.text == text {
                return SyncEffect::Duplicate;
            }
            existing.text = text;
        } else {
            self.transcript.push(Utterance {
                turn_id: turn_id.clone(),
                text,
            });
        }
        SyncEffect::TranscriptUpdated { turn_id }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::diff::propose;

    fn session(text: &str) -> EditorSession {
        let mut s = EditorSession::new(DocumentState::seeded(text));
        s.flush();
        s
    }

    #[test]
    fn duplicate_proposal_is_queued_once() {
        let mut s = session("I can't do this.");
        let diff = propose("I can't do this.", "(sad) I can't do this.", "grief");
        let msg = SyncMessage::DiffProposal { diff: diff.clone() };

        assert_eq!(
            s.handle(msg.clone()),
            SyncEffect::Queued {
                id: diff.id().clone()
            }
        );
        assert_eq!(s.handle(msg), SyncEffect::Duplicate);
        assert_eq!(s.state().pending_diffs().len(), 1);
    }

    #[test]
    fn invalid_proposal_is_rejected_and_reported() {
        let mut s = session("I can't do this.");
        let diff = propose("I can't do this.", "I can't (sad) do this.", "grief");
        let effect = s.handle(SyncMessage::DiffProposal { diff: diff.clone() });

        assert_eq!(
            effect,
            SyncEffect::Rejected {
                id: diff.id().clone()
            }
        );
        assert!(s.state().pending_diffs().is_empty());
        assert_eq!(
            s.flush(),
            vec![SyncMessage::DiffResolution {
                diff_id: diff.id().clone(),
                resolution: Resolution::Rejected,
            }]
        );
    }

    #[test]
    fn replayed_invalid_proposal_is_resolved_once() {
        let mut s = session("I can't do this.");
        let diff = propose("I can't do this.", "I can't (sad) do this.", "grief");
        let first = s.handle(SyncMessage::DiffProposal { diff: diff.clone() });
        let again = s.handle(SyncMessage::DiffProposal { diff: diff.clone() });

        assert!(matches!(first, SyncEffect::Rejected { .. }));
        assert_eq!(again, SyncEffect::Duplicate);
        assert_eq!(s.flush().len(), 1);
    }

    #[test]
    fn accept_applies_and_announces_text_then_resolution() {
        let mut s = session("Run. Now.");
        let diff = propose("Run.", "(scared) Run.", "panic");
        s.handle(SyncMessage::DiffProposal { diff: diff.clone() });

        assert_eq!(s.accept(diff.id()).unwrap(), 1);
        let out = s.flush();
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0],
            SyncMessage::DocumentUpdate {
                text: "(scared) Run. Now.".into(),
                version: 1,
            }
        );
        assert_eq!(out[1].kind(), "diff_resolution");
    }

    #[test]
    fn accept_after_concurrent_edit_is_stale() {
        let mut s = session("Run. Now.");
        let diff = propose("Run.", "(scared) Run.", "panic");
        s.handle(SyncMessage::DiffProposal { diff: diff.clone() });
        s.local_edit("Walk. Now.");
        s.flush();

        let err = s.accept(diff.id()).unwrap_err();
        assert_eq!(err, ApplyError::StaleDiff(diff.id().clone()));
        assert!(s.state().pending_diffs().is_empty());
        assert_eq!(
            s.flush(),
            vec![SyncMessage::DiffResolution {
                diff_id: diff.id().clone(),
                resolution: Resolution::Stale,
            }]
        );
    }

    #[test]
    fn reject_leaves_text_alone() {
        let mut s = session("Run.");
        let diff = propose("Run.", "(scared) Run.", "panic");
        s.handle(SyncMessage::DiffProposal { diff: diff.clone() });

        s.reject(diff.id()).unwrap();
        assert_eq!(s.state().text(), "Run.");
        assert_eq!(s.state().version(), 0);
        assert!(matches!(
            s.reject(diff.id()),
            Err(ApplyError::UnknownDiff(_))
        ));
    }

    #[test]
    fn utterances_merge_by_turn_id() {
        let mut s = session("");
        let first = SyncMessage::AgentUtterance {
            text: "Let me look.".into(),
            turn_id: "t1".into(),
        };
        assert_eq!(
            s.handle(first.clone()),
            SyncEffect::TranscriptUpdated {
                turn_id: "t1".into()
            }
        );
        assert_eq!(s.handle(first), SyncEffect::Duplicate);

        s.handle(SyncMessage::AgentUtterance {
            text: "Let me look again.".into(),
            turn_id: "t1".into(),
        });
        assert_eq!(s.transcript().len(), 1);
        assert_eq!(s.transcript()[0].text, "Let me look again.");
    }

    #[test]
    fn edits_coalesce_into_one_update() {
        let mut s = session("a");
        s.local_edit("ab");
        s.local_edit("abc");
        let out = s.flush();
        assert_eq!(
            out,
            vec![SyncMessage::DocumentUpdate {
                text: "abc".into(),
                version: 2,
            }]
        );
        assert!(s.flush().is_empty());
    }

    #[test]
    fn resync_request_marks_dirty() {
        let mut s = session("Kept.");
        assert_eq!(
            s.handle(SyncMessage::ResyncRequest),
            SyncEffect::ResyncRequested
        );
        assert_eq!(s.flush()[0].kind(), "document_update");
    }

    #[test]
    fn requeue_keeps_resolutions_and_rereads_text() {
        let mut s = session("x");
        let id = DiffId::from("d1");
        let unsent = vec![
            SyncMessage::DocumentUpdate {
                text: "old".into(),
                version: 0,
            },
            SyncMessage::DiffResolution {
                diff_id: id.clone(),
                resolution: Resolution::Rejected,
            },
        ];
        s.local_edit("new");
        s.flush();
        s.requeue(unsent);

        let out = s.flush();
        assert_eq!(
            out[0],
            SyncMessage::DocumentUpdate {
                text: "new".into(),
                version: 1,
            }
        );
        assert_eq!(out[1].kind(), "diff_resolution");
    }
}
