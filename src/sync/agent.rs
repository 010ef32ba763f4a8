//! Agent-side peer state: a cached mirror of the editor's document.

use super::{Resolution, SyncEffect, SyncMessage};
use crate::config::InvalidDiffPolicy;
use crate::diff::{self, Diff, DiffId};
use crate::document;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// What happened to a suggestion the agent tried to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// Valid and queued for the editor.
    Forwarded(Diff),
    /// Same spans were already proposed this session.
    Duplicate(DiffId),
    /// Failed validation; the errors go back to the proposer.
    Invalid(Diff),
    /// Failed validation and the policy says to drop silently.
    Dropped(DiffId),
    /// The original span is not in the mirrored text.
    NotInDocument(Diff),
}

impl ProposalOutcome {
    /// Short status the conversation layer can speak or log.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Forwarded(d) => format!("Suggested: {}", d.summary()),
            Self::Duplicate(id) => format!("Suggestion {id} was already made"),
            Self::Invalid(d) => {
                let reasons = d.validation().reasons.join("; ");
                match d.suggestion() {
                    Some(fixed) => {
                        format!("Suggestion is not valid markup: {reasons}. Try: {fixed}")
                    }
                    None => format!("Suggestion is not valid markup: {reasons}"),
                }
            }
            Self::Dropped(id) => format!("Suggestion {id} dropped"),
            Self::NotInDocument(_) => {
                "The text to replace was not found in the current story".to_owned()
            }
        }
    }
}

/// Read-only copy of the mirror at one moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSnapshot {
    pub text: String,
    pub version: u64,
    pub synced: bool,
}

impl MirrorSnapshot {
    /// `<current_story>` grounding block for the next turn.
    #[must_use]
    pub fn context_block(&self) -> String {
        document::context_block(&self.text)
    }
}

/// The agent's cached view of the document.
///
/// Never authoritative: after a disconnect it is marked unsynced and only
/// a fresh `DocumentUpdate` from the editor makes it current again.
#[derive(Debug)]
pub struct AgentMirror {
    text: String,
    version: u64,
    synced: bool,
    policy: InvalidDiffPolicy,
    proposed: HashSet<DiffId>,
    spoken: HashSet<String>,
    resolutions: HashMap<DiffId, Resolution>,
    outbox: Vec<SyncMessage>,
}

impl AgentMirror {
    #[must_use]
    pub fn new(policy: InvalidDiffPolicy) -> Self {
        Self::seeded(String::new(), policy)
    }

    /// Start from the session seed. Unsynced until the editor confirms it.
    #[must_use]
    pub fn seeded(text: impl Into<String>, policy: InvalidDiffPolicy) -> Self {
        Self {
            text: text.into(),
            version: 0,
            synced: false,
            policy,
            proposed: HashSet::new(),
            spoken: HashSet::new(),
            resolutions: HashMap::new(),
            outbox: Vec::new(),
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
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// How the editor resolved a suggestion, once it has said.
    #[must_use]
    pub fn resolution(&self, id: &DiffId) -> Option<Resolution> {
        self.resolutions.get(id).copied()
    }

    #[must_use]
    pub fn snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot {
            text: self.text.clone(),
            version: self.version,
            synced: self.synced,
        }
    }

    #[must_use]
    pub fn context_block(&self) -> String {
        document::context_block(&self.text)
    }

    /// Build, validate and (if acceptable) queue a suggestion.
    pub fn propose(&mut self, original: &str, proposed: &str, explanation: &str) -> ProposalOutcome {
        let diff = diff::propose(original, proposed, explanation);
        let id = diff.id().clone();

        if self.proposed.contains(&id) {
            debug!(diff_id = %id, "suggestion already proposed");
            return ProposalOutcome::Duplicate(id);
        }
        if !diff.is_valid() {
            warn!(diff_id = %id, codes = ?diff.validation().errors, "invalid suggestion");
            return match self.policy {
                InvalidDiffPolicy::Report => ProposalOutcome::Invalid(diff),
                InvalidDiffPolicy::Drop => ProposalOutcome::Dropped(id),
            };
        }
        if self.synced && !self.text.contains(original) {
            warn!(diff_id = %id, "original span not in mirrored text");
            return ProposalOutcome::NotInDocument(diff);
        }

        info!(diff_id = %id, summary = diff.summary(), "forwarding suggestion");
        self.proposed.insert(id);
        self.outbox.push(SyncMessage::DiffProposal { diff: diff.clone() });
        ProposalOutcome::Forwarded(diff)
    }

    /// Queue the spoken form of a turn. Returns `false` for a turn already sent.
    pub fn utter(&mut self, text: impl Into<String>, turn_id: impl Into<String>) -> bool {
        let turn_id = turn_id.into();
        if !self.spoken.insert(turn_id.clone()) {
            return false;
        }
        self.outbox.push(SyncMessage::AgentUtterance {
            text: text.into(),
            turn_id,
        });
        true
    }

    /// Apply one inbound message from the editor.
    pub fn handle(&mut self, msg: SyncMessage) -> SyncEffect {
        match msg {
            SyncMessage::DocumentUpdate { text, version } => {
                if self.synced && version == self.version && text == self.text {
                    return SyncEffect::Duplicate;
                }
                if self.synced && version < self.version {
                    debug!(version, current = self.version, "ignoring out-of-date update");
                    return SyncEffect::Ignored;
                }
                self.text = text;
                self.version = version;
                self.synced = true;
                debug!(version, "mirror updated");
                SyncEffect::Updated { version }
            }
            SyncMessage::DiffResolution {
                diff_id,
                resolution,
            } => {
                if resolution == Resolution::Stale {
                    info!(diff_id = %diff_id, "suggestion no longer matched the story");
                }
                self.resolutions.insert(diff_id.clone(), resolution);
                SyncEffect::Resolved {
                    diff_id,
                    resolution,
                }
            }
            other => {
                warn!(kind = other.kind(), "agent ignoring message meant for the editor");
                SyncEffect::Ignored
            }
        }
    }

    /// Channel dropped: the mirror may now be behind.
    pub fn on_disconnect(&mut self) {
        self.synced = false;
    }

    /// Channel back: ask for a fresh copy before anything else goes out.
    pub fn on_reconnect(&mut self) {
        self.synced = false;
        self.outbox.insert(0, SyncMessage::ResyncRequest);
    }

    pub fn flush(&mut self) -> Vec<SyncMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Put back messages the transport failed to deliver, in order.
    pub fn requeue(&mut self, mut unsent: Vec<SyncMessage>) {
        unsent.retain(|m| !matches!(m, SyncMessage::ResyncRequest));
        unsent.append(&mut self.outbox);
        self.outbox = unsent;
    }
}
