//! Editor/agent synchronization.
//!
//! Two peers, no arbiter. The editor owns the authoritative
//! [`DocumentState`](crate::document::DocumentState); the agent keeps a
//! read-only mirror that is only ever a cache. Both sides are plain state
//! machines ([`EditorSession`], [`AgentMirror`]) driven by a single-task
//! loop per peer ([`run_editor_peer`], [`run_agent_peer`]) that talks to the
//! other side through a [`SyncTransport`].

pub mod agent;
pub mod editor;
pub mod message;
pub mod peer;
pub mod transport;

pub use agent::{AgentMirror, MirrorSnapshot, ProposalOutcome};
pub use editor::{EditorSession, EditorSnapshot, Utterance};
pub use message::{Resolution, SyncMessage};
pub use peer::{
    AgentCommand, EditorCommand, FlushHint, PeerEvent, PeerHandle, SyncPeer, run_agent_peer,
    run_editor_peer,
};
pub use transport::{MemoryTransport, SyncTransport, memory_transport_pair};

use crate::diff::DiffId;

/// What handling one inbound message did to the receiving peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEffect {
    /// Mirror replaced with the editor's text at this version.
    Updated { version: u64 },
    /// Already seen; nothing changed.
    Duplicate,
    /// New suggestion added to the pending queue.
    Queued { id: DiffId },
    /// Suggestion failed validation on arrival and was not queued.
    Rejected { id: DiffId },
    /// Transcript entry added or replaced.
    TranscriptUpdated { turn_id: String },
    /// The other side asked for a fresh `DocumentUpdate`.
    ResyncRequested,
    /// The editor reported what happened to a suggestion.
    Resolved {
        diff_id: DiffId,
        resolution: Resolution,
    },
    /// Message not meant for this peer, or an out-of-date update.
    Ignored,
}
