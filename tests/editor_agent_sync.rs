//! End-to-end editor/agent synchronization over in-memory transports.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;
use std::time::Duration;
use storyva::config::{InvalidDiffPolicy, SyncConfig};
use storyva::diff;
use storyva::document::DocumentState;
use storyva::sync::{
    AgentMirror, EditorSession, PeerEvent, ProposalOutcome, Resolution, SyncEffect, SyncMessage,
    SyncTransport, memory_transport_pair, run_agent_peer, run_editor_peer,
};
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> SyncConfig {
    SyncConfig {
        debounce_ms: 10,
        ..SyncConfig::default()
    }
}

/// Poll `check` until it returns true or the wait budget runs out.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<PeerEvent>,
    wanted: impl Fn(&PeerEvent) -> bool,
) -> PeerEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not seen in time")
}

#[tokio::test]
async fn agent_proposal_becomes_pending_and_accept_updates_mirror() {
    let config = fast_config();
    let (editor_end, agent_end) = memory_transport_pair(16);
    let (editor, editor_task) = run_editor_peer(
        EditorSession::new(DocumentState::seeded("I can't do this. Go.")),
        Some(Box::new(editor_end)),
        &config,
    );
    let (agent, agent_task) = run_agent_peer(
        AgentMirror::new(InvalidDiffPolicy::Report),
        Some(Box::new(agent_end)),
        &config,
    );

    let (a, e) = (&agent, &editor);
    eventually(move || async move { a.snapshot().await.unwrap().synced }).await;

    let outcome = agent
        .propose("I can't do this.", "(sad) I can't do this.", "grief")
        .await
        .unwrap();
    let ProposalOutcome::Forwarded(diff) = outcome else {
        panic!("expected forwarded proposal, got {outcome:?}");
    };

    let id = diff.id();
    eventually(move || async move {
        e.snapshot()
            .await
            .unwrap()
            .document
            .pending(id)
            .is_some()
    })
    .await;

    let mut agent_events = agent.subscribe();
    let version = editor.accept(diff.id().clone()).await.unwrap();
    assert_eq!(version, 1);

    wait_for_event(&mut agent_events, |e| {
        matches!(e, PeerEvent::Inbound(SyncEffect::Resolved { .. }))
    })
    .await;
    assert_eq!(
        agent.snapshot().await.unwrap().text,
        "(sad) I can't do this. Go."
    );

    agent.shutdown().await.unwrap();
    editor.shutdown().await.unwrap();
    let mirror = agent_task.await.unwrap();
    assert_eq!(mirror.resolution(diff.id()), Some(Resolution::Applied));
    let session = editor_task.await.unwrap();
    assert!(session.state().pending_diffs().is_empty());
}

#[tokio::test]
async fn duplicate_proposal_frames_queue_once() {
    let (near, mut far) = memory_transport_pair(16);
    let (editor, _task) = run_editor_peer(
        EditorSession::new(DocumentState::seeded("Run.")),
        Some(Box::new(near)),
        &fast_config(),
    );
    let mut events = editor.subscribe();

    let frame = SyncMessage::DiffProposal {
        diff: diff::propose("Run.", "(scared) Run.", "fear"),
    }
    .encode()
    .unwrap();
    far.send(frame.clone()).await.unwrap();
    far.send(frame).await.unwrap();

    wait_for_event(&mut events, |e| {
        matches!(e, PeerEvent::Inbound(SyncEffect::Queued { .. }))
    })
    .await;
    wait_for_event(&mut events, |e| {
        *e == PeerEvent::Inbound(SyncEffect::Duplicate)
    })
    .await;

    let snapshot = editor.snapshot().await.unwrap();
    assert_eq!(snapshot.document.pending_diffs().len(), 1);
}

#[tokio::test]
async fn invalid_inbound_proposal_is_reported_back() {
    let (near, mut far) = memory_transport_pair(16);
    let (editor, _task) = run_editor_peer(
        EditorSession::new(DocumentState::seeded("I can't do this.")),
        Some(Box::new(near)),
        &fast_config(),
    );

    // Announcement of the seeded text comes first.
    let first = SyncMessage::decode(&far.recv().await.unwrap()).unwrap();
    assert!(matches!(first, SyncMessage::DocumentUpdate { version: 0, .. }));

    let bad = diff::propose("I can't do this.", "I can't (sad) do this.", "grief");
    let bad_id = bad.id().clone();
    far.send(SyncMessage::DiffProposal { diff: bad }.encode().unwrap())
        .await
        .unwrap();

    let reply = tokio::time::timeout(WAIT, far.recv()).await.unwrap().unwrap();
    assert_eq!(
        SyncMessage::decode(&reply).unwrap(),
        SyncMessage::DiffResolution {
            diff_id: bad_id,
            resolution: Resolution::Rejected,
        }
    );
    assert!(
        editor
            .snapshot()
            .await
            .unwrap()
            .document
            .pending_diffs()
            .is_empty()
    );
}

#[tokio::test]
async fn reconnect_brings_mirror_up_to_date() {
    let config = fast_config();
    let (editor_end, agent_end) = memory_transport_pair(16);
    let (editor, _editor_task) = run_editor_peer(
        EditorSession::new(DocumentState::seeded("Once upon a time.")),
        Some(Box::new(editor_end)),
        &config,
    );
    let (agent, _agent_task) = run_agent_peer(
        AgentMirror::new(InvalidDiffPolicy::Report),
        Some(Box::new(agent_end)),
        &config,
    );
    let (a, e) = (&agent, &editor);
    eventually(move || async move { a.snapshot().await.unwrap().synced }).await;

    let mut agent_events = agent.subscribe();
    editor.disconnect().await.unwrap();
    wait_for_event(&mut agent_events, |e| *e == PeerEvent::Disconnected).await;
    assert!(!agent.snapshot().await.unwrap().synced);

    editor.edit("Once upon a midnight.").await.unwrap();
    assert!(agent.utter("I'm still listening.", "turn-7").await.unwrap());

    let (editor_end, agent_end) = memory_transport_pair(16);
    editor.connect(editor_end).await.unwrap();
    agent.connect(agent_end).await.unwrap();

    eventually(move || async move {
        let snapshot = a.snapshot().await.unwrap();
        snapshot.synced && snapshot.version == 1
    })
    .await;
    assert_eq!(
        agent.snapshot().await.unwrap().text,
        "Once upon a midnight."
    );

    eventually(move || async move {
        e.snapshot()
            .await
            .unwrap()
            .transcript
            .iter()
            .any(|u| u.turn_id == "turn-7")
    })
    .await;
}
