//! Single-task peer loops.
//!
//! Each peer owns its state outright and runs one `tokio::select!` loop over
//! local commands, inbound frames and (for the editor) a debounce timer. No
//! locks: the only way in is the command channel, the only way out is the
//! transport and the [`PeerEvent`] broadcast.

use super::agent::{AgentMirror, MirrorSnapshot, ProposalOutcome};
use super::editor::{EditorSession, EditorSnapshot};
use super::transport::SyncTransport;
use super::{SyncEffect, SyncMessage};
use crate::config::SyncConfig;
use crate::diff::DiffId;
use crate::error::{ApplyError, Result, StoryError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// When a local command wants its outbound messages sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushHint {
    Now,
    /// Wait for a quiet period so bursts collapse into one message.
    Debounce,
    /// Nothing to send.
    Skip,
}

/// Observable activity of a peer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Inbound(SyncEffect),
    Sent { kind: &'static str },
    Disconnected,
    Reconnected,
    DecodeFailed { error: String },
}

/// State machine a peer loop can drive.
pub trait SyncPeer: Send + 'static {
    type Command: Send + 'static;

    /// Log label.
    const ROLE: &'static str;

    fn command(&mut self, command: Self::Command) -> FlushHint;
    fn handle(&mut self, message: SyncMessage) -> SyncEffect;
    fn take_outbound(&mut self) -> Vec<SyncMessage>;
    fn restore_outbound(&mut self, unsent: Vec<SyncMessage>);
    fn on_disconnect(&mut self);
    fn on_reconnect(&mut self);
}

/// Local requests to the editor peer.
#[derive(Debug)]
pub enum EditorCommand {
    Edit {
        text: String,
    },
    Accept {
        diff_id: DiffId,
        reply: oneshot::Sender<std::result::Result<u64, ApplyError>>,
    },
    Reject {
        diff_id: DiffId,
        reply: oneshot::Sender<std::result::Result<(), ApplyError>>,
    },
    Snapshot {
        reply: oneshot::Sender<EditorSnapshot>,
    },
}

/// Local requests to the agent peer.
#[derive(Debug)]
pub enum AgentCommand {
    Propose {
        original: String,
        proposed: String,
        explanation: String,
        reply: oneshot::Sender<ProposalOutcome>,
    },
    Utter {
        text: String,
        turn_id: String,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<MirrorSnapshot>,
    },
}

impl SyncPeer for EditorSession {
    type Command = EditorCommand;
    const ROLE: &'static str = "editor";

    fn command(&mut self, command: EditorCommand) -> FlushHint {
        match command {
            EditorCommand::Edit { text } => {
                self.local_edit(text);
                FlushHint::Debounce
            }
            EditorCommand::Accept { diff_id, reply } => {
                let _ = reply.send(self.accept(&diff_id));
                FlushHint::Now
            }
            EditorCommand::Reject { diff_id, reply } => {
                let _ = reply.send(self.reject(&diff_id));
                FlushHint::Now
            }
            EditorCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
                FlushHint::Skip
            }
        }
    }

    fn handle(&mut self, message: SyncMessage) -> SyncEffect {
        EditorSession::handle(self, message)
    }

    fn take_outbound(&mut self) -> Vec<SyncMessage> {
        self.flush()
    }

    fn restore_outbound(&mut self, unsent: Vec<SyncMessage>) {
        self.requeue(unsent);
    }

    fn on_disconnect(&mut self) {}

    fn on_reconnect(&mut self) {
        EditorSession::on_reconnect(self);
    }
}

impl SyncPeer for AgentMirror {
    type Command = AgentCommand;
    const ROLE: &'static str = "agent";

    fn command(&mut self, command: AgentCommand) -> FlushHint {
        match command {
            AgentCommand::Propose {
                original,
                proposed,
                explanation,
                reply,
            } => {
                let _ = reply.send(self.propose(&original, &proposed, &explanation));
                FlushHint::Now
            }
            AgentCommand::Utter {
                text,
                turn_id,
                reply,
            } => {
                let _ = reply.send(self.utter(text, turn_id));
                FlushHint::Now
            }
            AgentCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
                FlushHint::Skip
            }
        }
    }

    fn handle(&mut self, message: SyncMessage) -> SyncEffect {
        AgentMirror::handle(self, message)
    }

    fn take_outbound(&mut self) -> Vec<SyncMessage> {
        self.flush()
    }

    fn restore_outbound(&mut self, unsent: Vec<SyncMessage>) {
        self.requeue(unsent);
    }

    fn on_disconnect(&mut self) {
        AgentMirror::on_disconnect(self);
    }

    fn on_reconnect(&mut self) {
        AgentMirror::on_reconnect(self);
    }
}

enum DriverCommand<C> {
    Local(C),
    Connect(Box<dyn SyncTransport>),
    Disconnect,
    Shutdown,
}

/// Cloneable handle to a running peer loop.
pub struct PeerHandle<P: SyncPeer> {
    command_tx: mpsc::Sender<DriverCommand<P::Command>>,
    event_tx: broadcast::Sender<PeerEvent>,
}

impl<P: SyncPeer> Clone for PeerHandle<P> {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<P: SyncPeer> PeerHandle<P> {
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.event_tx.subscribe()
    }

    /// Attach a (new) transport, replacing any current one.
    pub async fn connect(&self, transport: impl SyncTransport) -> Result<()> {
        self.send(DriverCommand::Connect(Box::new(transport))).await
    }

    /// Drop the current transport.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(DriverCommand::Disconnect).await
    }

    /// Stop the loop. The join handle yields the final peer state.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(DriverCommand::Shutdown).await
    }

    pub async fn command(&self, command: P::Command) -> Result<()> {
        self.send(DriverCommand::Local(command)).await
    }

    async fn request<R>(&self, build: impl FnOnce(oneshot::Sender<R>) -> P::Command) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        self.command(build(reply)).await?;
        rx.await
            .map_err(|e| StoryError::Channel(format!("{} peer dropped reply: {e}", P::ROLE)))
    }

    async fn send(&self, command: DriverCommand<P::Command>) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| StoryError::Channel(format!("{} peer loop has stopped", P::ROLE)))
    }
}

impl PeerHandle<EditorSession> {
    pub async fn edit(&self, text: impl Into<String>) -> Result<()> {
        self.command(EditorCommand::Edit { text: text.into() }).await
    }

    pub async fn accept(&self, diff_id: DiffId) -> Result<u64> {
        Ok(self
            .request(|reply| EditorCommand::Accept { diff_id, reply })
            .await??)
    }

    pub async fn reject(&self, diff_id: DiffId) -> Result<()> {
        Ok(self
            .request(|reply| EditorCommand::Reject { diff_id, reply })
            .await??)
    }

    pub async fn snapshot(&self) -> Result<EditorSnapshot> {
        self.request(|reply| EditorCommand::Snapshot { reply }).await
    }
}

impl PeerHandle<AgentMirror> {
    pub async fn propose(
        &self,
        original: impl Into<String>,
        proposed: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Result<ProposalOutcome> {
        self.request(|reply| AgentCommand::Propose {
            original: original.into(),
            proposed: proposed.into(),
            explanation: explanation.into(),
            reply,
        })
        .await
    }

    pub async fn utter(&self, text: impl Into<String>, turn_id: impl Into<String>) -> Result<bool> {
        self.request(|reply| AgentCommand::Utter {
            text: text.into(),
            turn_id: turn_id.into(),
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<MirrorSnapshot> {
        self.request(|reply| AgentCommand::Snapshot { reply }).await
    }
}

/// Spawn the editor loop. The join handle yields the session on shutdown.
#[must_use]
pub fn run_editor_peer(
    session: EditorSession,
    transport: Option<Box<dyn SyncTransport>>,
    config: &SyncConfig,
) -> (PeerHandle<EditorSession>, JoinHandle<EditorSession>) {
    spawn_peer(session, transport, config)
}

/// Spawn the agent loop. The join handle yields the mirror on shutdown.
#[must_use]
pub fn run_agent_peer(
    mirror: AgentMirror,
    transport: Option<Box<dyn SyncTransport>>,
    config: &SyncConfig,
) -> (PeerHandle<AgentMirror>, JoinHandle<AgentMirror>) {
    spawn_peer(mirror, transport, config)
}

fn spawn_peer<P: SyncPeer>(
    peer: P,
    transport: Option<Box<dyn SyncTransport>>,
    config: &SyncConfig,
) -> (PeerHandle<P>, JoinHandle<P>) {
    let (command_tx, command_rx) = mpsc::channel(config.channel_capacity.max(1));
    let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
    let handle = PeerHandle {
        command_tx,
        event_tx: event_tx.clone(),
    };
    let task = tokio::spawn(drive(peer, transport, command_rx, event_tx, config.debounce()));
    (handle, task)
}

async fn drive<P: SyncPeer>(
    mut peer: P,
    mut transport: Option<Box<dyn SyncTransport>>,
    mut command_rx: mpsc::Receiver<DriverCommand<P::Command>>,
    events: broadcast::Sender<PeerEvent>,
    debounce: Duration,
) -> P {
    info!(role = P::ROLE, "sync peer started");
    let debounce_timer = tokio::time::sleep(debounce);
    tokio::pin!(debounce_timer);
    let mut debounce_armed = false;

    if transport.is_some() {
        peer.on_reconnect();
        flush(&mut peer, &mut transport, &events).await;
    }

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                None | Some(DriverCommand::Shutdown) => break,
                Some(DriverCommand::Local(command)) => match peer.command(command) {
                    FlushHint::Now => {
                        debounce_armed = false;
                        flush(&mut peer, &mut transport, &events).await;
                    }
                    FlushHint::Debounce => {
                        debounce_timer.as_mut().reset(Instant::now() + debounce);
                        debounce_armed = true;
                    }
                    FlushHint::Skip => {}
                },
                Some(DriverCommand::Connect(next)) => {
                    info!(role = P::ROLE, "transport connected");
                    transport = Some(next);
                    peer.on_reconnect();
                    let _ = events.send(PeerEvent::Reconnected);
                    flush(&mut peer, &mut transport, &events).await;
                }
                Some(DriverCommand::Disconnect) => {
                    if transport.take().is_some() {
                        disconnected(&mut peer, &events);
                    }
                }
            },
            frame = recv_from(&mut transport) => match frame {
                None => {
                    transport = None;
                    disconnected(&mut peer, &events);
                }
                Some(bytes) => match SyncMessage::decode(&bytes) {
                    Ok(message) => {
                        debug!(role = P::ROLE, kind = message.kind(), "inbound message");
                        let effect = peer.handle(message);
                        let _ = events.send(PeerEvent::Inbound(effect));
                        flush(&mut peer, &mut transport, &events).await;
                    }
                    Err(e) => {
                        warn!(role = P::ROLE, error = %e, "dropping undecodable frame");
                        let _ = events.send(PeerEvent::DecodeFailed { error: e.to_string() });
                    }
                },
            },
            () = &mut debounce_timer, if debounce_armed => {
                debounce_armed = false;
                flush(&mut peer, &mut transport, &events).await;
            }
        }
    }

    info!(role = P::ROLE, "sync peer stopped");
    peer
}

async fn recv_from(transport: &mut Option<Box<dyn SyncTransport>>) -> Option<Vec<u8>> {
    match transport {
        Some(t) => t.recv().await,
        None => std::future::pending().await,
    }
}

fn disconnected<P: SyncPeer>(peer: &mut P, events: &broadcast::Sender<PeerEvent>) {
    warn!(role = P::ROLE, "sync channel disconnected");
    peer.on_disconnect();
    let _ = events.send(PeerEvent::Disconnected);
}

/// Send everything the peer has queued. While disconnected, messages stay
/// with the peer until the next connect.
async fn flush<P: SyncPeer>(
    peer: &mut P,
    transport: &mut Option<Box<dyn SyncTransport>>,
    events: &broadcast::Sender<PeerEvent>,
) {
    let Some(t) = transport.as_mut() else {
        return;
    };
    let mut outbound = peer.take_outbound().into_iter();
    let mut unsent = None;
    while let Some(message) = outbound.next() {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(role = P::ROLE, error = %e, "dropping unencodable message");
                continue;
            }
        };
        if let Err(e) = t.send(frame).await {
            warn!(role = P::ROLE, error = %e, "send failed");
            let mut rest = vec![message];
            rest.extend(outbound);
            unsent = Some(rest);
            break;
        }
        let _ = events.send(PeerEvent::Sent {
            kind: message.kind(),
        });
    }

    if let Some(rest) = unsent {
        peer.restore_outbound(rest);
        *transport = None;
        disconnected(peer, events);
    }
}
