//! Byte transport between peers.
//!
//! The real-time platform supplies an ordered message channel; the core only
//! needs `send(bytes)` and a receive side. `recv` returning `None` means the
//! channel dropped and the peer must resynchronize after reconnecting.

use crate::error::{Result, StoryError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Ordered, at-least-once byte channel to the other peer.
#[async_trait]
pub trait SyncTransport: Send + 'static {
    /// Send one message frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<()>;

    /// Next inbound frame, or `None` once the channel is gone.
    async fn recv(&mut self) -> Option<Vec<u8>>;
}

/// In-process transport half backed by `tokio::sync::mpsc`.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

/// Build two connected transport halves.
#[must_use]
pub fn memory_transport_pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
    (
        MemoryTransport { tx: a_tx, rx: a_rx },
        MemoryTransport { tx: b_tx, rx: b_rx },
    )
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| StoryError::Channel("sync channel disconnected".to_owned()))
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}
