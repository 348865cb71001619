//! Per-peer connection state
//!
//! Only `FullyConnected` peers participate in relay and peer counts.
//! State advances monotonically; a peer never re-enters an earlier state
//! on the same connection.

use crate::error::{NetError, Result};
use crate::message::Message;
use parking_lot::RwLock;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Handshaking,
    FullyConnected,
    Disconnecting,
    Disconnected,
}

pub struct Peer {
    pub addr: SocketAddr,

    /// True for connections we accepted, false for ones we dialed.
    pub inbound: bool,

    state: RwLock<PeerState>,

    /// Remote node identity learned during the handshake.
    identity: RwLock<Option<u64>>,

    /// Queue consumed by this peer's writer task.
    outbound: mpsc::Sender<Message>,

    /// Cancels this peer's reader and writer tasks.
    cancel: CancellationToken,
}

impl Peer {
    pub fn new(
        addr: SocketAddr,
        inbound: bool,
        outbound: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Peer {
        Peer {
            addr,
            inbound,
            state: RwLock::new(PeerState::Connecting),
            identity: RwLock::new(None),
            outbound,
            cancel,
        }
    }

    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    pub fn set_state(&self, state: PeerState) {
        *self.state.write() = state;
    }

    pub fn is_fully_connected(&self) -> bool {
        self.state() == PeerState::FullyConnected
    }

    pub fn identity(&self) -> Option<u64> {
        *self.identity.read()
    }

    pub fn set_identity(&self, identity: u64) {
        *self.identity.write() = Some(identity);
    }

    /// Queue a message for this peer. Non-blocking: a peer whose queue is
    /// full is slow, and a slow peer never stalls the caller.
    pub fn send(&self, msg: Message) -> Result<()> {
        self.outbound
            .try_send(msg)
            .map_err(|_| NetError::Closed)
    }

    /// Begin teardown: cancel the connection tasks.
    pub fn disconnect(&self) {
        self.set_state(PeerState::Disconnecting);
        self.cancel.cancel();
    }

    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> (Peer, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(4);
        let peer = Peer::new(
            "127.0.0.1:9000".parse().unwrap(),
            false,
            tx,
            CancellationToken::new(),
        );
        (peer, rx)
    }

    #[test]
    fn state_machine_transitions() {
        let (peer, _rx) = peer();
        assert_eq!(peer.state(), PeerState::Connecting);
        peer.set_state(PeerState::Handshaking);
        peer.set_state(PeerState::FullyConnected);
        assert!(peer.is_fully_connected());
        peer.disconnect();
        assert_eq!(peer.state(), PeerState::Disconnecting);
        assert!(peer.cancelled().is_cancelled());
    }

    #[test]
    fn send_queues_without_blocking() {
        let (peer, mut rx) = peer();
        peer.send(Message::Ping(1)).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), Message::Ping(1)));
    }

    #[test]
    fn full_queue_reports_closed_not_blocks() {
        let (peer, _rx) = peer();
        for i in 0..4 {
            peer.send(Message::Ping(i)).unwrap();
        }
        assert!(peer.send(Message::Ping(99)).is_err());
    }
}
