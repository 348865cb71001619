//! Peer manager: connection lifecycle, discovery, and block relay
//!
//! The peer map is shared between the accept loop and per-connection
//! tasks; relay fan-out takes a stable snapshot of it so no lock is held
//! during I/O. Inbound block and request traffic is surfaced to the node
//! through one bounded event channel.

use crate::error::{NetError, Result};
use crate::message::{Message, MessageCodec, VersionPayload, PROTOCOL_VERSION};
use crate::peer::{Peer, PeerState};
use dashmap::{DashMap, DashSet};
use futures::{SinkExt, StreamExt};
use lattice_types::{Block, Hash256};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,

    /// Per-peer outbound queue depth.
    pub outbound_queue: usize,

    /// Node event channel depth.
    pub event_queue: usize,

    /// Fixed node identity; `None` draws a random one. Fixing it is for
    /// tests exercising the duplicate-connection policy.
    pub identity: Option<u64>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            outbound_queue: 64,
            event_queue: 256,
            identity: None,
        }
    }
}

/// Traffic surfaced to the node.
#[derive(Debug)]
pub enum NetEvent {
    BlockReceived { block: Block, from: SocketAddr },
    LevelSetReceived { blocks: Vec<Block>, from: SocketAddr },
    BlockRequested { hash: Hash256, from: SocketAddr },
    LevelSetRequested { hash: Hash256, from: SocketAddr },
    PeerConnected { addr: SocketAddr },
    PeerDisconnected { addr: SocketAddr },
}

/// A block queued for dissemination, carrying its one-shot broadcast
/// flag. The flag looks like a counter but only its zero/non-zero state
/// matters: non-zero means "still needs broadcast", zero means this node
/// has already broadcast the block once and never will again.
pub struct RelayBlock {
    block: Arc<Block>,
    pending: AtomicU64,
}

impl RelayBlock {
    pub fn new(block: Arc<Block>) -> RelayBlock {
        RelayBlock {
            block,
            pending: AtomicU64::new(1),
        }
    }

    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn set_pending(&self, n: u64) {
        self.pending.store(n, Ordering::SeqCst);
    }
}

pub struct PeerManager {
    config: NetConfig,
    identity: u64,
    best_height: AtomicU64,

    bind_ip: RwLock<Option<IpAddr>>,
    listen_addr: RwLock<Option<SocketAddr>>,

    peers: DashMap<SocketAddr, Arc<Peer>>,

    /// Addresses learned through `Addr` gossip, for discovery.
    known_addresses: DashSet<SocketAddr>,

    events: mpsc::Sender<NetEvent>,
    cancel: CancellationToken,
}

impl PeerManager {
    pub fn new(config: NetConfig) -> (Arc<PeerManager>, mpsc::Receiver<NetEvent>) {
        let (events, rx) = mpsc::channel(config.event_queue);
        let identity = config.identity.unwrap_or_else(rand::random);
        let manager = Arc::new(PeerManager {
            config,
            identity,
            best_height: AtomicU64::new(0),
            bind_ip: RwLock::new(None),
            listen_addr: RwLock::new(None),
            peers: DashMap::new(),
            known_addresses: DashSet::new(),
            events,
            cancel: CancellationToken::new(),
        });
        (manager, rx)
    }

    /// Select the local interface for `listen`.
    pub fn bind(&self, ip: &str) -> Result<()> {
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| NetError::InvalidAddress(ip.to_string()))?;
        *self.bind_ip.write() = Some(ip);
        Ok(())
    }

    /// Start accepting inbound connections on the bound interface.
    /// Returns the actual listen address (relevant when port 0 is given).
    pub async fn listen(self: &Arc<Self>, port: u16) -> Result<SocketAddr> {
        let ip = (*self.bind_ip.read()).ok_or(NetError::NotBound)?;
        let listener = TcpListener::bind((ip, port)).await?;
        let local = listener.local_addr()?;
        *self.listen_addr.write() = Some(local);
        info!(%local, "listening for peers");

        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            debug!(%addr, "inbound connection");
                            let m = manager.clone();
                            tokio::spawn(m.run_connection(stream, addr, true));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        });
        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.read()
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }

    /// Advertised in our handshake.
    pub fn set_best_height(&self, height: u64) {
        self.best_height.store(height, Ordering::SeqCst);
    }

    /// Dial a remote peer. The handshake completes asynchronously;
    /// observe it through the event channel or the peer counts.
    pub async fn connect_to(self: &Arc<Self>, addr: &str) -> Result<SocketAddr> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| NetError::InvalidAddress(addr.to_string()))?;
        if self.peers.contains_key(&addr) {
            return Err(NetError::AlreadyConnected(addr));
        }

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetError::Connect(format!("{addr}: timed out")))?
            .map_err(|e| NetError::Connect(format!("{addr}: {e}")))?;

        let manager = self.clone();
        tokio::spawn(manager.run_connection(stream, addr, false));
        Ok(addr)
    }

    async fn run_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr, inbound: bool) {
        let (tx, mut rx) = mpsc::channel(self.config.outbound_queue);
        let cancel = self.cancel.child_token();
        let peer = Arc::new(Peer::new(addr, inbound, tx, cancel.clone()));
        self.peers.insert(addr, peer.clone());
        peer.set_state(PeerState::Handshaking);

        let mut framed = Framed::new(stream, MessageCodec);

        // The dialer opens the handshake.
        if !inbound {
            if let Err(e) = peer.send(self.version_message()) {
                warn!(%addr, error = %e, "failed to queue version");
            }
        }

        let handshake_deadline = tokio::time::sleep(self.config.handshake_timeout);
        tokio::pin!(handshake_deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut handshake_deadline, if !peer.is_fully_connected() => {
                    warn!(%addr, "handshake timed out");
                    break;
                }
                queued = rx.recv() => match queued {
                    Some(msg) => {
                        if let Err(e) = framed.send(msg).await {
                            debug!(%addr, error = %e, "write failed");
                            break;
                        }
                    }
                    None => break,
                },
                frame = framed.next() => match frame {
                    None => {
                        debug!(%addr, "peer closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        // Malformed wire data: drop this peer, others are
                        // unaffected.
                        warn!(%addr, error = %e, "protocol violation");
                        break;
                    }
                    Some(Ok(msg)) => {
                        if let Err(e) = self.handle_message(&peer, msg).await {
                            debug!(%addr, error = %e, "dropping peer");
                            break;
                        }
                    }
                },
            }
        }

        let was_connected = peer.is_fully_connected();
        peer.set_state(PeerState::Disconnected);
        self.peers.remove(&addr);
        if was_connected {
            let _ = self.events.try_send(NetEvent::PeerDisconnected { addr });
        }
        debug!(%addr, "connection closed");
    }

    fn version_message(&self) -> Message {
        Message::Version(VersionPayload {
            protocol_version: PROTOCOL_VERSION,
            identity: self.identity,
            best_height: self.best_height.load(Ordering::SeqCst),
        })
    }

    /// Messages are handled in receipt order within one connection.
    async fn handle_message(&self, peer: &Arc<Peer>, msg: Message) -> Result<()> {
        let from = peer.addr;
        match msg {
            Message::Version(payload) => {
                if payload.identity == self.identity {
                    return Err(NetError::Handshake("connected to self".into()));
                }
                // One fully-connected session per remote identity; more
                // connections from the same IP with distinct identities
                // are fine.
                let duplicate = self.peers.iter().any(|entry| {
                    entry.key() != &from && entry.value().identity() == Some(payload.identity)
                });
                if duplicate {
                    return Err(NetError::Handshake(format!(
                        "duplicate connection for identity {:#x}",
                        payload.identity
                    )));
                }
                peer.set_identity(payload.identity);
                if peer.inbound {
                    peer.send(self.version_message())?;
                }
                peer.send(Message::VerAck)?;
            }
            Message::VerAck => {
                peer.set_state(PeerState::FullyConnected);
                debug!(addr = %from, "peer fully connected");
                let _ = self.events.try_send(NetEvent::PeerConnected { addr: from });
            }
            Message::Ping(nonce) => peer.send(Message::Pong(nonce))?,
            Message::Pong(_) => {}
            Message::Block(block) => {
                self.forward(NetEvent::BlockReceived { block, from }).await;
            }
            Message::LevelSet(blocks) => {
                self.forward(NetEvent::LevelSetReceived { blocks, from }).await;
            }
            Message::GetBlock(hash) => {
                self.forward(NetEvent::BlockRequested { hash, from }).await;
            }
            Message::GetLevelSet(hash) => {
                self.forward(NetEvent::LevelSetRequested { hash, from }).await;
            }
            Message::GetAddr => {
                let addrs: Vec<SocketAddr> = self.known_addresses.iter().map(|a| *a).collect();
                peer.send(Message::Addr(addrs))?;
            }
            Message::Addr(addrs) => {
                for addr in addrs {
                    self.known_addresses.insert(addr);
                }
            }
        }
        Ok(())
    }

    /// Deliver an event to the node, applying backpressure to this peer's
    /// connection only.
    async fn forward(&self, event: NetEvent) {
        if self.events.send(event).await.is_err() {
            debug!("node event channel closed");
        }
    }

    /// Relay a block to every fully-connected peer except `excluded`,
    /// at most once per block for the lifetime of this node.
    ///
    /// With no eligible peers the pending flag is left untouched so a
    /// later call can still broadcast; once a send happens the flag is
    /// cleared atomically and every further call is a no-op, regardless
    /// of how many peers received it.
    pub fn relay_block(&self, relay: &RelayBlock, excluded: Option<&SocketAddr>) {
        if relay.pending() == 0 {
            return;
        }
        let targets: Vec<Arc<Peer>> = self
            .peers
            .iter()
            .filter(|entry| {
                entry.value().is_fully_connected() && Some(entry.key()) != excluded
            })
            .map(|entry| entry.value().clone())
            .collect();
        if targets.is_empty() {
            return;
        }
        // The admission path and relay dispatch may race here; exactly
        // one caller wins the transition to zero and sends.
        if relay.pending.swap(0, Ordering::SeqCst) == 0 {
            return;
        }
        debug!(peers = targets.len(), "relaying block");
        for peer in targets {
            if let Err(e) = peer.send(Message::Block((*relay.block).clone())) {
                warn!(addr = %peer.addr, error = %e, "relay send failed");
            }
        }
    }

    /// Queue a message to one peer.
    pub fn send_to(&self, addr: &SocketAddr, msg: Message) -> Result<()> {
        let peer = self
            .peers
            .get(addr)
            .ok_or(NetError::PeerNotFound(*addr))?;
        peer.send(msg)
    }

    /// Uniform sample without replacement of fully-connected peers, for
    /// gossip fanout. Returns fewer than `n` when fewer peers exist.
    pub fn randomly_select(&self, n: usize) -> Vec<SocketAddr> {
        let addrs: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|e| e.value().is_fully_connected())
            .map(|e| *e.key())
            .collect();
        let mut rng = rand::thread_rng();
        addrs.choose_multiple(&mut rng, n).copied().collect()
    }

    pub fn fully_connected_count(&self) -> usize {
        self.peers
            .iter()
            .filter(|e| e.value().is_fully_connected())
            .count()
    }

    /// All tracked connections, whatever their state.
    pub fn connected_count(&self) -> usize {
        self.peers.len()
    }

    pub fn disconnect_peer(&self, addr: &SocketAddr) -> bool {
        match self.peers.get(addr) {
            Some(peer) => {
                peer.disconnect();
                true
            }
            None => false,
        }
    }

    pub fn disconnect_all_peers(&self) {
        for entry in self.peers.iter() {
            entry.value().disconnect();
        }
    }

    pub fn clear_peers(&self) {
        self.peers.clear();
    }

    /// Tear down the listener and every connection. Idempotent.
    pub fn stop(&self) {
        info!("stopping peer manager");
        self.disconnect_all_peers();
        self.cancel.cancel();
        self.clear_peers();
    }
}

impl Drop for PeerManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
