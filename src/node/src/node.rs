//! Node orchestration: wires the store, DAG, and peer manager together
//! and drives them from the network event stream.

use crate::config::NodeConfig;
use crate::control::{MemoryWallet, Miner, NoopMiner, Wallet};
use anyhow::{Context, Result};
use lattice_dag::{Admission, DagManager, LevelSetPersistence};
use lattice_net::{Message, NetEvent, PeerManager, RelayBlock};
use lattice_store::{BlockLocation, LevelSetStore, StoreError};
use lattice_types::{Block, Ed25519Scheme};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared handles for every subsystem. Collaborators receive this
/// explicitly; nothing reaches for global state.
pub struct NodeContext {
    pub config: NodeConfig,
    pub store: Arc<LevelSetStore>,
    pub dag: Arc<DagManager>,
    pub peers: Arc<PeerManager>,
    pub wallet: Arc<dyn Wallet>,
    pub miner: Arc<dyn Miner>,

    /// Cancelled exactly once, by whoever initiates shutdown.
    pub shutdown: CancellationToken,

    /// Accepted blocks whose relay found no eligible peer yet, with the
    /// peer each came from. Broadcast on the next completed handshake.
    unrelayed: Mutex<Vec<(Arc<RelayBlock>, Option<SocketAddr>)>>,
}

pub struct Node {
    context: Arc<NodeContext>,
    events: mpsc::Receiver<NetEvent>,
}

impl Node {
    /// Wire up a node with the default collaborators: an in-memory
    /// wallet and a miner that produces nothing.
    pub fn init(config: NodeConfig) -> Result<Node> {
        Node::init_with(
            config,
            Arc::new(MemoryWallet::new()),
            Arc::new(NoopMiner::default()),
        )
    }

    pub fn init_with(
        config: NodeConfig,
        wallet: Arc<dyn Wallet>,
        miner: Arc<dyn Miner>,
    ) -> Result<Node> {
        std::fs::create_dir_all(config.data_dir()).context("failed to create data directory")?;

        let store = Arc::new(
            LevelSetStore::open(config.store_config()).context("failed to open level-set store")?,
        );
        info!(path = ?config.storage_path(), level_sets = store.level_set_count(), "store opened");

        let persistence: Arc<dyn LevelSetPersistence> = store.clone();
        let dag = Arc::new(DagManager::new(
            persistence,
            Arc::new(Ed25519Scheme),
            config.dag_params(),
        ));
        info!(head = %dag.milestone_head().hash, "dag initialized");

        let (peers, events) = PeerManager::new(config.net_config());

        let context = Arc::new(NodeContext {
            config,
            store,
            dag,
            peers,
            wallet,
            miner,
            shutdown: CancellationToken::new(),
            unrelayed: Mutex::new(Vec::new()),
        });
        Ok(Node { context, events })
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.context
    }

    /// Start listening, dial configured peers, and process network
    /// events until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        let ctx = &self.context;

        ctx.peers.bind(&ctx.config.network.bind_ip)?;
        let local = ctx.peers.listen(ctx.config.network.port).await?;
        info!(%local, "node listening");

        for address in &ctx.config.network.connect {
            if let Err(e) = ctx.peers.connect_to(address).await {
                warn!(address, error = %e, "initial peer dial failed");
            }
        }

        if ctx.config.miner.enabled {
            ctx.miner.start();
            info!("miner started");
        }

        // Confirmations drive the height we advertise in handshakes.
        let confirmations = ctx.dag.subscribe();
        tokio::spawn(Self::track_confirmations(ctx.clone(), confirmations));

        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.context.handle_event(event).await,
                    None => break,
                },
            }
        }

        self.shutdown();
        Ok(())
    }

    pub fn shutdown(&self) {
        info!("shutting down");
        self.context.miner.stop();
        self.context.peers.stop();
        self.context.shutdown.cancel();
    }

    async fn track_confirmations(
        ctx: Arc<NodeContext>,
        mut rx: mpsc::Receiver<lattice_dag::LevelSetConfirmed>,
    ) {
        while let Some(confirmed) = rx.recv().await {
            ctx.peers.set_best_height(confirmed.milestone.height);
            info!(
                height = confirmed.milestone.height,
                milestone = %confirmed.milestone.hash,
                blocks = confirmed.confirmed.len(),
                "level set confirmed"
            );
        }
    }
}

impl NodeContext {
    async fn handle_event(&self, event: NetEvent) {
        match event {
            NetEvent::BlockReceived { block, from } => {
                self.admit_block(block, Some(from));
            }
            NetEvent::LevelSetReceived { blocks, from } => {
                debug!(count = blocks.len(), %from, "level set received");
                // Synced history: admit in order, never relay.
                for block in blocks {
                    if let Err(e) = self.dag.add_vertex(block) {
                        debug!(%from, error = %e, "synced block rejected");
                    }
                }
            }
            NetEvent::BlockRequested { hash, from } => {
                self.serve(from, self.lookup_block(&hash).map(Message::Block), &hash);
            }
            NetEvent::LevelSetRequested { hash, from } => {
                self.serve(
                    from,
                    self.store.get_level_set(&hash).map(Message::LevelSet),
                    &hash,
                );
            }
            NetEvent::PeerConnected { addr } => {
                info!(%addr, "peer connected");
                self.retry_unrelayed();
            }
            NetEvent::PeerDisconnected { addr } => info!(%addr, "peer disconnected"),
        }
    }

    /// Admit a block into the DAG and, when it is new to us, relay it to
    /// everyone except the peer it came from.
    pub fn admit_block(&self, block: Block, from: Option<SocketAddr>) {
        let relay_copy = Arc::new(block.clone());
        match self.dag.add_vertex(block) {
            Ok(Admission::Accepted { milestone }) => {
                debug!(milestone, "block accepted");
                let relay = Arc::new(RelayBlock::new(relay_copy));
                self.peers.relay_block(&relay, from.as_ref());
                if relay.pending() != 0 {
                    // Nobody eligible to hear about it yet; hold the
                    // broadcast rather than forfeit it.
                    self.unrelayed.lock().push((relay, from));
                }
            }
            Ok(Admission::AlreadyKnown) => debug!("duplicate block ignored"),
            Ok(Admission::Orphaned) => debug!("block orphaned pending ancestors"),
            Err(e) => warn!(error = %e, "block rejected"),
        }
    }

    /// Broadcast blocks whose relay found no eligible peer when they
    /// were admitted. Each still goes out at most once.
    fn retry_unrelayed(&self) {
        let mut held = self.unrelayed.lock();
        held.retain(|(relay, from)| {
            self.peers.relay_block(relay, from.as_ref());
            relay.pending() != 0
        });
    }

    /// Find a block in the DAG's live cache or on disk. Unconfirmed
    /// blocks are servable too; only unknown identifiers miss.
    fn lookup_block(&self, hash: &lattice_types::Hash256) -> std::result::Result<Block, StoreError> {
        let location = self
            .dag
            .get_block(hash)
            .map(BlockLocation::Memory)
            .or_else(|| self.store.locate(hash))
            .ok_or(StoreError::NotFound)?;
        self.store.resolve(&location)
    }

    fn serve(
        &self,
        to: SocketAddr,
        reply: std::result::Result<Message, StoreError>,
        hash: &lattice_types::Hash256,
    ) {
        match reply {
            Ok(msg) => {
                if let Err(e) = self.peers.send_to(&to, msg) {
                    debug!(%to, error = %e, "failed to answer request");
                }
            }
            Err(StoreError::NotFound) => debug!(%to, %hash, "requested data not stored"),
            Err(e) => warn!(%to, %hash, error = %e, "store lookup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use lattice_net::NetConfig;
    use lattice_types::{BlockHeader, Hash256};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_node(dir: &TempDir) -> Node {
        let mut config = NodeConfig::default();
        config.node.data_dir = dir.path().to_path_buf();
        config.storage.sync_writes = false;
        Node::init(config).unwrap()
    }

    fn candidate(node: &Node) -> Block {
        let head = node.context().dag.milestone_head();
        let mut block = Block::new(
            BlockHeader {
                version: 1,
                milestone_hash: head.hash,
                prev_hash: head.hash,
                tip_hash: head.hash,
                merkle_root: Hash256::ZERO,
                time: head.time + 10,
                bits: head.snapshot.block_bits,
                nonce: 7,
            },
            Vec::new(),
        );
        block.seal().unwrap();
        block
    }

    #[tokio::test]
    async fn init_builds_a_genesis_head() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir);
        assert_eq!(node.context().dag.milestone_head().height, 0);
        assert_eq!(node.context().store.level_set_count(), 0);
    }

    #[tokio::test]
    async fn admitted_blocks_reach_the_store() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir);
        let block = candidate(&node);
        let hash = block.hash().unwrap();

        node.context().admit_block(block, None);

        // Default difficulty confirms every vertex as a milestone.
        assert!(node.context().store.contains(&hash));
        assert_eq!(node.context().dag.milestone_head().height, 1);
    }

    #[tokio::test]
    async fn blocks_admitted_without_peers_relay_on_first_connection() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir);
        let ctx = node.context();
        let block = candidate(&node);
        let hash = block.hash().unwrap();

        // No peers yet: the broadcast is held, not forfeited.
        ctx.admit_block(block, None);
        assert_eq!(ctx.unrelayed.lock().len(), 1);

        ctx.peers.bind("127.0.0.1").unwrap();
        let local = ctx.peers.listen(0).await.unwrap();
        let (remote, mut remote_events) = PeerManager::new(NetConfig::default());
        remote.bind("127.0.0.1").unwrap();
        remote.connect_to(&local.to_string()).await.unwrap();
        for _ in 0..200 {
            if ctx.peers.fully_connected_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let peer = ctx.peers.randomly_select(1)[0];

        ctx.handle_event(NetEvent::PeerConnected { addr: peer }).await;
        assert!(ctx.unrelayed.lock().is_empty());

        let received = loop {
            match tokio::time::timeout(Duration::from_secs(2), remote_events.recv())
                .await
                .expect("relay delivered")
                .expect("event stream open")
            {
                NetEvent::BlockReceived { block, .. } => break block,
                _ => continue,
            }
        };
        assert_eq!(received.hash().unwrap(), hash);
    }

    #[tokio::test]
    async fn restart_reopens_persisted_history() {
        let dir = TempDir::new().unwrap();
        let hash;
        {
            let node = test_node(&dir);
            let block = candidate(&node);
            hash = block.hash().unwrap();
            node.context().admit_block(block, None);
            node.shutdown();
        }

        let node = test_node(&dir);
        assert!(node.context().store.contains(&hash));
        assert_eq!(node.context().store.get_block(&hash).unwrap().hash().unwrap(), hash);
    }
}
