//! Operator control surface
//!
//! Commands return human-readable strings rather than structured errors;
//! the transport that carries them (console, RPC) is outside this crate.
//! Wallet and miner are collaborator traits so the node runs without
//! either, with guard wording matching a wallet that is absent, locked,
//! or unlocked.

use crate::node::NodeContext;
use async_trait::async_trait;
use lattice_types::{Hash256, Transaction, TxOutput};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Block production collaborator. Start/stop return false when the call
/// found the miner already in the requested state.
pub trait Miner: Send + Sync {
    fn start(&self) -> bool;
    fn stop(&self) -> bool;
    fn is_running(&self) -> bool;
}

/// Key and balance collaborator. A wallet is first set up with a
/// passphrase, then unlocked by login; key operations require both.
pub trait Wallet: Send + Sync {
    fn is_set_up(&self) -> bool;
    fn is_logged_in(&self) -> bool;

    /// First-time passphrase. False when the wallet already has one.
    fn set_passphrase(&self, passphrase: &str) -> bool;

    /// False when `old` does not match.
    fn change_passphrase(&self, old: &str, new: &str) -> bool;

    /// False when the passphrase does not match.
    fn login(&self, passphrase: &str) -> bool;

    fn generate_new_key(&self) -> Hash256;
    fn balance(&self) -> u64;

    /// None when funds are insufficient.
    fn create_transaction(&self, outputs: Vec<TxOutput>, fee: u64) -> Option<Transaction>;
}

#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn status(&self) -> String;
    async fn stop(&self) -> String;

    fn start_miner(&self) -> String;
    fn stop_miner(&self) -> String;

    async fn connect_peers(&self, addresses: Vec<String>) -> String;
    fn disconnect_peer(&self, address: &str) -> String;
    fn disconnect_all_peers(&self) -> String;

    fn create_tx(&self, outputs: Vec<(u64, Hash256)>, fee: u64) -> String;
    fn generate_new_key(&self) -> String;
    fn get_balance(&self) -> String;
    fn set_passphrase(&self, passphrase: &str) -> String;
    fn change_passphrase(&self, old: &str, new: &str) -> String;
    fn login(&self, passphrase: &str) -> String;
}

/// Miner that tracks the running flag and produces nothing.
#[derive(Default)]
pub struct NoopMiner {
    running: AtomicBool,
}

impl Miner for NoopMiner {
    fn start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct WalletState {
    passphrase: Option<String>,
    logged_in: bool,
    keys: Vec<Hash256>,
    balance: u64,
}

/// In-memory development wallet. Keys are random addresses; nothing is
/// persisted and no real funds exist.
pub struct MemoryWallet {
    state: Mutex<WalletState>,
}

impl MemoryWallet {
    pub fn new() -> MemoryWallet {
        MemoryWallet {
            state: Mutex::new(WalletState {
                passphrase: None,
                logged_in: false,
                keys: Vec::new(),
                balance: 0,
            }),
        }
    }

    pub fn credit(&self, amount: u64) {
        self.state.lock().balance += amount;
    }
}

impl Default for MemoryWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallet for MemoryWallet {
    fn is_set_up(&self) -> bool {
        self.state.lock().passphrase.is_some()
    }

    fn is_logged_in(&self) -> bool {
        self.state.lock().logged_in
    }

    fn set_passphrase(&self, passphrase: &str) -> bool {
        let mut state = self.state.lock();
        if state.passphrase.is_some() {
            return false;
        }
        state.passphrase = Some(passphrase.to_string());
        true
    }

    fn change_passphrase(&self, old: &str, new: &str) -> bool {
        let mut state = self.state.lock();
        if state.passphrase.as_deref() != Some(old) {
            return false;
        }
        state.passphrase = Some(new.to_string());
        true
    }

    fn login(&self, passphrase: &str) -> bool {
        let mut state = self.state.lock();
        if state.passphrase.as_deref() != Some(passphrase) {
            return false;
        }
        state.logged_in = true;
        true
    }

    fn generate_new_key(&self) -> Hash256 {
        let address = Hash256::digest(&rand::random::<[u8; 32]>());
        self.state.lock().keys.push(address);
        address
    }

    fn balance(&self) -> u64 {
        self.state.lock().balance
    }

    fn create_transaction(&self, outputs: Vec<TxOutput>, fee: u64) -> Option<Transaction> {
        let mut state = self.state.lock();
        let total: u64 = outputs.iter().map(|o| o.value).sum::<u64>() + fee;
        if state.balance < total {
            return None;
        }
        state.balance -= total;
        Some(Transaction::new(Vec::new(), outputs, fee))
    }
}

pub struct NodeControl {
    context: Arc<NodeContext>,
}

impl NodeControl {
    pub fn new(context: Arc<NodeContext>) -> NodeControl {
        NodeControl { context }
    }

    /// Guard shared by every wallet-touching command.
    fn wallet_ready(&self) -> Option<String> {
        if !self.context.wallet.is_set_up() {
            return Some("Please set up the wallet with a passphrase first".to_string());
        }
        if !self.context.wallet.is_logged_in() {
            return Some("Please log in to the wallet first".to_string());
        }
        None
    }
}

#[async_trait]
impl ControlApi for NodeControl {
    async fn status(&self) -> String {
        let head = self.context.dag.milestone_head();
        format!(
            "Latest milestone {} at height {}; miner {}; {} fully connected peers",
            head.hash,
            head.height,
            if self.context.miner.is_running() {
                "running"
            } else {
                "stopped"
            },
            self.context.peers.fully_connected_count(),
        )
    }

    async fn stop(&self) -> String {
        info!("shutdown requested through control interface");
        self.context.shutdown.cancel();
        "Stopping node".to_string()
    }

    fn start_miner(&self) -> String {
        if self.context.miner.start() {
            "Miner started".to_string()
        } else {
            "Miner is already running".to_string()
        }
    }

    fn stop_miner(&self) -> String {
        if self.context.miner.stop() {
            "Miner stopped".to_string()
        } else {
            "Miner is not running".to_string()
        }
    }

    async fn connect_peers(&self, addresses: Vec<String>) -> String {
        let mut report = Vec::with_capacity(addresses.len());
        for address in addresses {
            match self.context.peers.connect_to(&address).await {
                Ok(addr) => report.push(format!("Connecting to {addr}")),
                Err(e) => report.push(format!("Failed to connect to {address}: {e}")),
            }
        }
        report.join("\n")
    }

    fn disconnect_peer(&self, address: &str) -> String {
        let addr = match address.parse() {
            Ok(addr) => addr,
            Err(_) => return format!("Invalid address: {address}"),
        };
        if self.context.peers.disconnect_peer(&addr) {
            format!("Disconnected {addr}")
        } else {
            format!("Not connected to {addr}")
        }
    }

    fn disconnect_all_peers(&self) -> String {
        let count = self.context.peers.connected_count();
        self.context.peers.disconnect_all_peers();
        format!("Disconnecting {count} peers")
    }

    fn create_tx(&self, outputs: Vec<(u64, Hash256)>, fee: u64) -> String {
        if let Some(guard) = self.wallet_ready() {
            return guard;
        }
        if outputs.is_empty() {
            return "Invalid transaction: no outputs".to_string();
        }
        let outputs: Vec<TxOutput> = outputs
            .into_iter()
            .map(|(value, address)| TxOutput { value, address })
            .collect();
        match self.context.wallet.create_transaction(outputs, fee) {
            Some(tx) => match tx.hash() {
                Ok(hash) => format!("Created transaction {hash}"),
                Err(e) => format!("Failed to create transaction: {e}"),
            },
            None => "Insufficient funds".to_string(),
        }
    }

    fn generate_new_key(&self) -> String {
        if let Some(guard) = self.wallet_ready() {
            return guard;
        }
        format!("Generated new key {}", self.context.wallet.generate_new_key())
    }

    fn get_balance(&self) -> String {
        if let Some(guard) = self.wallet_ready() {
            return guard;
        }
        format!("Balance: {}", self.context.wallet.balance())
    }

    fn set_passphrase(&self, passphrase: &str) -> String {
        if self.context.wallet.set_passphrase(passphrase) {
            "Your passphrase has been set".to_string()
        } else {
            "The wallet already has a passphrase".to_string()
        }
    }

    fn change_passphrase(&self, old: &str, new: &str) -> String {
        if !self.context.wallet.is_set_up() {
            return "Please set up the wallet with a passphrase first".to_string();
        }
        if self.context.wallet.change_passphrase(old, new) {
            "Your passphrase has been updated".to_string()
        } else {
            "Wrong passphrase".to_string()
        }
    }

    fn login(&self, passphrase: &str) -> String {
        if !self.context.wallet.is_set_up() {
            return "Please set up the wallet with a passphrase first".to_string();
        }
        if self.context.wallet.login(passphrase) {
            "Login successful".to_string()
        } else {
            "Wrong passphrase".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::node::Node;
    use tempfile::TempDir;

    async fn control() -> (NodeControl, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = NodeConfig::default();
        config.node.data_dir = dir.path().to_path_buf();
        config.storage.sync_writes = false;
        let node = Node::init(config).unwrap();
        (NodeControl::new(node.context().clone()), dir)
    }

    #[tokio::test]
    async fn status_reports_genesis_head() {
        let (control, _dir) = control().await;
        let status = control.status().await;
        assert!(status.contains("at height 0"));
        assert!(status.contains("miner stopped"));
        assert!(status.contains("0 fully connected peers"));
    }

    #[tokio::test]
    async fn miner_start_stop_wording() {
        let (control, _dir) = control().await;
        assert_eq!(control.start_miner(), "Miner started");
        assert_eq!(control.start_miner(), "Miner is already running");
        assert_eq!(control.stop_miner(), "Miner stopped");
        assert_eq!(control.stop_miner(), "Miner is not running");
    }

    #[tokio::test]
    async fn wallet_guards_apply_in_order() {
        let (control, _dir) = control().await;

        assert_eq!(
            control.get_balance(),
            "Please set up the wallet with a passphrase first"
        );
        assert_eq!(
            control.login("secret"),
            "Please set up the wallet with a passphrase first"
        );

        assert_eq!(control.set_passphrase("secret"), "Your passphrase has been set");
        assert_eq!(
            control.set_passphrase("other"),
            "The wallet already has a passphrase"
        );
        assert_eq!(control.get_balance(), "Please log in to the wallet first");

        assert_eq!(control.login("wrong"), "Wrong passphrase");
        assert_eq!(control.login("secret"), "Login successful");
        assert_eq!(control.get_balance(), "Balance: 0");
    }

    #[tokio::test]
    async fn passphrase_change_requires_the_old_one() {
        let (control, _dir) = control().await;
        assert_eq!(
            control.change_passphrase("a", "b"),
            "Please set up the wallet with a passphrase first"
        );
        control.set_passphrase("a");
        assert_eq!(control.change_passphrase("x", "b"), "Wrong passphrase");
        assert_eq!(
            control.change_passphrase("a", "b"),
            "Your passphrase has been updated"
        );
        assert_eq!(control.login("b"), "Login successful");
    }

    #[tokio::test]
    async fn create_tx_guards_and_funds() {
        let (control, _dir) = control().await;
        control.set_passphrase("s");
        control.login("s");

        assert_eq!(
            control.create_tx(Vec::new(), 0),
            "Invalid transaction: no outputs"
        );
        assert_eq!(
            control.create_tx(vec![(10, Hash256::digest(b"addr"))], 1),
            "Insufficient funds"
        );
    }

    #[tokio::test]
    async fn funded_wallet_creates_a_transaction() {
        let dir = TempDir::new().unwrap();
        let mut config = NodeConfig::default();
        config.node.data_dir = dir.path().to_path_buf();
        config.storage.sync_writes = false;

        let wallet = Arc::new(MemoryWallet::new());
        wallet.credit(100);
        let node = Node::init_with(config, wallet.clone(), Arc::new(NoopMiner::default()))
            .unwrap();
        let control = NodeControl::new(node.context().clone());

        control.set_passphrase("s");
        control.login("s");
        let reply = control.create_tx(vec![(10, Hash256::digest(b"addr"))], 1);
        assert!(reply.starts_with("Created transaction "), "got: {reply}");
        assert_eq!(wallet.balance(), 89);
    }

    #[tokio::test]
    async fn generate_new_key_returns_an_address() {
        let (control, _dir) = control().await;
        control.set_passphrase("s");
        control.login("s");
        let reply = control.generate_new_key();
        assert!(reply.starts_with("Generated new key "), "got: {reply}");
    }

    #[tokio::test]
    async fn disconnect_unknown_peer_wording() {
        let (control, _dir) = control().await;
        assert_eq!(control.disconnect_peer("nonsense"), "Invalid address: nonsense");
        assert_eq!(
            control.disconnect_peer("127.0.0.1:1"),
            "Not connected to 127.0.0.1:1"
        );
    }
}
