//! # Lattice Node
//!
//! Binary crate wiring the ledger subsystems into a running node:
//! configuration, component construction, the network event loop, and
//! the operator control surface.

pub mod config;
pub mod control;
pub mod node;

pub use config::NodeConfig;
pub use control::{ControlApi, MemoryWallet, Miner, NodeControl, NoopMiner, Wallet};
pub use node::{Node, NodeContext};
