//! # Lattice P2P Networking
//!
//! Peer connection lifecycle and block dissemination for the lattice node:
//!
//! - **Wire codec**: length-prefixed, type-tagged frames; unknown types
//!   are skipped, not fatal
//! - **Peer state machine**: Connecting → Handshaking → FullyConnected →
//!   Disconnecting → Disconnected
//! - **Relay protocol**: at-most-once broadcast per block per node via a
//!   one-shot atomic pending flag
//!
//! One tokio task per connection handles messages in receipt order; no
//! ordering is guaranteed across peers. A single peer's failure tears
//! down that peer only.

pub mod error;
pub mod manager;
pub mod message;
pub mod peer;

pub use error::{NetError, Result};
pub use manager::{NetConfig, NetEvent, PeerManager, RelayBlock};
pub use message::{Message, MessageCodec, VersionPayload, PROTOCOL_VERSION};
pub use peer::{Peer, PeerState};
