//! Error types for the network module

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Not bound to a local address")]
    NotBound,

    #[error("Already connected to {0}")]
    AlreadyConnected(std::net::SocketAddr),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Malformed wire data; the offending peer is disconnected.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(std::net::SocketAddr),

    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Box<bincode::ErrorKind>> for NetError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        NetError::Protocol(format!("bincode: {err}"))
    }
}
