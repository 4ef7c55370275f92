use std::fmt;

use spv_sync::{ChainError, PeerError, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    Chain(ChainError),
    Sync(SyncError),
    Peer(PeerError),
    /// `start` was called outside a tokio runtime.
    NoRuntime,
    AlreadyRunning,
    NoPeers,
    Poisoned,
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletError::Chain(err) => write!(f, "chain: {err}"),
            WalletError::Sync(err) => write!(f, "sync: {err}"),
            WalletError::Peer(err) => write!(f, "peer: {err}"),
            WalletError::NoRuntime => write!(f, "no tokio runtime available"),
            WalletError::AlreadyRunning => write!(f, "wallet already started"),
            WalletError::NoPeers => write!(f, "no connected peers"),
            WalletError::Poisoned => write!(f, "wallet lock poisoned"),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<ChainError> for WalletError {
    fn from(err: ChainError) -> Self {
        WalletError::Chain(err)
    }
}

impl From<SyncError> for WalletError {
    fn from(err: SyncError) -> Self {
        WalletError::Sync(err)
    }
}

impl From<PeerError> for WalletError {
    fn from(err: PeerError) -> Self {
        WalletError::Peer(err)
    }
}
