use std::fmt;

use spv_primitives::encoding::DecodeError;
use spv_primitives::{hash_to_hex, Hash256};

use crate::chain::ChainError;
use crate::peer::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    UnknownPeer(PeerId),
    Disconnected(PeerId),
    TooManyPeers(usize),
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::UnknownPeer(peer) => write!(f, "unknown peer {peer}"),
            PeerError::Disconnected(peer) => write!(f, "peer {peer} disconnected"),
            PeerError::TooManyPeers(max) => write!(f, "peer limit {max} reached"),
        }
    }
}

impl std::error::Error for PeerError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    KnownBlock(Hash256),
    NonSyncPeer(PeerId),
    NotFound { peer: PeerId, missing: usize },
    AlreadyCached(Hash256),
    InvalidMerkleProof(DecodeError),
    Chain(ChainError),
    Peer(PeerError),
    Poisoned,
}

impl SyncError {
    /// Protocol violations that cost the sync peer its session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, SyncError::NonSyncPeer(_) | SyncError::NotFound { .. })
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::KnownBlock(hash) => {
                write!(f, "received block that is already known: {}", hash_to_hex(hash))
            }
            SyncError::NonSyncPeer(peer) => {
                write!(f, "received message from non-sync peer {peer}")
            }
            SyncError::NotFound { peer, missing } => {
                write!(f, "peer {peer} reported {missing} requested item(s) not found")
            }
            SyncError::AlreadyCached(hash) => {
                write!(f, "transaction already cached: {}", hash_to_hex(hash))
            }
            SyncError::InvalidMerkleProof(err) => write!(f, "invalid merkle proof: {err}"),
            SyncError::Chain(err) => write!(f, "{err}"),
            SyncError::Peer(err) => write!(f, "{err}"),
            SyncError::Poisoned => write!(f, "sync session lock poisoned"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<ChainError> for SyncError {
    fn from(err: ChainError) -> Self {
        SyncError::Chain(err)
    }
}

impl From<PeerError> for SyncError {
    fn from(err: PeerError) -> Self {
        SyncError::Peer(err)
    }
}
