//! Synchronization engine for the SPV wallet.
//!
//! [`SyncManager`] drives block-locator and filtered-block retrieval from a
//! single elected peer, buffers out-of-order data in an [`OrphanPool`],
//! tracks outstanding requests in a [`RequestWindow`] and commits finished
//! windows through the [`Blockchain`] adapter.

pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod manager;
pub mod message;
pub mod orphan;
pub mod peer;
pub mod request;
pub mod state;

pub use chain::{BlockData, Blockchain, ChainError, CommitBatch, CommitSummary};
pub use config::SyncConfig;
pub use error::{PeerError, SyncError};
pub use manager::{SyncManager, SyncStatus};
pub use message::Message;
pub use orphan::{OrphanEntry, OrphanPayload, OrphanPool};
pub use peer::{PeerId, PeerInfo, PeerManager, PeerSet};
pub use request::{RequestKind, RequestStatus, RequestWindow};
pub use state::SyncState;
