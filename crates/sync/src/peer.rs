//! Peer bookkeeping and sync-peer election.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use spv_log::{log_debug, log_info};
use tokio::sync::mpsc;

use crate::error::PeerError;
use crate::message::Message;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PeerInfo {
    pub id: PeerId,
    /// Best height the peer advertised.
    pub height: u32,
}

/// Connection management as seen by the sync engine.
pub trait PeerManager: Send + Sync {
    fn peer_count(&self) -> usize;
    fn peers(&self) -> Vec<PeerInfo>;
    fn sync_peer(&self) -> Option<PeerInfo>;
    /// Elects and records a new sync peer, never `exclude`.
    fn elect_sync_peer(&self, exclude: Option<PeerId>) -> Option<PeerInfo>;
    fn clear_sync_peer(&self);
    fn disconnect(&self, peer: PeerId);
    fn send(&self, peer: PeerId, message: Message) -> Result<(), PeerError>;
    fn broadcast(&self, message: Message);
    fn set_local_height(&self, height: u32);
}

struct PeerEntry {
    height: u32,
    outbound: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct PeerSetInner {
    peers: BTreeMap<PeerId, PeerEntry>,
    sync_peer: Option<PeerId>,
    local_height: u32,
}

/// In-process [`PeerManager`]. Each peer gets an unbounded outbound queue;
/// whoever owns the receiving half does the actual wire I/O.
pub struct PeerSet {
    inner: Mutex<PeerSetInner>,
    next_id: AtomicU64,
    max_peers: usize,
}

impl PeerSet {
    pub fn new(max_peers: usize) -> Self {
        Self {
            inner: Mutex::new(PeerSetInner::default()),
            next_id: AtomicU64::new(1),
            max_peers,
        }
    }

    pub fn connect(
        &self,
        height: u32,
    ) -> Result<(PeerId, mpsc::UnboundedReceiver<Message>), PeerError> {
        let Ok(mut inner) = self.inner.lock() else {
            return Err(PeerError::TooManyPeers(self.max_peers));
        };
        if inner.peers.len() >= self.max_peers {
            return Err(PeerError::TooManyPeers(self.max_peers));
        }
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, inbox) = mpsc::unbounded_channel();
        inner.peers.insert(id, PeerEntry { height, outbound });
        log_debug!("peer {id} connected at height {height}");
        Ok((id, inbox))
    }

    pub fn update_height(&self, peer: PeerId, height: u32) -> Result<(), PeerError> {
        let Ok(mut inner) = self.inner.lock() else {
            return Err(PeerError::UnknownPeer(peer));
        };
        let entry = inner
            .peers
            .get_mut(&peer)
            .ok_or(PeerError::UnknownPeer(peer))?;
        entry.height = entry.height.max(height);
        Ok(())
    }

    pub fn local_height(&self) -> u32 {
        self.inner
            .lock()
            .map(|inner| inner.local_height)
            .unwrap_or_default()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.peers.contains_key(&peer))
            .unwrap_or(false)
    }
}

impl PeerManager for PeerSet {
    fn peer_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.peers.len()).unwrap_or(0)
    }

    fn peers(&self) -> Vec<PeerInfo> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .peers
            .iter()
            .map(|(id, entry)| PeerInfo {
                id: *id,
                height: entry.height,
            })
            .collect()
    }

    fn sync_peer(&self) -> Option<PeerInfo> {
        let inner = self.inner.lock().ok()?;
        let id = inner.sync_peer?;
        inner.peers.get(&id).map(|entry| PeerInfo {
            id,
            height: entry.height,
        })
    }

    fn elect_sync_peer(&self, exclude: Option<PeerId>) -> Option<PeerInfo> {
        let mut inner = self.inner.lock().ok()?;
        let elected = inner
            .peers
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(id, entry)| PeerInfo {
                id: *id,
                height: entry.height,
            })
            // Highest advertised height wins; ties go to the oldest connection.
            .max_by(|a, b| a.height.cmp(&b.height).then(b.id.cmp(&a.id)));
        inner.sync_peer = elected.map(|peer| peer.id);
        if let Some(peer) = elected {
            log_info!("elected sync peer {} at height {}", peer.id, peer.height);
        }
        elected
    }

    fn clear_sync_peer(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.sync_peer = None;
        }
    }

    fn disconnect(&self, peer: PeerId) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.peers.remove(&peer).is_some() {
            log_info!("disconnected peer {peer}");
        }
        if inner.sync_peer == Some(peer) {
            inner.sync_peer = None;
        }
    }

    fn send(&self, peer: PeerId, message: Message) -> Result<(), PeerError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| PeerError::Disconnected(peer))?;
        let entry = inner.peers.get(&peer).ok_or(PeerError::UnknownPeer(peer))?;
        entry
            .outbound
            .send(message)
            .map_err(|_| PeerError::Disconnected(peer))
    }

    fn broadcast(&self, message: Message) {
        let Ok(inner) = self.inner.lock() else {
            return;
        };
        for entry in inner.peers.values() {
            let _ = entry.outbound.send(message.clone());
        }
    }

    fn set_local_height(&self, height: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.local_height = height;
        }
    }
}
