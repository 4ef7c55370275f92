//! The sync state machine.
//!
//! Every inbound event locks the session for the duration of one message.
//! Outbound messages are queued in an [`Outbox`] and handed to the peer
//! manager only after the lock is released.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use spv_log::{log_debug, log_error, log_info, log_trace, log_warn};
use spv_primitives::{
    hash_to_hex, BlockHeader, GetBlocks, Hash256, InventoryVector, MerkleBlock, Transaction,
};

use crate::cache::TxCache;
use crate::chain::Blockchain;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::message::Message;
use crate::orphan::{OrphanEntry, OrphanPayload, OrphanPool};
use crate::peer::{PeerId, PeerManager};
use crate::request::{RequestKind, RequestStatus, RequestWindow};
use crate::state::SyncState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub sync_peer: Option<PeerId>,
    pub requested: usize,
    pub pending: usize,
    pub orphans: usize,
    pub false_positives: u32,
}

struct SyncSession {
    state: SyncState,
    sync_peer: Option<PeerId>,
    locator: Option<Vec<Hash256>>,
    window: RequestWindow,
    orphans: OrphanPool,
    false_positives: u32,
    stall_ticks: u32,
    tx_cache: TxCache,
}

impl SyncSession {
    fn new(config: &SyncConfig) -> Self {
        Self {
            state: SyncState::Idle,
            sync_peer: None,
            locator: None,
            window: RequestWindow::new(),
            orphans: OrphanPool::new(
                config.max_orphan_blocks,
                config.max_orphan_txs,
                config.orphan_ttl_secs,
            ),
            false_positives: 0,
            stall_ticks: 0,
            tx_cache: TxCache::new(config.tx_cache_cap),
        }
    }

    fn transition(&mut self, next: SyncState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid sync transition {} -> {}",
            self.state,
            next
        );
        if !self.state.can_transition_to(next) {
            log_error!("rejected sync transition {} -> {}", self.state, next);
            return;
        }
        log_debug!("sync state {} -> {}", self.state, next);
        self.state = next;
    }
}

#[derive(Default)]
struct Outbox {
    sends: Vec<(PeerId, Message)>,
    broadcasts: Vec<Message>,
}

impl Outbox {
    fn send(&mut self, peer: PeerId, message: Message) {
        self.sends.push((peer, message));
    }

    fn broadcast(&mut self, message: Message) {
        self.broadcasts.push(message);
    }
}

pub struct SyncManager<C, P> {
    chain: Arc<C>,
    peers: Arc<P>,
    config: SyncConfig,
    session: Mutex<SyncSession>,
}

impl<C: Blockchain, P: PeerManager> SyncManager<C, P> {
    pub fn new(chain: Arc<C>, peers: Arc<P>, config: SyncConfig) -> Self {
        let session = Mutex::new(SyncSession::new(&config));
        Self {
            chain,
            peers,
            config,
            session,
        }
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    pub fn peers(&self) -> &Arc<P> {
        &self.peers
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> Result<SyncState, SyncError> {
        self.with_session(|session, _| Ok(session.state))
    }

    pub fn is_syncing(&self) -> bool {
        self.state().is_ok_and(SyncState::is_syncing)
    }

    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        self.with_session(|session, _| {
            Ok(SyncStatus {
                state: session.state,
                sync_peer: session.sync_peer,
                requested: session.window.len(),
                pending: session.window.pending(),
                orphans: session.orphans.len(),
                false_positives: session.false_positives,
            })
        })
    }

    pub fn request_status(&self, hash: &Hash256) -> Result<Option<RequestStatus>, SyncError> {
        self.with_session(|session, _| Ok(session.window.status(hash)))
    }

    pub fn is_orphan(&self, hash: &Hash256) -> Result<bool, SyncError> {
        self.with_session(|session, _| Ok(session.orphans.contains(hash)))
    }

    pub fn handle_message(&self, peer: PeerId, message: Message) -> Result<(), SyncError> {
        match message {
            Message::MerkleBlock(block) => self.on_merkle_block(peer, block),
            Message::Tx(tx) => self.on_transaction(peer, tx),
            Message::NotFound(entries) => self.on_not_found(peer, entries),
            Message::Inv(entries) => self.on_inventory(peer, entries),
            other => {
                log_trace!("ignoring {} from peer {peer}", other.command());
                Ok(())
            }
        }
    }

    /// Starts a session against the best peer unless one is already running.
    pub fn start_sync(&self) -> Result<(), SyncError> {
        self.with_session(|session, out| self.start_sync_locked(session, out))
    }

    /// Drops the current sync peer and restarts against another one.
    pub fn change_sync_peer_and_restart(&self) -> Result<(), SyncError> {
        self.with_session(|session, out| {
            self.failover(session, out);
            Ok(())
        })
    }

    /// Commits the request window if everything in it has arrived.
    pub fn commit(&self) -> Result<(), SyncError> {
        self.with_session(|session, out| {
            if session.window.is_finished() {
                self.commit_window(session, out)
            } else {
                Ok(())
            }
        })
    }

    pub fn reload_filter(&self) -> Result<(), SyncError> {
        self.with_session(|session, out| self.reload_filter_locked(session, out))
    }

    /// Heartbeat step: restarts an idle or outrun engine and replaces a
    /// sync peer that stopped making progress.
    pub fn tick(&self) -> Result<(), SyncError> {
        self.with_session(|session, out| match session.state {
            SyncState::Idle => self.start_sync_locked(session, out),
            SyncState::SteadyState => {
                self.expire_announcements(session);
                let height = self.chain.height()?;
                if self.peers.peers().iter().any(|peer| peer.height > height) {
                    self.start_sync_locked(session, out)
                } else {
                    Ok(())
                }
            }
            SyncState::AwaitingLocatorResponse | SyncState::AwaitingBlocks => {
                session.stall_ticks = session.stall_ticks.saturating_add(1);
                if session.stall_ticks >= self.config.stall_ticks {
                    log_warn!(
                        "sync peer {:?} stalled for {} ticks in {}",
                        session.sync_peer,
                        session.stall_ticks,
                        session.state
                    );
                    self.failover(session, out);
                }
                Ok(())
            }
        })
    }

    pub fn on_merkle_block(&self, peer: PeerId, block: MerkleBlock) -> Result<(), SyncError> {
        self.with_session(|session, out| {
            let hash = block.block_hash();
            if self.chain.is_known_block(&hash)? {
                return Err(SyncError::KnownBlock(hash));
            }
            self.chain.check_proof_of_work(&block.header)?;
            let matched = block
                .matched_txids()
                .map_err(SyncError::InvalidMerkleProof)?;

            if session.state.is_syncing() {
                if !session.window.is_requested(&hash) {
                    log_trace!("orphaned unrequested block {}", hash_to_hex(&hash));
                    session
                        .orphans
                        .add(OrphanEntry::block(block, peer, unix_now()));
                    return Ok(());
                }
                if session.sync_peer != Some(peer) || session.locator.is_none() {
                    log_error!(
                        "block {} from peer {peer} which is not the sync peer",
                        hash_to_hex(&hash)
                    );
                    self.failover(session, out);
                    return Err(SyncError::NonSyncPeer(peer));
                }
            } else {
                let tip = self.chain.chain_tip()?.hash();
                if hash == tip {
                    return Ok(());
                }
                let prev = block.header.prev_block;
                let extends_window = session.window.kind(&prev) == Some(RequestKind::Block)
                    && session.window.is_requested(&prev);
                if prev == tip {
                    // A block on the tip opens its own window; announcements
                    // still pending from before are dropped with the old one.
                    if session.window.status(&hash) != Some(RequestStatus::Received) {
                        session.window.reset();
                        session.window.request_block(hash);
                    }
                } else if !extends_window {
                    session
                        .orphans
                        .add(OrphanEntry::block(block, peer, unix_now()));
                    return Ok(());
                } else if !session.window.is_requested(&hash) {
                    session.window.request_block(hash);
                }
            }

            session.stall_ticks = 0;
            self.accept_block(session, out, peer, hash, block.header, matched)
        })
    }

    pub fn on_transaction(&self, peer: PeerId, tx: Transaction) -> Result<(), SyncError> {
        self.with_session(|session, out| {
            let txid = tx.txid();
            if session.state.is_syncing() {
                if !session.window.is_requested(&txid) {
                    session.orphans.add(OrphanEntry::tx(tx, peer, unix_now()));
                    return Ok(());
                }
                if session.sync_peer != Some(peer) {
                    log_error!(
                        "transaction {} from peer {peer} which is not the sync peer",
                        hash_to_hex(&txid)
                    );
                    self.failover(session, out);
                    return Err(SyncError::NonSyncPeer(peer));
                }
            } else {
                let in_window = session.window.is_requested(&txid);
                if !in_window && session.tx_cache.contains(&txid) {
                    return Err(SyncError::AlreadyCached(txid));
                }
                let false_positive = self.chain.commit_unconfirmed_txn(&tx)?;
                session.tx_cache.insert(txid);
                if false_positive {
                    if in_window {
                        session.window.mark_false_positive(&txid);
                    }
                    self.record_false_positives(session, out, 1)?;
                }
                if !in_window {
                    return Ok(());
                }
            }

            session.stall_ticks = 0;
            session.window.tx_received(tx);
            if session.window.is_finished() {
                self.commit_window(session, out)?;
            }
            Ok(())
        })
    }

    pub fn on_not_found(
        &self,
        peer: PeerId,
        entries: Vec<InventoryVector>,
    ) -> Result<(), SyncError> {
        self.with_session(|session, out| {
            log_error!("peer {peer} could not serve {} item(s)", entries.len());
            self.failover(session, out);
            Err(SyncError::NotFound {
                peer,
                missing: entries.len(),
            })
        })
    }

    pub fn on_inventory(
        &self,
        peer: PeerId,
        entries: Vec<InventoryVector>,
    ) -> Result<(), SyncError> {
        let blocks: Vec<Hash256> = entries
            .iter()
            .filter(|entry| entry.inv_type.is_block())
            .map(|entry| entry.hash)
            .collect();
        if blocks.is_empty() {
            return Ok(());
        }
        self.with_session(|session, out| match session.state {
            SyncState::AwaitingLocatorResponse if session.sync_peer == Some(peer) => {
                self.locator_response(session, out, peer, blocks)
            }
            SyncState::SteadyState => {
                let mut request = Vec::new();
                for hash in blocks {
                    if self.chain.is_known_block(&hash)? || session.window.is_requested(&hash) {
                        continue;
                    }
                    session.window.request_block(hash);
                    request.push(InventoryVector::filtered_block(hash));
                }
                if !request.is_empty() {
                    out.send(peer, Message::GetData(request));
                }
                Ok(())
            }
            _ => {
                log_trace!("ignoring block inventory from peer {peer} in {}", session.state);
                Ok(())
            }
        })
    }

    /// Forgets steady-state requests nobody answered within `stall_ticks`.
    fn expire_announcements(&self, session: &mut SyncSession) {
        if session.window.pending() == 0 {
            session.stall_ticks = 0;
            return;
        }
        session.stall_ticks = session.stall_ticks.saturating_add(1);
        if session.stall_ticks >= self.config.stall_ticks {
            log_warn!(
                "dropping {} unanswered request(s) after {} ticks",
                session.window.pending(),
                session.stall_ticks
            );
            session.window.reset();
            session.stall_ticks = 0;
        }
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut SyncSession, &mut Outbox) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut out = Outbox::default();
        let result = match self.session.lock() {
            Ok(mut session) => f(&mut *session, &mut out),
            Err(_) => Err(SyncError::Poisoned),
        };
        self.flush(out);
        result
    }

    fn flush(&self, out: Outbox) {
        for (peer, message) in out.sends {
            let command = message.command();
            if let Err(err) = self.peers.send(peer, message) {
                log_warn!("failed to send {command} to peer {peer}: {err}");
            }
        }
        for message in out.broadcasts {
            self.peers.broadcast(message);
        }
    }

    fn start_sync_locked(
        &self,
        session: &mut SyncSession,
        out: &mut Outbox,
    ) -> Result<(), SyncError> {
        if session.state.is_syncing() {
            return Ok(());
        }
        let connected = self.peers.peer_count();
        if connected < self.config.min_peers_for_sync {
            log_debug!(
                "waiting for peers: {connected} of {} connected",
                self.config.min_peers_for_sync
            );
            session.transition(SyncState::Idle);
            return Ok(());
        }

        let height = self.chain.height()?;
        let current = self.peers.sync_peer().filter(|peer| peer.height > height);
        let Some(peer) = current.or_else(|| self.peers.elect_sync_peer(None)) else {
            session.transition(SyncState::Idle);
            return Ok(());
        };
        session.sync_peer = Some(peer.id);
        if peer.height <= height {
            self.peers.set_local_height(height);
            session.transition(SyncState::SteadyState);
            return Ok(());
        }
        self.request_locator(session, out, peer.id)
    }

    fn request_locator(
        &self,
        session: &mut SyncSession,
        out: &mut Outbox,
        peer: PeerId,
    ) -> Result<(), SyncError> {
        let locator = self.chain.block_locator()?;
        session.window.reset();
        session.stall_ticks = 0;
        session.sync_peer = Some(peer);
        session.locator = Some(locator.clone());
        session.transition(SyncState::AwaitingLocatorResponse);
        log_info!(
            "requesting blocks from peer {peer} with a {}-hash locator",
            locator.len()
        );
        out.send(peer, Message::GetBlocks(GetBlocks::new(locator)));
        Ok(())
    }

    /// Releases the sync peer and restarts against another one; without a
    /// candidate the session backs off to `Idle`.
    fn failover(&self, session: &mut SyncSession, out: &mut Outbox) {
        let previous = session
            .sync_peer
            .take()
            .or_else(|| self.peers.sync_peer().map(|peer| peer.id));
        if let Some(previous) = previous {
            self.peers.disconnect(previous);
        }
        self.peers.clear_sync_peer();
        session.window.reset();
        session.locator = None;
        session.stall_ticks = 0;

        let connected = self.peers.peer_count();
        if connected < self.config.min_peers_for_sync {
            log_warn!("not enough peers to resume sync ({connected} connected)");
            session.transition(SyncState::Idle);
            return;
        }
        let Some(peer) = self.peers.elect_sync_peer(previous) else {
            log_warn!("no sync peer candidate left");
            session.transition(SyncState::Idle);
            return;
        };
        if let Err(err) = self.request_locator(session, out, peer.id) {
            log_error!("failed to restart sync against peer {}: {err}", peer.id);
            session.transition(SyncState::Idle);
        }
    }

    fn locator_response(
        &self,
        session: &mut SyncSession,
        out: &mut Outbox,
        peer: PeerId,
        blocks: Vec<Hash256>,
    ) -> Result<(), SyncError> {
        let mut unknown = Vec::new();
        for hash in blocks {
            if !self.chain.is_known_block(&hash)? && !unknown.contains(&hash) {
                unknown.push(hash);
            }
        }
        if unknown.is_empty() {
            let height = self.chain.height()?;
            session.locator = None;
            self.peers.set_local_height(height);
            session.transition(SyncState::SteadyState);
            log_info!("caught up with peer {peer} at height {height}");
            return Ok(());
        }

        session.window.reset();
        for hash in &unknown {
            session.window.request_block(*hash);
        }
        session.stall_ticks = 0;
        session.transition(SyncState::AwaitingBlocks);

        let mut request = Vec::new();
        let mut promoted = Vec::new();
        for hash in unknown {
            match session.orphans.promote(&hash) {
                Some(OrphanEntry {
                    payload: OrphanPayload::Block(block),
                    ..
                }) => promoted.push(block),
                Some(entry) => {
                    session.orphans.add(entry);
                    request.push(InventoryVector::filtered_block(hash));
                }
                None => request.push(InventoryVector::filtered_block(hash)),
            }
        }
        if !request.is_empty() {
            out.send(peer, Message::GetData(request));
        }
        for block in promoted {
            let hash = block.block_hash();
            match block.matched_txids() {
                Ok(matched) => {
                    self.accept_block(session, out, peer, hash, block.header, matched)?
                }
                Err(err) => {
                    log_warn!("re-requesting orphan block {}: {err}", hash_to_hex(&hash));
                    let retry = vec![InventoryVector::filtered_block(hash)];
                    out.send(peer, Message::GetData(retry));
                }
            }
        }
        Ok(())
    }

    /// Files a requested block and asks for the matched transactions that
    /// are neither received nor waiting in the orphan pool.
    fn accept_block(
        &self,
        session: &mut SyncSession,
        out: &mut Outbox,
        peer: PeerId,
        hash: Hash256,
        header: BlockHeader,
        matched: Vec<Hash256>,
    ) -> Result<(), SyncError> {
        let outstanding = session.window.block_received(hash, header, matched);
        let mut request = Vec::new();
        for txid in outstanding {
            match session.orphans.promote(&txid) {
                Some(OrphanEntry {
                    payload: OrphanPayload::Tx(tx),
                    ..
                }) => {
                    session.window.tx_received(tx);
                }
                Some(entry) => {
                    session.orphans.add(entry);
                    request.push(InventoryVector::tx(txid));
                }
                None => request.push(InventoryVector::tx(txid)),
            }
        }
        if !request.is_empty() {
            out.send(peer, Message::GetData(request));
        }
        if session.state == SyncState::AwaitingLocatorResponse {
            session.transition(SyncState::AwaitingBlocks);
        }
        if session.window.is_finished() {
            self.commit_window(session, out)?;
        }
        Ok(())
    }

    /// Commits a finished window. On failure the window stays in place so
    /// a later arrival can retry.
    fn commit_window(
        &self,
        session: &mut SyncSession,
        out: &mut Outbox,
    ) -> Result<(), SyncError> {
        let Some(batch) = session.window.to_batch() else {
            return Ok(());
        };
        let summary = match self.chain.commit_data(&batch) {
            Ok(summary) => summary,
            Err(err) => {
                log_warn!("commit of {} block(s) failed: {err}", batch.blocks.len());
                return Err(err.into());
            }
        };
        session.window.mark_committed();
        session.locator = None;
        self.peers.set_local_height(summary.height);
        log_info!(
            "committed {} block(s), height {}",
            summary.committed.len(),
            summary.height
        );
        self.record_false_positives(session, out, summary.false_positives)?;

        let mut promoted = Vec::new();
        for hash in batch.block_hashes() {
            promoted.extend(session.orphans.promote_children(&hash));
        }
        self.resume(session, out, promoted)
    }

    /// Continues after a commit: the next locator request while the sync
    /// peer is still ahead, steady state otherwise.
    fn resume(
        &self,
        session: &mut SyncSession,
        out: &mut Outbox,
        promoted: Vec<OrphanEntry>,
    ) -> Result<(), SyncError> {
        session.transition(SyncState::Idle);
        let height = self.chain.height()?;
        let ahead = self
            .peers
            .sync_peer()
            .is_some_and(|peer| peer.height > height);
        if ahead {
            for entry in promoted {
                session.orphans.add(entry);
            }
            return self.start_sync_locked(session, out);
        }

        session.transition(SyncState::SteadyState);
        let tip = self.chain.chain_tip()?.hash();
        let mut next = None;
        for entry in promoted {
            if next.is_none() && entry.is_block() && entry.parent == Some(tip) {
                next = Some(entry);
            } else {
                session.orphans.add(entry);
            }
        }
        let Some(OrphanEntry {
            payload: OrphanPayload::Block(block),
            origin,
            ..
        }) = next
        else {
            return Ok(());
        };
        let hash = block.block_hash();
        let matched = block
            .matched_txids()
            .map_err(SyncError::InvalidMerkleProof)?;
        session.window.reset();
        session.window.request_block(hash);
        self.accept_block(session, out, origin, hash, block.header, matched)
    }

    fn record_false_positives(
        &self,
        session: &mut SyncSession,
        out: &mut Outbox,
        count: u32,
    ) -> Result<(), SyncError> {
        if count == 0 {
            return Ok(());
        }
        session.false_positives = session.false_positives.saturating_add(count);
        if session.false_positives > self.config.max_false_positives {
            log_info!(
                "{} filter false positives, reloading filter",
                session.false_positives
            );
            self.reload_filter_locked(session, out)?;
        }
        Ok(())
    }

    fn reload_filter_locked(
        &self,
        session: &mut SyncSession,
        out: &mut Outbox,
    ) -> Result<(), SyncError> {
        self.chain.reload_addr_filter()?;
        let filter = match &self.config.update_filter {
            Some(update_filter) => update_filter(),
            None => self.chain.bloom_filter()?,
        };
        out.broadcast(Message::FilterLoad(filter));
        session.false_positives = 0;
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
