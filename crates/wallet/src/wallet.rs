//! `SpvWallet`: one chain store, one peer set and the sync engine driving
//! them, plus the heartbeat task that keeps the engine moving.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use spv_chain::ChainStore;
use spv_log::{log_debug, log_info, log_warn};
use spv_primitives::{hash_to_hex, BlockHeader, ProgramHash, Transaction};
use spv_storage::arbiters::ArbiterStore;
use spv_storage::KeyValueStore;
use spv_sync::{Blockchain, Message, PeerId, PeerManager, PeerSet, SyncManager, SyncStatus};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::WalletConfig;
use crate::error::WalletError;

pub type WalletSync<S> = SyncManager<ChainStore<S>, PeerSet>;

struct Heartbeat {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SpvWallet<S> {
    chain: Arc<ChainStore<S>>,
    peers: Arc<PeerSet>,
    sync: Arc<WalletSync<S>>,
    heartbeat_secs: u64,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl<S: KeyValueStore + 'static> SpvWallet<S> {
    pub fn open(
        store: Arc<S>,
        genesis: BlockHeader,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        spv_log::init(config.log);
        let chain = Arc::new(ChainStore::open(store, genesis, config.chain)?);
        let peers = Arc::new(PeerSet::new(config.sync.max_peers));
        peers.set_local_height(chain.height()?);
        {
            let peers = Arc::clone(&peers);
            chain.on_block_commit(move |_, height| peers.set_local_height(height));
        }
        chain.on_rollback(|height| log_warn!("block at height {height} rolled back"));

        let heartbeat_secs = config.sync.heartbeat_secs;
        let sync = Arc::new(SyncManager::new(
            Arc::clone(&chain),
            Arc::clone(&peers),
            config.sync,
        ));
        Ok(Self {
            chain,
            peers,
            sync,
            heartbeat_secs,
            heartbeat: Mutex::new(None),
        })
    }

    pub fn chain(&self) -> &Arc<ChainStore<S>> {
        &self.chain
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn sync(&self) -> &Arc<WalletSync<S>> {
        &self.sync
    }

    pub fn arbiters(&self) -> &ArbiterStore<Arc<S>> {
        self.chain.arbiters()
    }

    pub fn status(&self) -> Result<SyncStatus, WalletError> {
        Ok(self.sync.status()?)
    }

    pub fn is_running(&self) -> bool {
        self.heartbeat
            .lock()
            .map(|heartbeat| heartbeat.is_some())
            .unwrap_or(false)
    }

    /// Spawns the heartbeat on the current tokio runtime. The first tick
    /// fires immediately.
    pub fn start(&self) -> Result<(), WalletError> {
        let runtime = Handle::try_current().map_err(|_| WalletError::NoRuntime)?;
        let mut heartbeat = self.heartbeat.lock().map_err(|_| WalletError::Poisoned)?;
        if heartbeat.is_some() {
            return Err(WalletError::AlreadyRunning);
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let sync = Arc::clone(&self.sync);
        let period = Duration::from_secs(self.heartbeat_secs.max(1));
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = sync.tick() {
                            log_warn!("heartbeat tick failed: {err}");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            log_debug!("heartbeat stopped");
        });
        *heartbeat = Some(Heartbeat { shutdown, handle });
        log_info!("SPV wallet started, heartbeat every {}s", period.as_secs());
        Ok(())
    }

    /// Cancels the heartbeat and waits for it to finish. Peers stay
    /// connected.
    pub async fn stop(&self) -> Result<(), WalletError> {
        let heartbeat = self
            .heartbeat
            .lock()
            .map_err(|_| WalletError::Poisoned)?
            .take();
        let Some(heartbeat) = heartbeat else {
            return Ok(());
        };
        let _ = heartbeat.shutdown.send(true);
        if let Err(err) = heartbeat.handle.await {
            log_warn!("heartbeat task ended abnormally: {err}");
        }
        log_info!("SPV wallet stopped");
        Ok(())
    }

    /// Registers a new peer, loads our filter on it and gives the engine a
    /// chance to start syncing.
    pub fn connect_peer(
        &self,
        height: u32,
    ) -> Result<(PeerId, mpsc::UnboundedReceiver<Message>), WalletError> {
        let (peer, inbox) = self.peers.connect(height)?;
        self.on_peer_establish(peer)?;
        Ok((peer, inbox))
    }

    fn on_peer_establish(&self, peer: PeerId) -> Result<(), WalletError> {
        let filter = self.chain.bloom_filter()?;
        self.peers.send(peer, Message::FilterLoad(filter))?;
        self.sync.start_sync()?;
        Ok(())
    }

    pub fn disconnect_peer(&self, peer: PeerId) -> Result<(), WalletError> {
        if self.sync.status()?.sync_peer == Some(peer) {
            self.sync.change_sync_peer_and_restart()?;
        } else {
            self.peers.disconnect(peer);
        }
        Ok(())
    }

    pub fn handle_message(&self, peer: PeerId, message: Message) -> Result<(), WalletError> {
        Ok(self.sync.handle_message(peer, message)?)
    }

    /// Watches `address` and pushes the refreshed filter to every peer.
    /// Returns `false` when the address was already watched.
    pub fn notify_new_address(&self, address: ProgramHash) -> Result<bool, WalletError> {
        if !self.chain.add_address(address)? {
            return Ok(false);
        }
        self.sync.reload_filter()?;
        Ok(true)
    }

    /// Keeps `tx` in the unconfirmed pool and relays it to all peers.
    pub fn send_transaction(&self, tx: Transaction) -> Result<(), WalletError> {
        if self.peers.peer_count() == 0 {
            return Err(WalletError::NoPeers);
        }
        if self.chain.commit_unconfirmed_txn(&tx)? {
            log_debug!("relaying foreign transaction {}", hash_to_hex(&tx.txid()));
        }
        self.peers.broadcast(Message::Tx(tx));
        Ok(())
    }
}
