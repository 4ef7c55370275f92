use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use spv_primitives::BloomFilter;

pub const DEFAULT_MIN_PEERS_FOR_SYNC: usize = 3;
pub const DEFAULT_MAX_PEERS: usize = 125;
pub const DEFAULT_MAX_ORPHAN_BLOCKS: usize = 1000;
pub const DEFAULT_MAX_ORPHAN_TXS: usize = 1000;
pub const DEFAULT_ORPHAN_TTL_SECS: u64 = 20 * 60;
pub const DEFAULT_MAX_FALSE_POSITIVES: u32 = 7;
pub const DEFAULT_STALL_TICKS: u32 = 6;
pub const DEFAULT_TX_CACHE_CAP: usize = 10_000;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 10;

/// Rebuilds the bloom filter sent to peers after a filter reload.
pub type UpdateFilter = Arc<dyn Fn() -> BloomFilter + Send + Sync>;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Connected peers required before a sync session may start.
    pub min_peers_for_sync: usize,
    pub max_peers: usize,
    pub max_orphan_blocks: usize,
    pub max_orphan_txs: usize,
    pub orphan_ttl_secs: u64,
    /// Filter false positives tolerated before the filter is reloaded.
    pub max_false_positives: u32,
    /// Heartbeat ticks without progress before the sync peer is replaced.
    pub stall_ticks: u32,
    pub tx_cache_cap: usize,
    pub heartbeat_secs: u64,
    #[serde(skip)]
    pub update_filter: Option<UpdateFilter>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_peers_for_sync: DEFAULT_MIN_PEERS_FOR_SYNC,
            max_peers: DEFAULT_MAX_PEERS,
            max_orphan_blocks: DEFAULT_MAX_ORPHAN_BLOCKS,
            max_orphan_txs: DEFAULT_MAX_ORPHAN_TXS,
            orphan_ttl_secs: DEFAULT_ORPHAN_TTL_SECS,
            max_false_positives: DEFAULT_MAX_FALSE_POSITIVES,
            stall_ticks: DEFAULT_STALL_TICKS,
            tx_cache_cap: DEFAULT_TX_CACHE_CAP,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            update_filter: None,
        }
    }
}

impl SyncConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn with_update_filter(
        mut self,
        update_filter: impl Fn() -> BloomFilter + Send + Sync + 'static,
    ) -> Self {
        self.update_filter = Some(Arc::new(update_filter));
        self
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("min_peers_for_sync", &self.min_peers_for_sync)
            .field("max_peers", &self.max_peers)
            .field("max_orphan_blocks", &self.max_orphan_blocks)
            .field("max_orphan_txs", &self.max_orphan_txs)
            .field("orphan_ttl_secs", &self.orphan_ttl_secs)
            .field("max_false_positives", &self.max_false_positives)
            .field("stall_ticks", &self.stall_ticks)
            .field("tx_cache_cap", &self.tx_cache_cap)
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("update_filter", &self.update_filter.is_some())
            .finish()
    }
}
