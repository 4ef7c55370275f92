use serde::Deserialize;
use spv_chain::ChainConfig;
use spv_log::LogConfig;
use spv_sync::SyncConfig;

/// Everything a wallet context needs, one section per layer.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub log: LogConfig,
    pub sync: SyncConfig,
    pub chain: ChainConfig,
}

impl WalletConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
