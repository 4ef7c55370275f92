//! Wallet-facing entry point: wires a [`ChainStore`](spv_chain::ChainStore),
//! a [`PeerSet`](spv_sync::PeerSet) and the sync engine together and runs
//! the heartbeat.

pub mod config;
pub mod error;
pub mod wallet;

pub use config::WalletConfig;
pub use error::WalletError;
pub use wallet::{SpvWallet, WalletSync};
