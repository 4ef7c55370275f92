//! Header-chain store backing the SPV sync engine.

pub mod address;
pub mod config;
pub mod store;

pub use address::AddressBook;
pub use config::ChainConfig;
pub use store::{locator_heights, ChainStore, StoredTx};
