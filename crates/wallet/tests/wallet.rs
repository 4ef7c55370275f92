use std::sync::Arc;
use std::time::Duration;

use spv_pow::difficulty::REGTEST_POW_LIMIT_BITS;
use spv_pow::validate_pow_header;
use spv_primitives::{
    merkle_root, BlockHeader, InvType, InventoryVector, MerkleBlock, ProgramHash, Transaction,
    TxOut, ZERO_HASH,
};
use spv_storage::arbiters::ArbiterSet;
use spv_storage::memory::MemoryStore;
use spv_sync::{Blockchain, Message, PeerManager, SyncConfig, SyncState};
use spv_wallet::{SpvWallet, WalletConfig, WalletError};
use tokio::sync::mpsc::UnboundedReceiver;

fn mine(mut header: BlockHeader) -> BlockHeader {
    while validate_pow_header(&header, REGTEST_POW_LIMIT_BITS).is_err() {
        header.nonce += 1;
    }
    header
}

fn genesis() -> BlockHeader {
    mine(BlockHeader {
        version: 0,
        prev_block: ZERO_HASH,
        merkle_root: ZERO_HASH,
        timestamp: 1_700_000_000,
        bits: REGTEST_POW_LIMIT_BITS,
        nonce: 0,
        height: 0,
    })
}

fn address(tag: u8) -> ProgramHash {
    ProgramHash::from_redeem_script(0x21, &[tag; 35])
}

fn pay_to(address: ProgramHash, tag: u32) -> Transaction {
    Transaction {
        version: 0,
        tx_type: 2,
        payload: tag.to_le_bytes().to_vec(),
        inputs: Vec::new(),
        outputs: vec![TxOut {
            value: 10_000,
            output_lock: 0,
            program_hash: address,
        }],
        lock_time: 0,
    }
}

/// Filtered block on `prev` with one unmatched filler plus `matched`.
fn child(prev: &BlockHeader, matched: &[Transaction]) -> MerkleBlock {
    let filler = pay_to(address(250), prev.height);
    let mut txids = vec![filler.txid()];
    txids.extend(matched.iter().map(Transaction::txid));
    let mut flags = vec![false];
    flags.extend(matched.iter().map(|_| true));
    let header = mine(BlockHeader {
        version: 0,
        prev_block: prev.hash(),
        merkle_root: merkle_root(&txids),
        timestamp: prev.timestamp + 60,
        bits: REGTEST_POW_LIMIT_BITS,
        nonce: 0,
        height: prev.height + 1,
    });
    MerkleBlock::build(header, &txids, &flags).expect("merkle block")
}

fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

fn requested(messages: &[Message]) -> Vec<InventoryVector> {
    messages
        .iter()
        .filter_map(|message| match message {
            Message::GetData(entries) => Some(entries.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn loads_filter_with(messages: &[Message], address: &ProgramHash) -> bool {
    messages.iter().any(|message| match message {
        Message::FilterLoad(filter) => filter.contains(address.as_bytes()),
        _ => false,
    })
}

fn has_getblocks(messages: &[Message]) -> bool {
    messages
        .iter()
        .any(|message| matches!(message, Message::GetBlocks(_)))
}

fn wallet(min_peers: usize) -> SpvWallet<MemoryStore> {
    let mut config = WalletConfig::default();
    config.sync = SyncConfig {
        min_peers_for_sync: min_peers,
        heartbeat_secs: 1,
        stall_ticks: 3,
        ..SyncConfig::default()
    };
    config.chain.filter_tweak = Some(11);
    SpvWallet::open(Arc::new(MemoryStore::new()), genesis(), config).expect("open wallet")
}

#[test]
fn syncs_wallet_transactions_end_to_end() {
    let wallet = wallet(1);
    let ours = address(1);
    assert!(wallet.notify_new_address(ours).expect("watch"));
    assert!(!wallet.notify_new_address(ours).expect("watch again"));

    let (peer, mut rx) = wallet.connect_peer(3).expect("connect");
    let opening = drain(&mut rx);
    assert!(matches!(opening.first(), Some(Message::FilterLoad(_))));
    assert!(loads_filter_with(&opening, &ours));
    assert!(has_getblocks(&opening));

    let payment = pay_to(ours, 7);
    let b1 = child(&genesis(), &[]);
    let b2 = child(&b1.header, std::slice::from_ref(&payment));
    let b3 = child(&b2.header, &[]);
    let inv = [&b1, &b2, &b3]
        .iter()
        .map(|block| InventoryVector::block(block.block_hash()))
        .collect();
    wallet
        .handle_message(peer, Message::Inv(inv))
        .expect("inventory");
    let asked = requested(&drain(&mut rx));
    assert_eq!(asked.len(), 3);
    assert!(asked
        .iter()
        .all(|entry| entry.inv_type == InvType::FilteredBlock));

    for block in [&b1, &b2, &b3] {
        wallet
            .handle_message(peer, Message::MerkleBlock(block.clone()))
            .expect("merkle block");
    }
    assert_eq!(
        requested(&drain(&mut rx)),
        vec![InventoryVector::tx(payment.txid())]
    );
    assert_eq!(
        wallet.status().expect("status").state,
        SyncState::AwaitingBlocks
    );

    wallet
        .handle_message(peer, Message::Tx(payment.clone()))
        .expect("transaction");

    let status = wallet.status().expect("status");
    assert_eq!(status.state, SyncState::SteadyState);
    assert_eq!(status.requested, 0);
    assert_eq!(wallet.chain().height().expect("height"), 3);
    assert_eq!(wallet.peers().local_height(), 3);
    let stored = wallet
        .chain()
        .transaction(&payment.txid())
        .expect("lookup")
        .expect("stored payment");
    assert_eq!(stored.height, Some(2));
}

#[test]
fn new_address_reaches_every_peer() {
    let wallet = wallet(1);
    let (_a, mut rx_a) = wallet.connect_peer(0).expect("connect a");
    let (_b, mut rx_b) = wallet.connect_peer(0).expect("connect b");
    assert_eq!(
        wallet.status().expect("status").state,
        SyncState::SteadyState
    );
    drain(&mut rx_a);
    drain(&mut rx_b);

    let fresh = address(2);
    assert!(wallet.notify_new_address(fresh).expect("watch"));
    assert!(loads_filter_with(&drain(&mut rx_a), &fresh));
    assert!(loads_filter_with(&drain(&mut rx_b), &fresh));
}

#[test]
fn send_transaction_relays_and_keeps_it_unconfirmed() {
    let wallet = wallet(1);
    let ours = address(3);
    wallet.notify_new_address(ours).expect("watch");
    let change = pay_to(ours, 9);

    assert_eq!(
        wallet.send_transaction(change.clone()),
        Err(WalletError::NoPeers)
    );

    let (_peer, mut rx) = wallet.connect_peer(0).expect("connect");
    drain(&mut rx);
    wallet.send_transaction(change.clone()).expect("send");
    assert_eq!(drain(&mut rx), vec![Message::Tx(change.clone())]);
    let stored = wallet
        .chain()
        .transaction(&change.txid())
        .expect("lookup")
        .expect("stored");
    assert_eq!(stored.height, None);
}

#[test]
fn dropping_the_sync_peer_fails_over() {
    let wallet = wallet(1);
    let (a, _rx_a) = wallet.connect_peer(2).expect("connect a");
    let (b, mut rx_b) = wallet.connect_peer(2).expect("connect b");
    assert_eq!(wallet.status().expect("status").sync_peer, Some(a));
    drain(&mut rx_b);

    wallet.disconnect_peer(a).expect("disconnect");

    let status = wallet.status().expect("status");
    assert_eq!(status.sync_peer, Some(b));
    assert_eq!(status.state, SyncState::AwaitingLocatorResponse);
    assert!(!wallet.peers().contains(a));
    assert!(has_getblocks(&drain(&mut rx_b)));

    wallet.disconnect_peer(b).expect("disconnect");
    assert_eq!(wallet.peers().peer_count(), 0);
    assert_eq!(wallet.status().expect("status").state, SyncState::Idle);
}

#[test]
fn start_requires_a_runtime() {
    let wallet = wallet(1);
    assert_eq!(wallet.start(), Err(WalletError::NoRuntime));
    assert!(!wallet.is_running());
}

#[test]
fn arbiter_snapshots_are_reachable() {
    let wallet = wallet(1);
    let set = ArbiterSet::new(vec![[7u8; 33]], vec![[8u8; 33]]);
    wallet.arbiters().put(3, &set).expect("put");
    assert_eq!(wallet.arbiters().current().expect("current"), Some(set));
    assert_eq!(wallet.arbiters().position().expect("position"), 3);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_starts_sync_and_replaces_stalled_peer() {
    let wallet = wallet(2);
    let (a, _rx_a) = wallet.connect_peer(1).expect("connect a");
    assert_eq!(wallet.status().expect("status").state, SyncState::Idle);
    // Registered without the establish hook, so only the heartbeat can
    // start the session.
    let (b, _rx_b) = wallet.peers().connect(1).expect("connect b");
    let (c, _rx_c) = wallet.peers().connect(1).expect("connect c");
    assert_eq!(wallet.status().expect("status").state, SyncState::Idle);

    wallet.start().expect("start");
    assert!(wallet.is_running());
    assert_eq!(wallet.start(), Err(WalletError::AlreadyRunning));

    tokio::time::sleep(Duration::from_millis(500)).await;
    let status = wallet.status().expect("status");
    assert_eq!(status.state, SyncState::AwaitingLocatorResponse);
    assert_eq!(status.sync_peer, Some(a));

    tokio::time::sleep(Duration::from_secs(3)).await;
    let status = wallet.status().expect("status");
    assert_eq!(status.sync_peer, Some(b));
    assert!(!wallet.peers().contains(a));

    wallet.stop().await.expect("stop");
    assert!(!wallet.is_running());
    wallet.stop().await.expect("second stop");

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(wallet.peers().contains(b));
    assert!(wallet.peers().contains(c));
    assert_eq!(wallet.status().expect("status").sync_peer, Some(b));
}
