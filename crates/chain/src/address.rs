//! Watched addresses and the outputs they own.

use std::collections::{BTreeSet, HashSet};

use spv_primitives::{BloomFilter, BloomUpdate, OutPoint, ProgramHash, Transaction};

#[derive(Clone, Debug, Default)]
pub struct AddressBook {
    addresses: BTreeSet<ProgramHash>,
    outpoints: HashSet<OutPoint>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: ProgramHash) -> bool {
        self.addresses.insert(address)
    }

    pub fn contains(&self, address: &ProgramHash) -> bool {
        self.addresses.contains(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &ProgramHash> {
        self.addresses.iter()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Pays a watched address or spends an output one of them owns.
    pub fn is_relevant(&self, tx: &Transaction) -> bool {
        tx.outputs
            .iter()
            .any(|output| self.addresses.contains(&output.program_hash))
            || tx
                .inputs
                .iter()
                .any(|input| self.outpoints.contains(&input.previous))
    }

    /// Remembers the outputs of `tx` that pay a watched address.
    pub fn track_outputs(&mut self, tx: &Transaction) {
        let txid = tx.txid();
        for (index, output) in tx.outputs.iter().enumerate() {
            if !self.addresses.contains(&output.program_hash) {
                continue;
            }
            if let Ok(index) = u16::try_from(index) {
                self.outpoints.insert(OutPoint { txid, index });
            }
        }
    }

    pub fn owns(&self, outpoint: &OutPoint) -> bool {
        self.outpoints.contains(outpoint)
    }

    pub fn build_filter(&self, fp_rate: f64, tweak: Option<u32>) -> BloomFilter {
        let elements = self.addresses.len() + self.outpoints.len();
        let mut filter = match tweak {
            Some(tweak) => BloomFilter::with_tweak(elements, fp_rate, tweak, BloomUpdate::All),
            None => BloomFilter::new(elements, fp_rate, BloomUpdate::All),
        };
        for address in &self.addresses {
            filter.insert(address.as_bytes());
        }
        for outpoint in &self.outpoints {
            filter.insert_outpoint(outpoint);
        }
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_primitives::transaction::PREFIX_STANDARD;
    use spv_primitives::{TxIn, TxOut};

    fn paying(address: ProgramHash, tag: u8) -> Transaction {
        Transaction {
            version: 0,
            tx_type: 2,
            payload: vec![tag],
            inputs: Vec::new(),
            outputs: vec![TxOut {
                value: 10,
                output_lock: 0,
                program_hash: address,
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn spends_of_owned_outputs_are_relevant() {
        let mine = ProgramHash::from_redeem_script(PREFIX_STANDARD, b"mine");
        let other = ProgramHash::from_redeem_script(PREFIX_STANDARD, b"other");
        let mut book = AddressBook::new();
        assert!(book.insert(mine));
        assert!(!book.insert(mine));

        let funding = paying(mine, 1);
        assert!(book.is_relevant(&funding));
        assert!(!book.is_relevant(&paying(other, 2)));
        book.track_outputs(&funding);

        let mut spend = paying(other, 3);
        spend.inputs.push(TxIn {
            previous: OutPoint {
                txid: funding.txid(),
                index: 0,
            },
            sequence: u32::MAX,
        });
        assert!(book.is_relevant(&spend));
    }

    #[test]
    fn filter_covers_addresses_and_outpoints() {
        let mine = ProgramHash::from_redeem_script(PREFIX_STANDARD, b"mine");
        let mut book = AddressBook::new();
        book.insert(mine);
        let funding = paying(mine, 1);
        book.track_outputs(&funding);

        let filter = book.build_filter(0.0001, Some(11));
        assert_eq!(filter.tweak(), 11);
        assert!(filter.contains(mine.as_bytes()));
        assert!(filter.contains_outpoint(&OutPoint {
            txid: funding.txid(),
            index: 0,
        }));
    }
}
