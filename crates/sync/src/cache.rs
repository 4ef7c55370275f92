//! Recently seen transaction ids, bounded, oldest forgotten first.

use std::collections::{HashSet, VecDeque};

use spv_primitives::Hash256;

pub struct TxCache {
    seen: HashSet<Hash256>,
    order: VecDeque<Hash256>,
    cap: usize,
}

impl TxCache {
    pub fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap,
        }
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.seen.contains(txid)
    }

    pub fn insert(&mut self, txid: Hash256) {
        if self.cap == 0 || !self.seen.insert(txid) {
            return;
        }
        self.order.push_back(txid);
        while self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forgets_oldest_past_capacity() {
        let mut cache = TxCache::new(2);
        cache.insert([1; 32]);
        cache.insert([2; 32]);
        cache.insert([1; 32]);
        cache.insert([3; 32]);
        assert!(!cache.contains(&[1; 32]));
        assert!(cache.contains(&[2; 32]));
        assert!(cache.contains(&[3; 32]));
        assert_eq!(cache.len(), 2);
    }
}
