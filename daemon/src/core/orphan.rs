use indexmap::IndexMap;
use log::{debug, trace};
use std::time::{Duration, Instant};
use stele_common::{
    block::Block,
    crypto::{Hash, Hashable},
};

struct OrphanEntry {
    block: Block,
    expiry: Instant,
}

// Bounded cache of blocks whose parent is not known yet, keyed by
// block hash in arrival order. When full the oldest entry is evicted
// first; expired entries are swept on insert.
pub struct OrphanPool {
    entries: IndexMap<Hash, OrphanEntry>,
    capacity: usize,
    ttl: Duration,
}

impl OrphanPool {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        OrphanPool {
            entries: IndexMap::new(),
            capacity,
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    // Idempotent: re-adding a known orphan refreshes nothing
    pub fn add(&mut self, block: Block) {
        let hash = block.hash();
        if self.entries.contains_key(&hash) {
            trace!("orphan {} already cached", hash);
            return;
        }

        self.sweep_expired();
        if self.entries.len() >= self.capacity {
            if let Some((evicted, _)) = self.entries.shift_remove_index(0) {
                debug!("orphan pool full, evicting oldest {}", evicted);
            }
        }

        debug!("caching orphan {} ({})", hash, block);
        self.entries.insert(
            hash,
            OrphanEntry {
                block,
                expiry: Instant::now() + self.ttl,
            },
        );
    }

    // Return and remove a cached child of `parent_hash`, if any
    pub fn resolve(&mut self, parent_hash: &Hash) -> Option<Block> {
        let hash = self
            .entries
            .iter()
            .find(|(_, entry)| entry.block.prev_hash == *parent_hash)
            .map(|(hash, _)| hash.clone())?;
        let entry = self.entries.shift_remove(&hash)?;
        debug!("resolved orphan {} waiting on parent {}", hash, parent_hash);
        Some(entry.block)
    }

    fn sweep_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|hash, entry| {
            let keep = entry.expiry > now;
            if !keep {
                trace!("orphan {} expired", hash);
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stele_common::{block::BlockHeader, crypto::Address};

    fn orphan(no: u64, prev: Hash) -> Block {
        let header = BlockHeader::new(
            no,
            prev,
            Hash::zero(),
            Hash::zero(),
            Hash::zero(),
            no as i64,
            Address::from_name("bp"),
        );
        Block::new(header, Vec::new())
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut pool = OrphanPool::new(4, Duration::from_secs(60));
        let block = orphan(5, Hash::zero());
        pool.add(block.clone());
        pool.add(block);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut pool = OrphanPool::new(2, Duration::from_secs(60));
        let first = orphan(1, Hash::zero());
        let first_hash = first.hash();
        pool.add(first);
        pool.add(orphan(2, Hash::max()));
        pool.add(orphan(3, stele_common::crypto::hash(b"p")));
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&first_hash));
    }

    #[test]
    fn test_resolve_removes_child() {
        let mut pool = OrphanPool::new(4, Duration::from_secs(60));
        let parent_hash = stele_common::crypto::hash(b"parent");
        pool.add(orphan(7, parent_hash.clone()));
        let resolved = pool.resolve(&parent_hash).unwrap();
        assert_eq!(resolved.prev_hash, parent_hash);
        assert!(pool.is_empty());
        assert!(pool.resolve(&parent_hash).is_none());
    }

    #[test]
    fn test_expired_entries_swept() {
        let mut pool = OrphanPool::new(4, Duration::from_millis(0));
        let parent = stele_common::crypto::hash(b"p");
        pool.add(orphan(1, parent.clone()));
        std::thread::sleep(Duration::from_millis(5));
        // sweep happens on the next insert
        pool.add(orphan(2, Hash::max()));
        assert!(pool.resolve(&parent).is_none());
    }
}
