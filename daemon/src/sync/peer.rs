use crate::bus::PeerId;
use log::{debug, warn};
use std::collections::VecDeque;

// One peer participating in a sync session. `seq_no` counts completed
// assignments, `fail_count` drives blacklisting.
#[derive(Clone, Debug)]
pub struct SyncPeer {
    pub id: PeerId,
    pub seq_no: u64,
    pub fail_count: u32,
}

impl SyncPeer {
    fn new(id: PeerId) -> Self {
        SyncPeer {
            id,
            seq_no: 0,
            fail_count: 0,
        }
    }
}

// Download peers of one sync session. A peer is either free, assigned
// to a running task (held by the task itself), or bad.
pub struct PeerSet {
    free: VecDeque<SyncPeer>,
    bad: Vec<SyncPeer>,
    total: usize,
}

impl PeerSet {
    pub fn new(ids: impl IntoIterator<Item = PeerId>) -> Self {
        let free: VecDeque<SyncPeer> = ids.into_iter().map(SyncPeer::new).collect();
        let total = free.len();
        PeerSet { free, bad: Vec::new(), total }
    }

    pub fn pop_free(&mut self) -> Option<SyncPeer> {
        self.free.pop_front()
    }

    // Return a peer after a successful task
    pub fn release(&mut self, mut peer: SyncPeer) {
        peer.seq_no += 1;
        self.free.push_back(peer);
    }

    // Count a failure against the peer. Over the limit it moves to
    // the bad list and never gets another task this session.
    pub fn penalize(&mut self, mut peer: SyncPeer, max_fail_count: u32) {
        peer.fail_count += 1;
        if peer.fail_count > max_fail_count {
            warn!("peer {} blacklisted after {} failures", peer.id, peer.fail_count);
            self.bad.push(peer);
        } else {
            debug!("peer {} failed ({}/{})", peer.id, peer.fail_count, max_fail_count);
            self.free.push_back(peer);
        }
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    // Every known peer is blacklisted
    pub fn all_bad(&self) -> bool {
        self.total > 0 && self.bad.len() == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_penalize_until_bad() {
        let mut peers = PeerSet::new(["p1".to_string()]);
        let peer = peers.pop_free().unwrap();
        peers.penalize(peer, 1);
        // one failure is tolerated
        assert!(!peers.all_bad());
        let peer = peers.pop_free().unwrap();
        peers.penalize(peer, 1);
        assert!(peers.all_bad());
        assert!(peers.pop_free().is_none());
    }

    #[test]
    fn test_release_increments_seq() {
        let mut peers = PeerSet::new(["p1".to_string()]);
        let peer = peers.pop_free().unwrap();
        peers.release(peer);
        assert_eq!(peers.pop_free().unwrap().seq_no, 1);
    }
}
