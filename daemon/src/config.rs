use std::time::Duration;

// Node-local tunables for the chain core and the sync engine.
// Protocol constants shared with other tools live in stele_common.

// Default directory for the chain store
pub const DEFAULT_DATA_DIR: &str = "stele-data";

// Scheduler wakeup period of the block fetcher
pub const SCHED_TICK: Duration = Duration::from_millis(100);

// A fetch task not answered within this window is requeued and its
// peer penalized
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(100);

// Maximum number of block hashes a single fetch task carries
pub const MAX_FETCH_TASK: usize = 16;

// A peer failing more often than this is blacklisted for the session
pub const MAX_PEER_FAIL_COUNT: u32 = 1;

// Number of block hashes requested from the peer per round
pub const DFLT_HASH_REQ_SIZE: u64 = 100;

// Upper bound of blocks a peer may return for one chunk request
pub const DFLT_BLOCK_FETCH_SIZE: usize = 100;

// Maximum fetch tasks in flight at once
pub const DFLT_BLOCK_FETCH_TASKS: usize = 5;

// Capacity of the hash-set channel between hash fetcher and block
// fetcher, bounds the number of pending hash batches in memory
pub const MAX_BLOCK_PENDING_TASKS: usize = 10;

// Orphan pool bounds
pub const ORPHAN_CACHE_CAPACITY: usize = 64;
pub const ORPHAN_TTL_SECONDS: u64 = 300;

// LRU cache entries in front of the block tree
pub const DEFAULT_BLOCK_CACHE_SIZE: usize = 1024;

// Mailbox capacities of the chain actor and the sync engine
pub const CHAIN_MAILBOX_SIZE: usize = 256;
pub const SYNC_MAILBOX_SIZE: usize = 256;
pub const OUTBOUND_QUEUE_SIZE: usize = 1024;

// How long the finder waits for one ancestor answer
pub const FINDER_TIMEOUT: Duration = Duration::from_secs(30);

// Runtime options resolved from CLI flags, shared across the core.
#[derive(Clone, Debug)]
pub struct ChainConfig {
    // Enforce ed25519 signatures on transactions. Disabled in dev
    // chains where addresses are readable names.
    pub verify_signatures: bool,
    // Start the sync pipeline on orphan blocks instead of asking for
    // missing blocks by anchors
    pub fast_sync: bool,
    pub orphan_capacity: usize,
    pub orphan_ttl: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            verify_signatures: true,
            fast_sync: true,
            orphan_capacity: ORPHAN_CACHE_CAPACITY,
            orphan_ttl: Duration::from_secs(ORPHAN_TTL_SECONDS),
        }
    }
}

impl ChainConfig {
    // Dev chains use name addresses which cannot carry signatures
    pub fn dev() -> Self {
        ChainConfig {
            verify_signatures: false,
            ..Default::default()
        }
    }
}
