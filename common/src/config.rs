// Protocol-level constants shared by every crate in the workspace.
// Node-local tunables (sync scheduling, cache sizes) live in the
// daemon's own config module.

// Smallest coin unit per whole coin
pub const COIN_VALUE: u64 = 1_000_000_000;

// Flat fee charged for every executed transaction, credited to the
// block producer through the coinbase reward
pub const COINBASE_FEE: u64 = 1_000_000;

// Maximum number of puts a single store batch may carry. Larger
// mutations (chain swaps) are split and committed in slices.
pub const TX_BATCH_MAX: usize = 10_000;

// Upper bound on transactions carried by one block
pub const MAX_BLOCK_TXS: usize = 10_000;

// Receipt status strings for the two non-error outcomes
pub const RECEIPT_STATUS_SUCCESS: &str = "SUCCESS";
pub const RECEIPT_STATUS_CREATED: &str = "CREATED";

// Reserved recipient of governance transactions
pub const GOVERNANCE_ACCOUNT: &str = "chain.gov";
