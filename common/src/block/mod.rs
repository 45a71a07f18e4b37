mod block;
mod header;

pub use block::{compute_txs_root, Block};
pub use header::BlockHeader;

pub type BlockNo = u64;
