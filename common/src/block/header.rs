use crate::{
    block::BlockNo,
    crypto::{Address, Hash, Hashable},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error as FmtError, Formatter};

// Chain block header. The block hash is the digest of the serialized
// header, stable once the header is finalized.
//
// `blocks_root_hash` is the state root AFTER applying this block,
// `txs_root_hash` commits the ordered transaction list, and
// `consensus` is an opaque field owned by the consensus engine
// (vote data, proofs). The core never interprets it.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BlockHeader {
    pub block_no: BlockNo,
    pub prev_hash: Hash,
    pub blocks_root_hash: Hash,
    pub txs_root_hash: Hash,
    pub receipts_root_hash: Hash,
    pub timestamp: i64,
    pub coinbase: Address,
    #[serde(with = "hex")]
    pub consensus: Vec<u8>,
}

impl BlockHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        block_no: BlockNo,
        prev_hash: Hash,
        blocks_root_hash: Hash,
        txs_root_hash: Hash,
        receipts_root_hash: Hash,
        timestamp: i64,
        coinbase: Address,
    ) -> Self {
        Self {
            block_no,
            prev_hash,
            blocks_root_hash,
            txs_root_hash,
            receipts_root_hash,
            timestamp,
            coinbase,
            consensus: Vec::new(),
        }
    }

    pub fn block_no(&self) -> BlockNo {
        self.block_no
    }

    pub fn is_genesis(&self) -> bool {
        self.block_no == 0
    }
}

impl Serializer for BlockHeader {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.block_no);
        writer.write_hash(&self.prev_hash);
        writer.write_hash(&self.blocks_root_hash);
        writer.write_hash(&self.txs_root_hash);
        writer.write_hash(&self.receipts_root_hash);
        writer.write_i64(self.timestamp);
        self.coinbase.write(writer);
        writer.write_var_bytes(&self.consensus);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(BlockHeader {
            block_no: reader.read_u64()?,
            prev_hash: reader.read_hash()?,
            blocks_root_hash: reader.read_hash()?,
            txs_root_hash: reader.read_hash()?,
            receipts_root_hash: reader.read_hash()?,
            timestamp: reader.read_i64()?,
            coinbase: Address::read(reader)?,
            consensus: reader.read_var_bytes()?,
        })
    }
}

impl Hashable for BlockHeader {}

impl Display for BlockHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "BlockHeader[no: {}, prev: {}, state: {}, timestamp: {}]",
            self.block_no, self.prev_hash, self.blocks_root_hash, self.timestamp
        )
    }
}
