use crate::core::{
    error::ChainError,
    storage::{MetaProvider, StoreBatch, GENESIS_KEY},
};
use async_trait::async_trait;
use stele_common::{genesis::Genesis, serializer::Serializer};

use super::SledChainStore;

#[async_trait]
impl MetaProvider for SledChainStore {
    async fn get_genesis(&self) -> Result<Option<Genesis>, ChainError> {
        match self.meta.get(GENESIS_KEY)? {
            Some(raw) => Ok(Some(Genesis::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_genesis(&self, batch: &mut StoreBatch, genesis: &Genesis) {
        batch.put_meta(GENESIS_KEY, genesis.to_bytes());
    }
}
