use crate::core::state::StateVersion;
use log::trace;
use lru::LruCache;
use metrics::counter;
use std::{num::NonZeroUsize, sync::Arc};
use stele_common::{account::Account, crypto::AccountId, transaction::Transaction};
use tokio::sync::mpsc;

const PRELOAD_QUEUE: usize = 32;
const PRELOAD_CACHE: usize = 256;

pub struct PreloadRequest {
    tx: Arc<Transaction>,
    base: Arc<StateVersion>,
}

// Advisory warm-up of the accounts the next transaction will touch.
// Requests are dropped whenever the queue is full and results are
// never consulted for execution, so the service cannot influence
// determinism.
#[derive(Clone)]
pub struct PreloadHandle {
    tx: mpsc::Sender<PreloadRequest>,
}

impl PreloadHandle {
    pub fn request(&self, tx: Arc<Transaction>, base: Arc<StateVersion>) {
        // best effort only
        let _ = self.tx.try_send(PreloadRequest { tx, base });
    }
}

pub fn spawn_preload_service() -> PreloadHandle {
    let (tx, mut rx) = mpsc::channel::<PreloadRequest>(PRELOAD_QUEUE);
    tokio::spawn(async move {
        let mut warm: LruCache<AccountId, Account> =
            LruCache::new(NonZeroUsize::new(PRELOAD_CACHE).unwrap());
        while let Some(request) = rx.recv().await {
            let sender_id = request.tx.sender().id();
            if let Some(account) = request.base.accounts.get(&sender_id) {
                warm.put(sender_id, account.clone());
            }
            if !request.tx.recipient().is_empty() {
                let recipient_id = request.tx.recipient().id();
                if let Some(account) = request.base.accounts.get(&recipient_id) {
                    warm.put(recipient_id, account.clone());
                }
            }
            counter!("stele_preload_requests").increment(1);
            trace!("preloaded accounts for {}", request.tx);
        }
    });
    PreloadHandle { tx }
}
