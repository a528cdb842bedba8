//! Striped per-wallet mutexes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// A fixed table of async mutexes indexed by a hash of the wallet id.
///
/// Two mutations of the same wallet in this process always serialize on the
/// same stripe. Unrelated wallets may share a stripe, which only costs
/// throughput. Cross-process races are caught by the store's version check.
pub struct WalletLocks {
    stripes: Vec<Mutex<()>>,
}

impl WalletLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, wallet_id: Uuid) -> usize {
        let mut hasher = DefaultHasher::new();
        wallet_id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub async fn lock(&self, wallet_id: Uuid) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(wallet_id)].lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_wallet_same_stripe() {
        let locks = WalletLocks::new(16);
        let id = Uuid::now_v7();
        assert_eq!(locks.stripe(id), locks.stripe(id));
        assert!(locks.stripe(id) < 16);
    }

    #[test]
    fn zero_stripes_is_clamped() {
        let locks = WalletLocks::new(0);
        assert_eq!(locks.stripe(Uuid::now_v7()), 0);
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let locks = WalletLocks::new(4);
        let id = Uuid::now_v7();
        let guard = locks.lock(id).await;
        assert!(locks.stripes[locks.stripe(id)].try_lock().is_err());
        drop(guard);
        assert!(locks.stripes[locks.stripe(id)].try_lock().is_ok());
    }
}
