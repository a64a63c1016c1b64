//! In-memory advisory spend locks.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use bitcoin::OutPoint;
use tokio::sync::Mutex;

use super::SpendLocks;
use crate::error::{ArkError, ArkResult};

/// Process-local [`SpendLocks`]; entries expire after their TTL even if never released
#[derive(Debug, Default)]
pub struct MemorySpendLocks {
    held: Mutex<HashMap<OutPoint, Instant>>,
}

impl MemorySpendLocks {
    /// An empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired locks
    pub async fn active(&self) -> usize {
        let now = Instant::now();
        self.held.lock().await.values().filter(|until| **until > now).count()
    }
}

impl SpendLocks for MemorySpendLocks {
    /// Expired entries are pruned before checking for contention
    async fn lock(&self, outpoints: &[OutPoint], ttl: Duration) -> ArkResult<()> {
        let now = Instant::now();
        let mut held = self.held.lock().await;
        held.retain(|_, until| *until > now);

        if let Some(outpoint) = outpoints.iter().find(|outpoint| held.contains_key(*outpoint)) {
            log::info!("Spend lock contention on {}", outpoint);
            return Err(ArkError::AlreadyLocked {
                outpoint: *outpoint,
            });
        }

        let until = now + ttl;
        held.extend(outpoints.iter().map(|outpoint| (*outpoint, until)));
        Ok(())
    }

    /// Unknown or already expired outpoints are ignored
    async fn release(&self, outpoints: &[OutPoint]) {
        let mut held = self.held.lock().await;
        for outpoint in outpoints {
            held.remove(outpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{hashes::Hash, Txid};

    fn outpoint(vout: u32) -> OutPoint {
        OutPoint::new(Txid::all_zeros(), vout)
    }

    #[tokio::test]
    async fn test_contention_is_retryable() {
        let locks = MemorySpendLocks::new();
        locks.lock(&[outpoint(0), outpoint(1)], Duration::from_secs(30)).await.unwrap();

        let err = locks.lock(&[outpoint(1)], Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, ArkError::AlreadyLocked { outpoint: o } if o == outpoint(1)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_all_or_nothing() {
        let locks = MemorySpendLocks::new();
        locks.lock(&[outpoint(1)], Duration::from_secs(30)).await.unwrap();
        assert!(locks.lock(&[outpoint(0), outpoint(1)], Duration::from_secs(30)).await.is_err());
        assert_eq!(locks.active().await, 1);
    }

    #[tokio::test]
    async fn test_release_and_expiry() {
        let locks = MemorySpendLocks::new();
        locks.lock(&[outpoint(0)], Duration::from_secs(30)).await.unwrap();
        locks.release(&[outpoint(0)]).await;
        locks.lock(&[outpoint(0)], Duration::from_millis(20)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(locks.active().await, 0);
        locks.lock(&[outpoint(0)], Duration::from_secs(30)).await.unwrap();
    }
}
