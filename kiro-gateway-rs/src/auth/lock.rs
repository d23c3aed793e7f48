//! Distributed token-refresh lock.
//!
//! Guards the OAuth refresh round trip so concurrent callers (tasks in this
//! process, or other processes sharing a Redis-backed [`RefreshLock`]) never
//! hit the IdP concurrently for the same account.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

/// Set-if-not-exists-with-TTL lock keyed by account identifier.
///
/// `try_acquire` must be atomic: only one caller across all holders of a
/// shared backend may succeed for a given `key` until the TTL lapses or
/// `release` is called with the same `nonce`.
#[async_trait]
pub trait RefreshLock: Send + Sync {
    /// Attempt to acquire the lock. Returns `true` if acquired.
    async fn try_acquire(&self, key: &str, nonce: &str, ttl: Duration) -> Result<bool>;

    /// Release the lock, but only if still held by `nonce`.
    async fn release(&self, key: &str, nonce: &str) -> Result<()>;
}

/// Single-process lock backed by a mutex-guarded map.
///
/// Sufficient when a `KiroAuthManager` is not shared across processes; a
/// Redis-backed implementation provides the same contract across processes.
#[derive(Default)]
pub struct InMemoryRefreshLock {
    holders: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryRefreshLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshLock for InMemoryRefreshLock {
    async fn try_acquire(&self, key: &str, nonce: &str, ttl: Duration) -> Result<bool> {
        let mut holders = self.holders.lock().await;
        let now = Instant::now();

        if let Some((_, expires_at)) = holders.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }

        holders.insert(key.to_string(), (nonce.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, nonce: &str) -> Result<()> {
        let mut holders = self.holders.lock().await;
        if let Some((held_by, _)) = holders.get(key) {
            if held_by == nonce {
                holders.remove(key);
            }
        }
        Ok(())
    }
}

/// Deterministic pseudo-jitter derived from a seed string, bounded to
/// `[0, max_millis)`. Avoids pulling in a `rand` dependency for a value that
/// only needs to avoid synchronized polling, not cryptographic randomness.
pub fn jitter_millis(seed: &str, max_millis: u64) -> u64 {
    if max_millis == 0 {
        return 0;
    }
    let hash = seed
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    hash % max_millis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_while_first_holds() {
        let lock = InMemoryRefreshLock::new();
        assert!(lock.try_acquire("acct-1", "nonce-a", Duration::from_secs(30)).await.unwrap());
        assert!(!lock.try_acquire("acct-1", "nonce-b", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn release_by_wrong_nonce_is_a_no_op() {
        let lock = InMemoryRefreshLock::new();
        lock.try_acquire("acct-1", "nonce-a", Duration::from_secs(30)).await.unwrap();
        lock.release("acct-1", "nonce-b").await.unwrap();
        assert!(!lock.try_acquire("acct-1", "nonce-c", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_after_release_succeeds() {
        let lock = InMemoryRefreshLock::new();
        lock.try_acquire("acct-1", "nonce-a", Duration::from_secs(30)).await.unwrap();
        lock.release("acct-1", "nonce-a").await.unwrap();
        assert!(lock.try_acquire("acct-1", "nonce-b", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_after_ttl_expiry_succeeds() {
        let lock = InMemoryRefreshLock::new();
        lock.try_acquire("acct-1", "nonce-a", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lock.try_acquire("acct-1", "nonce-b", Duration::from_secs(30)).await.unwrap());
    }

    #[test]
    fn jitter_is_bounded_and_deterministic() {
        let a = jitter_millis("nonce-xyz", 1000);
        let b = jitter_millis("nonce-xyz", 1000);
        assert_eq!(a, b);
        assert!(a < 1000);
    }
}
