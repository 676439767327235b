use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::domain::artifacts::FileId;
use crate::domain::quote::QuoteId;
use crate::errors::EngineError;

/// TTL protects against a crashed holder; it is intentionally shorter than
/// the wait bound, which protects the caller against transient contention.
pub const LOCK_TTL: Duration = Duration::from_secs(10);
pub const LOCK_MAX_WAIT: Duration = Duration::from_secs(30);

pub fn create_quote_key() -> String {
    "create-quote".to_string()
}

pub fn update_quote_key(id: &QuoteId) -> String {
    format!("update-quote:{}", id.0)
}

pub fn update_quote_file_key(id: &FileId) -> String {
    format!("update-quote-file:{}", id.0)
}

/// Advisory lock handle. Dropping the guard releases the lock; `release`
/// makes the hand-back explicit.
pub struct LockGuard {
    key: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(key: impl Into<String>, release: Box<dyn FnOnce() + Send>) -> Self {
        Self { key: key.into(), release: Some(release) }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish_non_exhaustive()
    }
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Blocks up to `max_wait` for the named lock; past the bound the call
    /// fails with `EngineError::LockTimeout` and nothing was acquired.
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        max_wait: Duration,
    ) -> Result<LockGuard, EngineError>;
}

/// Runs `body` under the named lock, releasing it on both the success and
/// the error path.
pub async fn with_lock<M, T, F, Fut>(
    manager: &M,
    key: &str,
    ttl: Duration,
    max_wait: Duration,
    body: F,
) -> Result<T, EngineError>
where
    M: LockManager + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let guard = manager.acquire(key, ttl, max_wait).await?;
    let result = body().await;
    guard.release();
    result
}

#[derive(Clone, Debug)]
struct HeldLock {
    token: u64,
    expires_at: Instant,
}

/// In-process keyed advisory locks with TTL-based stale-holder expiry.
/// Acquisition polls until the wait bound elapses; there is no fairness
/// guarantee between waiters.
pub struct KeyedLockManager {
    held: Arc<Mutex<HashMap<String, HeldLock>>>,
    tokens: AtomicU64,
    poll_interval: Duration,
}

impl Default for KeyedLockManager {
    fn default() -> Self {
        Self::with_poll_interval(Duration::from_millis(25))
    }
}

impl KeyedLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            tokens: AtomicU64::new(1),
            poll_interval,
        }
    }

    fn try_acquire(&self, key: &str, ttl: Duration) -> Option<u64> {
        let mut held = lock_table(&self.held);
        let now = Instant::now();
        let free = match held.get(key) {
            None => true,
            Some(existing) => existing.expires_at <= now,
        };
        if !free {
            return None;
        }
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        held.insert(key.to_string(), HeldLock { token, expires_at: now + ttl });
        Some(token)
    }
}

#[async_trait]
impl LockManager for KeyedLockManager {
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        max_wait: Duration,
    ) -> Result<LockGuard, EngineError> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(token) = self.try_acquire(key, ttl) {
                let held = Arc::clone(&self.held);
                let owned_key = key.to_string();
                let release = Box::new(move || {
                    let mut table = lock_table(&held);
                    // a stale entry may already belong to a new holder
                    if table.get(&owned_key).is_some_and(|entry| entry.token == token) {
                        table.remove(&owned_key);
                    }
                });
                return Ok(LockGuard::new(key, release));
            }
            if Instant::now() >= deadline {
                return Err(EngineError::LockTimeout { key: key.to_string() });
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn lock_table<'a>(
    held: &'a Mutex<HashMap<String, HeldLock>>,
) -> std::sync::MutexGuard<'a, HashMap<String, HeldLock>> {
    match held.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{update_quote_key, with_lock, KeyedLockManager, LockManager};
    use crate::domain::quote::QuoteId;
    use crate::errors::EngineError;

    const TTL: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn second_acquire_on_a_held_key_times_out() {
        let manager = KeyedLockManager::with_poll_interval(Duration::from_millis(5));
        let key = update_quote_key(&QuoteId("q-1".to_string()));
        let _guard = manager.acquire(&key, TTL, Duration::from_millis(50)).await.expect("first");

        let error = manager
            .acquire(&key, TTL, Duration::from_millis(50))
            .await
            .expect_err("held lock must time out");
        assert!(matches!(error, EngineError::LockTimeout { key: k } if k == key));
    }

    #[tokio::test]
    async fn dropping_the_guard_releases_the_key() {
        let manager = KeyedLockManager::with_poll_interval(Duration::from_millis(5));
        let guard = manager.acquire("create-quote", TTL, Duration::from_millis(50)).await.unwrap();
        drop(guard);

        manager
            .acquire("create-quote", TTL, Duration::from_millis(50))
            .await
            .expect("released key is acquirable again");
    }

    #[tokio::test]
    async fn expired_ttl_lets_a_waiter_take_over() {
        let manager = KeyedLockManager::with_poll_interval(Duration::from_millis(5));
        let _stale = manager
            .acquire("update-quote:q-2", Duration::from_millis(20), Duration::from_millis(50))
            .await
            .unwrap();

        // holder never released; the TTL expires while we wait
        manager
            .acquire("update-quote:q-2", TTL, Duration::from_millis(200))
            .await
            .expect("stale holder must be expired");
    }

    #[tokio::test]
    async fn with_lock_releases_on_the_error_path() {
        let manager = KeyedLockManager::with_poll_interval(Duration::from_millis(5));
        let result: Result<(), _> =
            with_lock(&manager, "create-quote", TTL, Duration::from_millis(50), || async {
                Err(EngineError::Validation("bad request".to_string()))
            })
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));

        manager
            .acquire("create-quote", TTL, Duration::from_millis(50))
            .await
            .expect("lock was released despite the error");
    }

    #[tokio::test]
    async fn waiters_never_overlap_the_critical_section() {
        let manager = Arc::new(KeyedLockManager::with_poll_interval(Duration::from_millis(2)));
        let busy = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let busy = Arc::clone(&busy);
            handles.push(tokio::spawn(async move {
                let guard =
                    manager.acquire("update-quote:q-3", TTL, Duration::from_secs(5)).await.unwrap();
                assert!(!busy.swap(true, Ordering::SeqCst), "two holders inside the section");
                tokio::time::sleep(Duration::from_millis(5)).await;
                busy.store(false, Ordering::SeqCst);
                guard.release();
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }
    }
}
