use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Failure switches for the in-memory backends.
///
/// Every store operation calls [`FaultInjector::check`] first. Switches are
/// atomics so tests can flip them while other tasks run.
#[derive(Debug, Default)]
pub struct FaultInjector {
    unavailable: AtomicBool,
    access_denied: AtomicBool,
    fail_next: AtomicUsize,
    latency_ms: AtomicU64,
    denied_keys: RwLock<HashSet<String>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every operation fail with [`StoreError::AccessDenied`].
    pub fn set_access_denied(&self, denied: bool) {
        self.access_denied.store(denied, Ordering::SeqCst);
    }

    /// Fail the next `count` operations as unavailable, then recover.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Delay every operation, to exercise caller timeouts.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Deny access to one key only.
    pub fn deny_key(&self, key: impl Into<String>) {
        if let Ok(mut keys) = self.denied_keys.write() {
            keys.insert(key.into());
        }
    }

    /// Apply latency and return the configured failure for `op` on `key`.
    pub async fn check(&self, op: &str, key: &str) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{op}: backend offline")));
        }
        let pending = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(StoreError::Unavailable(format!("{op}: injected failure")));
        }
        if self.access_denied.load(Ordering::SeqCst) {
            return Err(StoreError::AccessDenied(format!("{op} on {key}")));
        }
        let denied = self
            .denied_keys
            .read()
            .map(|keys| keys.contains(key))
            .unwrap_or(false);
        if denied {
            return Err(StoreError::AccessDenied(format!("{op} on {key}")));
        }
        Ok(())
    }
}
