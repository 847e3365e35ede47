//! Cooperative cancellation for queued and running jobs

use crate::JobId;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// Cancellation flag shared between the scheduler and a worker.
///
/// All clones observe the same state.
///
/// # Example
///
/// ```
/// use folio_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps job IDs to their cancellation tokens.
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self { tokens: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Create and store a token for `job_id`.
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().insert(job_id, token.clone());
        token
    }

    pub fn cancel_many(&self, job_ids: &[JobId]) -> usize {
        let tokens = self.tokens.lock().unwrap();
        job_ids
            .iter()
            .filter_map(|job_id| tokens.get(job_id))
            .inspect(|token| token.cancel())
            .count()
    }

    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock().unwrap();
        tokens.values().for_each(CancellationToken::cancel);
        tokens.len()
    }

    pub fn unregister(&self, job_id: JobId) -> bool {
        self.tokens.lock().unwrap().remove(&job_id).is_some()
    }

    pub fn get(&self, job_id: JobId) -> Option<CancellationToken> {
        self.tokens.lock().unwrap().get(&job_id).cloned()
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();
        assert!(!token2.is_cancelled());

        token1.cancel();
        token1.cancel();
        assert!(token2.is_cancelled());
    }

    #[test]
    fn test_registry_cancel_many() {
        let registry = CancellationRegistry::new();
        let token1 = registry.register(1);
        let token2 = registry.register(2);
        let token3 = registry.register(3);

        assert_eq!(registry.cancel_many(&[1, 2, 999]), 2);
        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
        assert!(!token3.is_cancelled());
    }

    #[test]
    fn test_registry_unregister_and_get() {
        let registry = CancellationRegistry::default();
        let token = registry.register(1);
        assert!(registry.get(1).is_some());
        assert!(registry.get(999).is_none());

        assert!(registry.unregister(1));
        assert!(!registry.unregister(1));
        assert!(registry.get(1).is_none());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_registry_cancel_all() {
        let registry = CancellationRegistry::new();
        let token1 = registry.register(1);
        let token2 = registry.register(2);

        assert_eq!(registry.cancel_all(), 2);
        assert!(token1.is_cancelled() && token2.is_cancelled());
        assert_eq!(registry.cancel_all(), 2);
    }
}
