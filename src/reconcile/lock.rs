use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-job mutual exclusion.
///
/// Each job gets its own lock so evaluations for the same job run one after
/// another while different jobs proceed independently.
#[derive(Default)]
pub struct JobLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a job. Released when the guard drops.
    pub async fn acquire(&self, job: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(job.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_job_is_exclusive() {
        let locks = JobLocks::new();
        let _held = locks.acquire("api").await;

        let waited = tokio::time::timeout(Duration::from_millis(50), locks.acquire("api")).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_different_jobs_do_not_block() {
        let locks = JobLocks::new();
        let _held = locks.acquire("api").await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire("web")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_lock_is_released_on_drop() {
        let locks = JobLocks::new();
        drop(locks.acquire("api").await);

        let again = tokio::time::timeout(Duration::from_millis(50), locks.acquire("api")).await;
        assert!(again.is_ok());
    }
}
