use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

use super::{apply_update, LinkageStore, LinkageUpdate, StoredLinkage};

/// Linkage store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryLinkageStore {
    records: Mutex<HashMap<String, StoredLinkage>>,
}

impl MemoryLinkageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinkageStore for MemoryLinkageStore {
    async fn load(&self, job: &str) -> StoredLinkage {
        self.records
            .lock()
            .await
            .get(job)
            .cloned()
            .unwrap_or_default()
    }

    async fn save(&self, job: &str, update: LinkageUpdate) -> Result<u64> {
        let mut records = self.records.lock().await;
        let current = records.entry(job.to_string()).or_default();
        apply_update(job, current, update)
    }
}
