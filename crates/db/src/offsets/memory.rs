use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::offsets::models::StoredOffset;
use crate::offsets::repositories::OffsetRepository;
use ghtap_common::error::TapResult;

/// Process-local offsets, lost on exit. Used when no database is configured.
#[derive(Default)]
pub struct MemoryOffsetRepository {
    offsets: Mutex<HashMap<(String, String), StoredOffset>>,
}

impl MemoryOffsetRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetRepository for MemoryOffsetRepository {
    async fn load(&self, owner: &str, repository: &str) -> TapResult<Option<StoredOffset>> {
        let offsets = self.offsets.lock().await;
        Ok(offsets
            .get(&(owner.to_owned(), repository.to_owned()))
            .cloned())
    }

    async fn save(
        &self,
        owner: &str,
        repository: &str,
        offset_value: &serde_json::Value,
    ) -> TapResult<StoredOffset> {
        let now = Utc::now();
        let mut offsets = self.offsets.lock().await;
        let entry = offsets
            .entry((owner.to_owned(), repository.to_owned()))
            .or_insert_with(|| StoredOffset {
                id: Uuid::new_v4(),
                owner: owner.to_owned(),
                repository: repository.to_owned(),
                offset_value: serde_json::Value::Null,
                created_at: now,
                updated_at: now,
            });
        entry.offset_value = offset_value.clone();
        entry.updated_at = now;
        Ok(entry.clone())
    }
}
