use async_trait::async_trait;

use crate::offsets::models::StoredOffset;
use ghtap_common::error::TapResult;

#[async_trait]
pub trait OffsetRepository: Send + Sync {
    /// The offset last saved for a partition, if any.
    async fn load(&self, owner: &str, repository: &str) -> TapResult<Option<StoredOffset>>;

    /// Insert or overwrite the offset of a partition.
    async fn save(
        &self,
        owner: &str,
        repository: &str,
        offset_value: &serde_json::Value,
    ) -> TapResult<StoredOffset>;
}
