use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The last offset recorded for one owner/repository partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOffset {
    pub id: Uuid,
    pub owner: String,
    pub repository: String,
    pub offset_value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
