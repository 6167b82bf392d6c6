use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend-assigned ordinal. Monotonically increasing, so it doubles as the
/// newest-first sort key.
pub type SecretId = i64;

/// A stored title/value record. The owner column is set at creation and
/// never read back by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub id: SecretId,
    pub title: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Row sent on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSecret {
    pub title: String,
    pub value: String,
    pub user_id: String,
}

/// Sort newest first.
pub fn sort_newest_first(secrets: &mut [Secret]) {
    secrets.sort_by(|a, b| b.id.cmp(&a.id));
}
