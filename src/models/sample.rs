// One node's error rates at a point in time. Unique per (node_id, timestamp).

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub node_id: String,
    /// Second precision; sub-second parts are dropped before storage.
    pub timestamp: DateTime<Utc>,
    pub errors_last_hour: f64,
    pub errors_last_3_days: f64,
}

impl Sample {
    pub fn new(
        node_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        errors_last_hour: f64,
        errors_last_3_days: f64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp: truncate_to_seconds(timestamp),
            errors_last_hour,
            errors_last_3_days,
        }
    }
}

/// Drops sub-second precision so upsert keys match across retries within the same second.
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(0)
}
