// Fleet-wide rollup: one row per aggregation run.
// Averages are None when no samples existed at aggregation time (distinct from 0.0).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedSample {
    pub timestamp: DateTime<Utc>,
    pub avg_errors_last_hour: Option<f64>,
    pub avg_errors_last_3_days: Option<f64>,
}
