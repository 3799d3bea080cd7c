// Job error taxonomy. Every variant is recoverable: the job is abandoned for this cycle
// and the next trigger is the retry. Lock contention is not an error (Ok(None) / Skipped).

use thiserror::Error;

use crate::metrics_source::MetricsError;

#[derive(Debug, Error)]
pub enum JobError {
    /// Network failure or timeout talking to the metrics backend.
    #[error("metrics backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend answered with a payload we cannot interpret.
    #[error("malformed metrics response: {0}")]
    MalformedResponse(String),

    /// Transaction could not be opened or committed; nothing from this run was persisted.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
}

impl From<MetricsError> for JobError {
    fn from(e: MetricsError) -> Self {
        match e {
            MetricsError::BackendUnavailable(msg) => JobError::BackendUnavailable(msg),
            MetricsError::MalformedResponse(msg) => JobError::MalformedResponse(msg),
        }
    }
}

impl JobError {
    /// Short stable label for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::BackendUnavailable(_) => "backend_unavailable",
            JobError::MalformedResponse(_) => "malformed_response",
            JobError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}
