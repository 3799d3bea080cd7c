// Domain models: per-node error samples and fleet-wide rollups

mod aggregation;
mod sample;

pub use aggregation::AggregatedSample;
pub use sample::{Sample, truncate_to_seconds};
