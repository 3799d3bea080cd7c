// Library for the daemon binary and integration tests

pub mod config;
pub mod error;
pub mod metrics_source;
pub mod models;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod version;
