mod database;
mod metrics_store;

pub use metrics_store::{MetricsStore, StoreOutcome};
