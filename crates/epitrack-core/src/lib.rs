pub mod config;
pub mod error;
pub mod ingest;
pub mod ipc;
pub mod scheduler;
pub mod stats;
pub mod storage;
pub mod topics;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use ipc::{DaemonClient, DaemonServer};
pub use stats::{StatsAggregator, StatsSnapshot};
pub use topics::{RecentTopic, RecentTopicsDeriver};
