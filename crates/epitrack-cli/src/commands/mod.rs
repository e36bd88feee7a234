pub mod daemon;
pub mod diagnose;
pub mod import;
pub mod ingest;
pub mod stats;
pub mod topics;
pub mod trigger;
