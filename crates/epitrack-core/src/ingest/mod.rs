//! Ingestion capability invoked by the scheduler.
//!
//! The ingester itself (fetching, parsing, NLP extraction) lives outside this
//! crate. The scheduler only needs something it can run once per fire and
//! that classifies the result.

mod command;

pub use command::CommandInvoker;

use serde::{Deserialize, Serialize};

/// Result of one ingestion pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Finished cleanly; carries captured standard output
    Success(String),
    /// Could not be launched, timed out, or exited non-zero
    ProcessError(String),
    /// Exited cleanly but wrote to its error stream
    StreamError(String),
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, IngestOutcome::Success(_))
    }

    /// Short label used in logs and status output
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Success(_) => "success",
            IngestOutcome::ProcessError(_) => "process error",
            IngestOutcome::StreamError(_) => "stream error",
        }
    }
}

/// Runs one ingestion pass. Implementations must not retry; the next
/// scheduled fire is the only retry mechanism.
#[async_trait::async_trait]
pub trait IngestionInvoker: Send + Sync {
    /// Human-readable description of what gets run
    fn describe(&self) -> String;

    async fn invoke(&self) -> IngestOutcome;
}
