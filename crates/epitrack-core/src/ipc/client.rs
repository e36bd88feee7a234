//! IPC client for connecting to the daemon

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::*;
use crate::stats::StatsSnapshot;
use crate::topics::RecentTopic;
use crate::{Error, Result};

/// Client for communicating with the daemon
#[derive(Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Check if daemon is running by sending a ping
    pub async fn ping(&self) -> Result<bool> {
        match self.call(methods::PING, serde_json::Value::Null).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let result = self.call(methods::STATUS, serde_json::Value::Null).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Fresh stats snapshot computed by the daemon
    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let result = self.call(methods::STATS_GET, serde_json::Value::Null).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Recent topics; `None` uses the daemon's configured limit
    pub async fn recent_topics(&self, limit: Option<u32>) -> Result<Vec<RecentTopic>> {
        let params = serde_json::to_value(TopicsParams { limit })?;
        let result = self.call(methods::TOPICS_RECENT, params).await?;
        let response: TopicsResponse = serde_json::from_value(result)?;
        Ok(response.topics)
    }

    /// Ask the daemon to run ingestion now. Returns false if a run was
    /// already in progress.
    pub async fn trigger_ingest(&self) -> Result<bool> {
        let result = self.call(methods::INGEST_TRIGGER, serde_json::Value::Null).await?;
        let response: TriggerResponse = serde_json::from_value(result)?;
        Ok(response.started)
    }

    /// Send a request and receive a response
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Other(format!(
                "Failed to connect to daemon at {}: {}. Is the daemon running?",
                self.socket_path.display(),
                e
            ))
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request = Request::new(method).with_params(params);
        let request_json = serde_json::to_string(&request)?;

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut response_line = String::new();
        reader.read_line(&mut response_line).await?;

        let response: Response = serde_json::from_str(&response_line)?;

        if let Some(error) = response.error {
            return Err(match error.code {
                ERR_INVALID_PARAMS => Error::InvalidArgument(error.message),
                code => Error::Other(format!("RPC error {}: {}", code, error.message)),
            });
        }

        response.result.ok_or_else(|| Error::Other("Empty response".to_string()))
    }
}

/// Check if daemon is reachable
pub async fn is_daemon_running(socket_path: &std::path::Path) -> bool {
    let client = DaemonClient::new(socket_path.to_path_buf());
    client.ping().await.unwrap_or(false)
}
