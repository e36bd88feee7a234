//! IPC protocol definitions for daemon-client communication
//!
//! Newline-delimited JSON-RPC style request/response over a Unix socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::{JobRun, SchedulerState};
use crate::topics::RecentTopic;

/// JSON-RPC style request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// JSON-RPC style response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Uuid, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Uuid, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn ok(id: Uuid) -> Self {
        Self::success(id, serde_json::json!({"ok": true}))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// Error codes
pub const ERR_PARSE: i32 = -32700;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;

pub mod methods {
    pub const PING: &str = "ping";
    pub const STATUS: &str = "status";

    pub const STATS_GET: &str = "stats.get";
    pub const TOPICS_RECENT: &str = "topics.recent";
    pub const INGEST_TRIGGER: &str = "ingest.trigger";
}

// Parameter structures

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicsParams {
    /// Falls back to the daemon's configured limit
    #[serde(default)]
    pub limit: Option<u32>,
}

// Response structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub uptime_secs: u64,
    pub scheduler_state: SchedulerState,
    pub schedule: String,
    pub next_fire: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run: Option<JobRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsResponse {
    pub topics: Vec<RecentTopic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    /// False when a run was already active and the fire was skipped
    pub started: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::new(methods::TOPICS_RECENT).with_params(serde_json::json!({"limit": 5}));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"method\":\"topics.recent\""));

        let parsed: Request = serde_json::from_str(&json).unwrap();
        let params: TopicsParams = serde_json::from_value(parsed.params).unwrap();
        assert_eq!(params.limit, Some(5));
    }

    #[test]
    fn test_topics_params_default_limit() {
        let params: TopicsParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(params.limit, None);
    }

    #[test]
    fn test_response_error() {
        let id = Uuid::new_v4();
        let resp = Response::error(id, ERR_METHOD_NOT_FOUND, "Method not found");
        assert!(!resp.is_success());
        assert_eq!(resp.error.unwrap().code, ERR_METHOD_NOT_FOUND);
    }
}
