//! IPC server for the daemon
//!
//! Listens on a Unix socket and answers stats, topics and scheduler requests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::*;
use crate::config::AppConfig;
use crate::scheduler::{JobRun, Scheduler};
use crate::stats::StatsAggregator;
use crate::storage::ArticleStore;
use crate::topics::RecentTopicsDeriver;
use crate::{Error, Result};

/// Maximum number of concurrent IPC requests to prevent connection pool exhaustion
const MAX_CONCURRENT_REQUESTS: usize = 10;

/// Shared state every connection handler reads from
#[derive(Clone)]
struct Handler {
    stats: StatsAggregator,
    topics: RecentTopicsDeriver,
    scheduler: Arc<Scheduler>,
    last_run: Arc<Mutex<Option<JobRun>>>,
    default_topic_limit: u32,
    start_time: Instant,
}

/// IPC server that handles client connections
pub struct DaemonServer {
    handler: Handler,
    socket_path: PathBuf,
    /// Semaphore to limit concurrent request processing
    request_semaphore: Arc<Semaphore>,
}

impl DaemonServer {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        scheduler: Arc<Scheduler>,
        config: &AppConfig,
    ) -> Self {
        Self::with_socket_path(store, scheduler, config, config.socket_path())
    }

    pub fn with_socket_path(
        store: Arc<dyn ArticleStore>,
        scheduler: Arc<Scheduler>,
        config: &AppConfig,
        socket_path: PathBuf,
    ) -> Self {
        Self {
            handler: Handler {
                stats: StatsAggregator::new(store.clone()),
                topics: RecentTopicsDeriver::new(store),
                scheduler,
                last_run: Arc::new(Mutex::new(None)),
                default_topic_limit: config.stats.recent_topics_limit,
                start_time: Instant::now(),
            },
            socket_path,
            request_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        }
    }

    /// Remember the most recent job run for `status` replies
    pub fn record_run(&self, run: JobRun) {
        *self.handler.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(run);
    }

    /// Run the IPC server until `shutdown_rx` flips to true
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        // Remove old socket file if exists
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on: {}", self.socket_path.display());

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let handler = self.handler.clone();
                            let semaphore = self.request_semaphore.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, handler, semaphore).await {
                                    warn!("Error handling connection: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("IPC server shutting down");
                        break;
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    handler: Handler,
    semaphore: Arc<Semaphore>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }

        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| Error::Other(format!("Failed to acquire semaphore: {}", e)))?;

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!("Received request: {} (id: {})", request.method, request.id);
                handler.handle(request).await
            }
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                Response::error(Uuid::nil(), ERR_PARSE, format!("Parse error: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Map a core error onto an RPC error response
fn error_response(id: Uuid, err: Error) -> Response {
    match err {
        Error::InvalidArgument(message) => Response::error(id, ERR_INVALID_PARAMS, message),
        other => {
            error!("Request {} failed: {}", id, other);
            Response::error(id, ERR_INTERNAL, other.to_string())
        }
    }
}

fn to_result<T: serde::Serialize>(id: Uuid, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(json) => Response::success(id, json),
        Err(e) => Response::error(id, ERR_INTERNAL, e.to_string()),
    }
}

impl Handler {
    async fn handle(&self, request: Request) -> Response {
        let id = request.id;

        match request.method.as_str() {
            methods::PING => Response::ok(id),

            methods::STATUS => {
                let last_run = self.last_run.lock().unwrap_or_else(|e| e.into_inner()).clone();
                let status = StatusResponse {
                    running: true,
                    uptime_secs: self.start_time.elapsed().as_secs(),
                    scheduler_state: self.scheduler.state(),
                    schedule: self.scheduler.describe(),
                    next_fire: self.scheduler.next_fire(),
                    last_run,
                };
                to_result(id, &status)
            }

            methods::STATS_GET => match self.stats.compute_snapshot().await {
                Ok(snapshot) => to_result(id, &snapshot),
                Err(e) => error_response(id, e),
            },

            methods::TOPICS_RECENT => {
                let params = if request.params.is_null() {
                    Ok(TopicsParams::default())
                } else {
                    serde_json::from_value::<TopicsParams>(request.params)
                };

                match params {
                    Ok(params) => {
                        let limit = params.limit.unwrap_or(self.default_topic_limit);
                        match self.topics.derive(limit).await {
                            Ok(topics) => to_result(id, &TopicsResponse { topics }),
                            Err(e) => error_response(id, e),
                        }
                    }
                    Err(e) => Response::error(id, ERR_INVALID_PARAMS, e.to_string()),
                }
            }

            methods::INGEST_TRIGGER => {
                let started = self.scheduler.trigger_now();
                to_result(id, &TriggerResponse { started })
            }

            _ => Response::error(id, ERR_METHOD_NOT_FOUND, "Method not found"),
        }
    }
}
