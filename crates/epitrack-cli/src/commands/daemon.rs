use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use epitrack_core::{
    ingest::CommandInvoker,
    ipc::DaemonClient,
    scheduler::{CronSchedule, Scheduler, SchedulerEvent},
    storage::{ArticleStore, Database},
    AppConfig, DaemonServer, StatsAggregator,
};

/// How long shutdown waits for an in-flight ingestion run
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn pid_file_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("epitrack")
        .join("daemon.pid")
}

/// PID of the running daemon, cleaning up a stale PID file
fn is_daemon_running() -> Option<u32> {
    let pid_path = pid_file_path();
    if !pid_path.exists() {
        return None;
    }

    let mut file = fs::File::open(&pid_path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    let pid: u32 = contents.trim().parse().ok()?;

    let output = Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .output()
        .ok()?;
    if output.status.success() {
        return Some(pid);
    }

    let _ = fs::remove_file(&pid_path);
    None
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(&pid_path)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// SIGINT and SIGTERM listeners. Once installed, a signal that arrives
/// before `recv` is polled is still delivered.
struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Name of the first signal received
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Wait for the shutdown flag, then stop the scheduler and give an
/// in-flight run up to `grace` to finish
async fn shutdown_on_signal(
    scheduler: &Scheduler,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> Result<()> {
    // A dropped sender also means shut down
    let _ = shutdown.wait_for(|stop| *stop).await;

    scheduler.stop().await;
    if tokio::time::timeout(grace, scheduler.wait_idle()).await.is_err() {
        warn!("Ingestion still running after {}s, abandoning it", grace.as_secs());
    }
    Ok(())
}

/// Start the daemon
pub async fn start(config: Arc<AppConfig>) -> Result<()> {
    if let Some(pid) = is_daemon_running() {
        println!("Daemon is already running (PID: {})", pid);
        return Ok(());
    }

    // An invalid schedule is fatal before anything is started
    let trigger = Arc::new(CronSchedule::from_config(&config.schedule)?);

    let db = Arc::new(Database::new(&config).await?);
    let store: Arc<dyn ArticleStore> = db;
    let invoker = Arc::new(CommandInvoker::from_config(&config.ingest));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(Scheduler::new(trigger, invoker).with_event_sender(event_tx));
    let server = Arc::new(DaemonServer::new(store.clone(), scheduler.clone(), &config));

    // Listen before the PID file tells `daemon stop` where to send SIGTERM
    let mut signals = ShutdownSignals::install()?;

    println!("Starting epitrack daemon...");
    write_pid_file()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let name = signals.recv().await;
        info!("Received {}", name);
        let _ = shutdown_tx.send(true);
    });

    let server_task = {
        let server = server.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(shutdown_rx).await {
                error!("IPC server error: {}", e);
            }
        })
    };

    // Record finished runs and refresh the snapshot after successful ones
    {
        let server = server.clone();
        let aggregator = StatsAggregator::new(store);
        let snapshot_path = config.snapshot_path();
        let export_after_ingest = config.stats.export_after_ingest;
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if let SchedulerEvent::RunFinished(run) = event {
                    let succeeded = run.outcome.is_success();
                    server.record_run(run);
                    if succeeded && export_after_ingest {
                        if let Err(e) = aggregator.export_snapshot(&snapshot_path).await {
                            warn!("Failed to export stats snapshot: {}", e);
                        }
                    }
                }
            }
        });
    }

    scheduler.start();

    println!(
        "Daemon started (PID: {}). Press Ctrl+C or run 'epitrack daemon stop' to stop.",
        std::process::id()
    );
    println!("  Schedule: {}", scheduler.describe());
    if let Some(next) = scheduler.next_fire() {
        println!("  Next run: {}", next.to_rfc3339());
    }
    println!("  Socket:   {}", config.socket_path().display());

    shutdown_on_signal(&scheduler, shutdown_rx, SHUTDOWN_GRACE).await?;
    let _ = server_task.await;

    remove_pid_file();
    println!("Daemon stopped.");

    Ok(())
}

/// Stop the daemon
pub async fn stop() -> Result<()> {
    let Some(pid) = is_daemon_running() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Stopping daemon (PID: {})...", pid);

    let output = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .output()?;
    if !output.status.success() {
        println!("Failed to stop daemon. You may need to kill it manually: kill {}", pid);
        return Ok(());
    }

    // The daemon may be finishing an ingestion run
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if is_daemon_running().is_none() {
            println!("Daemon stopped successfully.");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let _ = Command::new("kill").arg("-9").arg(pid.to_string()).output();
    remove_pid_file();
    println!("Daemon forcefully terminated.");

    Ok(())
}

/// Show daemon status
pub async fn status(config: &AppConfig) -> Result<()> {
    let Some(pid) = is_daemon_running() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Daemon is running (PID: {})", pid);
    println!("PID file: {}", pid_file_path().display());

    let client = DaemonClient::new(config.socket_path());
    match client.status().await {
        Ok(status) => {
            println!("Uptime: {}s", status.uptime_secs);
            println!("Scheduler: {:?} ({})", status.scheduler_state, status.schedule);
            if let Some(next) = status.next_fire {
                println!("Next run: {}", next.to_rfc3339());
            }
            if let Some(run) = status.last_run {
                println!(
                    "Last run: {} ({}, finished {})",
                    run.outcome.label(),
                    run.reason,
                    run.finished_at.to_rfc3339()
                );
            }
        }
        Err(e) => println!("Socket not answering: {}", e),
    }

    Ok(())
}
