use anyhow::{bail, Result};

use epitrack_core::{ipc::is_daemon_running, AppConfig, DaemonClient};

pub async fn run(config: &AppConfig) -> Result<()> {
    let socket_path = config.socket_path();
    if !is_daemon_running(&socket_path).await {
        bail!("Daemon is not running. Start it with 'epitrack daemon start'");
    }

    let client = DaemonClient::new(socket_path);
    if client.trigger_ingest().await? {
        println!("Ingestion run started.");
    } else {
        println!("An ingestion run is already in progress; nothing started.");
    }

    Ok(())
}
