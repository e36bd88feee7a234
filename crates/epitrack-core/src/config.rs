use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory path (database, socket, stats snapshot)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Five-field cron expression (minute hour day-of-month month day-of-week)
    #[serde(default = "default_cron")]
    pub cron: String,
    /// IANA time zone the cron expression is evaluated in
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Program launched for each ingestion run
    #[serde(default = "default_ingest_program")]
    pub program: String,
    /// Arguments passed to the program
    #[serde(default = "default_ingest_args")]
    pub args: Vec<String>,
    /// Working directory for the ingestion process
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Kill the ingestion process after this many seconds (0 = no timeout)
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            program: default_ingest_program(),
            args: default_ingest_args(),
            working_dir: None,
            timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Where the stats snapshot is written (defaults to <data_dir>/stats.json)
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Re-export the snapshot after every successful ingestion run
    #[serde(default = "default_true")]
    pub export_after_ingest: bool,
    /// Default number of recent topics returned to clients
    #[serde(default = "default_recent_topics_limit")]
    pub recent_topics_limit: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            export_after_ingest: default_true(),
            recent_topics_limit: default_recent_topics_limit(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("epitrack")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cron() -> String {
    "0 2 * * *".to_string() // daily at 02:00
}

fn default_timezone() -> String {
    "America/Chicago".to_string()
}

fn default_ingest_program() -> String {
    "python3".to_string()
}

fn default_ingest_args() -> Vec<String> {
    vec!["news_fetcher.py".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_recent_topics_limit() -> u32 {
    10
}

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

impl AppConfig {
    /// Load configuration from the default location or return defaults
    pub fn load() -> crate::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file; a missing file yields defaults
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Get the configuration file path
    /// Always uses ~/.config/epitrack/config.toml on all platforms
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("epitrack")
            .join("config.toml")
    }

    /// Get the database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("epitrack.db")
    }

    /// Get the Unix socket path for IPC
    pub fn socket_path(&self) -> PathBuf {
        self.data_dir().join("epitrack.sock")
    }

    /// Get the stats snapshot path
    pub fn snapshot_path(&self) -> PathBuf {
        match &self.stats.snapshot_path {
            Some(path) => expand_tilde(path),
            None => self.data_dir().join("stats.json"),
        }
    }

    /// Get the data directory (with tilde expansion)
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }
}
