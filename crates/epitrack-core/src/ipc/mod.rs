//! Unix socket IPC between the daemon and CLI clients.

mod client;
mod protocol;
mod server;

pub use client::{is_daemon_running, DaemonClient};
pub use protocol::*;
pub use server::DaemonServer;
