//! Shared test utilities for remote-sync core integration tests.
//!
//! Provides workspace builders, a recording [`Host`] and a reachability
//! check for the optional SFTP server tests.

// Each integration test is compiled as its own crate, so not every test file
// uses every function from this shared module. Suppress dead_code warnings.
#![allow(dead_code)]

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use remote_sync_core::config::config_path;
use remote_sync_core::host::{Host, Report, WorkspaceRoot};

/// Write `value` as the config file of the workspace at `root`.
pub fn write_config(root: &Path, value: &serde_json::Value) -> PathBuf {
    let path = config_path(root);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    path
}

/// Create files (and their parent directories) below `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, content) in files {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Host that records what the core asked of it.
#[derive(Default)]
pub struct RecordingHost {
    pub roots: Vec<WorkspaceRoot>,
    pub pick: Option<usize>,
    pub opened: Mutex<Vec<PathBuf>>,
    pub reports: Mutex<Vec<Report>>,
}

#[async_trait::async_trait]
impl Host for RecordingHost {
    async fn workspace_roots(&self) -> Vec<WorkspaceRoot> {
        self.roots.clone()
    }

    async fn pick_root(&self, roots: &[WorkspaceRoot]) -> Option<WorkspaceRoot> {
        self.pick.map(|i| roots[i].clone())
    }

    async fn open_for_editing(&self, path: &Path) -> std::io::Result<()> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn report(&self, report: Report) {
        self.reports.lock().unwrap().push(report);
    }
}

/// Check if a TCP port is reachable on the given host.
///
/// Returns `true` if a TCP connection can be established within 2 seconds.
pub fn is_port_reachable(host: &str, port: u16) -> bool {
    let addr = format!("{host}:{port}");
    if let Ok(addr) = addr.parse() {
        TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok()
    } else {
        false
    }
}

/// Port of the SFTP test server, from `REMOTE_SYNC_SFTP_PORT`.
pub fn sftp_port() -> Option<u16> {
    std::env::var("REMOTE_SYNC_SFTP_PORT").ok()?.parse().ok()
}

/// Skip the current test unless an SFTP test server is configured and up.
///
/// Prints a message to stderr and returns early (runtime check instead of
/// `#[ignore]`).
macro_rules! require_sftp {
    () => {
        match common::sftp_port() {
            Some(port) if common::is_port_reachable("127.0.0.1", port) => port,
            _ => {
                eprintln!("SKIPPED: set REMOTE_SYNC_SFTP_PORT to a reachable SFTP server");
                return;
            }
        }
    };
}
pub(crate) use require_sftp;
