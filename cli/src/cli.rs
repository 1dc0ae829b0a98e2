//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Sync a local workspace with a remote host described by `.vscode/sftp.json`
#[derive(Parser, Debug)]
#[command(name = "remote-sync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Workspace root whose config file is loaded
    #[arg(short, long, global = true, env = "REMOTE_SYNC_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Create the config file if missing and open it for editing
    ///
    /// With several roots, asks which one to use.
    Init {
        /// Workspace roots to choose from (defaults to the workspace)
        #[arg(long = "root")]
        roots: Vec<PathBuf>,
    },

    /// Show the configuration governing a path
    Resolve {
        /// Local path, or a config name with --by-name
        path: String,

        /// Look the config up by its virtual name
        #[arg(long)]
        by_name: bool,
    },

    /// List loaded configurations as JSON
    Configs {
        /// Leave out configs nested inside another one
        #[arg(long)]
        distinct: bool,
    },

    /// Copy a local file or directory to its remote location
    Upload {
        path: PathBuf,
    },

    /// Copy a remote file or directory to its local location
    Download {
        path: PathBuf,
    },
}
