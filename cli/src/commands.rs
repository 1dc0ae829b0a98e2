//! Subcommand implementations.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use remote_sync_core::config::{edit_config, ConfigRegistry, ResolvedConfig};
use remote_sync_core::files::{Backend, FileSystem, FileType, Limited, LocalFileSystem};
use remote_sync_core::sync::{sync_dir, transfer, SyncJob, SyncReport};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::Commands;
use crate::terminal::TerminalHost;

/// Which way a transfer goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upload,
    Download,
}

pub async fn execute(
    command: Commands,
    workspace: PathBuf,
    cancel: CancellationToken,
) -> Result<()> {
    match command {
        Commands::Init { roots } => {
            let roots = if roots.is_empty() { vec![workspace] } else { roots };
            edit_config(&TerminalHost::new(roots)).await;
            Ok(())
        }
        Commands::Resolve { path, by_name } => {
            let registry = load_registry(&workspace).await?;
            let query = if by_name { path } else { absolute(Path::new(&path))? };
            print_json(&registry.resolve(&query, by_name)?)
        }
        Commands::Configs { distinct } => {
            let registry = load_registry(&workspace).await?;
            if distinct {
                print_json(&registry.distinct_configs())
            } else {
                print_json(&registry.all_configs())
            }
        }
        Commands::Upload { path } => {
            let registry = load_registry(&workspace).await?;
            let report = run_transfer(&registry, &path, Direction::Upload, cancel).await?;
            print_json(&report)
        }
        Commands::Download { path } => {
            let registry = load_registry(&workspace).await?;
            let report = run_transfer(&registry, &path, Direction::Download, cancel).await?;
            print_json(&report)
        }
    }
}

async fn load_registry(workspace: &Path) -> Result<ConfigRegistry> {
    let registry = ConfigRegistry::new();
    let records = registry
        .init_configs(workspace)
        .await
        .with_context(|| format!("loading config of {}", workspace.display()))?;
    if records.is_empty() {
        bail!(
            "no config in {}; run `remote-sync init` first",
            workspace.display()
        );
    }
    Ok(registry)
}

fn absolute(path: &Path) -> Result<String> {
    let path = std::path::absolute(path).with_context(|| format!("resolving {}", path.display()))?;
    Ok(path.to_string_lossy().to_string())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_transfer(
    registry: &ConfigRegistry,
    path: &Path,
    direction: Direction,
    cancel: CancellationToken,
) -> Result<SyncReport> {
    let local_path = absolute(path)?;
    let resolved = registry.resolve(&local_path, false)?;
    if resolved.ignores(&local_path) {
        info!(path = %local_path, "path is ignored");
        return Ok(SyncReport {
            skipped: 1,
            ..Default::default()
        });
    }

    let local = LocalFileSystem::new();
    let remote = Limited::new(
        Backend::for_host(&resolved.host_info())?,
        resolved.config.concurrency,
    );
    let remote_path = resolved.remote_path.clone();

    let report = match direction {
        Direction::Upload => {
            copy_tree(&local, &local_path, &remote, &remote_path, &resolved, cancel).await?
        }
        Direction::Download => {
            copy_tree(&remote, &remote_path, &local, &local_path, &resolved, cancel).await?
        }
    };
    info!(
        direction = ?direction,
        local = %local_path,
        remote = %remote_path,
        host = %resolved.config.host,
        "done"
    );
    Ok(report)
}

/// Transfer one entry, mirroring it when it is a directory.
async fn copy_tree(
    src: &dyn FileSystem,
    src_path: &str,
    dst: &dyn FileSystem,
    dst_path: &str,
    resolved: &ResolvedConfig,
    cancel: CancellationToken,
) -> Result<SyncReport> {
    let stats = src
        .lstat(src_path)
        .await
        .with_context(|| format!("reading {src_path}"))?;
    if stats.file_type == FileType::Directory {
        let report = sync_dir(SyncJob {
            src,
            src_root: src_path.to_string(),
            dst,
            dst_root: dst_path.to_string(),
            mode: resolved.config.sync_mode,
            ignore: Some(&resolved.ignore),
            concurrency: resolved.config.concurrency,
            cancel,
        })
        .await?;
        return Ok(report);
    }

    transfer(src, src_path, dst, dst_path, &cancel).await?;
    Ok(SyncReport {
        transferred: 1,
        ..Default::default()
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    /// A workspace whose config maps it onto `remote` with the local protocol.
    fn workspace(remote: &Path, extra: serde_json::Value) -> TempDir {
        let ws = TempDir::new().unwrap();
        let mut config = json!({
            "protocol": "local",
            "host": "localhost",
            "username": "me",
            "remotePath": remote.to_string_lossy(),
            "ignore": [".vscode", "*.tmp"]
        });
        if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        let dir = ws.path().join(".vscode");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("sftp.json"), config.to_string()).unwrap();
        ws
    }

    #[tokio::test]
    async fn empty_workspace_is_an_error() {
        let ws = TempDir::new().unwrap();
        let err = load_registry(ws.path()).await.err().unwrap();
        assert!(err.to_string().contains("remote-sync init"));
    }

    #[tokio::test]
    async fn upload_then_download_a_single_file() {
        let remote = TempDir::new().unwrap();
        let ws = workspace(remote.path(), json!({}));
        std::fs::create_dir_all(ws.path().join("src")).unwrap();
        std::fs::write(ws.path().join("src/main.txt"), "v1").unwrap();
        let registry = load_registry(ws.path()).await.unwrap();

        let file = ws.path().join("src/main.txt");
        let report = run_transfer(&registry, &file, Direction::Upload, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(std::fs::read_to_string(remote.path().join("src/main.txt")).unwrap(), "v1");

        std::fs::write(remote.path().join("src/main.txt"), "v2").unwrap();
        run_transfer(&registry, &file, Direction::Download, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "v2");
    }

    #[tokio::test]
    async fn directory_upload_honours_ignore_rules() {
        let remote = TempDir::new().unwrap();
        let ws = workspace(remote.path(), json!({ "concurrency": 2 }));
        std::fs::write(ws.path().join("index.html"), "<html>").unwrap();
        std::fs::write(ws.path().join("draft.tmp"), "x").unwrap();
        let registry = load_registry(ws.path()).await.unwrap();

        let report = run_transfer(&registry, ws.path(), Direction::Upload, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.transferred, 1);
        assert!(remote.path().join("index.html").is_file());
        assert!(!remote.path().join("draft.tmp").exists());
        assert!(!remote.path().join(".vscode").exists());
    }

    #[tokio::test]
    async fn ignored_file_is_skipped() {
        let remote = TempDir::new().unwrap();
        let ws = workspace(remote.path(), json!({}));
        std::fs::write(ws.path().join("draft.tmp"), "x").unwrap();
        let registry = load_registry(ws.path()).await.unwrap();

        let report = run_transfer(
            &registry,
            &ws.path().join("draft.tmp"),
            Direction::Upload,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.skipped, 1);
        assert!(!remote.path().join("draft.tmp").exists());
    }

    #[tokio::test]
    async fn ftp_is_reported_as_unsupported() {
        let remote = TempDir::new().unwrap();
        let ws = workspace(remote.path(), json!({ "protocol": "ftp", "port": 21 }));
        std::fs::write(ws.path().join("a.txt"), "a").unwrap();
        let registry = load_registry(ws.path()).await.unwrap();

        let err = run_transfer(
            &registry,
            &ws.path().join("a.txt"),
            Direction::Upload,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("ftp://localhost"), "got {err}");
    }
}
