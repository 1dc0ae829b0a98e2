//! Seeding a config file for the user to edit.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::registry::config_path;
use super::{ConfigRecord, Protocol};
use crate::errors::ConfigError;
use crate::host::{Host, Report};

/// The four keys written into a fresh config file.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Scaffold<'a> {
    protocol: Protocol,
    host: &'a str,
    username: &'a str,
    remote_path: &'a str,
}

/// Make sure a config file exists under `base_path`, then open it.
///
/// When the file is missing a minimal default record is written first. The
/// content is never validated: it is a starting point for a human.
pub async fn ensure_config_scaffold(
    base_path: &Path,
    host: &dyn Host,
) -> Result<PathBuf, ConfigError> {
    let path = config_path(base_path);
    let exists = tokio::fs::try_exists(&path)
        .await
        .map_err(|e| ConfigError::io(&path, e))?;

    if !exists {
        write_scaffold(&path).await?;
        info!(path = %path.display(), "wrote default config");
    }

    host.open_for_editing(&path)
        .await
        .map_err(|e| ConfigError::io(&path, e))?;
    Ok(path)
}

async fn write_scaffold(path: &Path) -> Result<(), ConfigError> {
    let defaults = ConfigRecord::default();
    let scaffold = Scaffold {
        protocol: defaults.protocol,
        host: &defaults.host,
        username: &defaults.username,
        remote_path: &defaults.remote_path,
    };

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    scaffold
        .serialize(&mut serializer)
        .map_err(|e| ConfigError::io(path, e.into()))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ConfigError::io(parent, e))?;
    }
    tokio::fs::write(path, buf)
        .await
        .map_err(|e| ConfigError::io(path, e))
}

/// Open (creating if needed) the config file of a workspace root.
///
/// With a single root it is used directly; with several the host asks the
/// user to pick one. A cancelled pick does nothing. Failures are reported
/// through the host.
pub async fn edit_config(host: &dyn Host) {
    let roots = host.workspace_roots().await;
    let root = match roots.as_slice() {
        [] => {
            host.report(Report::Error("no workspace folder is open".into()))
                .await;
            return;
        }
        [only] => only.clone(),
        _ => match host.pick_root(&roots).await {
            Some(root) => root,
            None => return,
        },
    };

    if let Err(e) = ensure_config_scaffold(&root.path, host).await {
        host.report(Report::Error(format!("config: {e}"))).await;
    }
}
