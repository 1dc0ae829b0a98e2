//! SFTP backend against a live server.
//!
//! Point `REMOTE_SYNC_SFTP_PORT` at an SFTP server on 127.0.0.1 with a
//! `testuser`/`testpass` account (override with `REMOTE_SYNC_SFTP_USER` and
//! `REMOTE_SYNC_SFTP_PASSWORD`). Skips gracefully when none is running.

#![cfg(feature = "sftp")]

mod common;

use common::require_sftp;
use remote_sync_core::config::SyncMode;
use remote_sync_core::errors::FileError;
use remote_sync_core::files::{
    read_all, FileSystem, FileType, GetOptions, Limited, MemoryFileSystem, PutOptions, SftpConfig,
    SftpFileSystem,
};
use remote_sync_core::sync::{sync_dir, SyncJob};
use tokio_util::sync::CancellationToken;

fn connect(port: u16) -> SftpFileSystem {
    SftpFileSystem::new(SftpConfig {
        host: "127.0.0.1".into(),
        port,
        username: std::env::var("REMOTE_SYNC_SFTP_USER").unwrap_or_else(|_| "testuser".into()),
        password: Some(
            std::env::var("REMOTE_SYNC_SFTP_PASSWORD").unwrap_or_else(|_| "testpass".into()),
        ),
        ..Default::default()
    })
}

/// A scratch directory unique to one test run.
async fn scratch(fs: &SftpFileSystem, test: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = format!("/tmp/remote-sync-{test}-{nanos}");
    fs.ensure_dir(&dir).await.unwrap();
    dir
}

#[tokio::test]
async fn put_get_and_stat_round_trip() {
    let port = require_sftp!();
    let fs = connect(port);
    let dir = scratch(&fs, "roundtrip").await;
    let file = format!("{dir}/hello.txt");

    let options = PutOptions {
        mode: Some(0o640),
        ..Default::default()
    };
    fs.put("hello over sftp".into(), &file, options).await.unwrap();

    let stats = fs.lstat(&file).await.unwrap();
    assert_eq!(stats.file_type, FileType::File);
    assert_eq!(stats.size, 15);

    let data = read_all(fs.get(&file, GetOptions::default()).await.unwrap())
        .await
        .unwrap();
    assert_eq!(data, b"hello over sftp");

    let ranged = GetOptions {
        start: Some(6),
        end: Some(9),
    };
    let data = read_all(fs.get(&file, ranged).await.unwrap()).await.unwrap();
    assert_eq!(data, b"over");

    fs.rmdir(&dir, true).await.unwrap();
}

#[tokio::test]
async fn missing_paths_are_not_found() {
    let port = require_sftp!();
    let fs = connect(port);
    let err = fs.lstat("/tmp/remote-sync-does-not-exist").await.unwrap_err();
    assert!(err.is_not_found(), "got {err}");
}

#[tokio::test]
async fn rmdir_refuses_non_empty_unless_recursive() {
    let port = require_sftp!();
    let fs = connect(port);
    let dir = scratch(&fs, "rmdir").await;
    fs.ensure_dir(&format!("{dir}/a/b")).await.unwrap();
    fs.put("x".into(), &format!("{dir}/a/b/f"), PutOptions::default())
        .await
        .unwrap();

    let err = fs.rmdir(&format!("{dir}/a"), false).await.unwrap_err();
    assert!(matches!(err, FileError::NotEmpty(_)), "got {err}");
    fs.rmdir(&dir, true).await.unwrap();
    assert!(fs.lstat(&dir).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn symlinks_are_read_back() {
    let port = require_sftp!();
    let fs = connect(port);
    let dir = scratch(&fs, "symlink").await;
    fs.put("t".into(), &format!("{dir}/target"), PutOptions::default())
        .await
        .unwrap();
    fs.symlink("target", &format!("{dir}/link")).await.unwrap();

    let stats = fs.lstat(&format!("{dir}/link")).await.unwrap();
    assert_eq!(stats.file_type, FileType::SymbolicLink);
    assert!(fs.readlink(&format!("{dir}/link")).await.unwrap().ends_with("target"));
    fs.rmdir(&dir, true).await.unwrap();
}

#[tokio::test]
async fn limited_upload_of_a_tree() {
    let port = require_sftp!();
    let fs = connect(port);
    let dir = scratch(&fs, "tree").await;

    let local = MemoryFileSystem::new();
    local.ensure_dir("/w/sub").await.unwrap();
    for i in 0..10 {
        local
            .put(
                format!("file {i}").as_str().into(),
                &format!("/w/sub/f{i}"),
                PutOptions::default(),
            )
            .await
            .unwrap();
    }

    let remote = Limited::new(fs, 4);
    let report = sync_dir(SyncJob {
        src: &local,
        src_root: "/w".into(),
        dst: &remote,
        dst_root: dir.clone(),
        mode: SyncMode::Full,
        ignore: None,
        concurrency: 4,
        cancel: CancellationToken::new(),
    })
    .await
    .unwrap();
    assert_eq!(report.transferred, 10);

    let listed = remote.list(&format!("{dir}/sub")).await.unwrap();
    assert_eq!(listed.len(), 10);
    remote.rmdir(&dir, true).await.unwrap();
}
