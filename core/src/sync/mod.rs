//! Moving files between two backends.
//!
//! Everything here is written against [`FileSystem`] alone, so the same code
//! uploads (local → remote) and downloads (remote → local).

use std::collections::{HashMap, HashSet};

use futures_util::stream::{self, TryStreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{IgnorePredicate, SyncMode};
use crate::errors::FileError;
use crate::files::{FileEntry, FileSystem, FileType, GetOptions, PutOptions, PutSource, Stats};

/// Outcome of a [`sync_dir`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub transferred: usize,
    pub skipped: usize,
    pub removed: usize,
}

/// A directory tree to mirror from `src` into `dst`.
pub struct SyncJob<'a> {
    pub src: &'a dyn FileSystem,
    pub src_root: String,
    pub dst: &'a dyn FileSystem,
    pub dst_root: String,
    pub mode: SyncMode,
    /// Applied to source paths; ignored entries are neither copied nor removed.
    pub ignore: Option<&'a IgnorePredicate>,
    /// Most copies of one directory in flight at once, each holding its
    /// source open. Zero counts as one.
    pub concurrency: usize,
    pub cancel: CancellationToken,
}

fn check_cancel(cancel: &CancellationToken, path: &str) -> Result<(), FileError> {
    if cancel.is_cancelled() {
        return Err(FileError::Cancelled(path.to_string()));
    }
    Ok(())
}

/// Delete whatever sits at `path` so an entry of another type can take it.
async fn remove_entry(
    dst: &dyn FileSystem,
    path: &str,
    file_type: FileType,
) -> Result<(), FileError> {
    if file_type == FileType::Directory {
        dst.rmdir(path, true).await
    } else {
        dst.unlink(path).await
    }
}

/// Copy a single entry, creating the destination's parent directories.
///
/// Symlinks are recreated with the same target, files are streamed and
/// directories are created (without their content).
pub async fn transfer(
    src: &dyn FileSystem,
    src_path: &str,
    dst: &dyn FileSystem,
    dst_path: &str,
    cancel: &CancellationToken,
) -> Result<(), FileError> {
    check_cancel(cancel, src_path)?;
    let stats = src.lstat(src_path).await?;
    if stats.file_type != FileType::Directory {
        dst.ensure_dir(&dst.path_style().parent(dst_path)).await?;
    }
    copy_entry(src, src_path, &stats, dst, dst_path, cancel).await
}

async fn copy_entry(
    src: &dyn FileSystem,
    src_path: &str,
    stats: &Stats,
    dst: &dyn FileSystem,
    dst_path: &str,
    cancel: &CancellationToken,
) -> Result<(), FileError> {
    match stats.file_type {
        FileType::Directory => dst.ensure_dir(dst_path).await,
        FileType::SymbolicLink => {
            let target = src.readlink(src_path).await?;
            match dst.lstat(dst_path).await {
                Ok(existing) => remove_entry(dst, dst_path, existing.file_type).await?,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            dst.symlink(&target, dst_path).await
        }
        FileType::File => {
            let stream = src.get(src_path, GetOptions::default()).await?;
            let options = PutOptions {
                mode: Some(stats.permission_mode),
                cancel: Some(cancel.clone()),
            };
            dst.put(PutSource::Stream(stream), dst_path, options).await?;
            debug!(src = src_path, dst = dst_path, size = stats.size, "transferred");
            Ok(())
        }
        FileType::Unknown => Err(FileError::NotSupported(format!(
            "{src_path}: not a file, directory or symlink"
        ))),
    }
}

/// Whether `entry` has to be copied over `existing` in update mode.
fn is_outdated(entry: &FileEntry, existing: Option<&FileEntry>) -> bool {
    match existing {
        None => true,
        Some(existing) => {
            existing.file_type != entry.file_type
                || existing.size != entry.size
                || entry.modify_time > existing.modify_time
        }
    }
}

/// Mirror `job.src_root` into `job.dst_root`.
///
/// In [`SyncMode::Update`] only files that are missing, differ in type or
/// size, or are newer at the source are copied. [`SyncMode::Full`] copies
/// every file and removes destination entries the source does not have.
/// A destination entry whose type differs from the source is removed before
/// the copy. Files of one directory are copied concurrently, at most
/// `job.concurrency` at a time.
pub async fn sync_dir(job: SyncJob<'_>) -> Result<SyncReport, FileError> {
    let SyncJob {
        src,
        src_root,
        dst,
        dst_root,
        mode,
        ignore,
        concurrency,
        cancel,
    } = job;
    let src_style = src.path_style();
    let dst_style = dst.path_style();
    let ignored = |entry: &FileEntry| match ignore {
        Some(predicate) if entry.file_type == FileType::Directory => {
            predicate.ignores_dir(&entry.fspath)
        }
        Some(predicate) => predicate.ignores(&entry.fspath),
        None => false,
    };

    let mut report = SyncReport::default();
    dst.ensure_dir(&dst_root).await?;

    let mut pending = vec![(src_style.normalize(&src_root), dst_style.normalize(&dst_root))];
    while let Some((src_dir, dst_dir)) = pending.pop() {
        check_cancel(&cancel, &src_dir)?;

        let entries = src.list(&src_dir).await?;
        let existing: HashMap<String, FileEntry> = match dst.list(&dst_dir).await {
            Ok(list) => list.into_iter().map(|e| (e.name.clone(), e)).collect(),
            Err(e) if e.is_not_found() => HashMap::new(),
            Err(e) => return Err(e),
        };

        let mut seen = HashSet::new();
        let mut copies = Vec::new();
        for entry in entries {
            seen.insert(entry.name.clone());
            if ignored(&entry) {
                report.skipped += 1;
                continue;
            }
            let dst_path = dst_style.join(&dst_dir, &entry.name);
            let current = existing.get(&entry.name);
            if mode == SyncMode::Update
                && entry.file_type != FileType::Directory
                && !is_outdated(&entry, current)
            {
                report.skipped += 1;
                continue;
            }
            if let Some(other) = current.filter(|e| e.file_type != entry.file_type) {
                debug!(
                    path = %dst_path,
                    from = ?other.file_type,
                    to = ?entry.file_type,
                    "replacing"
                );
                remove_entry(dst, &dst_path, other.file_type).await?;
            }
            if entry.file_type == FileType::Directory {
                dst.ensure_dir(&dst_path).await?;
                pending.push((entry.fspath, dst_path));
                continue;
            }
            copies.push((entry.fspath, dst_path));
        }

        let count = copies.len();
        stream::iter(copies.into_iter().map(Ok::<_, FileError>))
            .try_for_each_concurrent(concurrency.max(1), |(src_path, dst_path)| {
                let cancel = &cancel;
                async move {
                    let stats = src.lstat(&src_path).await?;
                    copy_entry(src, &src_path, &stats, dst, &dst_path, cancel).await
                }
            })
            .await?;
        report.transferred += count;

        if mode == SyncMode::Full {
            for (name, stale) in existing {
                if seen.contains(&name) {
                    continue;
                }
                // Entries matching the ignore rules on the destination are kept.
                let keep = match ignore {
                    Some(predicate) if stale.file_type == FileType::Directory => {
                        predicate.ignores_dir(&stale.fspath)
                    }
                    Some(predicate) => predicate.ignores(&stale.fspath),
                    None => false,
                };
                if keep {
                    continue;
                }
                check_cancel(&cancel, &stale.fspath)?;
                remove_entry(dst, &stale.fspath, stale.file_type).await?;
                report.removed += 1;
            }
        }
    }

    info!(
        src = %src_root,
        dst = %dst_root,
        transferred = report.transferred,
        skipped = report.skipped,
        removed = report.removed,
        "sync finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{read_all, MemoryFileSystem};

    async fn seed(fs: &MemoryFileSystem, files: &[(&str, &str)]) {
        for (path, content) in files {
            fs.ensure_dir(&fs.path_style().parent(path)).await.unwrap();
            fs.put((*content).into(), path, PutOptions::default()).await.unwrap();
        }
    }

    fn job<'a>(
        src: &'a MemoryFileSystem,
        dst: &'a MemoryFileSystem,
        mode: SyncMode,
    ) -> SyncJob<'a> {
        SyncJob {
            src,
            src_root: "/src".into(),
            dst,
            dst_root: "/dst".into(),
            mode,
            ignore: None,
            concurrency: 4,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn transfer_creates_parents_and_copies_content() {
        let src = MemoryFileSystem::new();
        let dst = MemoryFileSystem::new();
        seed(&src, &[("/a/b.txt", "payload")]).await;

        transfer(&src, "/a/b.txt", &dst, "/r/a/b.txt", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(dst.contents("/r/a/b.txt").as_deref(), Some(&b"payload"[..]));
        assert_eq!(dst.open_handles(), 0);
    }

    #[tokio::test]
    async fn transfer_recreates_symlinks() {
        let src = MemoryFileSystem::new();
        let dst = MemoryFileSystem::new();
        seed(&src, &[("/d/target", "x")]).await;
        src.symlink("target", "/d/link").await.unwrap();

        transfer(&src, "/d/link", &dst, "/e/link", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(dst.readlink("/e/link").await.unwrap(), "target");
    }

    #[tokio::test]
    async fn transfer_missing_source_is_not_found() {
        let src = MemoryFileSystem::new();
        let dst = MemoryFileSystem::new();
        let err = transfer(&src, "/nope", &dst, "/x", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_copies_missing_and_changed_files_only() {
        let src = MemoryFileSystem::new();
        let dst = MemoryFileSystem::new();
        seed(
            &src,
            &[
                ("/src/same", "same"),
                ("/src/changed", "new content"),
                ("/src/sub/new", "n"),
            ],
        )
        .await;
        seed(&dst, &[("/dst/same", "same"), ("/dst/changed", "old")]).await;
        src.set_mtime("/src/same", 100).unwrap();
        dst.set_mtime("/dst/same", 200).unwrap();

        let report = sync_dir(job(&src, &dst, SyncMode::Update)).await.unwrap();
        assert_eq!(report.transferred, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(dst.contents("/dst/changed").as_deref(), Some(&b"new content"[..]));
        assert_eq!(dst.contents("/dst/sub/new").as_deref(), Some(&b"n"[..]));
    }

    #[tokio::test]
    async fn update_copies_newer_source_of_same_size() {
        let src = MemoryFileSystem::new();
        let dst = MemoryFileSystem::new();
        seed(&src, &[("/src/f", "bbbb")]).await;
        seed(&dst, &[("/dst/f", "aaaa")]).await;
        src.set_mtime("/src/f", 300).unwrap();
        dst.set_mtime("/dst/f", 200).unwrap();

        let report = sync_dir(job(&src, &dst, SyncMode::Update)).await.unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(dst.contents("/dst/f").as_deref(), Some(&b"bbbb"[..]));
    }

    #[tokio::test]
    async fn full_mode_copies_everything_and_removes_extras() {
        let src = MemoryFileSystem::new();
        let dst = MemoryFileSystem::new();
        seed(&src, &[("/src/keep", "k")]).await;
        seed(&dst, &[("/dst/keep", "k"), ("/dst/stale", "s"), ("/dst/old/deep", "d")]).await;

        let report = sync_dir(job(&src, &dst, SyncMode::Full)).await.unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(report.removed, 2);
        assert!(dst.exists("/dst/keep"));
        assert!(!dst.exists("/dst/stale"));
        assert!(!dst.exists("/dst/old"));
    }

    #[tokio::test]
    async fn cancelled_sync_stops() {
        let src = MemoryFileSystem::new();
        let dst = MemoryFileSystem::new();
        seed(&src, &[("/src/f", "x")]).await;
        let job = job(&src, &dst, SyncMode::Full);
        job.cancel.cancel();

        let err = sync_dir(job).await.unwrap_err();
        assert!(matches!(err, FileError::Cancelled(_)));
        assert!(!dst.exists("/dst/f"));
    }

    #[tokio::test]
    async fn transferred_file_keeps_permission_bits() {
        let src = MemoryFileSystem::new();
        let dst = MemoryFileSystem::new();
        src.ensure_dir("/src").await.unwrap();
        let options = PutOptions {
            mode: Some(0o600),
            ..Default::default()
        };
        src.put("secret".into(), "/src/key", options).await.unwrap();

        sync_dir(job(&src, &dst, SyncMode::Update)).await.unwrap();
        assert_eq!(dst.lstat("/dst/key").await.unwrap().permission_mode, 0o600);
        let data = read_all(dst.get("/dst/key", GetOptions::default()).await.unwrap())
            .await
            .unwrap();
        assert_eq!(data, b"secret");
    }

    #[tokio::test]
    async fn directory_replaces_file_of_the_same_name() {
        let src = MemoryFileSystem::new();
        let dst = MemoryFileSystem::new();
        seed(&src, &[("/src/thing/inner", "i")]).await;
        seed(&dst, &[("/dst/thing", "was a file")]).await;

        for mode in [SyncMode::Full, SyncMode::Update] {
            let report = sync_dir(job(&src, &dst, mode)).await.unwrap();
            assert!(dst.lstat("/dst/thing").await.unwrap().is_dir());
            assert_eq!(dst.contents("/dst/thing/inner").as_deref(), Some(&b"i"[..]));
            assert_eq!(report.removed, 0);
        }
    }

    #[tokio::test]
    async fn file_replaces_directory_of_the_same_name() {
        for mode in [SyncMode::Full, SyncMode::Update] {
            let src = MemoryFileSystem::new();
            let dst = MemoryFileSystem::new();
            seed(&src, &[("/src/thing", "now a file")]).await;
            seed(&dst, &[("/dst/thing/deep/old", "o")]).await;

            let report = sync_dir(job(&src, &dst, mode)).await.unwrap();
            assert_eq!(report.transferred, 1);
            assert_eq!(dst.contents("/dst/thing").as_deref(), Some(&b"now a file"[..]));
            assert!(!dst.exists("/dst/thing/deep/old"));
        }
    }

    #[tokio::test]
    async fn copies_keep_few_sources_open() {
        let src = MemoryFileSystem::new();
        let dst = MemoryFileSystem::with_latency(std::time::Duration::from_millis(2));
        let files: Vec<(String, String)> = (0..60)
            .map(|i| (format!("/src/f{i:03}.txt"), format!("content {i}")))
            .collect();
        let files: Vec<(&str, &str)> = files
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_str()))
            .collect();
        seed(&src, &files).await;

        let mut job = job(&src, &dst, SyncMode::Full);
        job.concurrency = 2;
        let report = sync_dir(job).await.unwrap();

        assert_eq!(report.transferred, 60);
        assert!(src.peak_open_readers() <= 2, "peak {}", src.peak_open_readers());
        assert_eq!(src.open_readers(), 0);
        assert!(dst.peak_open_handles() <= 2);
        assert_eq!(dst.contents("/dst/f059.txt").as_deref(), Some(&b"content 59"[..]));
    }
}
