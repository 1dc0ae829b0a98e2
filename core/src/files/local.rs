//! Local disk backend.

use std::io::SeekFrom;

use futures_util::future::try_join_all;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use super::{
    copy_source, ByteStream, FileEntry, FileSystem, FileType, GetOptions, PutOptions, PutSource,
    Stats,
};
use crate::errors::FileError;
use crate::paths::PathStyle;

/// Backend operating on the machine's own filesystem through `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
fn epoch_secs(time: std::io::Result<std::time::SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn file_type_of(metadata: &std::fs::Metadata) -> FileType {
    let ft = metadata.file_type();
    if ft.is_symlink() {
        FileType::SymbolicLink
    } else if ft.is_dir() {
        FileType::Directory
    } else if ft.is_file() {
        FileType::File
    } else {
        FileType::Unknown
    }
}

#[cfg(unix)]
fn stats_from_metadata(metadata: &std::fs::Metadata) -> Stats {
    use std::os::unix::fs::MetadataExt;
    let mut stats = Stats::new(
        file_type_of(metadata),
        metadata.mode(),
        metadata.len(),
        metadata.mtime(),
        metadata.atime(),
    );
    stats.uid = metadata.uid();
    stats.gid = metadata.gid();
    stats
}

/// Without Unix mode bits, synthesize them from the read-only flag.
#[cfg(not(unix))]
fn stats_from_metadata(metadata: &std::fs::Metadata) -> Stats {
    let file_type = file_type_of(metadata);
    let mut mode = if metadata.permissions().readonly() { 0o444 } else { 0o666 };
    if file_type == FileType::Directory {
        mode |= 0o111;
    }
    Stats::new(
        file_type,
        mode,
        metadata.len(),
        epoch_secs(metadata.modified()),
        epoch_secs(metadata.accessed()),
    )
}

#[async_trait::async_trait]
impl FileSystem for LocalFileSystem {
    fn path_style(&self) -> PathStyle {
        PathStyle::native()
    }

    async fn lstat(&self, path: &str) -> Result<Stats, FileError> {
        let metadata = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| FileError::from_io(e, path))?;
        Ok(stats_from_metadata(&metadata))
    }

    async fn get(&self, path: &str, options: GetOptions) -> Result<ByteStream, FileError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| FileError::from_io(e, path))?;

        let start = options.start.unwrap_or(0);
        if start > 0 {
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| FileError::from_io(e, path))?;
        }
        match options.end {
            Some(end) => Ok(Box::new(file.take(end.saturating_add(1).saturating_sub(start)))),
            None => Ok(Box::new(file)),
        }
    }

    async fn put(
        &self,
        source: PutSource,
        path: &str,
        options: PutOptions,
    ) -> Result<(), FileError> {
        let cancel = options.cancel.unwrap_or_default();

        let mut open = tokio::fs::OpenOptions::new();
        open.write(true).create(true).truncate(true);
        #[cfg(unix)]
        if let Some(mode) = options.mode {
            open.mode(mode);
        }
        let mut file = open
            .open(path)
            .await
            .map_err(|e| FileError::from_io(e, path))?;

        let result = copy_source(source, &mut file, path, &cancel).await;
        drop(file);

        match result {
            Ok(written) => {
                debug!(path, written, "local put");
                Ok(())
            }
            Err(e @ FileError::Cancelled(_)) => {
                let _ = tokio::fs::remove_file(path).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn readlink(&self, path: &str) -> Result<String, FileError> {
        let target = tokio::fs::read_link(path)
            .await
            .map_err(|e| FileError::from_io(e, path))?;
        Ok(target.to_string_lossy().to_string())
    }

    #[cfg(unix)]
    async fn symlink(&self, target: &str, path: &str) -> Result<(), FileError> {
        tokio::fs::symlink(target, path)
            .await
            .map_err(|e| FileError::from_io(e, path))
    }

    #[cfg(windows)]
    async fn symlink(&self, target: &str, path: &str) -> Result<(), FileError> {
        // Windows needs to know the kind of link up front.
        let style = PathStyle::Windows;
        let resolved = if style.is_absolute(target) {
            target.to_string()
        } else {
            style.join(&style.parent(path), target)
        };
        let is_dir = tokio::fs::metadata(&resolved)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let result = if is_dir {
            tokio::fs::symlink_dir(target, path).await
        } else {
            tokio::fs::symlink_file(target, path).await
        };
        result.map_err(|e| FileError::from_io(e, path))
    }

    #[cfg(not(any(unix, windows)))]
    async fn symlink(&self, _target: &str, path: &str) -> Result<(), FileError> {
        Err(FileError::NotSupported(format!("symlink {path}")))
    }

    async fn mkdir(&self, path: &str) -> Result<(), FileError> {
        tokio::fs::create_dir(path)
            .await
            .map_err(|e| FileError::from_io(e, path))
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), FileError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| FileError::from_io(e, path))
    }

    async fn list(&self, dir: &str) -> Result<Vec<FileEntry>, FileError> {
        let mut read_dir = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| FileError::from_io(e, dir))?;

        let mut names = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| FileError::from_io(e, dir))?
        {
            names.push(entry.file_name().to_string_lossy().to_string());
        }

        let style = self.path_style();
        try_join_all(names.into_iter().map(|name| async move {
            let fspath = style.join(dir, &name);
            let stats = self.lstat(&fspath).await?;
            Ok::<_, FileError>(FileEntry::from_stats(fspath, name, &stats))
        }))
        .await
    }

    async fn unlink(&self, path: &str) -> Result<(), FileError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| FileError::from_io(e, path))
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FileError> {
        let result = if recursive {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_dir(path).await
        };
        result.map_err(|e| FileError::from_io(e, path))
    }
}
