//! Uniform filesystem contract shared by every backend.
//!
//! Sync logic is written against [`FileSystem`] only. Each backend (local
//! disk, SFTP, the in-memory test double) maps its native failures onto
//! [`FileError`] so "not found", "permission denied" and "already exists"
//! look the same everywhere.

pub mod backend;
pub mod limited;
pub mod local;
pub mod memory;
#[cfg(feature = "sftp")]
pub mod sftp;

pub use backend::Backend;
pub use limited::Limited;
pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;
#[cfg(feature = "sftp")]
pub use sftp::{SftpConfig, SftpFileSystem};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::errors::FileError;
use crate::paths::PathStyle;

/// Readable byte stream returned by [`FileSystem::get`].
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Chunk size used when copying a stream into a destination.
const COPY_CHUNK: usize = 64 * 1024;

/// Kind of a filesystem entry, as reported without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
    SymbolicLink,
    Unknown,
}

/// Metadata of a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Raw mode bits, type bits included where the backend has them.
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    /// Seconds since the Unix epoch.
    pub mtime: i64,
    pub atime: i64,
    #[serde(rename = "type")]
    pub file_type: FileType,
    /// Permission bits of `mode` (`mode & 0o777`).
    pub permission_mode: u32,
}

impl Stats {
    pub fn new(file_type: FileType, mode: u32, size: u64, mtime: i64, atime: i64) -> Self {
        Self {
            mode,
            size,
            uid: 0,
            gid: 0,
            mtime,
            atime,
            file_type,
            permission_mode: mode & 0o777,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Permission bits in `ls -l` form, e.g. `rwxr-xr-x`.
    pub fn permission_string(&self) -> String {
        format_permissions(self.permission_mode)
    }
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Full path of the entry in its backend's path style.
    pub fspath: String,
    /// Final path component.
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub modify_time: i64,
    pub access_time: i64,
}

impl FileEntry {
    pub fn from_stats(fspath: String, name: String, stats: &Stats) -> Self {
        Self {
            fspath,
            name,
            file_type: stats.file_type,
            size: stats.size,
            modify_time: stats.mtime,
            access_time: stats.atime,
        }
    }
}

/// Byte range of a [`FileSystem::get`]. Both ends are inclusive offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// Options of a [`FileSystem::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Permission bits for a newly created file.
    pub mode: Option<u32>,
    /// Aborts the write; a cancelled put leaves no partial file behind.
    pub cancel: Option<CancellationToken>,
}

/// Content written by [`FileSystem::put`].
pub enum PutSource {
    Bytes(Vec<u8>),
    Stream(ByteStream),
}

impl std::fmt::Debug for PutSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PutSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            PutSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Vec<u8>> for PutSource {
    fn from(bytes: Vec<u8>) -> Self {
        PutSource::Bytes(bytes)
    }
}

impl From<&str> for PutSource {
    fn from(text: &str) -> Self {
        PutSource::Bytes(text.as_bytes().to_vec())
    }
}

/// Operations every backend implements.
///
/// Paths are strings in the backend's [`path_style`](Self::path_style).
/// Every operation is independently failable; none retries on its own.
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    fn path_style(&self) -> PathStyle;

    /// Metadata of `path` without following a final symlink.
    async fn lstat(&self, path: &str) -> Result<Stats, FileError>;

    /// Open `path` for reading, optionally restricted to a byte range.
    async fn get(&self, path: &str, options: GetOptions) -> Result<ByteStream, FileError>;

    /// Create or overwrite `path` with `source`.
    ///
    /// A failing stream source fails the put with [`FileError::Stream`]. The
    /// destination is released on every exit path.
    async fn put(
        &self,
        source: PutSource,
        path: &str,
        options: PutOptions,
    ) -> Result<(), FileError>;

    async fn readlink(&self, path: &str) -> Result<String, FileError>;

    /// Create a symlink at `path` pointing to `target`.
    async fn symlink(&self, target: &str, path: &str) -> Result<(), FileError>;

    /// Create one directory. Fails when the parent is missing.
    async fn mkdir(&self, path: &str) -> Result<(), FileError>;

    /// Create `path` and any missing parents. Succeeds if it already exists.
    async fn ensure_dir(&self, path: &str) -> Result<(), FileError> {
        match self.lstat(path).await {
            Ok(stats) if stats.is_dir() => Ok(()),
            Ok(_) => Err(FileError::AlreadyExists(path.to_string())),
            Err(e) if e.is_not_found() => {
                let parent = self.path_style().parent(path);
                if parent != self.path_style().normalize(path) {
                    self.ensure_dir(&parent).await?;
                }
                match self.mkdir(path).await {
                    // Lost a race with another creator.
                    Err(FileError::AlreadyExists(_)) => Ok(()),
                    other => other,
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Children of `dir`. Fails as a whole if any child cannot be stat'ed.
    async fn list(&self, dir: &str) -> Result<Vec<FileEntry>, FileError>;

    /// Remove a single file or symlink.
    async fn unlink(&self, path: &str) -> Result<(), FileError>;

    /// Remove a directory, and with `recursive` everything below it.
    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FileError>;
}

/// Copy `source` into `dst`, watching `cancel` between chunks.
///
/// A read failure on the source becomes [`FileError::Stream`]; write
/// failures are mapped with the destination path. `dst` is flushed on
/// success and left to the caller to drop otherwise.
pub(crate) async fn copy_source<W>(
    source: PutSource,
    dst: &mut W,
    path: &str,
    cancel: &CancellationToken,
) -> Result<u64, FileError>
where
    W: AsyncWrite + Unpin + Send,
{
    let written = match source {
        PutSource::Bytes(bytes) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FileError::Cancelled(path.to_string())),
                res = dst.write_all(&bytes) => res.map_err(|e| FileError::from_io(e, path))?,
            }
            bytes.len() as u64
        }
        PutSource::Stream(mut reader) => {
            let mut buf = vec![0u8; COPY_CHUNK];
            let mut total = 0u64;
            loop {
                let n = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FileError::Cancelled(path.to_string())),
                    res = reader.read(&mut buf) => res.map_err(|e| FileError::Stream {
                        path: path.to_string(),
                        message: e.to_string(),
                    })?,
                };
                if n == 0 {
                    break;
                }
                dst.write_all(&buf[..n])
                    .await
                    .map_err(|e| FileError::from_io(e, path))?;
                total += n as u64;
            }
            total
        }
    };
    dst.flush().await.map_err(|e| FileError::from_io(e, path))?;
    Ok(written)
}

/// Format Unix permission bits as an `rwxrwxrwx` string.
pub fn format_permissions(mode: u32) -> String {
    let mut s = String::with_capacity(9);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

/// Read a whole stream into memory.
pub async fn read_all(mut stream: ByteStream) -> Result<Vec<u8>, FileError> {
    let mut out = Vec::new();
    stream
        .read_to_end(&mut out)
        .await
        .map_err(|e| FileError::OperationFailed(format!("read failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn FileSystem) {}

    /// Reader that yields some bytes, then fails.
    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.sent {
                return std::task::Poll::Ready(Err(std::io::Error::other("source broke")));
            }
            self.sent = true;
            buf.put_slice(b"partial");
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn format_permissions_renders_rwx() {
        assert_eq!(format_permissions(0o755), "rwxr-xr-x");
        assert_eq!(format_permissions(0o644), "rw-r--r--");
        assert_eq!(format_permissions(0o100600), "rw-------");
        assert_eq!(format_permissions(0), "---------");
    }

    #[test]
    fn stats_derive_permission_mode() {
        let stats = Stats::new(FileType::File, 0o100644, 3, 0, 0);
        assert_eq!(stats.permission_mode, 0o644);
        assert_eq!(stats.permission_string(), "rw-r--r--");
        assert!(!stats.is_dir());
    }

    #[tokio::test]
    async fn copy_source_reports_stream_failure() {
        let mut dst = Vec::new();
        let source = PutSource::Stream(Box::new(FailingReader { sent: false }));
        let err = copy_source(source, &mut dst, "/dst", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Stream { ref path, .. } if path == "/dst"));
        assert_eq!(dst, b"partial");
    }

    #[tokio::test]
    async fn copy_source_honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut dst = Vec::new();
        let err = copy_source("data".into(), &mut dst, "/dst", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Cancelled(_)));
        assert!(dst.is_empty());
    }

    #[test]
    fn put_source_debug_hides_content() {
        assert_eq!(format!("{:?}", PutSource::from("abc")), "Bytes(3)");
    }
}
