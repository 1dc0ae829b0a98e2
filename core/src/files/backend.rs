//! Selecting a backend from a configuration's protocol.

use super::{
    ByteStream, FileEntry, FileSystem, GetOptions, LocalFileSystem, MemoryFileSystem, PutOptions,
    PutSource, Stats,
};
#[cfg(feature = "sftp")]
use super::{SftpConfig, SftpFileSystem};
use crate::config::{HostInfo, Protocol};
use crate::errors::FileError;
use crate::paths::PathStyle;

/// Every backend this crate can build.
pub enum Backend {
    Local(LocalFileSystem),
    Memory(MemoryFileSystem),
    #[cfg(feature = "sftp")]
    Sftp(SftpFileSystem),
}

impl Backend {
    /// Build the backend for a host's protocol.
    ///
    /// `test` gets a fresh in-memory tree. FTP has no transport here and
    /// is rejected with [`FileError::NotSupported`].
    pub fn for_host(info: &HostInfo) -> Result<Self, FileError> {
        match info.protocol {
            Protocol::Local => Ok(Backend::Local(LocalFileSystem::new())),
            Protocol::Test => Ok(Backend::Memory(MemoryFileSystem::new())),
            #[cfg(feature = "sftp")]
            Protocol::Sftp => Ok(Backend::Sftp(SftpFileSystem::new(SftpConfig::from(info)))),
            #[cfg(not(feature = "sftp"))]
            Protocol::Sftp => Err(FileError::NotSupported(
                "sftp (built without the sftp feature)".to_string(),
            )),
            Protocol::Ftp => Err(FileError::NotSupported(format!("ftp://{}", info.host))),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $fs:ident => $call:expr) => {
        match $self {
            Backend::Local($fs) => $call,
            Backend::Memory($fs) => $call,
            #[cfg(feature = "sftp")]
            Backend::Sftp($fs) => $call,
        }
    };
}

#[async_trait::async_trait]
impl FileSystem for Backend {
    fn path_style(&self) -> PathStyle {
        dispatch!(self, fs => fs.path_style())
    }

    async fn lstat(&self, path: &str) -> Result<Stats, FileError> {
        dispatch!(self, fs => fs.lstat(path).await)
    }

    async fn get(&self, path: &str, options: GetOptions) -> Result<ByteStream, FileError> {
        dispatch!(self, fs => fs.get(path, options).await)
    }

    async fn put(
        &self,
        source: PutSource,
        path: &str,
        options: PutOptions,
    ) -> Result<(), FileError> {
        dispatch!(self, fs => fs.put(source, path, options).await)
    }

    async fn readlink(&self, path: &str) -> Result<String, FileError> {
        dispatch!(self, fs => fs.readlink(path).await)
    }

    async fn symlink(&self, target: &str, path: &str) -> Result<(), FileError> {
        dispatch!(self, fs => fs.symlink(target, path).await)
    }

    async fn mkdir(&self, path: &str) -> Result<(), FileError> {
        dispatch!(self, fs => fs.mkdir(path).await)
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), FileError> {
        dispatch!(self, fs => fs.ensure_dir(path).await)
    }

    async fn list(&self, dir: &str) -> Result<Vec<FileEntry>, FileError> {
        dispatch!(self, fs => fs.list(dir).await)
    }

    async fn unlink(&self, path: &str) -> Result<(), FileError> {
        dispatch!(self, fs => fs.unlink(path).await)
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FileError> {
        dispatch!(self, fs => fs.rmdir(path, recursive).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigRecord;

    fn info(protocol: Protocol) -> HostInfo {
        HostInfo::from(&ConfigRecord {
            protocol,
            ..Default::default()
        })
    }

    #[test]
    fn protocol_selects_backend() {
        assert!(matches!(Backend::for_host(&info(Protocol::Local)), Ok(Backend::Local(_))));
        assert!(matches!(Backend::for_host(&info(Protocol::Test)), Ok(Backend::Memory(_))));
    }

    #[test]
    fn ftp_is_not_supported() {
        let err = Backend::for_host(&info(Protocol::Ftp)).err().unwrap();
        assert!(matches!(err, FileError::NotSupported(ref what) if what == "ftp://host"));
    }

    #[cfg(feature = "sftp")]
    #[test]
    fn sftp_builds_lazily() {
        // No connection is attempted until the first operation.
        let backend = Backend::for_host(&info(Protocol::Sftp)).unwrap();
        assert_eq!(backend.path_style(), PathStyle::Posix);
    }

    #[tokio::test]
    async fn dispatches_to_the_inner_backend() {
        let backend = Backend::for_host(&info(Protocol::Test)).unwrap();
        backend.ensure_dir("/a/b").await.unwrap();
        backend.put("x".into(), "/a/b/f", PutOptions::default()).await.unwrap();
        let entries = backend.list("/a/b").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "f");
    }
}
