//! Bounding the number of in-flight transfers of a backend.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::{ByteStream, FileEntry, FileSystem, GetOptions, PutOptions, PutSource, Stats};
use crate::errors::FileError;
use crate::paths::PathStyle;

/// Wraps a backend so at most `concurrency` gets and puts run at once.
///
/// Excess transfers wait for a permit instead of failing. A `get` keeps its
/// permit until the returned stream is dropped. Other operations are not
/// limited. The limit is clamped to `1..=Semaphore::MAX_PERMITS`.
pub struct Limited<F> {
    inner: F,
    permits: Arc<Semaphore>,
}

impl<F: FileSystem> Limited<F> {
    pub fn new(inner: F, concurrency: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(concurrency.clamp(1, Semaphore::MAX_PERMITS))),
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Permits not currently held by a transfer.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn acquire(
        &self,
        path: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<OwnedSemaphorePermit, FileError> {
        let acquire = self.permits.clone().acquire_owned();
        let permit = match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Err(FileError::Cancelled(path.to_string())),
                permit = acquire => permit,
            },
            None => acquire.await,
        };
        permit.map_err(|_| FileError::OperationFailed("transfer limiter closed".to_string()))
    }
}

/// A read stream that returns its transfer permit when dropped.
struct PermitStream {
    inner: ByteStream,
    _permit: OwnedSemaphorePermit,
}

impl AsyncRead for PermitStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

#[async_trait::async_trait]
impl<F: FileSystem> FileSystem for Limited<F> {
    fn path_style(&self) -> PathStyle {
        self.inner.path_style()
    }

    async fn lstat(&self, path: &str) -> Result<Stats, FileError> {
        self.inner.lstat(path).await
    }

    async fn get(&self, path: &str, options: GetOptions) -> Result<ByteStream, FileError> {
        let permit = self.acquire(path, None).await?;
        let stream = self.inner.get(path, options).await?;
        Ok(Box::new(PermitStream {
            inner: stream,
            _permit: permit,
        }))
    }

    async fn put(
        &self,
        source: PutSource,
        path: &str,
        options: PutOptions,
    ) -> Result<(), FileError> {
        let _permit = self.acquire(path, options.cancel.as_ref()).await?;
        self.inner.put(source, path, options).await
    }

    async fn readlink(&self, path: &str) -> Result<String, FileError> {
        self.inner.readlink(path).await
    }

    async fn symlink(&self, target: &str, path: &str) -> Result<(), FileError> {
        self.inner.symlink(target, path).await
    }

    async fn mkdir(&self, path: &str) -> Result<(), FileError> {
        self.inner.mkdir(path).await
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), FileError> {
        self.inner.ensure_dir(path).await
    }

    async fn list(&self, dir: &str) -> Result<Vec<FileEntry>, FileError> {
        self.inner.list(dir).await
    }

    async fn unlink(&self, path: &str) -> Result<(), FileError> {
        self.inner.unlink(path).await
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FileError> {
        self.inner.rmdir(path, recursive).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::MemoryFileSystem;
    use futures_util::future::join_all;
    use std::time::Duration;

    #[tokio::test]
    async fn puts_queue_behind_the_limit() {
        let memory = MemoryFileSystem::with_latency(Duration::from_millis(20));
        let limited = Limited::new(memory.clone(), 2);

        let puts = (0..6).map(|i| {
            let path = format!("/f{i}");
            let limited = &limited;
            async move { limited.put("x".into(), &path, PutOptions::default()).await }
        });
        for result in join_all(puts).await {
            result.unwrap();
        }

        assert_eq!(memory.peak_open_handles(), 2);
        assert_eq!(memory.open_handles(), 0);
        assert!((0..6).all(|i| memory.exists(&format!("/f{i}"))));
        assert_eq!(limited.available(), 2);
    }

    #[tokio::test]
    async fn get_holds_its_permit_until_the_stream_drops() {
        let memory = MemoryFileSystem::new();
        memory.put("data".into(), "/f", PutOptions::default()).await.unwrap();
        let limited = Limited::new(memory, 1);

        let stream = limited.get("/f", GetOptions::default()).await.unwrap();
        assert_eq!(limited.available(), 0);
        drop(stream);
        assert_eq!(limited.available(), 1);
    }

    #[tokio::test]
    async fn cancelled_put_stops_waiting_for_a_permit() {
        let memory = MemoryFileSystem::new();
        memory.put("data".into(), "/f", PutOptions::default()).await.unwrap();
        let limited = Limited::new(memory.clone(), 1);
        let _held = limited.get("/f", GetOptions::default()).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = PutOptions {
            cancel: Some(cancel),
            ..Default::default()
        };
        let err = limited.put("x".into(), "/g", options).await.unwrap_err();
        assert!(matches!(err, FileError::Cancelled(_)));
        assert!(!memory.exists("/g"));
    }

    #[test]
    fn zero_concurrency_still_allows_one_transfer() {
        let limited = Limited::new(MemoryFileSystem::new(), 0);
        assert_eq!(limited.available(), 1);
    }

    #[test]
    fn huge_concurrency_is_clamped() {
        let limited = Limited::new(MemoryFileSystem::new(), usize::MAX);
        assert_eq!(limited.available(), Semaphore::MAX_PERMITS);
    }
}
