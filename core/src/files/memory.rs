//! In-memory backend behind the `test` protocol.
//!
//! Paths are `/`-delimited. Clones share the same tree, so a test can keep
//! a handle for inspection while another copy is wrapped or moved into a
//! [`Backend`](super::Backend). Open write handles and read streams are
//! counted: a put that fails half-way must still bring the count back to
//! zero.

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::try_join_all;
use tokio::io::{AsyncRead, ReadBuf};

use super::{
    copy_source, ByteStream, FileEntry, FileSystem, FileType, GetOptions, PutOptions, PutSource,
    Stats,
};
use crate::errors::FileError;
use crate::paths::PathStyle;

const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;
const MAX_LINK_HOPS: usize = 8;

#[derive(Debug, Clone)]
enum Node {
    File { data: Arc<Vec<u8>>, mode: u32, mtime: i64 },
    Dir { mode: u32, mtime: i64 },
    Symlink { target: String, mtime: i64 },
}

#[derive(Debug, Default)]
struct HandleCounter {
    open: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts one open file for as long as it lives.
struct OpenHandle {
    counter: Arc<HandleCounter>,
}

impl OpenHandle {
    fn open(counter: &Arc<HandleCounter>) -> Self {
        let now = counter.open.fetch_add(1, Ordering::SeqCst) + 1;
        counter.peak.fetch_max(now, Ordering::SeqCst);
        Self {
            counter: counter.clone(),
        }
    }
}

impl Drop for OpenHandle {
    fn drop(&mut self) {
        self.counter.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Content handed out by `get`, counted as open until dropped.
struct ReadStream {
    data: Cursor<Vec<u8>>,
    _handle: OpenHandle,
}

impl AsyncRead for ReadStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.data).poll_read(cx, buf)
    }
}

#[derive(Debug)]
struct Inner {
    nodes: Mutex<BTreeMap<String, Node>>,
    writers: Arc<HandleCounter>,
    readers: Arc<HandleCounter>,
    /// Paths whose `lstat` fails with permission denied.
    unreadable: Mutex<HashSet<String>>,
    /// Artificial delay inside every put, while the handle is open.
    latency: Option<Duration>,
}

/// A filesystem tree held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    inner: Arc<Inner>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn key(path: &str) -> String {
    let style = PathStyle::Posix;
    if style.is_absolute(path) {
        style.normalize(path)
    } else {
        style.join("/", path)
    }
}

fn parent_of(key: &str) -> String {
    PathStyle::Posix.parent(key)
}

fn is_descendant(key: &str, dir: &str) -> bool {
    key != dir && PathStyle::Posix.relative(dir, key).is_some()
}

impl MemoryFileSystem {
    /// An empty tree containing only `/`.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Like [`new`](Self::new), with every put holding its handle for
    /// `latency` before completing.
    pub fn with_latency(latency: Duration) -> Self {
        Self::build(Some(latency))
    }

    fn build(latency: Option<Duration>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Dir {
                mode: 0o755,
                mtime: now(),
            },
        );
        Self {
            inner: Arc::new(Inner {
                nodes: Mutex::new(nodes),
                writers: Arc::new(HandleCounter::default()),
                readers: Arc::new(HandleCounter::default()),
                unreadable: Mutex::new(HashSet::new()),
                latency,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Node>> {
        match self.inner.nodes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn unreadable(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.inner.unreadable.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Destinations currently open for writing.
    pub fn open_handles(&self) -> usize {
        self.inner.writers.open.load(Ordering::SeqCst)
    }

    /// Highest number of destinations that were open at the same time.
    pub fn peak_open_handles(&self) -> usize {
        self.inner.writers.peak.load(Ordering::SeqCst)
    }

    /// Streams returned by `get` that are still alive.
    pub fn open_readers(&self) -> usize {
        self.inner.readers.open.load(Ordering::SeqCst)
    }

    /// Highest number of `get` streams alive at the same time.
    pub fn peak_open_readers(&self) -> usize {
        self.inner.readers.peak.load(Ordering::SeqCst)
    }

    /// Make every later `lstat` of `path` fail with
    /// [`FileError::PermissionDenied`], as for an entry the caller may not
    /// inspect.
    pub fn deny_lstat(&self, path: &str) {
        self.unreadable().insert(key(path));
    }

    /// Content of a regular file, if there is one at `path`.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().get(&key(path)) {
            Some(Node::File { data, .. }) => Some(data.as_ref().clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().contains_key(&key(path))
    }

    /// Override the modification time of an existing entry.
    pub fn set_mtime(&self, path: &str, mtime: i64) -> Result<(), FileError> {
        let mut nodes = self.lock();
        match nodes.get_mut(&key(path)) {
            Some(Node::File { mtime: t, .. })
            | Some(Node::Dir { mtime: t, .. })
            | Some(Node::Symlink { mtime: t, .. }) => {
                *t = mtime;
                Ok(())
            }
            None => Err(FileError::NotFound(path.to_string())),
        }
    }

    fn check_parent(
        nodes: &BTreeMap<String, Node>,
        key: &str,
        path: &str,
    ) -> Result<(), FileError> {
        let parent = parent_of(key);
        if parent == key {
            return Ok(());
        }
        match nodes.get(&parent) {
            Some(Node::Dir { .. }) => Ok(()),
            Some(_) => Err(FileError::OperationFailed(format!("{parent}: not a directory"))),
            None => Err(FileError::NotFound(path.to_string())),
        }
    }

    /// Follow symlinks from `key` to the final node.
    fn resolve(
        nodes: &BTreeMap<String, Node>,
        key: &str,
        path: &str,
    ) -> Result<(String, Node), FileError> {
        let mut current = key.to_string();
        for _ in 0..MAX_LINK_HOPS {
            match nodes.get(&current) {
                Some(Node::Symlink { target, .. }) => {
                    current = if PathStyle::Posix.is_absolute(target) {
                        PathStyle::Posix.normalize(target)
                    } else {
                        PathStyle::Posix.join(&parent_of(&current), target)
                    };
                }
                Some(node) => return Ok((current, node.clone())),
                None => return Err(FileError::NotFound(path.to_string())),
            }
        }
        Err(FileError::OperationFailed(format!(
            "{path}: too many levels of symbolic links"
        )))
    }
}

fn stats_of(node: &Node) -> Stats {
    match node {
        Node::File { data, mode, mtime } => {
            Stats::new(FileType::File, S_IFREG | mode, data.len() as u64, *mtime, *mtime)
        }
        Node::Dir { mode, mtime } => {
            Stats::new(FileType::Directory, S_IFDIR | mode, 0, *mtime, *mtime)
        }
        Node::Symlink { target, mtime } => Stats::new(
            FileType::SymbolicLink,
            S_IFLNK | 0o777,
            target.len() as u64,
            *mtime,
            *mtime,
        ),
    }
}

#[async_trait::async_trait]
impl FileSystem for MemoryFileSystem {
    fn path_style(&self) -> PathStyle {
        PathStyle::Posix
    }

    async fn lstat(&self, path: &str) -> Result<Stats, FileError> {
        let key = key(path);
        if self.unreadable().contains(&key) {
            return Err(FileError::PermissionDenied(path.to_string()));
        }
        self.lock()
            .get(&key)
            .map(stats_of)
            .ok_or_else(|| FileError::NotFound(path.to_string()))
    }

    async fn get(&self, path: &str, options: GetOptions) -> Result<ByteStream, FileError> {
        let (_, node) = Self::resolve(&self.lock(), &key(path), path)?;
        let Node::File { data, .. } = node else {
            return Err(FileError::OperationFailed(format!("{path}: is a directory")));
        };

        let len = data.len() as u64;
        let start = options.start.unwrap_or(0).min(len);
        let end = options
            .end
            .map_or(len, |end| end.saturating_add(1).min(len))
            .max(start);
        let slice = data[start as usize..end as usize].to_vec();
        Ok(Box::new(ReadStream {
            data: Cursor::new(slice),
            _handle: OpenHandle::open(&self.inner.readers),
        }))
    }

    async fn put(
        &self,
        source: PutSource,
        path: &str,
        options: PutOptions,
    ) -> Result<(), FileError> {
        let key = key(path);
        let existing_mode = {
            let nodes = self.lock();
            Self::check_parent(&nodes, &key, path)?;
            match nodes.get(&key) {
                Some(Node::Dir { .. }) => {
                    return Err(FileError::OperationFailed(format!("{path}: is a directory")));
                }
                Some(Node::File { mode, .. }) => Some(*mode),
                _ => None,
            }
        };
        let cancel = options.cancel.unwrap_or_default();

        let handle = OpenHandle::open(&self.inner.writers);
        if let Some(latency) = self.inner.latency {
            tokio::select! {
                _ = cancel.cancelled() => return Err(FileError::Cancelled(path.to_string())),
                _ = tokio::time::sleep(latency) => {}
            }
        }
        let mut buf = Vec::new();
        let result = copy_source(source, &mut buf, path, &cancel).await;
        drop(handle);
        result?;

        let mode = options.mode.or(existing_mode).unwrap_or(0o644) & 0o7777;
        // The tree may have changed while the content was copied.
        let mut nodes = self.lock();
        Self::check_parent(&nodes, &key, path)?;
        if let Some(Node::Dir { .. }) = nodes.get(&key) {
            return Err(FileError::OperationFailed(format!("{path}: is a directory")));
        }
        nodes.insert(
            key,
            Node::File {
                data: Arc::new(buf),
                mode,
                mtime: now(),
            },
        );
        Ok(())
    }

    async fn readlink(&self, path: &str) -> Result<String, FileError> {
        match self.lock().get(&key(path)) {
            Some(Node::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(FileError::OperationFailed(format!(
                "{path}: not a symbolic link"
            ))),
            None => Err(FileError::NotFound(path.to_string())),
        }
    }

    async fn symlink(&self, target: &str, path: &str) -> Result<(), FileError> {
        let key = key(path);
        let mut nodes = self.lock();
        Self::check_parent(&nodes, &key, path)?;
        if nodes.contains_key(&key) {
            return Err(FileError::AlreadyExists(path.to_string()));
        }
        nodes.insert(
            key,
            Node::Symlink {
                target: target.to_string(),
                mtime: now(),
            },
        );
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<(), FileError> {
        let key = key(path);
        let mut nodes = self.lock();
        Self::check_parent(&nodes, &key, path)?;
        if nodes.contains_key(&key) {
            return Err(FileError::AlreadyExists(path.to_string()));
        }
        nodes.insert(
            key,
            Node::Dir {
                mode: 0o755,
                mtime: now(),
            },
        );
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<FileEntry>, FileError> {
        let dir_key = key(dir);
        let children: Vec<String> = {
            let nodes = self.lock();
            match nodes.get(&dir_key) {
                Some(Node::Dir { .. }) => {}
                Some(_) => {
                    return Err(FileError::OperationFailed(format!("{dir}: not a directory")));
                }
                None => return Err(FileError::NotFound(dir.to_string())),
            }
            nodes
                .keys()
                .filter(|k| k.as_str() != dir_key && parent_of(k) == dir_key)
                .cloned()
                .collect()
        };

        try_join_all(children.into_iter().map(|fspath| async move {
            let stats = self.lstat(&fspath).await?;
            let name = PathStyle::Posix.basename(&fspath);
            Ok::<_, FileError>(FileEntry::from_stats(fspath, name, &stats))
        }))
        .await
    }

    async fn unlink(&self, path: &str) -> Result<(), FileError> {
        let key = key(path);
        let mut nodes = self.lock();
        match nodes.get(&key) {
            Some(Node::Dir { .. }) => {
                Err(FileError::OperationFailed(format!("{path}: is a directory")))
            }
            Some(_) => {
                nodes.remove(&key);
                Ok(())
            }
            None => Err(FileError::NotFound(path.to_string())),
        }
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FileError> {
        let key = key(path);
        let mut nodes = self.lock();
        match nodes.get(&key) {
            Some(Node::Dir { .. }) => {}
            Some(_) => return Err(FileError::OperationFailed(format!("{path}: not a directory"))),
            None => return Err(FileError::NotFound(path.to_string())),
        }

        let has_children = nodes.keys().any(|k| is_descendant(k, &key));
        if has_children && !recursive {
            return Err(FileError::NotEmpty(path.to_string()));
        }
        nodes.retain(|k, _| !is_descendant(k, &key));
        if key != "/" {
            nodes.remove(&key);
        }
        Ok(())
    }
}
