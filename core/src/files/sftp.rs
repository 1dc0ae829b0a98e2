//! SFTP backend over `ssh2`.
//!
//! Opens a dedicated SSH session in blocking mode on first use and reuses
//! it for later operations. Blocking calls are offloaded to
//! `tokio::task::spawn_blocking` to avoid stalling the async executor. A
//! transport failure drops the session so the next call reconnects.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{
    copy_source, ByteStream, FileEntry, FileSystem, FileType, GetOptions, PutOptions, PutSource,
    Stats,
};
use crate::config::{HostInfo, Passphrase};
use crate::errors::FileError;
use crate::paths::PathStyle;

// SFTP status codes (draft-ietf-secsh-filexfer).
const SSH_FX_NO_SUCH_FILE: i32 = 2;
const SSH_FX_PERMISSION_DENIED: i32 = 3;
const SSH_FX_NO_SUCH_PATH: i32 = 10;
const SSH_FX_FILE_ALREADY_EXISTS: i32 = 11;
const SSH_FX_DIR_NOT_EMPTY: i32 = 18;

/// Connection settings for one SFTP host.
#[derive(Debug, Clone, Default)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    /// A non-empty value selects agent auth. libssh2 always talks to the
    /// agent named by `SSH_AUTH_SOCK`, so the value only acts as a switch.
    pub agent: Option<String>,
    pub private_key_path: Option<String>,
    pub passphrase: Option<String>,
    /// The key's passphrase should be asked for. There is no way to ask
    /// from a blocking session, so connecting with a key then fails with
    /// [`FileError::NotSupported`].
    pub passphrase_prompt: bool,
    pub interactive_auth: bool,
    /// Preferred algorithms per kind (`kex`, `cipher`, `serverHostKey`, `hmac`).
    pub algorithms: BTreeMap<String, Vec<String>>,
}

impl From<&HostInfo> for SftpConfig {
    fn from(info: &HostInfo) -> Self {
        let (passphrase, passphrase_prompt) = match &info.passphrase {
            Some(Passphrase::Text(text)) => (Some(text.clone()), false),
            Some(Passphrase::Prompt(prompt)) => (None, *prompt),
            None => (None, false),
        };
        let algorithms = info
            .algorithms
            .as_ref()
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .map(|(kind, list)| {
                        let names = list
                            .as_array()
                            .map(|items| {
                                items
                                    .iter()
                                    .filter_map(|i| i.as_str().map(str::to_string))
                                    .collect()
                            })
                            .unwrap_or_default();
                        (kind.clone(), names)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host: info.host.clone(),
            port: info.port,
            username: info.username.clone(),
            password: info.password.clone(),
            agent: info.agent.clone(),
            private_key_path: info.private_key_path.clone(),
            passphrase,
            passphrase_prompt,
            interactive_auth: info.interactive_auth,
            algorithms,
        }
    }
}

/// State of a connected SFTP session.
struct SftpState {
    _session: ssh2::Session,
    sftp: ssh2::Sftp,
}

/// Filesystem on a remote host reached over SFTP.
pub struct SftpFileSystem {
    config: SftpConfig,
    state: Arc<Mutex<Option<SftpState>>>,
}

impl SftpFileSystem {
    pub fn new(config: SftpConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` against the session on the blocking pool, connecting first
    /// if needed.
    async fn run<T, Op>(&self, op: Op) -> Result<T, FileError>
    where
        T: Send + 'static,
        Op: FnOnce(&ssh2::Sftp) -> Result<T, FileError> + Send + 'static,
    {
        let state = self.state.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().map_err(|e| {
                FileError::OperationFailed(format!("Failed to lock SFTP state: {e}"))
            })?;

            if guard.is_none() {
                *guard = Some(open_session(&config)?);
            }
            let sftp_state = guard
                .as_ref()
                .ok_or_else(|| FileError::Transport("SFTP not connected".to_string()))?;

            let result = op(&sftp_state.sftp);
            if matches!(result, Err(FileError::Transport(_))) {
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| FileError::OperationFailed(format!("Task join failed: {e}")))?
    }
}

/// Answers every keyboard-interactive prompt with the configured password.
struct PasswordPrompt<'a> {
    password: &'a str,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt<'_> {
    fn prompt<'b>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'b>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.to_string()).collect()
    }
}

fn method_type(kind: &str) -> &'static [ssh2::MethodType] {
    match kind {
        "kex" => &[ssh2::MethodType::Kex],
        "cipher" => &[ssh2::MethodType::CryptCs, ssh2::MethodType::CryptSc],
        "serverHostKey" => &[ssh2::MethodType::HostKey],
        "hmac" => &[ssh2::MethodType::MacCs, ssh2::MethodType::MacSc],
        _ => &[],
    }
}

/// How a session proves the user's identity, in order of preference.
#[derive(Debug, PartialEq, Eq)]
enum AuthMethod<'a> {
    Agent { socket: &'a str },
    Key { path: PathBuf, passphrase: Option<&'a str> },
    KeyboardInteractive { password: &'a str },
    Password { password: &'a str },
}

/// Pick the auth method from the config, before any connection is made.
fn auth_method(config: &SftpConfig) -> Result<AuthMethod<'_>, FileError> {
    if let Some(socket) = config.agent.as_deref().filter(|a| !a.is_empty()) {
        return Ok(AuthMethod::Agent { socket });
    }

    if let Some(key_path) = config.private_key_path.as_deref().filter(|s| !s.is_empty()) {
        if config.passphrase.is_none() && config.passphrase_prompt {
            return Err(FileError::NotSupported(format!(
                "passphrase prompt for {key_path}"
            )));
        }
        return Ok(AuthMethod::Key {
            path: PathBuf::from(shellexpand::tilde(key_path).into_owned()),
            passphrase: config.passphrase.as_deref(),
        });
    }

    let password = config.password.as_deref().unwrap_or("");
    if config.interactive_auth {
        Ok(AuthMethod::KeyboardInteractive { password })
    } else {
        Ok(AuthMethod::Password { password })
    }
}

/// Connect, handshake and authenticate, then start the SFTP subsystem.
fn open_session(config: &SftpConfig) -> Result<SftpState, FileError> {
    let method = auth_method(config)?;
    let addr = format!("{}:{}", config.host, config.port);
    let tcp = TcpStream::connect(&addr)
        .map_err(|e| FileError::Transport(format!("Connection to {addr} failed: {e}")))?;

    let mut session = ssh2::Session::new().map_err(|e| FileError::Transport(e.to_string()))?;
    session.set_tcp_stream(tcp);

    for (kind, names) in &config.algorithms {
        if names.is_empty() {
            continue;
        }
        let prefs = names.join(",");
        for method in method_type(kind) {
            session
                .method_pref(*method, &prefs)
                .map_err(|e| FileError::Transport(format!("Invalid {kind} algorithms: {e}")))?;
        }
    }

    session
        .handshake()
        .map_err(|e| FileError::Transport(format!("Handshake failed: {e}")))?;

    authenticate(&session, &config.username, method)?;
    if !session.authenticated() {
        return Err(FileError::Transport("Authentication failed".to_string()));
    }

    session.set_blocking(true);
    let sftp = session
        .sftp()
        .map_err(|e| FileError::Transport(format!("SFTP init failed: {e}")))?;

    debug!(host = %config.host, port = config.port, "sftp session opened");
    Ok(SftpState {
        _session: session,
        sftp,
    })
}

fn authenticate(
    session: &ssh2::Session,
    user: &str,
    method: AuthMethod<'_>,
) -> Result<(), FileError> {
    match method {
        AuthMethod::Agent { socket } => {
            let env_socket = std::env::var("SSH_AUTH_SOCK").ok();
            if env_socket.as_deref() != Some(socket) {
                warn!(
                    configured = socket,
                    env = ?env_socket,
                    "agent socket differs from SSH_AUTH_SOCK; using SSH_AUTH_SOCK"
                );
            }
            session
                .userauth_agent(user)
                .map_err(|e| FileError::Transport(format!("Agent auth failed: {e}")))
        }
        AuthMethod::Key { path, passphrase } => session
            .userauth_pubkey_file(user, None, &path, passphrase)
            .map_err(|e| FileError::Transport(format!("Key auth failed: {e}"))),
        AuthMethod::KeyboardInteractive { password } => {
            let mut prompt = PasswordPrompt { password };
            session
                .userauth_keyboard_interactive(user, &mut prompt)
                .map_err(|e| {
                    FileError::Transport(format!("Keyboard-interactive auth failed: {e}"))
                })
        }
        AuthMethod::Password { password } => session
            .userauth_password(user, password)
            .map_err(|e| FileError::Transport(format!("Password auth failed: {e}"))),
    }
}

/// Map an `ssh2` error onto the shared kinds.
fn map_sftp_error(e: ssh2::Error, path: &str) -> FileError {
    match e.code() {
        ssh2::ErrorCode::SFTP(SSH_FX_NO_SUCH_FILE) | ssh2::ErrorCode::SFTP(SSH_FX_NO_SUCH_PATH) => {
            FileError::NotFound(path.to_string())
        }
        ssh2::ErrorCode::SFTP(SSH_FX_PERMISSION_DENIED) => {
            FileError::PermissionDenied(path.to_string())
        }
        ssh2::ErrorCode::SFTP(SSH_FX_FILE_ALREADY_EXISTS) => {
            FileError::AlreadyExists(path.to_string())
        }
        ssh2::ErrorCode::SFTP(SSH_FX_DIR_NOT_EMPTY) => FileError::NotEmpty(path.to_string()),
        ssh2::ErrorCode::SFTP(_) => FileError::OperationFailed(format!("{path}: {e}")),
        ssh2::ErrorCode::Session(_) => FileError::Transport(format!("{path}: {e}")),
    }
}

fn stats_from(stat: &ssh2::FileStat) -> Stats {
    let ft = stat.file_type();
    let file_type = if ft.is_symlink() {
        FileType::SymbolicLink
    } else if ft.is_dir() {
        FileType::Directory
    } else if ft.is_file() {
        FileType::File
    } else {
        FileType::Unknown
    };
    let mut stats = Stats::new(
        file_type,
        stat.perm.unwrap_or(0),
        stat.size.unwrap_or(0),
        stat.mtime.unwrap_or(0) as i64,
        stat.atime.unwrap_or(0) as i64,
    );
    stats.uid = stat.uid.unwrap_or(0);
    stats.gid = stat.gid.unwrap_or(0);
    stats
}

/// Children of `dir` as returned by `readdir`, without `.` and `..`.
fn read_children(
    sftp: &ssh2::Sftp,
    dir: &str,
) -> Result<Vec<(PathBuf, ssh2::FileStat)>, FileError> {
    let entries = sftp
        .readdir(Path::new(dir))
        .map_err(|e| map_sftp_error(e, dir))?;
    Ok(entries
        .into_iter()
        .filter(|(p, _)| {
            let name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            name != "." && name != ".."
        })
        .collect())
}

fn remove_tree(sftp: &ssh2::Sftp, dir: &str) -> Result<(), FileError> {
    for (child, stat) in read_children(sftp, dir)? {
        let child = child.to_string_lossy().to_string();
        let ft = stat.file_type();
        if ft.is_dir() && !ft.is_symlink() {
            remove_tree(sftp, &child)?;
        } else {
            sftp.unlink(Path::new(&child))
                .map_err(|e| map_sftp_error(e, &child))?;
        }
    }
    sftp.rmdir(Path::new(dir)).map_err(|e| map_sftp_error(e, dir))
}

#[async_trait::async_trait]
impl FileSystem for SftpFileSystem {
    fn path_style(&self) -> PathStyle {
        PathStyle::Posix
    }

    async fn lstat(&self, path: &str) -> Result<Stats, FileError> {
        let path = path.to_string();
        self.run(move |sftp| {
            sftp.lstat(Path::new(&path))
                .map(|stat| stats_from(&stat))
                .map_err(|e| map_sftp_error(e, &path))
        })
        .await
    }

    async fn get(&self, path: &str, options: GetOptions) -> Result<ByteStream, FileError> {
        let path = path.to_string();
        let data = self
            .run(move |sftp| {
                let mut file = sftp
                    .open(Path::new(&path))
                    .map_err(|e| map_sftp_error(e, &path))?;
                let start = options.start.unwrap_or(0);
                if start > 0 {
                    file.seek(SeekFrom::Start(start))
                        .map_err(|e| FileError::from_io(e, &path))?;
                }
                let mut data = Vec::new();
                let read = match options.end {
                    Some(end) => {
                        let len = end.saturating_add(1).saturating_sub(start);
                        file.take(len).read_to_end(&mut data)
                    }
                    None => file.read_to_end(&mut data),
                };
                read.map_err(|e| FileError::from_io(e, &path))?;
                Ok(data)
            })
            .await?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn put(
        &self,
        source: PutSource,
        path: &str,
        options: PutOptions,
    ) -> Result<(), FileError> {
        // Drain the source first: a failing source then never opens the
        // remote file at all.
        let cancel = options.cancel.unwrap_or_default();
        let mut data = Vec::new();
        copy_source(source, &mut data, path, &cancel).await?;

        let mode = options.mode.unwrap_or(0o644) as i32;
        let owned = path.to_string();
        let written = data.len();
        self.run(move |sftp| {
            let mut file = sftp
                .open_mode(
                    Path::new(&owned),
                    ssh2::OpenFlags::WRITE | ssh2::OpenFlags::CREATE | ssh2::OpenFlags::TRUNCATE,
                    mode,
                    ssh2::OpenType::File,
                )
                .map_err(|e| map_sftp_error(e, &owned))?;
            file.write_all(&data)
                .map_err(|e| FileError::from_io(e, &owned))
        })
        .await?;
        debug!(path, written, "sftp put");
        Ok(())
    }

    async fn readlink(&self, path: &str) -> Result<String, FileError> {
        let path = path.to_string();
        self.run(move |sftp| {
            sftp.readlink(Path::new(&path))
                .map(|target| target.to_string_lossy().to_string())
                .map_err(|e| map_sftp_error(e, &path))
        })
        .await
    }

    async fn symlink(&self, target: &str, path: &str) -> Result<(), FileError> {
        let target = target.to_string();
        let path = path.to_string();
        self.run(move |sftp| {
            // ssh2 takes the link's destination first, then its location.
            sftp.symlink(Path::new(&target), Path::new(&path))
                .map_err(|e| map_sftp_error(e, &path))
        })
        .await
    }

    async fn mkdir(&self, path: &str) -> Result<(), FileError> {
        let path = path.to_string();
        self.run(move |sftp| {
            sftp.mkdir(Path::new(&path), 0o755)
                .map_err(|e| map_sftp_error(e, &path))
        })
        .await
    }

    async fn list(&self, dir: &str) -> Result<Vec<FileEntry>, FileError> {
        let dir = dir.to_string();
        // readdir returns each child's lstat attributes along with its name.
        self.run(move |sftp| {
            Ok(read_children(sftp, &dir)?
                .into_iter()
                .map(|(child, stat)| {
                    let name = child
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let fspath = PathStyle::Posix.join(&dir, &name);
                    FileEntry::from_stats(fspath, name, &stats_from(&stat))
                })
                .collect())
        })
        .await
    }

    async fn unlink(&self, path: &str) -> Result<(), FileError> {
        let path = path.to_string();
        self.run(move |sftp| {
            sftp.unlink(Path::new(&path))
                .map_err(|e| map_sftp_error(e, &path))
        })
        .await
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FileError> {
        let path = path.to_string();
        self.run(move |sftp| {
            if recursive {
                return remove_tree(sftp, &path);
            }
            // Most servers answer a non-empty rmdir with a generic failure.
            if !read_children(sftp, &path)?.is_empty() {
                return Err(FileError::NotEmpty(path));
            }
            sftp.rmdir(Path::new(&path))
                .map_err(|e| map_sftp_error(e, &path))
        })
        .await
    }
}
