//! Sync configuration records and their resolution.
//!
//! A [`ConfigRecord`] is one validated, defaulted entry of a workspace
//! config file. Records live in a [`ConfigRegistry`], which answers "which
//! configuration governs this path" through a prefix trie.

pub mod registry;
pub mod scaffold;
pub mod schema;
pub mod trie;

pub use registry::{config_path, ConfigRegistry, IgnorePredicate, ResolvedConfig, CONFIG_PATH};
pub use scaffold::{edit_config, ensure_config_scaffold};
pub use schema::{validate_record, ValidationError};
pub use trie::ConfigTrie;

use serde::{Deserialize, Deserializer, Serialize};

/// Transport used to reach the remote side of a configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// The "remote" tree is another directory on local disk.
    Local,
    #[default]
    Sftp,
    Ftp,
    /// In-memory filesystem, for tests.
    Test,
}

impl Protocol {
    pub const ALL: [&'static str; 4] = ["local", "sftp", "ftp", "test"];

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Local => "local",
            Protocol::Sftp => "sftp",
            Protocol::Ftp => "ftp",
            Protocol::Test => "test",
        }
    }
}

/// How a directory sync treats destination entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Transfer new and changed files only.
    #[default]
    Update,
    /// Transfer everything and remove destination entries missing at the source.
    Full,
}

/// FTP TLS mode: a plain flag or an explicit mode name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FtpSecure {
    Flag(bool),
    Mode(SecureMode),
}

impl Default for FtpSecure {
    fn default() -> Self {
        FtpSecure::Flag(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecureMode {
    Control,
    Implicit,
}

/// Key passphrase: a literal, or `true` to ask the user at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Passphrase {
    Text(String),
    Prompt(bool),
}

/// File watcher settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfig {
    /// Glob of files to watch; `None` when watching is off (`false`/`null`).
    #[serde(default, deserialize_with = "deserialize_watch_glob")]
    pub files: Option<String>,
    #[serde(default)]
    pub auto_upload: bool,
    #[serde(default)]
    pub auto_delete: bool,
}

/// A validated configuration record with every default applied.
///
/// `context` is the absolute, trie-normalized local root this record
/// governs. `virtual_name` is the logical name used for name lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    #[serde(default)]
    pub context: String,
    #[serde(default, alias = "virname")]
    pub virtual_name: String,
    #[serde(default)]
    pub protocol: Protocol,

    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,

    // sftp
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub passphrase: Option<Passphrase>,
    #[serde(default)]
    pub interactive_auth: bool,
    /// Algorithm overrides, passed through untouched to the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithms: Option<serde_json::Value>,

    // ftp
    #[serde(default)]
    pub secure: FtpSecure,
    #[serde(default)]
    pub secure_options: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub passive: bool,

    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    #[serde(default)]
    pub upload_on_save: bool,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Upper bound on simultaneous transfers for this record's backend.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            context: String::new(),
            virtual_name: String::new(),
            protocol: Protocol::default(),
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: None,
            agent: None,
            private_key_path: None,
            passphrase: None,
            interactive_auth: false,
            algorithms: None,
            secure: FtpSecure::default(),
            secure_options: None,
            passive: false,
            remote_path: default_remote_path(),
            upload_on_save: false,
            sync_mode: SyncMode::default(),
            ignore: default_ignore(),
            watcher: WatcherConfig::default(),
            concurrency: default_concurrency(),
        }
    }
}

/// The connection-relevant subset of a [`ConfigRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub remote_path: String,

    // sftp
    pub agent: Option<String>,
    pub private_key_path: Option<String>,
    pub passphrase: Option<Passphrase>,
    pub interactive_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithms: Option<serde_json::Value>,

    // ftp
    pub secure: FtpSecure,
    pub secure_options: Option<serde_json::Map<String, serde_json::Value>>,
    pub passive: bool,
}

impl From<&ConfigRecord> for HostInfo {
    fn from(config: &ConfigRecord) -> Self {
        Self {
            protocol: config.protocol,
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            remote_path: config.remote_path.clone(),
            agent: config.agent.clone(),
            private_key_path: config.private_key_path.clone(),
            passphrase: config.passphrase.clone(),
            interactive_auth: config.interactive_auth,
            algorithms: config.algorithms.clone(),
            secure: config.secure,
            secure_options: config.secure_options.clone(),
            passive: config.passive,
        }
    }
}

/// `watcher.files` accepts a glob string, `false`, or `null`.
fn deserialize_watch_glob<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum GlobOrFlag {
        Glob(String),
        Flag(bool),
    }

    match Option::<GlobOrFlag>::deserialize(deserializer)? {
        Some(GlobOrFlag::Glob(glob)) => Ok(Some(glob)),
        Some(GlobOrFlag::Flag(false)) | None => Ok(None),
        Some(GlobOrFlag::Flag(true)) => Err(serde::de::Error::custom(
            "watcher.files must be a glob string or false",
        )),
    }
}

// --- Default value functions ---

fn default_host() -> String {
    "host".to_string()
}

fn default_username() -> String {
    "username".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_remote_path() -> String {
    "/".to_string()
}

fn default_ignore() -> Vec<String> {
    vec![".vscode".into(), ".git".into(), ".DS_Store".into()]
}

fn default_concurrency() -> usize {
    512
}
