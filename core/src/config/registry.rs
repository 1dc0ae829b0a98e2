//! Loading config files and resolving the configuration for a path.
//!
//! A [`ConfigRegistry`] is an explicit object owned by whoever drives the
//! sync (the CLI, an editor host, a test). It holds the trie of loaded
//! records behind an `Arc` snapshot: lookups clone the snapshot and never
//! block a load for longer than the pointer swap, and a reload replaces the
//! whole trie at once. A lookup racing a reload sees either the old or the
//! new set of records, never a mix.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::schema::validate_record;
use super::trie::ConfigTrie;
use super::{ConfigRecord, HostInfo};
use crate::errors::ConfigError;
use crate::ignore::IgnoreMatcher;
use crate::paths::{local_relative, normalize_trie_path, remote_relative, to_remote, PathStyle};

/// Location of the config file relative to a workspace root.
pub const CONFIG_PATH: &str = ".vscode/sftp.json";

/// Full path of the config file for a workspace root.
pub fn config_path(base_path: &Path) -> PathBuf {
    base_path.join(CONFIG_PATH)
}

/// A loaded record together with its compiled ignore patterns.
#[derive(Debug)]
struct ConfigEntry {
    record: ConfigRecord,
    matcher: Arc<IgnoreMatcher>,
}

type Snapshot = Arc<ConfigTrie<Arc<ConfigEntry>>>;

/// Registry of every configuration known to the process.
pub struct ConfigRegistry {
    trie: RwLock<Snapshot>,
}

impl ConfigRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            trie: RwLock::new(Arc::new(ConfigTrie::default())),
        }
    }

    fn snapshot(&self) -> Snapshot {
        match self.trie.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_trie_mut<R>(&self, f: impl FnOnce(&mut ConfigTrie<Arc<ConfigEntry>>) -> R) -> R {
        let mut guard = match self.trie.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(Arc::make_mut(&mut *guard))
    }

    /// Load one config file and add its records.
    ///
    /// The file holds a single record or an array of them. Every record is
    /// validated before anything is inserted: one bad record fails the whole
    /// file and leaves the registry untouched.
    pub async fn load(&self, config_path: &Path) -> Result<Vec<ConfigRecord>, ConfigError> {
        let entries = read_config_file(config_path).await?;
        let records = entries.iter().map(|e| e.record.clone()).collect();
        self.with_trie_mut(|trie| {
            for entry in entries {
                insert_entry(trie, entry);
            }
        });
        Ok(records)
    }

    /// Load the config file under `base_path` if there is one.
    pub async fn init_configs(&self, base_path: &Path) -> Result<Vec<ConfigRecord>, ConfigError> {
        let path = config_path(base_path);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => self.load(&path).await,
            _ => Ok(Vec::new()),
        }
    }

    /// Replace every known configuration with the contents of `config_paths`.
    ///
    /// The new trie is built aside and swapped in only when every file
    /// loaded; on failure the previous state stays in place.
    pub async fn reload(&self, config_paths: &[PathBuf]) -> Result<Vec<ConfigRecord>, ConfigError> {
        let mut fresh = ConfigTrie::default();
        let mut records = Vec::new();
        for path in config_paths {
            for entry in read_config_file(path).await? {
                records.push(entry.record.clone());
                insert_entry(&mut fresh, entry);
            }
        }

        let mut guard = match self.trie.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(fresh);
        Ok(records)
    }

    /// Resolve the configuration governing `activity_path`.
    ///
    /// With `by_name`, `activity_path` is a logical name and must match a
    /// record exactly; otherwise the nearest configured ancestor wins.
    pub fn resolve(
        &self,
        activity_path: &str,
        by_name: bool,
    ) -> Result<ResolvedConfig, ConfigError> {
        let trie = self.snapshot();
        let found = if by_name {
            trie.find_node_ex(activity_path)
        } else {
            trie.find_prefix(&normalize_trie_path(activity_path))
        };
        let entry = found.ok_or_else(|| ConfigError::NotFound {
            query: activity_path.to_string(),
        })?;

        let record = &entry.record;
        let remote_path = if by_name {
            record.remote_path.clone()
        } else {
            match local_relative(&record.context, activity_path) {
                Some(relative) => to_remote(&relative, &record.remote_path),
                None => record.remote_path.clone(),
            }
        };

        Ok(ResolvedConfig {
            config: record.clone(),
            remote_path,
            ignore: IgnorePredicate {
                matcher: entry.matcher.clone(),
                local_context: record.context.clone(),
                remote_context: record.remote_path.clone(),
            },
        })
    }

    /// Every loaded configuration.
    pub fn all_configs(&self) -> Vec<ConfigRecord> {
        self.snapshot()
            .get_all_values()
            .into_iter()
            .map(|e| e.record.clone())
            .collect()
    }

    /// Loaded configurations without those nested inside another one.
    pub fn distinct_configs(&self) -> Vec<ConfigRecord> {
        self.snapshot()
            .find_values_with_shortest_branch()
            .into_iter()
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_entry(trie: &mut ConfigTrie<Arc<ConfigEntry>>, entry: ConfigEntry) {
    let context = entry.record.context.clone();
    let name = entry.record.virtual_name.clone();
    if let Some(previous) = trie.add_named(&context, &name, Arc::new(entry)) {
        warn!(
            context = %context,
            replaced = %previous.record.virtual_name,
            "config replaces an earlier one with the same context"
        );
    }
    info!(context = %context, "config at {name}");
}

async fn read_config_file(config_path: &Path) -> Result<Vec<ConfigEntry>, ConfigError> {
    let bytes = tokio::fs::read(config_path)
        .await
        .map_err(|e| ConfigError::io(config_path, e))?;
    parse_config_file(config_path, &bytes)
}

/// Parse and validate the records of one config file.
fn parse_config_file(config_path: &Path, bytes: &[u8]) -> Result<Vec<ConfigEntry>, ConfigError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| ConfigError::Parse {
        path: config_path.to_path_buf(),
        message: e.to_string(),
    })?;

    let workspace_root = workspace_root(config_path);
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                build_entry(raw, &workspace_root).map_err(|e| match e {
                    ConfigError::Validation { field, reason } => ConfigError::Validation {
                        field: format!("{i}.{field}"),
                        reason,
                    },
                    other => other,
                })
            })
            .collect(),
        raw => Ok(vec![build_entry(raw, &workspace_root)?]),
    }
}

/// The config file lives at `<workspace>/.vscode/sftp.json`: two levels up.
fn workspace_root(config_path: &Path) -> String {
    let absolute = std::path::absolute(config_path).unwrap_or_else(|_| config_path.to_path_buf());
    let native = PathStyle::native();
    native.parent(&native.parent(&absolute.to_string_lossy()))
}

fn build_entry(mut raw: Value, workspace_root: &str) -> Result<ConfigEntry, ConfigError> {
    if let Some(error) = validate_record(&raw).into_iter().next() {
        return Err(ConfigError::validation(error.field, error.message));
    }
    let Some(object) = raw.as_object_mut() else {
        return Err(ConfigError::validation("value", "must be an object"));
    };

    let context = object
        .remove("context")
        .and_then(|v| v.as_str().map(str::to_string));
    let name = [object.remove("virtualName"), object.remove("virname")]
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string));

    let native = PathStyle::native();
    let context = match context {
        Some(c) if native.is_absolute(&c) => normalize_trie_path(&c),
        Some(c) => normalize_trie_path(&native.join(workspace_root, &c)),
        None => normalize_trie_path(workspace_root),
    };
    let virtual_name = name.unwrap_or_else(|| default_virtual_name(workspace_root, &context));

    let mut record: ConfigRecord = serde_json::from_value(raw)
        .map_err(|e| ConfigError::validation("value", e.to_string()))?;
    record.context = context;
    record.virtual_name = virtual_name;

    let matcher = IgnoreMatcher::compile(&record.ignore)?;
    Ok(ConfigEntry {
        record,
        matcher: Arc::new(matcher),
    })
}

/// Workspace-relative form of a context; the workspace folder's own name
/// for the workspace root; the context itself when it lies outside.
fn default_virtual_name(workspace_root: &str, context: &str) -> String {
    match local_relative(workspace_root, context) {
        Some(relative) if relative.is_empty() => {
            let name = PathStyle::native().basename(workspace_root);
            if name.is_empty() {
                context.to_string()
            } else {
                name
            }
        }
        Some(relative) => relative,
        None => context.to_string(),
    }
}

/// Ignore rules bound to one record's local and remote contexts.
///
/// Accepts a path in either space (or one already relative to the context)
/// and answers whether sync should skip it. The context root itself is never
/// ignored, and neither is a path outside both contexts.
#[derive(Clone)]
pub struct IgnorePredicate {
    matcher: Arc<IgnoreMatcher>,
    local_context: String,
    remote_context: String,
}

impl std::fmt::Debug for IgnorePredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnorePredicate")
            .field("local_context", &self.local_context)
            .field("remote_context", &self.remote_context)
            .finish_non_exhaustive()
    }
}

impl IgnorePredicate {
    pub fn ignores(&self, path: &str) -> bool {
        self.context_relative(path)
            .is_some_and(|rel| !rel.is_empty() && self.matcher.ignores(&rel))
    }

    /// Like [`ignores`](Self::ignores) for a path known to be a directory.
    pub fn ignores_dir(&self, path: &str) -> bool {
        self.context_relative(path)
            .is_some_and(|rel| !rel.is_empty() && self.matcher.ignores_dir(&rel))
    }

    fn context_relative(&self, path: &str) -> Option<String> {
        let native = PathStyle::native();
        if !native.is_absolute(path) && !PathStyle::Posix.is_absolute(path) {
            if path.is_empty() {
                return Some(String::new());
            }
            let rel = PathStyle::Posix.normalize(&native.to_slash(path));
            return match rel.as_str() {
                "." => Some(String::new()),
                r if r == ".." || r.starts_with("../") => None,
                _ => Some(rel),
            };
        }
        // A path under the local context is local; anything else is taken
        // to be remote.
        local_relative(&self.local_context, path)
            .or_else(|| remote_relative(&self.remote_context, path))
    }
}

/// A configuration resolved for one activity path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    /// The governing record, with its remote root in `config.remote_path`.
    pub config: ConfigRecord,
    /// The activity path mapped into the remote tree.
    pub remote_path: String,
    #[serde(skip)]
    pub ignore: IgnorePredicate,
}

impl ResolvedConfig {
    /// Local root of the governing record.
    pub fn context(&self) -> &str {
        &self.config.context
    }

    /// Remote root of the governing record.
    pub fn remote_context(&self) -> &str {
        &self.config.remote_path
    }

    pub fn ignores(&self, path: &str) -> bool {
        self.ignore.ignores(path)
    }

    pub fn host_info(&self) -> HostInfo {
        HostInfo::from(&self.config)
    }
}
