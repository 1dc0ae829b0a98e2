//! Gitignore-style path filtering.
//!
//! Patterns follow `.gitignore` semantics (negation with `!`, anchoring with
//! a leading `/`, directory-only with a trailing `/`). Paths handed to the
//! matcher are relative to a sync context and always use `/` separators.

use ::ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::errors::ConfigError;

/// A compiled, immutable set of ignore patterns.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    inner: Gitignore,
}

impl IgnoreMatcher {
    /// Compile an ordered list of patterns.
    ///
    /// An invalid glob is reported as a validation error on `ignore.<index>`.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        // Relative paths are matched as-is, so the builder root stays empty.
        let mut builder = GitignoreBuilder::new("");
        for (i, pattern) in patterns.iter().enumerate() {
            builder
                .add_line(None, pattern.as_ref())
                .map_err(|e| ConfigError::validation(format!("ignore.{i}"), e.to_string()))?;
        }
        let inner = builder
            .build()
            .map_err(|e| ConfigError::validation("ignore", e.to_string()))?;
        Ok(Self { inner })
    }

    /// An engine with no patterns; nothing is ignored.
    pub fn empty() -> Self {
        Self {
            inner: Gitignore::empty(),
        }
    }

    /// Whether a context-relative path, or any of its parent directories,
    /// matches the pattern set.
    pub fn ignores(&self, relative: &str) -> bool {
        self.matches(relative, false)
    }

    /// Like [`ignores`](Self::ignores), treating the final component as a
    /// directory so directory-only patterns apply to it.
    pub fn ignores_dir(&self, relative: &str) -> bool {
        self.matches(relative, true)
    }

    fn matches(&self, relative: &str, is_dir: bool) -> bool {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            return false;
        }
        self.inner
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}
