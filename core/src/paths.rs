//! Translation between local and remote path spaces.
//!
//! Local paths follow the host platform's separator and case rules. Remote
//! paths are always `/`-delimited, whatever platform we run on. Everything
//! here is lexical: no function touches the filesystem.

/// Separator and comparison rules for one path space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathStyle {
    /// `/`-delimited, case-sensitive. Used for every remote tree.
    Posix,
    /// `\`-delimited (accepting `/` on input), drive letters, case-insensitive.
    Windows,
}

/// A path split into its root prefix and normal segments.
struct Parsed<'a> {
    /// Drive (`c:`) or UNC marker; empty on Posix.
    prefix: String,
    absolute: bool,
    segments: Vec<&'a str>,
}

impl PathStyle {
    /// The style of the platform we are running on.
    pub const fn native() -> Self {
        if cfg!(windows) {
            PathStyle::Windows
        } else {
            PathStyle::Posix
        }
    }

    pub fn separator(self) -> char {
        match self {
            PathStyle::Posix => '/',
            PathStyle::Windows => '\\',
        }
    }

    fn is_separator(self, c: char) -> bool {
        match self {
            PathStyle::Posix => c == '/',
            PathStyle::Windows => c == '/' || c == '\\',
        }
    }

    fn parse(self, path: &str) -> Parsed<'_> {
        let mut rest = path;
        let mut prefix = String::new();

        if self == PathStyle::Windows {
            let bytes = rest.as_bytes();
            if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
                prefix.push((bytes[0] as char).to_ascii_lowercase());
                prefix.push(':');
                rest = &rest[2..];
            } else if bytes.len() >= 2
                && self.is_separator(bytes[0] as char)
                && self.is_separator(bytes[1] as char)
            {
                prefix.push_str("\\\\");
                rest = &rest[2..];
            }
        }

        let absolute =
            prefix == "\\\\" || rest.chars().next().is_some_and(|c| self.is_separator(c));

        let mut segments: Vec<&str> = Vec::new();
        for segment in rest.split(|c| self.is_separator(c)) {
            match segment {
                "" | "." => {}
                ".." => match segments.last() {
                    Some(last) if *last != ".." => {
                        segments.pop();
                    }
                    // Cannot climb above an absolute root.
                    _ if absolute => {}
                    _ => segments.push(".."),
                },
                other => segments.push(other),
            }
        }

        Parsed {
            prefix,
            absolute,
            segments,
        }
    }

    fn render(self, parsed: &Parsed<'_>) -> String {
        let sep = self.separator();
        let mut out = parsed.prefix.clone();
        if parsed.absolute && parsed.prefix != "\\\\" {
            out.push(sep);
        }
        out.push_str(&parsed.segments.join(&sep.to_string()));
        if out.is_empty() {
            out.push('.');
        }
        out
    }

    fn segment_eq(self, a: &str, b: &str) -> bool {
        match self {
            PathStyle::Posix => a == b,
            PathStyle::Windows => a.to_lowercase() == b.to_lowercase(),
        }
    }

    /// Lexically normalize a path.
    ///
    /// Folds `.` and `..`, collapses repeated separators, drops trailing
    /// separators and, in Windows style, lowercases the drive letter and
    /// rewrites `/` to `\`. Normalizing twice gives the same result.
    pub fn normalize(self, path: &str) -> String {
        self.render(&self.parse(path))
    }

    /// Whether the path has a root (or, in Windows style, a drive prefix).
    pub fn is_absolute(self, path: &str) -> bool {
        let parsed = self.parse(path);
        parsed.absolute || !parsed.prefix.is_empty()
    }

    /// Path of `to` relative to `from`.
    ///
    /// Returns `Some("")` when both name the same location and `None` when
    /// `to` is not `from` or one of its descendants.
    pub fn relative(self, from: &str, to: &str) -> Option<String> {
        let base = self.parse(from);
        let target = self.parse(to);

        if base.absolute != target.absolute || !self.segment_eq(&base.prefix, &target.prefix) {
            return None;
        }
        if base.segments.len() > target.segments.len() {
            return None;
        }
        let under = base
            .segments
            .iter()
            .zip(&target.segments)
            .all(|(a, b)| self.segment_eq(a, b));
        if !under {
            return None;
        }

        Some(target.segments[base.segments.len()..].join(&self.separator().to_string()))
    }

    /// Join `relative` onto `base` and normalize the result.
    pub fn join(self, base: &str, relative: &str) -> String {
        if relative.is_empty() {
            return self.normalize(base);
        }
        self.normalize(&format!("{base}{}{relative}", self.separator()))
    }

    /// Final component of a path, or an empty string for a root.
    pub fn basename(self, path: &str) -> String {
        self.parse(path)
            .segments
            .last()
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    /// Parent directory of a path. A root is its own parent.
    pub fn parent(self, path: &str) -> String {
        let mut parsed = self.parse(path);
        parsed.segments.pop();
        self.render(&parsed)
    }

    /// Rewrite this style's separators to `/`.
    pub fn to_slash(self, path: &str) -> String {
        match self {
            PathStyle::Posix => path.to_string(),
            PathStyle::Windows => path.replace('\\', "/"),
        }
    }
}

/// Normalize a local path for use as a config trie key.
pub fn normalize_trie_path(path: &str) -> String {
    PathStyle::native().normalize(path)
}

/// Join a context-relative local path onto a remote context.
///
/// The relative part may use native separators; the result is always a
/// `/`-delimited remote path.
pub fn to_remote(relative_local: &str, remote_context: &str) -> String {
    let relative = PathStyle::native().to_slash(relative_local);
    PathStyle::Posix.join(remote_context, &relative)
}

/// Path relative to a remote context, using `/` rules on every platform.
pub fn remote_relative(remote_context: &str, path: &str) -> Option<String> {
    PathStyle::Posix.relative(remote_context, path)
}

/// Path relative to a local context, using native rules.
///
/// The result is rewritten to `/` separators, which is what the ignore
/// engine expects.
pub fn local_relative(local_context: &str, path: &str) -> Option<String> {
    let native = PathStyle::native();
    native
        .relative(local_context, path)
        .map(|rel| native.to_slash(&rel))
}
