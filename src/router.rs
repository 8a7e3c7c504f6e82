//! Path routing between the two backing directories.
//!
//! Every request path is matched against the configured redirect prefixes;
//! a match routes the operation to the alt backing, everything else goes to
//! the base backing. Matching is per path component, so the prefix `foo`
//! covers `foo` and `foo/bar` but not `foobar`.

use std::path::Path;

use thiserror::Error;

/// Which backing directory serves a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// The default backing (the directory under the mount point).
    Base,
    /// The alternate backing.
    Alt,
}

/// A request path relative to the mount root.
///
/// Stored without a leading slash; the mount root is the empty string.
/// [`RelPath::as_fs_path`] renders the root as `.` so the value can be handed
/// directly to cwd-relative syscalls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelPath(String);

impl RelPath {
    /// The mount root.
    pub fn root() -> Self {
        RelPath(String::new())
    }

    /// Builds a path from an already-normalized relative string.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        debug_assert!(!path.starts_with('/'), "RelPath must be relative: {path}");
        RelPath(path)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a single name component.
    pub fn join(&self, name: &str) -> RelPath {
        if self.is_root() {
            RelPath(name.to_string())
        } else {
            RelPath(format!("{}/{}", self.0, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path as handed to syscalls: `.` for the root, relative otherwise.
    pub fn as_fs_path(&self) -> &Path {
        if self.is_root() {
            Path::new(".")
        } else {
            Path::new(&self.0)
        }
    }

    /// The parent path; the root is its own parent.
    pub fn parent(&self) -> RelPath {
        match self.0.rfind('/') {
            Some(idx) => RelPath(self.0[..idx].to_string()),
            None => RelPath::root(),
        }
    }

    /// The final name component, if any.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            Some(match self.0.rfind('/') {
                Some(idx) => &self.0[idx + 1..],
                None => &self.0,
            })
        }
    }

    /// Whether `self` equals `prefix` or lies underneath it.
    pub fn starts_with(&self, prefix: &RelPath) -> bool {
        component_prefix_match(&self.0, &prefix.0, prefix.0.len())
    }

    /// Re-roots a path from `old` to `new`. Caller must ensure
    /// `self.starts_with(old)`.
    pub fn rebase(&self, old: &RelPath, new: &RelPath) -> RelPath {
        let suffix = &self.0[old.0.len()..];
        RelPath(format!("{}{}", new.0, suffix))
    }
}

impl std::fmt::Display for RelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_root() { "/" } else { &self.0 })
    }
}

/// Error for an ill-formed redirect prefix.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrefixError {
    #[error("redirect prefix must not be empty")]
    Empty,

    #[error("redirect prefix must not start with '/': {0:?}")]
    LeadingSlash(String),

    #[error("redirect prefix must not end with '/': {0:?}")]
    TrailingSlash(String),
}

/// A validated redirect prefix with its length precomputed for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPrefix {
    text: String,
    len: usize,
}

impl RedirectPrefix {
    /// Validates and builds a prefix: non-empty, no leading or trailing `/`.
    pub fn new(text: impl Into<String>) -> Result<Self, PrefixError> {
        let text = text.into();
        if text.is_empty() {
            return Err(PrefixError::Empty);
        }
        if text.starts_with('/') {
            return Err(PrefixError::LeadingSlash(text));
        }
        if text.ends_with('/') {
            return Err(PrefixError::TrailingSlash(text));
        }
        let len = text.len();
        Ok(RedirectPrefix { text, len })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Component-prefix match: the path equals the prefix or continues with
    /// a `/` right after it.
    fn matches(&self, path: &str) -> bool {
        component_prefix_match(path, &self.text, self.len)
    }
}

fn component_prefix_match(path: &str, prefix: &str, prefix_len: usize) -> bool {
    let path = path.as_bytes();
    if path.len() < prefix_len {
        return false;
    }
    if &path[..prefix_len] != prefix.as_bytes() {
        return false;
    }
    path.len() == prefix_len || path[prefix_len] == b'/'
}

/// Maps request paths to backings by scanning the redirect list in order.
///
/// Pure and allocation-free; the list is small, so a linear scan per
/// operation is cheaper than anything fancier next to the syscall each
/// operation already performs.
#[derive(Debug)]
pub struct Router {
    prefixes: Vec<RedirectPrefix>,
}

impl Router {
    pub fn new(prefixes: Vec<RedirectPrefix>) -> Self {
        Router { prefixes }
    }

    /// Parses and validates a list of raw prefix strings.
    pub fn from_args<I, S>(args: I) -> Result<Self, PrefixError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes = args
            .into_iter()
            .map(|s| RedirectPrefix::new(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Router::new(prefixes))
    }

    /// Routes a normalized request path. First matching prefix wins.
    pub fn route(&self, path: &RelPath) -> Backing {
        self.route_str(path.as_str())
    }

    /// Routes a raw relative path string. Used by the readdir merge, which
    /// builds candidate paths in a scratch buffer.
    pub fn route_str(&self, path: &str) -> Backing {
        for prefix in &self.prefixes {
            if prefix.matches(path) {
                return Backing::Alt;
            }
        }
        Backing::Base
    }

    pub fn prefixes(&self) -> &[RedirectPrefix] {
        &self.prefixes
    }
}
