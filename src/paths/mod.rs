//! Canonical filesystem paths and prefix remapping.
//!
//! Paths entering the database are normalized once, up front, so that path
//! equality is plain byte equality everywhere else: lexical `.`/`..`
//! resolution, trailing-separator stripping, and case folding on
//! case-insensitive filesystems. Symlink resolution is intentionally not
//! applied; the canonicalization is purely lexical so that paths from
//! build records need not exist locally.

use std::fmt;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// An absolute, canonicalized path.
///
/// Two `CanonicalPath`s compare equal iff they denote the same file entry
/// under the canonicalization rules. Ordered scans compare the underlying
/// bytes directly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    /// Canonicalize an absolute path. Relative paths are rejected: the raw
    /// record store always hands out absolute paths, so a relative one
    /// means the record is malformed.
    pub fn new(path: impl AsRef<Path>) -> DbResult<CanonicalPath> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(DbError::invalid_record(format!(
                "path is not absolute: '{}'",
                path.display()
            )));
        }

        let mut parts: Vec<&str> = Vec::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::Prefix(_) => parts.clear(),
                Component::CurDir => {}
                Component::ParentDir => {
                    parts.pop();
                }
                Component::Normal(part) => match part.to_str() {
                    Some(part) => parts.push(part),
                    None => {
                        return Err(DbError::invalid_record(format!(
                            "path is not valid UTF-8: '{}'",
                            path.display()
                        )));
                    }
                },
            }
        }

        let mut joined = String::with_capacity(path.as_os_str().len());
        for part in &parts {
            joined.push(MAIN_SEPARATOR);
            joined.push_str(part);
        }
        if joined.is_empty() {
            joined.push(MAIN_SEPARATOR);
        }

        Ok(CanonicalPath(fold_case(joined)))
    }

    /// Rebuild a path from its stored decomposition.
    pub fn from_dir_and_name(dir: &str, name: &str) -> CanonicalPath {
        let mut joined = String::with_capacity(dir.len() + name.len() + 1);
        joined.push_str(dir);
        if !joined.ends_with(MAIN_SEPARATOR) {
            joined.push(MAIN_SEPARATOR);
        }
        joined.push_str(name);
        CanonicalPath(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Split into `(directory, filename)`. The directory keeps no trailing
    /// separator except when it is the filesystem root itself.
    pub fn split(&self) -> (&str, &str) {
        match self.0.rfind(MAIN_SEPARATOR) {
            Some(0) => (&self.0[..1], &self.0[1..]),
            Some(idx) => (&self.0[..idx], &self.0[idx + 1..]),
            None => (&self.0, ""),
        }
    }

    pub fn file_name(&self) -> &str {
        self.split().1
    }

    pub fn directory(&self) -> &str {
        self.split().0
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<Path> for CanonicalPath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl AsRef<[u8]> for CanonicalPath {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn fold_case(path: String) -> String {
    path.to_lowercase()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn fold_case(path: String) -> String {
    path
}

/// One `(original, replacement)` prefix pair, as configured by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixMapping {
    pub original: String,
    pub replacement: String,
}

/// Prefix remapping applied when ingesting paths, so indexes built under
/// one root can be consumed under another.
///
/// Pairs are tried in registration order; the first whose prefix matches
/// at a component boundary wins. [`PathPrefixMap::remap`] applies
/// `original -> replacement` (the ingest direction);
/// [`PathPrefixMap::reverse`] applies `replacement -> original`, so hosts
/// can translate stored paths back into the spelling a build record
/// carries.
#[derive(Debug, Clone, Default)]
pub struct PathPrefixMap {
    pairs: Vec<PrefixMapping>,
}

impl PathPrefixMap {
    pub fn new() -> PathPrefixMap {
        PathPrefixMap::default()
    }

    pub fn from_mappings(pairs: impl IntoIterator<Item = PrefixMapping>) -> PathPrefixMap {
        PathPrefixMap {
            pairs: pairs.into_iter().collect(),
        }
    }

    pub fn add_mapping(&mut self, original: impl Into<String>, replacement: impl Into<String>) {
        self.pairs.push(PrefixMapping {
            original: original.into(),
            replacement: replacement.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Apply the first matching `original -> replacement` pair and
    /// canonicalize the result. Paths that match no pair pass through
    /// unchanged.
    pub fn remap(&self, path: &Path) -> DbResult<CanonicalPath> {
        self.translate(path, |pair| (&pair.original, &pair.replacement))
    }

    /// Apply the first matching `replacement -> original` pair, undoing
    /// [`PathPrefixMap::remap`].
    pub fn reverse(&self, path: &Path) -> DbResult<CanonicalPath> {
        self.translate(path, |pair| (&pair.replacement, &pair.original))
    }

    fn translate(
        &self,
        path: &Path,
        select: impl Fn(&PrefixMapping) -> (&String, &String),
    ) -> DbResult<CanonicalPath> {
        let raw = path.to_str().ok_or_else(|| {
            DbError::invalid_record(format!("path is not valid UTF-8: '{}'", path.display()))
        })?;
        for pair in &self.pairs {
            let (from, to) = select(pair);
            if let Some(rest) = strip_component_prefix(raw, from) {
                let mut mapped = String::with_capacity(to.len() + rest.len());
                mapped.push_str(to);
                mapped.push_str(rest);
                return CanonicalPath::new(Path::new(&mapped));
            }
        }
        CanonicalPath::new(path)
    }
}

/// `prefix` must match whole components: `/SRC` matches `/SRC/a.c` and
/// `/SRC` but not `/SRCROOT/a.c`.
fn strip_component_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.strip_suffix(MAIN_SEPARATOR).unwrap_or(prefix);
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with(MAIN_SEPARATOR) {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_relative() {
        assert!(CanonicalPath::new("relative/a.swift").is_err());
    }

    #[test]
    fn test_normalizes_dots_and_trailing_separator() {
        let p = CanonicalPath::new("/home/u/./src/../src/a.swift/").unwrap();
        assert_eq!(p.as_str(), "/home/u/src/a.swift");
    }

    #[test]
    fn test_parent_of_root_stays_at_root() {
        let p = CanonicalPath::new("/../../etc").unwrap();
        assert_eq!(p.as_str(), "/etc");
    }

    #[test]
    fn test_split_directory_and_name() {
        let p = CanonicalPath::new("/home/u/src/a.swift").unwrap();
        assert_eq!(p.split(), ("/home/u/src", "a.swift"));

        let root_file = CanonicalPath::new("/a.swift").unwrap();
        assert_eq!(root_file.split(), ("/", "a.swift"));
    }

    #[test]
    fn test_join_round_trip() {
        let p = CanonicalPath::new("/home/u/src/a.swift").unwrap();
        let (dir, name) = p.split();
        assert_eq!(CanonicalPath::from_dir_and_name(dir, name), p);

        let root_file = CanonicalPath::new("/a.swift").unwrap();
        let (dir, name) = root_file.split();
        assert_eq!(CanonicalPath::from_dir_and_name(dir, name), root_file);
    }

    #[test]
    fn test_prefix_remap_forward_and_back() {
        let mut map = PathPrefixMap::new();
        map.add_mapping("/SRC_ROOT", "/home/u/src");

        let mapped = map.remap(Path::new("/SRC_ROOT/a.swift")).unwrap();
        assert_eq!(mapped.as_str(), "/home/u/src/a.swift");

        // the local spelling is already canonical and passes through
        let local = map.remap(Path::new("/home/u/src/a.swift")).unwrap();
        assert_eq!(local.as_str(), "/home/u/src/a.swift");

        let back = map.reverse(Path::new("/home/u/src/a.swift")).unwrap();
        assert_eq!(back.as_str(), "/SRC_ROOT/a.swift");
    }

    #[test]
    fn test_prefix_respects_component_boundaries() {
        let mut map = PathPrefixMap::new();
        map.add_mapping("/SRC", "/out");

        let untouched = map.remap(Path::new("/SRCROOT/a.c")).unwrap();
        assert_eq!(untouched.as_str(), "/SRCROOT/a.c");

        let exact = map.remap(Path::new("/SRC")).unwrap();
        assert_eq!(exact.as_str(), "/out");
    }

    #[test]
    fn test_unmatched_passes_through() {
        let map = PathPrefixMap::new();
        let p = map.remap(Path::new("/plain/file.h")).unwrap();
        assert_eq!(p.as_str(), "/plain/file.h");
    }
}
