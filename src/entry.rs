//! Entry points handed to the bundler.
//!
//! An [`Entry`] is either one source file, or a set of source files each
//! keyed by the logical name of the bundle it produces.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TaskError;
use crate::path::{normalize_path, relative_to};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entry {
    /// A single source file.
    Single(Utf8PathBuf),
    /// Bundle name to source file.
    Named(BTreeMap<String, Utf8PathBuf>),
}

impl Entry {
    /// Resolves every relative path against `context`.
    ///
    /// Paths starting at the filesystem root are kept as they are, and
    /// without a context relative paths are left untouched too. Named
    /// entries keep their keys.
    pub fn normalize(&self, context: Option<&Utf8Path>) -> Entry {
        match self {
            Entry::Single(path) => Entry::Single(normalize_one(path, context)),
            Entry::Named(map) => Entry::Named(
                map.iter()
                    .map(|(name, path)| (name.clone(), normalize_one(path, context)))
                    .collect(),
            ),
        }
    }

    /// Checks that every source file exists, failing on the first one that
    /// doesn't.
    pub fn assert_exists(&self) -> Result<(), TaskError> {
        for path in self.paths() {
            if fs::metadata(path).is_err() {
                return Err(TaskError::MissingEntry(path.to_path_buf()));
            }
        }

        Ok(())
    }

    /// All source files in this entry, in key order for named entries.
    pub fn paths(&self) -> Vec<&Utf8Path> {
        match self {
            Entry::Single(path) => vec![path.as_path()],
            Entry::Named(map) => map.values().map(Utf8PathBuf::as_path).collect(),
        }
    }

    /// Human readable identifier of this entry, safe to use as a file name.
    /// See [`name_of`].
    pub fn name(&self, base: &Utf8Path) -> String {
        name_of(self, base)
    }
}

fn normalize_one(path: &Utf8Path, context: Option<&Utf8Path>) -> Utf8PathBuf {
    if path.as_str().starts_with('/') {
        return path.to_path_buf();
    }

    match context {
        Some(context) => normalize_path(&context.join(path)),
        None => path.to_path_buf(),
    }
}

/// Derives a flat, dash separated token from an entry.
///
/// `ui/entrypoint.js` becomes `ui-entrypoint`. Named entries are reduced to
/// one token by joining the name of each path with `&`.
pub fn name_of(entry: &Entry, base: &Utf8Path) -> String {
    match entry {
        Entry::Single(path) => name_of_path(path, base),
        Entry::Named(map) => {
            let combined = map
                .values()
                .map(|path| name_of_path(path, base))
                .collect::<Vec<_>>()
                .join("&");

            name_of_path(Utf8Path::new(&combined), base)
        }
    }
}

fn name_of_path(path: &Utf8Path, base: &Utf8Path) -> String {
    let relative = relative_to(path, base);
    let stem = relative.file_stem().unwrap_or_default();

    let mut parts: Vec<&str> = match relative.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.iter().collect(),
        _ => vec!["."],
    };
    parts.push(stem);

    let joined = parts.join("-").replace('.', "-");

    let mut name = String::with_capacity(joined.len());
    for ch in joined.chars() {
        if ch == '-' && name.ends_with('-') {
            continue;
        }
        name.push(ch);
    }

    name.trim_matches('-').to_string()
}

impl Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Single(path) => write!(f, "{path}"),
            Entry::Named(map) => {
                let mut first = true;
                for (name, path) in map {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{name}={path}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Entry {
    fn from(value: &str) -> Self {
        Entry::Single(value.into())
    }
}

impl From<String> for Entry {
    fn from(value: String) -> Self {
        Entry::Single(value.into())
    }
}

impl From<&Utf8Path> for Entry {
    fn from(value: &Utf8Path) -> Self {
        Entry::Single(value.to_path_buf())
    }
}

impl From<Utf8PathBuf> for Entry {
    fn from(value: Utf8PathBuf) -> Self {
        Entry::Single(value)
    }
}

impl<K, V> FromIterator<(K, V)> for Entry
where
    K: Into<String>,
    V: Into<Utf8PathBuf>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Entry::Named(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Entry
where
    K: Into<String>,
    V: Into<Utf8PathBuf>,
{
    fn from(value: [(K, V); N]) -> Self {
        value.into_iter().collect()
    }
}
