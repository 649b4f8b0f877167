//! Lexical path helpers.
//!
//! Nothing in here touches the filesystem, entry paths are resolved the same
//! way whether or not they exist yet.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// Joins `path` onto `base` unless it is already absolute, then normalizes.
pub(crate) fn resolve(base: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}

/// Computes `path` relative to `base`, walking up with `..` where the two
/// diverge. Relative inputs are taken to be relative to `base` already.
pub(crate) fn relative_to(path: &Utf8Path, base: &Utf8Path) -> Utf8PathBuf {
    let path = resolve(base, path);
    let base = normalize_path(base);

    let mut ours = path.components().peekable();
    let mut theirs = base.components().peekable();

    while let (Some(a), Some(b)) = (ours.peek(), theirs.peek()) {
        if a != b {
            break;
        }
        ours.next();
        theirs.next();
    }

    let mut ret = Utf8PathBuf::new();
    for _ in theirs {
        ret.push(Utf8Component::ParentDir);
    }
    for component in ours {
        ret.push(component);
    }
    ret
}
