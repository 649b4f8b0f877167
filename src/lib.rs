#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod all;
mod bundler;
mod cache;
mod config;
mod entry;
mod error;
mod esbuild;
mod hash;
mod io;
mod options;
mod path;
mod report;
mod task;
#[cfg(feature = "watch")]
mod watch;

#[cfg(feature = "logging")]
pub mod logging;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use camino::Utf8PathBuf;

#[cfg(feature = "watch")]
pub use crate::all::{WatchAll, WatchGroup};
pub use crate::all::{AllOptions, AllTask, AnalyzeAll, define_all, define_all_with};
pub use crate::bundler::{Artifact, BuildStatus, Bundler};
pub use crate::cache::{Manifest, ManifestInput};
pub use crate::config::{
    ALIASES, CompilerConfig, Optimization, Output, Plugin, REPORT_DIR, build_config,
};
pub use crate::entry::{Entry, name_of};
pub use crate::error::*;
pub use crate::esbuild::Esbuild;
pub use crate::options::{
    Environment, ListOption, NODE_ENV, ResolvedOptions, SourceMap, TaskOptions, WatchErrorPolicy,
    WatchOptions, WatchPoll,
};
pub use crate::report::{render_report, write_report};
#[cfg(feature = "watch")]
pub use crate::task::Watch;
pub use crate::task::{Analyze, Deps, Outcome, Task};
#[cfg(feature = "watch")]
pub use crate::watch::WatchHandle;

/// What the host task runner provides to every invocation.
#[derive(Debug, Clone)]
pub struct Context {
    /// Directory relative paths are resolved against.
    pub cwd: Utf8PathBuf,
}

impl Context {
    /// Context rooted at the process working directory.
    pub fn new() -> Result<Self, TaskError> {
        let cwd = std::env::current_dir()?;
        Ok(Self {
            cwd: Utf8PathBuf::try_from(cwd)?,
        })
    }

    pub fn with_cwd(cwd: impl Into<Utf8PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

/// Defines a task bundled with [`Esbuild`].
///
/// Options are resolved right away, so `NODE_ENV` is read once here and
/// later changes to it don't affect the task.
pub fn define(
    src: impl Into<Entry>,
    dest: impl Into<Utf8PathBuf>,
    options: TaskOptions,
) -> Task {
    define_with(Arc::new(Esbuild::default()), src, dest, options)
}

/// Defines a task bundled with a custom [`Bundler`].
pub fn define_with(
    bundler: Arc<dyn Bundler>,
    src: impl Into<Entry>,
    dest: impl Into<Utf8PathBuf>,
    options: TaskOptions,
) -> Task {
    Task::from_spec(task::TaskSpec {
        src: src.into(),
        dest: dest.into(),
        options: options.resolve(node_env().as_deref()),
        bundler,
    })
}

fn node_env() -> Option<String> {
    std::env::var(NODE_ENV).ok()
}
