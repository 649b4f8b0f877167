//! One task per entry file found in a directory.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use camino::Utf8PathBuf;
use indicatif::ProgressBar;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Deserialize;

use crate::Context;
use crate::bundler::Bundler;
use crate::entry::Entry;
use crate::error::TaskError;
use crate::io::{PROGRESS_STYLE, as_overhead};
use crate::options::{ListOption, ResolvedOptions, TaskOptions};
use crate::path::resolve;
use crate::task::{Task, TaskSpec};
#[cfg(feature = "watch")]
use crate::watch::WatchHandle;

const GLOB_OPTS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

const DEFAULT_PATTERNS: [&str; 3] = ["*.js", "*.jsx", "*.mjs"];

/// Options of a directory-wide task: the file patterns plus the options
/// shared by every discovered task.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AllOptions {
    /// Glob patterns relative to the source directory.
    pub pattern: Option<ListOption>,
    #[serde(flatten)]
    pub task: TaskOptions,
}

impl AllOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn pattern(mut self, pattern: impl Into<ListOption>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn task(mut self, task: TaskOptions) -> Self {
        self.task = task;
        self
    }
}

impl From<TaskOptions> for AllOptions {
    fn from(task: TaskOptions) -> Self {
        Self {
            pattern: None,
            task,
        }
    }
}

struct AllSpec {
    src_dir: Utf8PathBuf,
    dest_dir: Utf8PathBuf,
    patterns: Vec<String>,
    options: ResolvedOptions,
    bundler: Arc<dyn Bundler>,
}

impl AllSpec {
    /// Finds the entry files and defines a task for each, sorted by path.
    fn discover(&self, ctx: &Context) -> Result<Vec<Task>, TaskError> {
        let base = match &self.options.context {
            Some(context) => resolve(&ctx.cwd, context),
            None => ctx.cwd.clone(),
        };
        let src_dir = resolve(&base, &self.src_dir);
        let prefix = glob::Pattern::escape(src_dir.as_str());

        let mut found = BTreeSet::new();
        for pattern in &self.patterns {
            let pattern = format!("{prefix}/{pattern}");
            for path in glob::glob_with(&pattern, GLOB_OPTS)? {
                let path = Utf8PathBuf::try_from(path?)?;
                if !path.is_file() {
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(&src_dir) {
                    found.insert(relative.to_path_buf());
                }
            }
        }

        tracing::debug!("found {} entries in {src_dir}", found.len());

        Ok(found
            .into_iter()
            .map(|relative| {
                Task::from_spec(TaskSpec {
                    src: Entry::Single(src_dir.join(&relative)),
                    dest: self.dest_dir.join(&relative),
                    options: self.options.clone(),
                    bundler: self.bundler.clone(),
                })
            })
            .collect())
    }
}

/// Defines a directory-wide task bundled with [`Esbuild`](crate::Esbuild).
pub fn define_all(
    src_dir: impl Into<Utf8PathBuf>,
    dest_dir: impl Into<Utf8PathBuf>,
    options: impl Into<AllOptions>,
) -> AllTask {
    define_all_with(Arc::new(crate::Esbuild::default()), src_dir, dest_dir, options)
}

/// Defines a directory-wide task. Options are resolved now, the directory is
/// scanned again on every invocation.
pub fn define_all_with(
    bundler: Arc<dyn Bundler>,
    src_dir: impl Into<Utf8PathBuf>,
    dest_dir: impl Into<Utf8PathBuf>,
    options: impl Into<AllOptions>,
) -> AllTask {
    let options = options.into();
    let resolved = options.task.resolve(crate::node_env().as_deref());

    let patterns = match options.pattern {
        Some(pattern) if !pattern.is_empty() => pattern.into_vec(),
        _ => DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect(),
    };

    let spec = Arc::new(AllSpec {
        src_dir: src_dir.into(),
        dest_dir: dest_dir.into(),
        patterns,
        options: resolved,
        bundler,
    });

    AllTask {
        analyze: Some(AnalyzeAll { spec: spec.clone() }),
        #[cfg(feature = "watch")]
        watch: (!spec.options.skip_watching).then(|| WatchAll { spec: spec.clone() }),
        spec,
    }
}

/// Bundles every entry file of a directory into a mirrored destination tree.
pub struct AllTask {
    spec: Arc<AllSpec>,
    /// Analyzes every entry concurrently.
    pub analyze: Option<AnalyzeAll>,
    /// Watches every entry, absent when `skipWatching` is set.
    #[cfg(feature = "watch")]
    pub watch: Option<WatchAll>,
}

impl AllTask {
    /// The tasks an invocation would run right now.
    pub fn tasks(&self, ctx: &Context) -> Result<Vec<Task>, TaskError> {
        self.spec.discover(ctx)
    }

    /// Bundles each entry in turn, stopping at the first failure.
    pub fn run(&self, ctx: &Context) -> Result<(), TaskError> {
        let s = Instant::now();
        let tasks = self.tasks(ctx)?;

        let bar = ProgressBar::new(tasks.len() as u64).with_style(PROGRESS_STYLE.clone());
        for task in &tasks {
            bar.set_message(task.src().to_string());
            task.run(ctx)?;
            bar.inc(1);
        }

        bar.finish_with_message(format!("Bundled {} entries {}", tasks.len(), as_overhead(s)));

        Ok(())
    }

    #[cfg(feature = "tokio")]
    pub async fn run_async(&self, ctx: &Context) -> Result<(), TaskError> {
        let all = AllTask {
            spec: self.spec.clone(),
            analyze: None,
            #[cfg(feature = "watch")]
            watch: None,
        };
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || all.run(&ctx)).await?
    }
}

pub struct AnalyzeAll {
    spec: Arc<AllSpec>,
}

impl AnalyzeAll {
    /// Analyzes every entry concurrently. Fails if any of them fails.
    pub fn run(&self, ctx: &Context) -> Result<(), TaskError> {
        let s = Instant::now();
        let tasks = self.spec.discover(ctx)?;

        tasks
            .par_iter()
            .map(|task| match &task.analyze {
                Some(analyze) => analyze.run(ctx),
                None => Ok(()),
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!("Analyzed {} entries {}", tasks.len(), as_overhead(s));

        Ok(())
    }

    #[cfg(feature = "tokio")]
    pub async fn run_async(&self, ctx: &Context) -> Result<(), TaskError> {
        let analyze = AnalyzeAll {
            spec: self.spec.clone(),
        };
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || analyze.run(&ctx)).await?
    }
}

#[cfg(feature = "watch")]
pub struct WatchAll {
    spec: Arc<AllSpec>,
}

#[cfg(feature = "watch")]
impl WatchAll {
    /// Starts watching every entry. If one of them can't be watched, the
    /// sessions started so far are closed again.
    pub fn start(&self, ctx: &Context) -> Result<WatchGroup, TaskError> {
        let tasks = self.spec.discover(ctx)?;
        start_all(&tasks, ctx)
    }
}

#[cfg(feature = "watch")]
fn start_all(tasks: &[Task], ctx: &Context) -> Result<WatchGroup, TaskError> {
    let handles = tasks
        .par_iter()
        .filter_map(|task| task.watch.as_ref())
        .map(|watch| watch.start(ctx))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WatchGroup { handles })
}

/// Watch sessions of a directory-wide task, closed together.
#[cfg(feature = "watch")]
pub struct WatchGroup {
    handles: Vec<WatchHandle>,
}

#[cfg(feature = "watch")]
impl WatchGroup {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Builds completed across every session.
    pub fn builds(&self) -> usize {
        self.handles.iter().map(WatchHandle::builds).sum()
    }

    pub fn handles(&self) -> &[WatchHandle] {
        &self.handles
    }

    pub fn close(self) {
        for handle in self.handles {
            handle.close();
        }
    }
}
