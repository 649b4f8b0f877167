//! Bundle tasks and the capabilities attached to them.
//!
//! A [`Task`] always knows how to run once. Depending on its options it also
//! carries an [`Analyze`], a [`Watch`] and a [`Deps`] capability; each one is
//! an `Option` field so callers can see up front what a task supports.
//!
//! Every invocation builds a fresh [`CompilerConfig`] from the options that
//! were captured when the task was defined, so no bundler state is shared
//! between runs.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::Context;
use crate::bundler::{BuildStatus, Bundler};
use crate::cache::Manifest;
use crate::config::{CompilerConfig, build_config};
use crate::entry::Entry;
use crate::error::{ManifestError, TaskError};
use crate::options::ResolvedOptions;
use crate::report::write_report;

pub(crate) struct TaskSpec {
    pub(crate) src: Entry,
    pub(crate) dest: Utf8PathBuf,
    pub(crate) options: ResolvedOptions,
    pub(crate) bundler: Arc<dyn Bundler>,
}

/// Result of a single successful invocation.
#[derive(Debug)]
pub enum Outcome {
    /// The bundler ran.
    Built(BuildStatus),
    /// The manifest showed nothing changed since the last build.
    Fresh,
}

impl TaskSpec {
    pub(crate) fn config(&self, ctx: &Context) -> CompilerConfig {
        build_config(&self.src, &self.dest, &self.options, ctx)
    }

    pub(crate) fn build(&self, ctx: &Context) -> Result<Outcome, TaskError> {
        let config = self.config(ctx);
        config.entry.assert_exists()?;

        if let Some(path) = &config.cache
            && config.analyzer_report().is_none()
            && let Ok(manifest) = Manifest::read(path)
            && manifest.is_fresh(&config)
        {
            tracing::debug!("{}: up to date", config.name);
            return Ok(Outcome::Fresh);
        }

        tracing::debug!("{}: bundling with {}", config.name, self.bundler.name());
        let status = self
            .bundler
            .bundle(&config)
            .map_err(|e| TaskError::Compile(config.name.clone(), e))?;

        if let Some(path) = &config.cache {
            let written = Manifest::from_status(&config, &status)
                .map_err(ManifestError::from)
                .and_then(|manifest| manifest.write(path));

            if let Err(e) = written {
                tracing::warn!("{}: couldn't write manifest {path}: {e}", config.name);
            }
        }

        if let Some(report) = config.analyzer_report() {
            write_report(report, &config.name, &status, &config.context, config.full_paths)?;
            tracing::info!("{}: report written to {report}", config.name);
        }

        tracing::debug!("{}: {status}", config.name);

        Ok(Outcome::Built(status))
    }
}

/// A defined bundle task.
pub struct Task {
    spec: Arc<TaskSpec>,
    /// Runs the task again with the size report turned on.
    pub analyze: Option<Analyze>,
    /// Continuous rebuilds, absent when `skipWatching` is set.
    #[cfg(feature = "watch")]
    pub watch: Option<Watch>,
    /// Dependency listing, present when the cache is on.
    pub deps: Option<Deps>,
}

impl Task {
    pub(crate) fn from_spec(spec: TaskSpec) -> Self {
        let spec = Arc::new(spec);

        Self {
            analyze: Some(Analyze { spec: spec.clone() }),
            #[cfg(feature = "watch")]
            watch: (!spec.options.skip_watching).then(|| Watch { spec: spec.clone() }),
            deps: spec.options.cache.then(|| Deps { spec: spec.clone() }),
            spec,
        }
    }

    /// Bundles once.
    pub fn run(&self, ctx: &Context) -> Result<(), TaskError> {
        self.build(ctx).map(|_| ())
    }

    /// Bundles once and reports what happened.
    pub fn build(&self, ctx: &Context) -> Result<Outcome, TaskError> {
        self.spec.build(ctx)
    }

    /// Bundles once without blocking the async runtime.
    #[cfg(feature = "tokio")]
    pub async fn run_async(&self, ctx: &Context) -> Result<(), TaskError> {
        let spec = self.spec.clone();
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || spec.build(&ctx).map(|_| ())).await?
    }

    /// The configuration the next run would hand to the bundler.
    pub fn config(&self, ctx: &Context) -> CompilerConfig {
        self.spec.config(ctx)
    }

    pub fn src(&self) -> &Entry {
        &self.spec.src
    }

    pub fn dest(&self) -> &Utf8Path {
        &self.spec.dest
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.spec.options
    }
}

pub struct Analyze {
    spec: Arc<TaskSpec>,
}

impl Analyze {
    /// Defines the same task with `analyze` on and runs it.
    pub fn run(&self, ctx: &Context) -> Result<(), TaskError> {
        let mut options = self.spec.options.clone();
        options.analyze = true;

        let task = Task::from_spec(TaskSpec {
            src: self.spec.src.clone(),
            dest: self.spec.dest.clone(),
            options,
            bundler: self.spec.bundler.clone(),
        });

        task.run(ctx)
    }

    #[cfg(feature = "tokio")]
    pub async fn run_async(&self, ctx: &Context) -> Result<(), TaskError> {
        let analyze = Analyze {
            spec: self.spec.clone(),
        };
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || analyze.run(&ctx)).await?
    }
}

#[cfg(feature = "watch")]
pub struct Watch {
    pub(crate) spec: Arc<TaskSpec>,
}

pub struct Deps {
    spec: Arc<TaskSpec>,
}

impl Deps {
    /// Logs and returns the modules recorded by the last build.
    ///
    /// A missing or unreadable manifest is not an error, it is reported as a
    /// warning and yields an empty list.
    pub fn list(&self, ctx: &Context) -> Vec<Utf8PathBuf> {
        let config = self.spec.config(ctx);
        let Some(path) = &config.cache else {
            return Vec::new();
        };

        match Manifest::read(path) {
            Ok(manifest) => {
                let deps = manifest.dependencies();
                tracing::info!("{}: {} dependencies", config.name, deps.len());
                for dep in &deps {
                    tracing::info!("  {dep}");
                }
                deps
            }
            Err(e) => {
                tracing::warn!("{}: couldn't read dependencies: {e}", config.name);
                Vec::new()
            }
        }
    }
}
