use std::process::ExitStatus;

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("entry does not exist: {0}")]
    MissingEntry(Utf8PathBuf),

    #[error("Failed to compile '{0}':\n{1}")]
    Compile(String, CompileError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't write the build manifest.\n{0}")]
    Manifest(#[from] ManifestError),

    #[cfg(feature = "watch")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[cfg(feature = "tokio")]
    #[error("Background task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors reported by a [`Bundler`](crate::Bundler) for a single build.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The bundler process could not be started.
    #[error("Couldn't start the bundler: {0}")]
    Spawn(#[source] std::io::Error),

    /// The bundler ran and reported a failed build.
    #[error("Bundler exited with {status}:\n{diagnostic}")]
    Failed {
        status: ExitStatus,
        diagnostic: String,
    },

    /// The bundler's metadata output could not be read back.
    #[error("Couldn't read bundler metadata: {0}")]
    Metafile(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while reading the cached dependency manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found at {0}")]
    Missing(Utf8PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed manifest: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[cfg(feature = "watch")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't spawn the watch thread: {0}")]
    Thread(#[source] std::io::Error),
}
