//! The seam between tasks and the program doing the actual bundling.

use std::fmt::{self, Display};
use std::time::Duration;

use camino::Utf8PathBuf;

use crate::config::CompilerConfig;
use crate::error::CompileError;

/// Something that can turn a [`CompilerConfig`] into bundle files.
///
/// A fresh build is requested for every run and every watch-triggered
/// rebuild, implementations should not keep state between calls.
pub trait Bundler: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// Runs one build to completion.
    fn bundle(&self, config: &CompilerConfig) -> Result<BuildStatus, CompileError>;
}

/// A file read or written by a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: Utf8PathBuf,
    pub bytes: u64,
}

/// Summary of a successful build.
#[derive(Debug, Clone, Default)]
pub struct BuildStatus {
    /// Every module that ended up in the output, entries included.
    pub inputs: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
    pub warnings: Vec<String>,
    pub duration: Duration,
}

impl BuildStatus {
    pub fn total_output_bytes(&self) -> u64 {
        self.outputs.iter().map(|output| output.bytes).sum()
    }
}

impl Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} modules -> {} files ({} bytes) in {}ms",
            self.inputs.len(),
            self.outputs.len(),
            self.total_output_bytes(),
            self.duration.as_millis()
        )?;

        for output in &self.outputs {
            write!(f, "\n  {} ({} bytes)", output.path, output.bytes)?;
        }

        for warning in &self.warnings {
            write!(f, "\n  warning: {warning}")?;
        }

        Ok(())
    }
}
