//! In-process bundler used by the test suite.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use camino::Utf8PathBuf;
use tracing_subscriber::fmt::MakeWriter;

use crate::bundler::{Artifact, BuildStatus, Bundler};
use crate::config::CompilerConfig;
use crate::entry::Entry;
use crate::error::CompileError;

/// Copies each entry file, followed by any extra modules, into its
/// destination and remembers every configuration it was asked to build.
#[derive(Default)]
pub(crate) struct FakeBundler {
    calls: AtomicUsize,
    fail: AtomicBool,
    failing: Mutex<HashSet<String>>,
    modules: Mutex<Vec<Utf8PathBuf>>,
    seen: Mutex<Vec<CompilerConfig>>,
}

impl FakeBundler {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Fails only the builds of the entry with this name.
    pub(crate) fn fail_on(&self, name: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(name.to_string());
        }
    }

    /// Module every entry imports, bundled after the entry itself.
    pub(crate) fn add_module(&self, path: impl Into<Utf8PathBuf>) {
        if let Ok(mut modules) = self.modules.lock() {
            modules.push(path.into());
        }
    }

    pub(crate) fn seen(&self) -> Vec<CompilerConfig> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

impl Bundler for FakeBundler {
    fn name(&self) -> &str {
        "fake"
    }

    fn bundle(&self, config: &CompilerConfig) -> Result<BuildStatus, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(config.clone());
        }

        let failing = self
            .failing
            .lock()
            .map(|failing| failing.contains(&config.name))
            .unwrap_or_default();

        if failing || self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("syntax error in {}", config.entry).into());
        }

        let targets: Vec<(Utf8PathBuf, Utf8PathBuf)> = match &config.entry {
            Entry::Single(path) => vec![(
                path.clone(),
                config.output.dir.join(&config.output.filename),
            )],
            Entry::Named(map) => map
                .iter()
                .map(|(name, path)| {
                    let filename = config.output.filename.replace("[name]", name);
                    (path.clone(), config.output.dir.join(filename))
                })
                .collect(),
        };

        let modules = self
            .modules
            .lock()
            .map(|modules| modules.clone())
            .unwrap_or_default();

        let mut status = BuildStatus::default();
        for module in &modules {
            let data = fs::read(module)?;
            status.inputs.push(Artifact {
                path: module.clone(),
                bytes: data.len() as u64,
            });
        }

        for (input, output) in targets {
            let mut data = fs::read(&input)?;
            let bytes = data.len() as u64;
            for module in &modules {
                data.extend(fs::read(module)?);
            }
            if let Some(dir) = output.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(&output, &data)?;

            status.inputs.push(Artifact { path: input, bytes });
            status.outputs.push(Artifact {
                path: output,
                bytes: data.len() as u64,
            });
        }

        Ok(status)
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut data) = self.0.lock() {
            data.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` and returns the warnings and errors it logged, one per line,
/// without level or target.
pub(crate) fn capture_warnings(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_max_level(tracing::Level::WARN)
        .finish();

    tracing::subscriber::with_default(subscriber, f);

    let data = buffer.0.lock().map(|data| data.clone()).unwrap_or_default();
    String::from_utf8_lossy(&data).into_owned()
}
