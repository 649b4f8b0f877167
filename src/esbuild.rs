use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::process::{Command, Stdio};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::bundler::{Artifact, BuildStatus, Bundler};
use crate::config::{CompilerConfig, Plugin};
use crate::entry::Entry;
use crate::error::CompileError;
use crate::options::SourceMap;
use crate::path::normalize_path;

/// Bundles with the `esbuild` command-line tool.
///
/// **Note:** By default the `esbuild` binary has to be available in the
/// system PATH, use [`Esbuild::with_program`] to point at another location.
#[derive(Debug, Clone)]
pub struct Esbuild {
    program: Utf8PathBuf,
}

impl Default for Esbuild {
    fn default() -> Self {
        Self {
            program: Utf8PathBuf::from("esbuild"),
        }
    }
}

impl Esbuild {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn bundle_vendor(
        &self,
        config: &CompilerConfig,
        filename: &str,
        modules: &[String],
    ) -> Result<Artifact, CompileError> {
        let outfile = config.output.dir.join(filename);

        let mut command = Command::new(&self.program);
        command
            .arg("--bundle")
            .arg("--format=iife")
            .arg("--platform=browser")
            .arg("--log-level=warning")
            .arg("--sourcefile=vendor.js")
            .arg(format!("--resolve-dir={}", config.context))
            .arg(format!("--outfile={outfile}"));

        if config.optimization.minimize {
            command.arg("--minify");
        }

        let mut child = command
            .current_dir(&config.context)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CompileError::Spawn)?;

        // stdin is closed before waiting, the program reads until EOF
        let written = child
            .stdin
            .take()
            .map(|mut stdin| stdin.write_all(vendor_source(modules).as_bytes()));

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(CompileError::Failed {
                status: output.status,
                diagnostic: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        written.transpose()?;

        let bytes = fs::metadata(&outfile)?.len();
        Ok(Artifact {
            path: outfile,
            bytes,
        })
    }
}

impl Bundler for Esbuild {
    fn name(&self) -> &str {
        "esbuild"
    }

    fn bundle(&self, config: &CompilerConfig) -> Result<BuildStatus, CompileError> {
        let start = Instant::now();

        let mut vendor = None;
        if let Some((filename, modules)) = config.vendor() {
            vendor = Some(self.bundle_vendor(config, filename, modules)?);
        }

        if let Some(dir) = config.metafile.parent() {
            fs::create_dir_all(dir)?;
        }

        let output = Command::new(&self.program)
            .args(arguments(config))
            .current_dir(&config.context)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(CompileError::Spawn)?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(CompileError::Failed {
                status: output.status,
                diagnostic: stderr,
            });
        }

        let meta = fs::read(&config.metafile)?;
        // the metafile is scratch space, a leftover is harmless
        let _ = fs::remove_file(&config.metafile);

        let mut status = read_metafile(&meta, &config.context)?;
        status.outputs.extend(vendor);
        status.warnings = stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        status.duration = start.elapsed();

        Ok(status)
    }
}

/// Command line arguments for the main build.
pub(crate) fn arguments(config: &CompilerConfig) -> Vec<String> {
    let mut args = Vec::new();

    match &config.entry {
        Entry::Single(path) => args.push(path.to_string()),
        Entry::Named(map) => {
            for (name, path) in map {
                args.push(format!("{name}={path}"));
            }
        }
    }

    args.push("--bundle".into());
    args.push("--platform=browser".into());
    args.push("--log-level=warning".into());

    let multiple = matches!(config.entry, Entry::Named(_));
    if multiple || config.optimization.split.is_some() {
        args.push(format!("--outdir={}", config.output.dir));
        args.push(format!(
            "--entry-names={}",
            strip_js(&config.output.filename)
        ));
    } else {
        args.push(format!(
            "--outfile={}",
            config.output.dir.join(&config.output.filename)
        ));
    }

    if config.optimization.split.is_some() {
        args.push("--splitting".into());
        args.push("--format=esm".into());
        args.push(format!(
            "--chunk-names={}",
            strip_js(&config.output.chunk_filename)
        ));
    } else {
        args.push("--format=iife".into());
    }

    if config.optimization.minimize {
        args.push("--minify".into());
    }

    match config.devtool {
        SourceMap::None => {}
        SourceMap::Inline => args.push("--sourcemap=inline".into()),
        SourceMap::Linked => args.push("--sourcemap=linked".into()),
        SourceMap::External => args.push("--sourcemap=external".into()),
    }

    if !config.output.public_path.is_empty() {
        args.push(format!("--public-path={}", config.output.public_path));
    }

    for (from, to) in &config.aliases {
        args.push(format!("--alias:{from}={to}"));
    }

    for external in &config.externals {
        args.push(format!("--external:{external}"));
    }

    for inject in &config.injects {
        args.push(format!("--inject:{inject}"));
    }

    // an empty loader leaves the extension to esbuild's defaults
    for (ext, loader) in config.loaders.iter().filter(|(_, loader)| !loader.is_empty()) {
        args.push(format!("--loader:{ext}={loader}"));
    }

    for plugin in &config.plugins {
        match plugin {
            Plugin::Environment(env) => {
                for (key, value) in env {
                    let value = serde_json::Value::String(value.clone());
                    args.push(format!("--define:process.env.{key}={value}"));
                }
            }
            Plugin::Ignore(module) => args.push(format!("--external:{module}")),
            Plugin::Raw(arg) => args.push(arg.clone()),
            // esbuild follows `sourceMappingURL` comments of its inputs on its own
            Plugin::SourceMapLoader => {}
            Plugin::Vendor { .. } | Plugin::Analyzer { .. } => {}
        }
    }

    args.push(format!("--metafile={}", config.metafile));

    args
}

fn strip_js(name: &str) -> &str {
    [".js", ".mjs", ".jsx"]
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(name)
}

/// Source of the vendor bundle: every module is imported and published on
/// `globalThis.vendor` under its own name.
fn vendor_source(modules: &[String]) -> String {
    let mut source = String::from("globalThis.vendor = globalThis.vendor || {};\n");
    for (i, module) in modules.iter().enumerate() {
        let quoted = serde_json::Value::String(module.clone());
        let _ = writeln!(source, "import * as m{i} from {quoted};");
        let _ = writeln!(source, "globalThis.vendor[{quoted}] = m{i};");
    }
    source
}

#[derive(Deserialize)]
struct Metafile {
    inputs: BTreeMap<String, MetaEntry>,
    outputs: BTreeMap<String, MetaEntry>,
}

#[derive(Deserialize)]
struct MetaEntry {
    bytes: u64,
}

/// Reads an esbuild metafile. Paths in it are relative to the directory the
/// process ran in; virtual modules such as `<stdin>` are left out.
fn read_metafile(data: &[u8], context: &Utf8Path) -> Result<BuildStatus, CompileError> {
    let meta: Metafile = serde_json::from_slice(data)?;

    let collect = |entries: BTreeMap<String, MetaEntry>| -> Vec<Artifact> {
        entries
            .into_iter()
            .filter(|(path, _)| !path.starts_with('<') && !path.starts_with('('))
            .map(|(path, entry)| Artifact {
                path: normalize_path(&context.join(path)),
                bytes: entry.bytes,
            })
            .collect()
    };

    Ok(BuildStatus {
        inputs: collect(meta.inputs),
        outputs: collect(meta.outputs),
        ..BuildStatus::default()
    })
}
