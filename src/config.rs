//! Translation of task options into a complete bundler configuration.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};

use crate::Context;
use crate::entry::Entry;
use crate::hash::Hash32;
use crate::options::{Environment, ResolvedOptions, SourceMap, WatchOptions};
use crate::path::resolve;

/// Directory, relative to the working directory, which receives analyzer
/// reports.
pub const REPORT_DIR: &str = "tmp/browser";

/// Server-only modules and the browser polyfills that replace them.
pub const ALIASES: [(&str, &str); 7] = [
    ("events", "events"),
    ("path", "path-browserify"),
    ("querystring", "querystring-es3"),
    ("os", "os-browserify/browser"),
    ("assert", "assert"),
    ("util", "util"),
    ("buffer", "buffer"),
];

/// Extra processing steps attached to a build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Plugin {
    /// Values substituted for `process.env.<KEY>`.
    Environment(BTreeMap<String, String>),
    /// Module request that is never bundled.
    Ignore(String),
    /// Standalone bundle of third party modules, built before the entry.
    Vendor {
        filename: String,
        modules: Vec<String>,
    },
    /// Static HTML size report written after a successful build.
    Analyzer { report: Utf8PathBuf },
    /// Follows the source maps of prebuilt modules so the bundle maps back
    /// to their original sources. Development builds with a devtool only.
    SourceMapLoader,
    /// Argument handed to the bundler as is.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Output {
    pub dir: Utf8PathBuf,
    /// File name, or for named entries a template containing `[name]`.
    pub filename: String,
    pub chunk_filename: String,
    pub public_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Optimization {
    pub minimize: bool,
    /// Name of the shared chunk when code splitting is on.
    pub split: Option<String>,
}

/// Everything a [`Bundler`](crate::Bundler) needs to run one build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompilerConfig {
    /// Identifier of the entry, see [`crate::name_of`].
    pub name: String,
    pub entry: Entry,
    pub context: Utf8PathBuf,
    pub output: Output,
    pub environment: Environment,
    pub devtool: SourceMap,
    pub optimization: Optimization,
    pub aliases: Vec<(String, String)>,
    pub externals: Vec<String>,
    pub injects: Vec<String>,
    /// `extension=loader` pairs.
    pub loaders: Vec<(String, String)>,
    pub plugins: Vec<Plugin>,
    /// Location of the build manifest, when caching is on.
    pub cache: Option<Utf8PathBuf>,
    /// Scratch file for bundler metadata.
    pub metafile: Utf8PathBuf,
    pub watch: WatchOptions,
    pub full_paths: bool,
}

impl CompilerConfig {
    pub fn analyzer_report(&self) -> Option<&Utf8Path> {
        self.plugins.iter().find_map(|plugin| match plugin {
            Plugin::Analyzer { report } => Some(report.as_path()),
            _ => None,
        })
    }

    pub fn vendor(&self) -> Option<(&str, &[String])> {
        self.plugins.iter().find_map(|plugin| match plugin {
            Plugin::Vendor { filename, modules } => Some((filename.as_str(), modules.as_slice())),
            _ => None,
        })
    }

    /// Stable digest of the whole configuration.
    pub(crate) fn fingerprint(&self) -> String {
        Hash32::hash(format!("{self:?}")).to_hex()
    }
}

/// Builds the configuration for bundling `src` into `dest`.
///
/// Relative entries are resolved against the `context` option, itself
/// relative to the working directory of `ctx`. The destination is resolved
/// against the working directory.
pub fn build_config(
    src: &Entry,
    dest: &Utf8Path,
    options: &ResolvedOptions,
    ctx: &Context,
) -> CompilerConfig {
    let context = match &options.context {
        Some(context) => resolve(&ctx.cwd, context),
        None => ctx.cwd.clone(),
    };

    let entry = src.normalize(Some(&context));
    let name = entry.name(&ctx.cwd);

    let dest = resolve(&ctx.cwd, dest);
    let dir = dest
        .parent()
        .map(Utf8Path::to_path_buf)
        .unwrap_or_else(|| ctx.cwd.clone());
    let filename = dest.file_name().unwrap_or("bundle.js").to_string();

    let key = Hash32::hash(format!("{entry}\n{dest}"));

    let mut plugins = Vec::new();

    let mut env = BTreeMap::new();
    env.insert("NODE_ENV".to_string(), options.environment.to_string());
    env.extend(options.env.clone());
    plugins.push(Plugin::Environment(env));

    plugins.extend(options.ignores.iter().cloned().map(Plugin::Ignore));

    if !options.vendor.is_empty() {
        plugins.push(Plugin::Vendor {
            filename: "vendor.dll.js".to_string(),
            modules: options.vendor.clone(),
        });
    }

    if options.environment == Environment::Development && options.devtool != SourceMap::None {
        plugins.push(Plugin::SourceMapLoader);
    }

    if options.analyze {
        plugins.push(Plugin::Analyzer {
            report: ctx.cwd.join(REPORT_DIR).join(format!("{name}.html")),
        });
    }

    plugins.extend(options.plugins.iter().cloned().map(Plugin::Raw));

    let chunk_filename = if options.split {
        options.chunk_filename.replace("[name]", &options.split_name)
    } else {
        options.chunk_filename.clone()
    };

    let mut loaders: Vec<(String, String)> = options
        .transforms
        .iter()
        .map(|transform| match transform.split_once('=') {
            Some((ext, loader)) => (ext.trim().to_string(), loader.trim().to_string()),
            None => {
                tracing::warn!("transform {transform:?} names no loader, using the default one");
                (transform.trim().to_string(), String::new())
            }
        })
        .collect();
    loaders.extend(
        options
            .no_parse
            .iter()
            .map(|ext| (ext.clone(), "file".to_string())),
    );

    let cache = options
        .cache
        .then(|| cache_path(options, &ctx.cwd, &name, key));

    CompilerConfig {
        name: name.clone(),
        entry,
        context,
        output: Output {
            dir,
            filename,
            chunk_filename,
            public_path: options.public_path.clone(),
        },
        environment: options.environment,
        devtool: options.devtool,
        optimization: Optimization {
            minimize: options.minimize,
            split: options.split.then(|| options.split_name.clone()),
        },
        aliases: ALIASES
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect(),
        externals: options.externals.clone(),
        injects: options.requires.clone(),
        loaders,
        plugins,
        cache,
        metafile: scratch_dir().join(format!("{name}-{}.meta.json", key.short(12))),
        watch: options.watch.clone(),
        full_paths: options.full_paths,
    }
}

/// Resolves the manifest location. A configured template may contain
/// `{env}`; without one the manifest goes under the system temporary
/// directory, named after the entry and a digest of entry and destination.
fn cache_path(options: &ResolvedOptions, cwd: &Utf8Path, name: &str, key: Hash32) -> Utf8PathBuf {
    let env = options.environment.as_str();

    match &options.cache_path {
        Some(template) => resolve(cwd, Utf8Path::new(&template.replace("{env}", env))),
        None => scratch_dir()
            .join(env)
            .join(format!("{name}-{}.json", key.short(12))),
    }
}

fn scratch_dir() -> Utf8PathBuf {
    let tmp = std::env::temp_dir();
    Utf8PathBuf::from_path_buf(tmp)
        .unwrap_or_else(|tmp| Utf8PathBuf::from(tmp.to_string_lossy().into_owned()))
        .join("bundle-task")
}
