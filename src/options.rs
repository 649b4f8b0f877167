//! Task options and their resolution against environment defaults.
//!
//! [`TaskOptions`] is what the caller writes, either through the builder
//! setters or deserialized from a JSON object using the camelCase names
//! (`watchDelay`, `splitName`, ...). Keys that are not recognised end up in
//! a side map which is only ever used to warn about them.
//!
//! [`ResolvedOptions`] is the immutable result of applying defaults, taken
//! once when a task is defined.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Deserialize;

/// Name of the variable selecting production defaults.
pub const NODE_ENV: &str = "NODE_ENV";

const DEFAULT_WATCH_DELAY: u64 = 400;
const DEFAULT_WATCH_POLL: u64 = 1000;
const DEFAULT_CHUNK_FILENAME: &str = "chunks/[name]-[hash]";
const DEFAULT_SPLIT_NAME: &str = "external";
const DEFAULT_WATCH_IGNORE: [&str; 3] = ["**/node_modules/**", "**/tmp/**", "**/var/**"];
const DEFAULT_IGNORES: [&str; 1] = ["moment/locale/*"];

/// Build environment, production or development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    /// Anything but the literal `production` selects development.
    pub fn from_node_env(value: Option<&str>) -> Self {
        match value {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// Reads [`NODE_ENV`] from the process environment.
    pub fn current() -> Self {
        Self::from_node_env(std::env::var(NODE_ENV).ok().as_deref())
    }

    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Development => "development",
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source map mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMap {
    None,
    Inline,
    Linked,
    External,
}

/// What a watch session does when a rebuild fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchErrorPolicy {
    /// Log the error and end the session. The handle still has to be closed.
    #[default]
    Stop,
    /// Log the error and keep watching.
    Continue,
    /// Log the error and exit the process with status 1.
    Exit,
}

/// How the watcher learns about changes: a poll interval in milliseconds, or
/// a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum WatchPoll {
    Interval(u64),
    /// `false` uses native file system events, `true` polls at the default
    /// interval.
    Enabled(bool),
}

/// A list of names given either as one comma separated string or as a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "ListRepr")]
pub struct ListOption(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum ListRepr {
    One(String),
    Many(Vec<String>),
}

impl From<ListRepr> for ListOption {
    fn from(value: ListRepr) -> Self {
        match value {
            ListRepr::One(text) => ListOption::from(text.as_str()),
            ListRepr::Many(items) => ListOption::from(items),
        }
    }
}

impl ListOption {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ListOption {
    fn from(value: &str) -> Self {
        ListOption(
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect(),
        )
    }
}

impl From<Vec<String>> for ListOption {
    fn from(value: Vec<String>) -> Self {
        ListOption(
            value
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        )
    }
}

impl<const N: usize> From<[&str; N]> for ListOption {
    fn from(value: [&str; N]) -> Self {
        ListOption::from(value.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }
}

/// Options accepted when defining a task. Every field is optional, see
/// [`TaskOptions::resolve`] for the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskOptions {
    /// Base directory for relative entry paths.
    pub context: Option<Utf8PathBuf>,
    /// Overrides the environment read from `NODE_ENV`.
    pub mode: Option<Environment>,
    /// Extra variables exposed to the bundle as `process.env.*`.
    pub env: BTreeMap<String, String>,
    pub cache: Option<bool>,
    /// Manifest location, `{env}` is replaced with the environment name.
    pub cache_path: Option<String>,
    /// Debounce delay in milliseconds.
    pub watch_delay: Option<u64>,
    pub watch_ignore: Option<Vec<String>>,
    /// Polls every second when unset, `false` switches to native events.
    pub watch_poll: Option<WatchPoll>,
    pub on_watch_error: Option<WatchErrorPolicy>,
    pub skip_watching: bool,
    pub vendor: Option<ListOption>,
    pub devtool: Option<SourceMap>,
    pub chunk_filename: Option<String>,
    pub analyze: bool,
    pub split: bool,
    pub split_name: Option<String>,
    pub minimize: Option<bool>,
    pub public_path: Option<String>,
    pub externals: ListOption,
    pub requires: ListOption,
    pub transforms: ListOption,
    pub plugins: Vec<String>,
    pub ignores: Option<ListOption>,
    pub no_parse: ListOption,
    pub full_paths: bool,

    #[serde(flatten)]
    unknown: BTreeMap<String, serde_json::Value>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads options from a JSON object.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Keys that were given but are not options, sorted.
    pub fn unknown_keys(&self) -> Vec<&str> {
        self.unknown.keys().map(String::as_str).collect()
    }

    /// Applies the defaults. `node_env` is the value of [`NODE_ENV`] at the
    /// time of the call, an explicit `mode` option takes precedence over it.
    pub fn resolve(&self, node_env: Option<&str>) -> ResolvedOptions {
        let keys = self.unknown_keys();
        if !keys.is_empty() {
            tracing::warn!("unknown options: {}", keys.join(", "));
        }

        let environment = self
            .mode
            .unwrap_or_else(|| Environment::from_node_env(node_env));
        let production = environment.is_production();

        ResolvedOptions {
            context: self.context.clone(),
            environment,
            env: self.env.clone(),
            cache: self.cache.unwrap_or(!production),
            cache_path: self.cache_path.clone(),
            watch: WatchOptions {
                delay: Duration::from_millis(self.watch_delay.unwrap_or(DEFAULT_WATCH_DELAY)),
                ignore: self.watch_ignore.clone().unwrap_or_else(|| {
                    DEFAULT_WATCH_IGNORE.iter().map(|s| s.to_string()).collect()
                }),
                poll: match self.watch_poll {
                    None | Some(WatchPoll::Enabled(true)) => {
                        Some(Duration::from_millis(DEFAULT_WATCH_POLL))
                    }
                    Some(WatchPoll::Interval(ms)) => Some(Duration::from_millis(ms)),
                    Some(WatchPoll::Enabled(false)) => None,
                },
                on_error: self.on_watch_error.unwrap_or_default(),
            },
            skip_watching: self.skip_watching,
            vendor: self.vendor.clone().map(ListOption::into_vec).unwrap_or_default(),
            devtool: self.devtool.unwrap_or(if production {
                SourceMap::None
            } else {
                SourceMap::Inline
            }),
            chunk_filename: self
                .chunk_filename
                .clone()
                .unwrap_or_else(|| DEFAULT_CHUNK_FILENAME.to_string()),
            analyze: self.analyze,
            split: self.split,
            split_name: self
                .split_name
                .clone()
                .unwrap_or_else(|| DEFAULT_SPLIT_NAME.to_string()),
            minimize: self.minimize.unwrap_or(production),
            public_path: self.public_path.clone().unwrap_or_default(),
            externals: self.externals.as_slice().to_vec(),
            requires: self.requires.as_slice().to_vec(),
            transforms: self.transforms.as_slice().to_vec(),
            plugins: self.plugins.clone(),
            ignores: match &self.ignores {
                Some(ignores) => ignores.as_slice().to_vec(),
                None => DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect(),
            },
            no_parse: self.no_parse.as_slice().to_vec(),
            full_paths: self.full_paths,
        }
    }

    pub fn context(mut self, context: impl Into<Utf8PathBuf>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn mode(mut self, mode: Environment) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_path(mut self, path: impl Into<String>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn watch_delay(mut self, delay: Duration) -> Self {
        self.watch_delay = Some(millis(delay));
        self
    }

    pub fn watch_ignore(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.watch_ignore = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn watch_poll(mut self, interval: Duration) -> Self {
        self.watch_poll = Some(WatchPoll::Interval(millis(interval)));
        self
    }

    /// Watches with native file system events instead of polling.
    pub fn native_events(mut self) -> Self {
        self.watch_poll = Some(WatchPoll::Enabled(false));
        self
    }

    pub fn on_watch_error(mut self, policy: WatchErrorPolicy) -> Self {
        self.on_watch_error = Some(policy);
        self
    }

    pub fn skip_watching(mut self, skip: bool) -> Self {
        self.skip_watching = skip;
        self
    }

    pub fn vendor(mut self, modules: impl Into<ListOption>) -> Self {
        self.vendor = Some(modules.into());
        self
    }

    pub fn devtool(mut self, devtool: SourceMap) -> Self {
        self.devtool = Some(devtool);
        self
    }

    pub fn chunk_filename(mut self, template: impl Into<String>) -> Self {
        self.chunk_filename = Some(template.into());
        self
    }

    pub fn analyze(mut self, analyze: bool) -> Self {
        self.analyze = analyze;
        self
    }

    pub fn split(mut self, split: bool) -> Self {
        self.split = split;
        self
    }

    pub fn split_name(mut self, name: impl Into<String>) -> Self {
        self.split_name = Some(name.into());
        self
    }

    pub fn minimize(mut self, minimize: bool) -> Self {
        self.minimize = Some(minimize);
        self
    }

    pub fn public_path(mut self, path: impl Into<String>) -> Self {
        self.public_path = Some(path.into());
        self
    }

    pub fn externals(mut self, externals: impl Into<ListOption>) -> Self {
        self.externals = externals.into();
        self
    }

    pub fn requires(mut self, requires: impl Into<ListOption>) -> Self {
        self.requires = requires.into();
        self
    }

    pub fn transforms(mut self, transforms: impl Into<ListOption>) -> Self {
        self.transforms = transforms.into();
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.plugins = plugins.into_iter().map(Into::into).collect();
        self
    }

    pub fn ignores(mut self, ignores: impl Into<ListOption>) -> Self {
        self.ignores = Some(ignores.into());
        self
    }

    pub fn no_parse(mut self, no_parse: impl Into<ListOption>) -> Self {
        self.no_parse = no_parse.into();
        self
    }

    pub fn full_paths(mut self, full_paths: bool) -> Self {
        self.full_paths = full_paths;
        self
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Settings of a watch session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchOptions {
    pub delay: Duration,
    /// Glob patterns, matched against paths relative to the watched root.
    pub ignore: Vec<String>,
    /// Poll interval, `None` for native events.
    pub poll: Option<Duration>,
    pub on_error: WatchErrorPolicy,
}

/// Options with every default applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedOptions {
    pub context: Option<Utf8PathBuf>,
    pub environment: Environment,
    pub env: BTreeMap<String, String>,
    pub cache: bool,
    pub cache_path: Option<String>,
    pub watch: WatchOptions,
    pub skip_watching: bool,
    pub vendor: Vec<String>,
    pub devtool: SourceMap,
    pub chunk_filename: String,
    pub analyze: bool,
    pub split: bool,
    pub split_name: String,
    pub minimize: bool,
    pub public_path: String,
    pub externals: Vec<String>,
    pub requires: Vec<String>,
    pub transforms: Vec<String>,
    pub plugins: Vec<String>,
    pub ignores: Vec<String>,
    pub no_parse: Vec<String>,
    pub full_paths: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_from_node_env() {
        assert_eq!(Environment::from_node_env(Some("production")), Environment::Production);
        assert_eq!(Environment::from_node_env(Some("test")), Environment::Development);
        assert_eq!(Environment::from_node_env(None), Environment::Development);
    }

    #[test]
    fn development_defaults() {
        let resolved = TaskOptions::new().resolve(None);

        assert_eq!(resolved.environment, Environment::Development);
        assert!(resolved.cache);
        assert!(!resolved.minimize);
        assert_eq!(resolved.devtool, SourceMap::Inline);
        assert_eq!(resolved.watch.delay, Duration::from_millis(400));
        assert_eq!(resolved.watch.poll, Some(Duration::from_millis(1000)));
        assert_eq!(resolved.watch.on_error, WatchErrorPolicy::Stop);
        assert_eq!(resolved.split_name, "external");
        assert!(resolved.chunk_filename.contains("[hash]"));
        assert_eq!(resolved.ignores, vec!["moment/locale/*".to_string()]);
    }

    #[test]
    fn production_defaults() {
        let resolved = TaskOptions::new().resolve(Some("production"));

        assert_eq!(resolved.environment, Environment::Production);
        assert!(!resolved.cache);
        assert!(resolved.minimize);
        assert_eq!(resolved.devtool, SourceMap::None);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let resolved = TaskOptions::new()
            .mode(Environment::Development)
            .cache(false)
            .minimize(true)
            .watch_delay(Duration::from_millis(1))
            .ignores(ListOption::default())
            .resolve(Some("production"));

        assert_eq!(resolved.environment, Environment::Development);
        assert!(!resolved.cache);
        assert!(resolved.minimize);
        assert_eq!(resolved.watch.delay, Duration::from_millis(1));
        assert!(resolved.ignores.is_empty());
    }

    #[test]
    fn poll_interval_or_native_events() {
        let poll = |value: serde_json::Value| {
            TaskOptions::from_json(serde_json::json!({ "watchPoll": value }))
                .unwrap()
                .resolve(None)
                .watch
                .poll
        };

        assert_eq!(poll(serde_json::json!(250)), Some(Duration::from_millis(250)));
        assert_eq!(poll(serde_json::json!(true)), Some(Duration::from_millis(1000)));
        assert_eq!(poll(serde_json::json!(false)), None);
        assert_eq!(TaskOptions::new().native_events().resolve(None).watch.poll, None);
    }

    #[test]
    fn huge_durations_saturate() {
        let options = TaskOptions::new()
            .watch_delay(Duration::MAX)
            .watch_poll(Duration::MAX);

        assert_eq!(options.watch_delay, Some(u64::MAX));
        assert_eq!(options.watch_poll, Some(WatchPoll::Interval(u64::MAX)));
    }

    #[test]
    fn list_option_from_string_and_list() {
        assert_eq!(
            ListOption::from("react, react-dom,,lodash").as_slice(),
            ["react", "react-dom", "lodash"]
        );
        assert_eq!(ListOption::from(["a", " b "]).as_slice(), ["a", "b"]);
    }

    #[test]
    fn unknown_keys_are_collected() {
        let options = TaskOptions::from_json(serde_json::json!({
            "watchDelay": 1,
            "externals": "react,react-dom",
            "vendor": ["lodash"],
            "fooBar": 1,
            "baz": true,
        }))
        .unwrap();

        assert_eq!(options.unknown_keys(), ["baz", "fooBar"]);
        assert_eq!(options.watch_delay, Some(1));
        assert_eq!(options.externals.as_slice(), ["react", "react-dom"]);

        let resolved = options.resolve(None);
        assert_eq!(resolved.vendor, vec!["lodash".to_string()]);
    }

    #[test]
    fn known_keys_are_not_unknown() {
        let options = TaskOptions::from_json(serde_json::json!({
            "skipWatching": true,
            "splitName": "shared",
            "onWatchError": "continue",
            "noParse": ".wasm",
        }))
        .unwrap();

        assert!(options.unknown_keys().is_empty());
        assert!(options.skip_watching);
        assert_eq!(options.on_watch_error, Some(WatchErrorPolicy::Continue));
        assert_eq!(options.no_parse.as_slice(), [".wasm"]);
    }
}
