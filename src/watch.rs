//! Watch mode keeps a task's output up to date while its sources change.
//!
//! Starting a session registers a debounced file watcher on the directories
//! holding the entry files, then hands the receiving end of the event
//! channel to a background thread. That thread runs an initial build and
//! then one build per batch of relevant events:
//!
//! 1. Events from the watcher are debounced by the `watchDelay` option. The
//!    watched directories grow to cover every module a build reports reading.
//! 2. Paths matching a `watchIgnore` pattern, and files written by the
//!    previous build, are dropped.
//! 3. Whatever is left triggers a build. Failures are handled according to
//!    [`WatchErrorPolicy`].
//!
//! The session lives until [`WatchHandle::close`] is called or the handle is
//! dropped.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::event::ModifyKind;
use notify::{EventKind, PollWatcher, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{
    DebounceEventResult, DebouncedEvent, Debouncer, NoCache, RecommendedCache, new_debouncer,
    new_debouncer_opt,
};

use crate::Context;
use crate::cache::Manifest;
use crate::error::{TaskError, WatchError};
use crate::options::{WatchErrorPolicy, WatchOptions};
use crate::path::resolve;
use crate::task::{Outcome, TaskSpec, Watch};

/// How often the session thread checks whether it was asked to stop.
const STOP_CHECK: Duration = Duration::from_millis(50);

enum Subscription {
    Native(Debouncer<RecommendedWatcher, RecommendedCache>),
    Poll(Debouncer<PollWatcher, NoCache>),
}

impl Subscription {
    fn new(
        options: &WatchOptions,
        tx: Sender<DebounceEventResult>,
    ) -> Result<Self, notify::Error> {
        Ok(match options.poll {
            None => Subscription::Native(new_debouncer(options.delay, None, tx)?),
            Some(interval) => Subscription::Poll(new_debouncer_opt::<_, PollWatcher, NoCache>(
                options.delay,
                None,
                tx,
                NoCache,
                notify::Config::default().with_poll_interval(interval),
            )?),
        })
    }

    fn watch(&mut self, path: &Utf8Path) -> Result<(), notify::Error> {
        match self {
            Subscription::Native(debouncer) => debouncer.watch(path, RecursiveMode::Recursive),
            Subscription::Poll(debouncer) => debouncer.watch(path, RecursiveMode::Recursive),
        }
    }
}

/// A running watch session. Closing or dropping it stops the watcher and
/// waits for a build in progress to finish.
pub struct WatchHandle {
    name: String,
    subscription: Arc<Mutex<Option<Subscription>>>,
    worker: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    builds: Arc<AtomicUsize>,
}

impl WatchHandle {
    /// Number of builds completed so far, the initial one included.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// False once the session ended, either closed or stopped by a failure.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(subscription);

        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("{}: watch thread panicked", self.name);
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Watch {
    /// Starts watching. The initial build runs in the background, its
    /// failure is handled like any other failed rebuild.
    pub fn start(&self, ctx: &Context) -> Result<WatchHandle, TaskError> {
        let config = self.spec.config(ctx);
        config.entry.assert_exists()?;

        let ignore = config
            .watch
            .ignore
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let mut roots = HashSet::new();
        for path in config.entry.paths() {
            if let Some(dir) = path.parent() {
                roots.insert(dir.canonicalize_utf8()?);
            }
        }
        let roots = collapse_watch_paths(roots);

        let (tx, rx) = std::sync::mpsc::channel();
        let mut subscription = Subscription::new(&config.watch, tx).map_err(WatchError::from)?;
        for root in &roots {
            tracing::info!("{}: watching {root}", config.name);
            subscription.watch(root).map_err(WatchError::from)?;
        }

        let subscription = Arc::new(Mutex::new(Some(subscription)));
        let stop = Arc::new(AtomicBool::new(false));
        let builds = Arc::new(AtomicUsize::new(0));

        let session = Session {
            name: config.name.clone(),
            spec: self.spec.clone(),
            ctx: ctx.clone(),
            context: config.context.clone(),
            subscription: subscription.clone(),
            roots,
            ignore,
            produced: HashSet::new(),
            on_error: config.watch.on_error,
            stop: stop.clone(),
            builds: builds.clone(),
        };

        let worker = thread::Builder::new()
            .name(format!("watch {}", config.name))
            .spawn(move || session.run(rx))
            .map_err(WatchError::Thread)?;

        Ok(WatchHandle {
            name: config.name,
            subscription,
            worker: Some(worker),
            stop,
            builds,
        })
    }
}

struct Session {
    name: String,
    spec: Arc<TaskSpec>,
    ctx: Context,
    /// Build context, ignore patterns apply to module paths relative to it.
    context: Utf8PathBuf,
    subscription: Arc<Mutex<Option<Subscription>>>,
    roots: Vec<Utf8PathBuf>,
    ignore: Vec<Pattern>,
    /// Files written by the last build, changes to them are ours.
    produced: HashSet<Utf8PathBuf>,
    on_error: WatchErrorPolicy,
    stop: Arc<AtomicBool>,
    builds: Arc<AtomicUsize>,
}

impl Session {
    fn run(mut self, rx: Receiver<DebounceEventResult>) {
        if !self.rebuild() {
            return;
        }

        while !self.stop.load(Ordering::SeqCst) {
            match rx.recv_timeout(STOP_CHECK) {
                Ok(Ok(events)) => {
                    let changed = self.relevant(&events);
                    if changed.is_empty() || self.stop.load(Ordering::SeqCst) {
                        continue;
                    }

                    tracing::trace!("{}: changed {:?}", self.name, changed);
                    if !self.rebuild() {
                        return;
                    }
                }
                Ok(Err(errors)) => tracing::error!("{}: watch error: {:?}", self.name, errors),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Builds once. Returns false when the session should end.
    fn rebuild(&mut self) -> bool {
        match self.spec.build(&self.ctx) {
            Ok(outcome) => {
                match &outcome {
                    Outcome::Built(status) => {
                        self.produced = status
                            .outputs
                            .iter()
                            .map(|output| {
                                output
                                    .path
                                    .canonicalize_utf8()
                                    .unwrap_or_else(|_| output.path.clone())
                            })
                            .collect();
                        self.follow(status.inputs.iter().map(|input| input.path.clone()));
                        tracing::trace!("{}: {status}", self.name);
                    }
                    Outcome::Fresh => {
                        let inputs = self.recorded_inputs();
                        self.follow(inputs);
                        tracing::trace!("{}: up to date", self.name);
                    }
                }

                self.builds.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::error!("{}: {e}", self.name);

                match self.on_error {
                    WatchErrorPolicy::Continue => true,
                    WatchErrorPolicy::Stop => {
                        tracing::error!("{}: watch stopped", self.name);
                        false
                    }
                    WatchErrorPolicy::Exit => std::process::exit(1),
                }
            }
        }
    }

    /// Modules of the last build according to the manifest.
    fn recorded_inputs(&self) -> Vec<Utf8PathBuf> {
        let config = self.spec.config(&self.ctx);
        let Some(path) = &config.cache else {
            return Vec::new();
        };

        match Manifest::read(path) {
            Ok(manifest) => manifest
                .dependencies()
                .iter()
                .map(|dep| resolve(&config.context, dep))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Starts watching the directories of modules outside the current roots.
    fn follow(&mut self, inputs: impl IntoIterator<Item = Utf8PathBuf>) {
        let mut dirs = HashSet::new();
        for input in inputs {
            if is_ignored(&input, std::slice::from_ref(&self.context), &self.ignore) {
                continue;
            }

            if let Some(dir) = input.parent()
                && let Ok(dir) = dir.canonicalize_utf8()
                && !self.roots.iter().any(|root| dir.starts_with(root))
            {
                dirs.insert(dir);
            }
        }

        if dirs.is_empty() {
            return;
        }

        let mut guard = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(subscription) = guard.as_mut() else {
            return;
        };

        let mut roots: HashSet<_> = self.roots.iter().cloned().collect();
        for dir in collapse_watch_paths(dirs) {
            match subscription.watch(&dir) {
                Ok(()) => {
                    tracing::debug!("{}: watching {dir}", self.name);
                    roots.insert(dir);
                }
                Err(e) => tracing::warn!("{}: couldn't watch {dir}: {e}", self.name),
            }
        }

        self.roots = collapse_watch_paths(roots);
    }

    fn relevant(&self, events: &[DebouncedEvent]) -> HashSet<Utf8PathBuf> {
        events
            .iter()
            .filter(|de| {
                matches!(
                    de.event.kind,
                    EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                ) && !matches!(de.event.kind, EventKind::Modify(ModifyKind::Metadata(..)))
            })
            .flat_map(|de| &de.event.paths)
            .filter_map(|path| Utf8Path::from_path(path))
            .filter(|path| !self.produced.contains(*path))
            .filter(|path| !is_ignored(path, &self.roots, &self.ignore))
            .map(Utf8Path::to_path_buf)
            .collect()
    }
}

/// Ignore patterns are matched against the path relative to the watched root
/// it was reported under.
fn is_ignored(path: &Utf8Path, roots: &[Utf8PathBuf], ignore: &[Pattern]) -> bool {
    let relative = roots
        .iter()
        .find_map(|root| path.strip_prefix(root).ok())
        .unwrap_or(path);

    ignore
        .iter()
        .any(|pattern| pattern.matches_path(Path::new(relative.as_str())))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Instant;

    use super::*;
    use crate::define_with;
    use crate::options::TaskOptions;
    use crate::testing::FakeBundler;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn collapse_nested_roots() {
        let paths = HashSet::from([
            Utf8PathBuf::from("/a"),
            Utf8PathBuf::from("/a/b"),
            Utf8PathBuf::from("/a/b/c"),
            Utf8PathBuf::from("/b"),
            Utf8PathBuf::from("/foo-bar"),
            Utf8PathBuf::from("/foo"),
        ]);

        assert_eq!(
            collapse_watch_paths(paths),
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/foo"),
                Utf8PathBuf::from("/foo-bar"),
            ]
        );
    }

    #[test]
    fn ignore_is_relative_to_root() {
        let roots = vec![Utf8PathBuf::from("/tmp/project/src")];
        let ignore = vec![
            Pattern::new("**/node_modules/**").unwrap(),
            Pattern::new("**/tmp/**").unwrap(),
        ];

        assert!(!is_ignored(Utf8Path::new("/tmp/project/src/a.js"), &roots, &ignore));
        assert!(is_ignored(
            Utf8Path::new("/tmp/project/src/node_modules/x/index.js"),
            &roots,
            &ignore
        ));
        assert!(is_ignored(Utf8Path::new("/tmp/project/src/tmp/a.js"), &roots, &ignore));
    }

    #[test]
    fn rebuilds_on_change_until_closed() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        let src = root.join("src/foo.js");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(&src, "module.exports = 'hoge'").unwrap();

        let bundler = Arc::new(FakeBundler::default());
        let task = define_with(
            bundler.clone(),
            src.as_str(),
            root.join("dest/foo.js"),
            TaskOptions::new()
                .cache(false)
                .native_events()
                .watch_delay(Duration::from_millis(50)),
        );

        let ctx = Context::with_cwd(&root);
        let handle = task.watch.as_ref().unwrap().start(&ctx).unwrap();
        assert!(wait_for(|| handle.builds() >= 1));
        thread::sleep(Duration::from_millis(200));

        fs::write(&src, "module.exports = 'fuge'").unwrap();
        assert!(wait_for(|| handle.builds() >= 2));
        thread::sleep(Duration::from_millis(200));

        fs::write(&src, "module.exports = 'moge'").unwrap();
        assert!(wait_for(|| handle.builds() >= 3));
        assert!(wait_for(|| {
            fs::read_to_string(root.join("dest/foo.js")).unwrap_or_default()
                == "module.exports = 'moge'"
        }));

        handle.close();
        let calls = bundler.calls();

        fs::write(&src, "module.exports = 'late'").unwrap();
        thread::sleep(Duration::from_millis(500));
        assert_eq!(bundler.calls(), calls);
    }

    #[test]
    fn polling_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/a.js"), "1").unwrap();

        let bundler = Arc::new(FakeBundler::default());
        let task = define_with(
            bundler.clone(),
            root.join("src/a.js"),
            root.join("out/a.js"),
            TaskOptions::new()
                .cache(false)
                .watch_poll(Duration::from_millis(100))
                .watch_delay(Duration::from_millis(50)),
        );

        let handle = task
            .watch
            .as_ref()
            .unwrap()
            .start(&Context::with_cwd(&root))
            .unwrap();
        assert!(wait_for(|| handle.builds() >= 1));
        thread::sleep(Duration::from_millis(300));

        fs::write(root.join("src/a.js"), "console.log(2)").unwrap();
        assert!(wait_for(|| handle.builds() >= 2));
        handle.close();
    }

    #[test]
    fn imported_modules_outside_the_entry_dir_are_watched() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("src/entry.js"), "import '../lib/util.js';\n").unwrap();
        fs::write(root.join("lib/util.js"), "v1").unwrap();

        let bundler = Arc::new(FakeBundler::default());
        bundler.add_module(root.join("lib/util.js"));
        let task = define_with(
            bundler.clone(),
            root.join("src/entry.js"),
            root.join("out/entry.js"),
            TaskOptions::new()
                .cache(false)
                .native_events()
                .watch_delay(Duration::from_millis(50)),
        );

        let handle = task
            .watch
            .as_ref()
            .unwrap()
            .start(&Context::with_cwd(&root))
            .unwrap();
        assert!(wait_for(|| handle.builds() >= 1));
        thread::sleep(Duration::from_millis(200));

        fs::write(root.join("lib/util.js"), "v2").unwrap();
        assert!(wait_for(|| handle.builds() >= 2));
        assert!(wait_for(|| {
            fs::read_to_string(root.join("out/entry.js"))
                .unwrap_or_default()
                .ends_with("v2")
        }));
        handle.close();
    }

    #[test]
    fn failure_stops_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        fs::write(root.join("a.js"), "").unwrap();

        let bundler = Arc::new(FakeBundler::default());
        bundler.set_failing(true);
        let task = define_with(
            bundler.clone(),
            root.join("a.js"),
            root.join("out/a.js"),
            TaskOptions::new().cache(false),
        );

        let handle = task
            .watch
            .as_ref()
            .unwrap()
            .start(&Context::with_cwd(&root))
            .unwrap();

        assert!(wait_for(|| !handle.is_running()));
        assert_eq!(handle.builds(), 0);
        assert_eq!(bundler.calls(), 1);
    }

    #[test]
    fn missing_entry_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let task = define_with(
            Arc::new(FakeBundler::default()),
            root.join("nope.js"),
            root.join("out.js"),
            TaskOptions::new(),
        );

        let result = task.watch.as_ref().unwrap().start(&Context::with_cwd(&root));
        assert!(matches!(result, Err(TaskError::MissingEntry(_))));
    }
}
