// watcher.rs

//! The top-level façade: owns the kernel handle, the descriptor table, the set of
//! path watches, and drives the read loop and its reconnection fixpoint.

use std::collections::{HashMap, HashSet, VecDeque};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::kernel::{EventMask, Kernel, RawEvent, Wd, WatchMask};
use crate::path_watch::PathWatch;
use crate::kernel::Linux;

/// A path-oriented filesystem change notifier.
///
/// `Watcher` is generic over its [`Kernel`] so tests can substitute
/// [`crate::kernel::mock::Mock`] for the real inotify-backed
/// [`crate::kernel::Linux`]; application code should use the default type
/// parameter.
///
/// Not safe for concurrent entry from multiple threads - a caller that wants to
/// multiplex with other I/O should use [`Watcher::fileno`] in a `poll`/`select`/`mio`
/// loop and call [`Watcher::read`] with `block = false`.
pub struct Watcher<K: Kernel = Linux> {
    kernel: K,
    descriptors: HashMap<K::Wd, Descriptor<K::Wd>>,
    path_watches: HashMap<PathBuf, PathWatch<K::Wd>>,
    reconnect: HashSet<PathBuf>,
    buffered: VecDeque<Event>,
    pending_ignored: usize,
}

impl<K: Kernel> Watcher<K> {
    /// Open a new kernel handle and its associated bookkeeping.
    pub fn open() -> Result<Self> {
        Ok(Watcher {
            kernel: K::init()?,
            descriptors: HashMap::new(),
            path_watches: HashMap::new(),
            reconnect: HashSet::new(),
            buffered: VecDeque::new(),
            pending_ignored: 0,
        })
    }

    /// Start watching `path`. Idempotent: calling `add` again with the same `mask`
    /// and `remember_curdir` is a no-op. Calling it again with a *different* `mask`
    /// or `remember_curdir` updates the existing watch in place (via
    /// [`Watcher::update`]) rather than registering a second, overlapping chain -
    /// matching `PathWatcher.add`'s own `if pth in self._paths: ...update_mask(mask);
    /// return` delegation in the implementation this crate's design is grounded on.
    ///
    /// A path that cannot currently be resolved (a missing component, a symlink
    /// loop) does not fail this call - the resulting watch is simply left
    /// `Unwatchable` until a filesystem change makes resolution possible, consistent
    /// with how this crate's `EACCES` handling has always worked. Only a genuine
    /// kernel-level failure (for example `EMFILE` from the underlying `add_watch`
    /// syscall) is surfaced as an `Err`.
    pub fn add(&mut self, path: impl AsRef<Path>, mask: WatchMask, remember_curdir: bool) -> Result<()> {
        let path = normalize(path.as_ref());

        if let Some(existing) = self.path_watches.get(&path) {
            if existing.mask == mask && existing.remember_curdir == remember_curdir {
                return Ok(());
            }
            return self.update(path, mask, remember_curdir);
        }

        let mut watch = PathWatch::new(path.clone(), mask, remember_curdir)?;
        watch.reconnect(&mut self.kernel, &mut self.descriptors)?;
        if watch.needs_reconnect() {
            self.reconnect.insert(path.clone());
        }
        self.path_watches.insert(path, watch);
        Ok(())
    }

    /// Replace or OR-merge the mask for an existing watch and update
    /// `remember_curdir`; rebuild its leaf link if it is currently fully watched.
    ///
    /// As with the kernel's own `add_watch`, including `WatchMask::MASK_ADD` in
    /// `mask` ORs it into the existing mask instead of replacing it outright - the
    /// same discipline `_Watch.update_mask`'s `IN_MASK_ADD` check applies in the
    /// implementation this crate's design is grounded on, rather than a separate
    /// ad-hoc flag.
    pub fn update(&mut self, path: impl AsRef<Path>, mask: WatchMask, remember_curdir: bool) -> Result<()> {
        let path = normalize(path.as_ref());
        let watch = self
            .path_watches
            .get_mut(&path)
            .ok_or_else(|| Error::PathMissing(path.clone()))?;
        watch.update(&mut self.kernel, &mut self.descriptors, &mut self.pending_ignored, mask, remember_curdir)?;
        Ok(())
    }

    /// Stop watching `path`, detaching every link in its chain.
    pub fn remove(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = normalize(path.as_ref());
        let mut watch = self
            .path_watches
            .remove(&path)
            .ok_or_else(|| Error::PathMissing(path.clone()))?;
        watch.detach_all(&mut self.kernel, &mut self.descriptors, &mut self.pending_ignored);
        self.reconnect.remove(&path);
        Ok(())
    }

    /// The current mask for a watched path, if it exists.
    #[must_use]
    pub fn getmask(&self, path: impl AsRef<Path>) -> Option<WatchMask> {
        self.path_watches.get(&normalize(path.as_ref())).map(|w| w.mask)
    }

    /// Every path currently registered, watched or not.
    pub fn watches(&self) -> impl Iterator<Item = &Path> {
        self.path_watches.keys().map(PathBuf::as_path)
    }

    /// A file descriptor suitable for multiplexing with `poll`/`select`/`mio`.
    #[must_use]
    pub fn fileno(&self) -> RawFd {
        self.kernel.raw_fd()
    }

    /// Release all resources. Equivalent to dropping the `Watcher`, kept as an
    /// explicit operation for parity with `open`/`fileno`.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// Drain every currently available event, blocking for at least one if `block`
    /// is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoWatches`] if no watch is currently registered, and
    /// propagates any genuine kernel failure encountered while reconnecting a
    /// broken chain or reading the notification file descriptor.
    pub fn read(&mut self, block: bool) -> Result<Vec<Event>> {
        if !self.buffered.is_empty() {
            return Ok(self.buffered.drain(..).collect());
        }

        self.run_reconnect_pass()?;

        if self.descriptors.is_empty() {
            return Err(Error::NoWatches);
        }

        let mut last: Option<Event> = None;
        loop {
            loop {
                let raw_events = self.kernel.read_events(block)?;
                let drained_nothing = raw_events.is_empty();

                for raw in raw_events {
                    log::trace!("raw event: {:?}", raw.mask);
                    for event in self.dispatch(&raw) {
                        if is_duplicate_path_change(&last, &event) {
                            continue;
                        }
                        last = Some(event.clone());
                        self.buffered.push_back(event);
                    }
                }

                if self.pending_ignored == 0 || (!block && drained_nothing) {
                    break;
                }
            }

            self.run_reconnect_pass()?;

            if self.pending_ignored == 0 && self.reconnect.is_empty() {
                break;
            }
        }

        Ok(self.buffered.drain(..).collect())
    }

    fn run_reconnect_pass(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.reconnect);
        for path in pending {
            let Some(watch) = self.path_watches.get_mut(&path) else {
                continue;
            };
            watch.reconnect(&mut self.kernel, &mut self.descriptors)?;
            if watch.needs_reconnect() {
                self.reconnect.insert(path);
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, raw: &RawEvent<K::Wd>) -> Vec<Event> {
        let Some(wd) = &raw.wd else {
            return self.dispatch_global(raw);
        };

        let refs = match self.descriptors.get(wd) {
            Some(descriptor) => descriptor.matching(&raw.name),
            None => {
                log::warn!("event for an unregistered watch descriptor");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        for link_ref in refs {
            let Some(watch) = self.path_watches.get_mut(&link_ref.path) else {
                continue;
            };
            let (watch_events, needs_reconnect) = watch.handle_event(
                &mut self.kernel,
                &mut self.descriptors,
                &mut self.pending_ignored,
                link_ref.idx,
                raw,
            );
            events.extend(watch_events);
            if needs_reconnect {
                self.reconnect.insert(link_ref.path);
            }
        }

        if raw.mask.contains(EventMask::IGNORED) {
            if let Some(descriptor) = self.descriptors.get(wd) {
                debug_assert!(descriptor.is_empty(), "IGNORED received for a descriptor with live links");
            }
            self.descriptors.remove(wd);
            self.pending_ignored = self.pending_ignored.saturating_sub(1);
        }

        events
    }

    fn dispatch_global(&mut self, raw: &RawEvent<K::Wd>) -> Vec<Event> {
        if !raw.mask.contains(EventMask::Q_OVERFLOW) {
            return Vec::new();
        }

        log::warn!("inotify event queue overflowed; rebuilding every watch");
        let paths: Vec<PathBuf> = self.path_watches.keys().cloned().collect();
        for path in &paths {
            if let Some(watch) = self.path_watches.get_mut(path) {
                watch.queue_overflow(&mut self.kernel, &mut self.descriptors, &mut self.pending_ignored);
            }
        }
        self.reconnect.extend(paths);

        vec![Event::kernel(PathBuf::new(), raw.mask, raw.cookie, None)]
    }
}

/// Collapse a user-supplied path to the key this watcher tracks it under.
///
/// This is a lexical normalization only - redundant `.` components and repeated
/// separators are dropped so that `add("./a")` and `add("a")` name the same watch,
/// matching how the implementation this crate's design is grounded on keys its
/// watches by `PosixPath` (which equates the two). `..` components are left alone:
/// collapsing them would require knowing whether an intervening component is a
/// symlink, which is exactly the question [`crate::path_resolver::PathResolver`]
/// exists to answer, not something to guess at lexically.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut normalized = PathBuf::new();
    for component in path.components() {
        if !matches!(component, Component::CurDir) {
            normalized.push(component.as_os_str());
        }
    }

    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

fn is_duplicate_path_change(last: &Option<Event>, event: &Event) -> bool {
    match last {
        Some(last) => event.is_synthetic() && last.is_synthetic() && last.path == event.path && last.mask == event.mask && last.name == event.name,
        None => false,
    }
}
