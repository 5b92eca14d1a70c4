// path_watch.rs

//! One user-requested path: its live resolution chain, and the logic for rebuilding
//! that chain when something along it changes.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use crate::descriptor::{Descriptor, LinkRef};
use crate::event::{Event, SyntheticMask};
use crate::kernel::{EventMask, Kernel, RawEvent, Wd, WatchMask};
use crate::link::{Link, Role};
use crate::path_resolver::{PathResolver, ResolveError, Step};

/// How completely a `PathWatch`'s chain currently covers its user path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The chain needs (re)building; present in the `Watcher`'s reconnection set.
    RebuildNeeded,

    /// Resolution hit a permanent fault (a missing component, a symlink loop); the
    /// chain covers as much as survived, and will only move again if a kernel event
    /// arrives on one of the surviving links.
    Unwatchable,

    /// The chain reaches the leaf and is fully watched.
    FullyWatched,
}

// `UNMOUNT` and `IGNORED` are not requestable through `WatchMask` - the kernel
// reports them unconditionally regardless of the mask passed to `add_watch` - so
// they are omitted here even though the design they're grounded on lists them.
const PARENT_TRAVERSAL_MASK: WatchMask = WatchMask::from_bits_truncate(
    WatchMask::ONLYDIR.bits() | WatchMask::EXCL_UNLINK.bits() | WatchMask::MOVE_SELF.bits() | WatchMask::DELETE_SELF.bits(),
);

const INTERMEDIATE_MASK: WatchMask = WatchMask::from_bits_truncate(
    WatchMask::ONLYDIR.bits()
        | WatchMask::EXCL_UNLINK.bits()
        | WatchMask::MOVE.bits()
        | WatchMask::DELETE.bits()
        | WatchMask::CREATE.bits(),
);

/// One per user `add`.
pub(crate) struct PathWatch<W> {
    /// The canonical, normalized user path - also this watch's key in the `Watcher`'s
    /// table.
    pub path: PathBuf,

    /// The user-requested mask for the leaf.
    pub mask: WatchMask,

    /// Whether resolution should start from a recorded working directory rather than
    /// re-deriving it from the process's current directory on every reconnect.
    pub remember_curdir: bool,

    /// `path.is_absolute()`, cached so `reconnect` doesn't need to re-derive it.
    is_absolute: bool,

    /// The working directory captured at `add` time, used as the resolution anchor
    /// for a relative path when `remember_curdir` is set. `None` for an absolute path
    /// (anchored at `/` instead) or when `remember_curdir` is false, in which case
    /// `reconnect` re-reads the process's current directory every time it starts over
    /// - so a relative watch keeps tracking what the path means as the process `cd`s
    /// around, matching this crate's whole premise of tracking a path's *meaning*
    /// rather than pinning it to a resolution taken once.
    recorded_dir: Option<PathBuf>,

    /// The path components to resolve from the start directory, when there are no
    /// surviving links to resume from instead.
    user_suffix: VecDeque<OsString>,

    pub links: Vec<Link<W>>,
    pub completion: Completion,
}

impl<W: Wd> PathWatch<W> {
    pub fn new(path: PathBuf, mask: WatchMask, remember_curdir: bool) -> io::Result<Self> {
        let is_absolute = path.is_absolute();

        let recorded_dir = if remember_curdir && !is_absolute {
            Some(std::env::current_dir()?)
        } else {
            None
        };

        let user_suffix: VecDeque<OsString> = if is_absolute {
            path.components()
                .filter(|c| !matches!(c, std::path::Component::RootDir))
                .map(|c| c.as_os_str().to_os_string())
                .collect()
        } else {
            path.iter().map(OsString::from).collect()
        };

        Ok(PathWatch {
            path,
            mask,
            remember_curdir,
            is_absolute,
            recorded_dir,
            user_suffix,
            links: Vec::new(),
            completion: Completion::RebuildNeeded,
        })
    }

    /// The directory resolution starts from when there are no surviving links to
    /// resume from - `/` for an absolute path, the recorded directory if
    /// `remember_curdir` was set, or the process's current directory read fresh
    /// otherwise.
    fn start_dir(&self) -> io::Result<PathBuf> {
        if self.is_absolute {
            return Ok(PathBuf::from("/"));
        }
        if let Some(recorded) = &self.recorded_dir {
            return Ok(recorded.clone());
        }
        std::env::current_dir()
    }

    /// Drive the `PathResolver` from wherever this watch last left off, registering a
    /// `Link` for every step. Path faults never escape this call: they demote the
    /// watch to `Unwatchable` instead. Only a genuine kernel error (for example
    /// `EMFILE` from `add_watch`) propagates as `Err`.
    pub fn reconnect<K>(
        &mut self,
        kernel: &mut K,
        descriptors: &mut HashMap<K::Wd, Descriptor<K::Wd>>,
    ) -> io::Result<()>
    where
        K: Kernel<Wd = W>,
    {
        let resuming = self.links.last().is_some();
        let (dir, remaining, linkcount) = match self.links.last() {
            Some(last) => (last.dir.clone(), last.remaining.clone(), last.linkcount),
            None => (self.start_dir()?, self.user_suffix.clone(), 0),
        };

        let resolver = PathResolver::new(dir, remaining, linkcount);

        // When resuming from a surviving Link, the resolver's first step just
        // reproduces that Link's own state - it's already in `self.links`, so skip
        // adding it again and only append what comes after it.
        for (i, step) in resolver.enumerate() {
            let step: Step = match step {
                Ok(step) => step,
                Err(ResolveError::ConcurrentModification) => {
                    log::debug!(
                        "concurrent filesystem modification while reconnecting {}, will retry",
                        self.path.display()
                    );
                    return Ok(());
                }
                Err(fault) => {
                    log::debug!("{} is unwatchable: {}", self.path.display(), fault);
                    self.completion = Completion::Unwatchable;
                    return Ok(());
                }
            };

            if resuming && i == 0 {
                continue;
            }

            if step.remaining.is_empty() {
                self.add_leaf(kernel, descriptors, step.dir, step.linkcount)?;
            } else {
                self.add_path_element(kernel, descriptors, step)?;
            }
        }

        self.completion = Completion::FullyWatched;
        log::debug!("{} is fully watched ({} links)", self.path.display(), self.links.len());
        Ok(())
    }

    fn add_path_element<K>(
        &mut self,
        kernel: &mut K,
        descriptors: &mut HashMap<K::Wd, Descriptor<K::Wd>>,
        step: Step,
    ) -> io::Result<()>
    where
        K: Kernel<Wd = W>,
    {
        let is_parent_traversal = step.remaining.front().map(OsString::as_os_str) == Some(std::ffi::OsStr::new(".."));

        let (role, mask, name) = if is_parent_traversal {
            (Role::ParentTraversal, PARENT_TRAVERSAL_MASK, None)
        } else {
            let name = step.remaining.front().cloned();
            (Role::Intermediate, INTERMEDIATE_MASK, name)
        };

        let watch_target = &step.dir;
        let kernel_mask = mask | WatchMask::MASK_ADD;
        let wd = kernel.add_watch(watch_target, kernel_mask)?;

        let idx = self.links.len();
        let link_ref = LinkRef {
            path: self.path.clone(),
            idx,
        };
        descriptors
            .entry(wd.clone())
            .or_insert_with(|| Descriptor::new(wd.clone()))
            .register(name.clone(), link_ref, mask);

        self.links.push(Link {
            idx,
            descriptor: Some(wd),
            mask,
            name,
            dir: step.dir,
            remaining: step.remaining,
            linkcount: step.linkcount,
            role,
        });

        Ok(())
    }

    fn add_leaf<K>(
        &mut self,
        kernel: &mut K,
        descriptors: &mut HashMap<K::Wd, Descriptor<K::Wd>>,
        dir: PathBuf,
        linkcount: usize,
    ) -> io::Result<()>
    where
        K: Kernel<Wd = W>,
    {
        let kernel_mask = self.mask | WatchMask::MASK_ADD;
        let wd = kernel.add_watch(&dir, kernel_mask)?;

        let idx = self.links.len();
        let link_ref = LinkRef {
            path: self.path.clone(),
            idx,
        };
        descriptors
            .entry(wd.clone())
            .or_insert_with(|| Descriptor::new(wd.clone()))
            .register(None, link_ref, self.mask);

        self.links.push(Link {
            idx,
            descriptor: Some(wd),
            mask: self.mask,
            name: None,
            dir,
            remaining: VecDeque::new(),
            linkcount,
            role: Role::Leaf,
        });

        Ok(())
    }

    /// Handle a raw kernel event dispatched to the link at `link_idx`.
    ///
    /// Returns the public events to emit and whether this watch now needs to be
    /// (re)enqueued for reconnection. Also unregisters/removes any links that this
    /// event invalidated, via `descriptors`, reporting kernel `remove_watch` failures
    /// by logging rather than propagating (removal is best-effort bookkeeping, not a
    /// caller-visible operation).
    pub fn handle_event<K>(
        &mut self,
        kernel: &mut K,
        descriptors: &mut HashMap<K::Wd, Descriptor<K::Wd>>,
        pending_ignored: &mut usize,
        link_idx: usize,
        raw: &RawEvent<K::Wd>,
    ) -> (Vec<Event>, bool)
    where
        K: Kernel<Wd = W>,
    {
        let self_hit = raw.mask.intersects(
            EventMask::MOVE_SELF | EventMask::DELETE_SELF | EventMask::IGNORED | EventMask::UNMOUNT,
        );

        // A self-destructive event on the leaf (it moved, was deleted, its watch was
        // torn down) still invalidates the chain and must go through the same
        // stale/synthetic handling as any other link - only a genuine content event
        // on the leaf (matching the user's requested mask) is forwarded as-is.
        let is_leaf_hit = !self_hit
            && self.completion == Completion::FullyWatched
            && link_idx == self.links.len().saturating_sub(1)
            && self.links.get(link_idx).map(|l| l.role) == Some(Role::Leaf);

        if is_leaf_hit {
            let event = Event::kernel(self.path.clone(), raw.mask, raw.cookie, raw.name.clone().map(PathBuf::from));
            return (vec![event], false);
        }

        let Some(link) = self.links.get(link_idx) else {
            return (Vec::new(), false);
        };

        let child_hit = raw.mask.intersects(EventMask::MOVED_FROM | EventMask::MOVED_TO | EventMask::CREATE | EventMask::DELETE);

        let stale_from = if self_hit && !child_hit {
            link_idx
        } else {
            link_idx + 1
        };

        let changed_path = link.full_path();
        self.remove_from(stale_from, kernel, descriptors, pending_ignored);

        let healable = raw.mask.intersects(EventMask::MOVED_TO | EventMask::CREATE | EventMask::UNMOUNT);
        self.completion = if healable {
            Completion::RebuildNeeded
        } else {
            Completion::Unwatchable
        };

        let synthetic = classify(raw.mask);
        let mut synthetic_bits = synthetic.bits();
        if raw.mask.contains(EventMask::ISDIR) {
            synthetic_bits |= EventMask::ISDIR.bits() as u64;
        }

        let event = Event {
            path: self.path.clone(),
            mask: synthetic_bits,
            cookie: 0,
            name: Some(changed_path),
        };

        (vec![event], healable)
    }

    /// Kernel dropped events; conservatively collapse to the first link and schedule
    /// reconnection.
    pub fn queue_overflow<K>(
        &mut self,
        kernel: &mut K,
        descriptors: &mut HashMap<K::Wd, Descriptor<K::Wd>>,
        pending_ignored: &mut usize,
    ) where
        K: Kernel<Wd = W>,
    {
        self.remove_from(1, kernel, descriptors, pending_ignored);
        self.completion = Completion::RebuildNeeded;
    }

    /// Whether this watch should be in the `Watcher`'s reconnection set.
    pub fn needs_reconnect(&self) -> bool {
        self.completion == Completion::RebuildNeeded
    }

    /// Replace or OR-merge the leaf mask and update `remember_curdir`; rebuild the
    /// leaf link if already watched.
    ///
    /// As with the kernel's own `add_watch`, `mask` containing `WatchMask::MASK_ADD`
    /// ORs it into the existing mask instead of replacing it outright - mirroring
    /// `_Watch.update_mask`'s `IN_MASK_ADD` check in the implementation this was
    /// distilled from, rather than a separate ad-hoc flag.
    pub fn update<K>(
        &mut self,
        kernel: &mut K,
        descriptors: &mut HashMap<K::Wd, Descriptor<K::Wd>>,
        pending_ignored: &mut usize,
        mask: WatchMask,
        remember_curdir: bool,
    ) -> io::Result<()>
    where
        K: Kernel<Wd = W>,
    {
        let replace = !mask.contains(WatchMask::MASK_ADD);
        let mask = mask - WatchMask::MASK_ADD;
        self.mask = if replace { mask } else { self.mask | mask };

        self.remember_curdir = remember_curdir;
        if !self.is_absolute {
            self.recorded_dir = if remember_curdir {
                Some(std::env::current_dir()?)
            } else {
                None
            };
        }

        if self.completion == Completion::FullyWatched {
            let leaf_idx = self.links.len() - 1;
            let dir = self.links[leaf_idx].dir.clone();
            let linkcount = self.links[leaf_idx].linkcount;
            self.remove_from(leaf_idx, kernel, descriptors, pending_ignored);
            self.add_leaf(kernel, descriptors, dir, linkcount)?;
        }

        Ok(())
    }

    /// Remove every link at index `from` and beyond, unregistering each from its
    /// descriptor and, if that empties the descriptor, asking the kernel to drop the
    /// watch and counting the pending `IGNORED` acknowledgement.
    fn remove_from<K>(
        &mut self,
        from: usize,
        kernel: &mut K,
        descriptors: &mut HashMap<K::Wd, Descriptor<K::Wd>>,
        pending_ignored: &mut usize,
    ) where
        K: Kernel<Wd = W>,
    {
        if from >= self.links.len() {
            return;
        }

        for link in self.links.drain(from..) {
            let Some(wd) = link.descriptor else { continue };
            let Some(descriptor) = descriptors.get_mut(&wd) else {
                continue;
            };
            let emptied = descriptor.unregister(&link.name, &self.path, link.idx);
            if emptied {
                if let Err(error) = kernel.remove_watch(&wd) {
                    log::warn!("failed to remove watch while unregistering: {error}");
                } else {
                    *pending_ignored += 1;
                }
            }
        }
    }

    pub fn detach_all<K>(
        &mut self,
        kernel: &mut K,
        descriptors: &mut HashMap<K::Wd, Descriptor<K::Wd>>,
        pending_ignored: &mut usize,
    ) where
        K: Kernel<Wd = W>,
    {
        self.remove_from(0, kernel, descriptors, pending_ignored);
    }
}


fn classify(mask: EventMask) -> SyntheticMask {
    let mut synthetic = SyntheticMask::empty();

    if mask.intersects(EventMask::MOVED_FROM | EventMask::MOVE_SELF) {
        synthetic |= SyntheticMask::PATH_MOVED_FROM;
    }
    if mask.contains(EventMask::MOVED_TO) {
        synthetic |= SyntheticMask::PATH_MOVED_TO;
    }
    if mask.intersects(EventMask::DELETE | EventMask::DELETE_SELF | EventMask::IGNORED) {
        synthetic |= SyntheticMask::PATH_DELETE;
    }
    if mask.contains(EventMask::CREATE) {
        synthetic |= SyntheticMask::PATH_CREATE;
    }
    if mask.contains(EventMask::UNMOUNT) {
        synthetic |= SyntheticMask::PATH_UNMOUNT;
    }

    synthetic
}
