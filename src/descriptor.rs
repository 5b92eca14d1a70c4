// descriptor.rs

//! One live kernel watch descriptor, multiplexed across every `PathWatch` whose
//! resolution happens to pass through the same inode.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::kernel::WatchMask;

/// A non-owning pointer at a [`crate::link::Link`]: the path key of the owning
/// `PathWatch` in the `Watcher`'s table, and that link's index within it.
///
/// This is the Rust rendition of "Descriptors hold weak non-owning references to their
/// Links" - rather than a shared pointer, a `Descriptor` only remembers where to find
/// the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkRef {
    pub path: PathBuf,
    pub idx: usize,
}

/// One per live kernel watch descriptor.
pub(crate) struct Descriptor<W> {
    pub wd: W,

    /// Links registered under this descriptor, keyed by the child name they care
    /// about (`None` for links that watch the descriptor's own inode, i.e.
    /// parent-traversal and leaf links).
    links: HashMap<Option<OsString>, Vec<LinkRef>>,

    /// The union of every registered link's mask.
    pub mask: WatchMask,

    /// Flips to `false` once the kernel's `IGNORED` acknowledgement has been seen.
    pub active: bool,
}

impl<W> Descriptor<W> {
    pub fn new(wd: W) -> Self {
        Descriptor {
            wd,
            links: HashMap::new(),
            mask: WatchMask::empty(),
            active: true,
        }
    }

    pub fn register(&mut self, name: Option<OsString>, link_ref: LinkRef, mask: WatchMask) {
        self.links.entry(name).or_default().push(link_ref);
        self.mask |= mask;
    }

    /// Remove the link at `path`/`idx`, returning `true` if the descriptor now has no
    /// registered links and should be scheduled for removal.
    pub fn unregister(&mut self, name: &Option<OsString>, path: &PathBuf, idx: usize) -> bool {
        if let Some(refs) = self.links.get_mut(name) {
            refs.retain(|link_ref| !(link_ref.path == *path && link_ref.idx == idx));
            if refs.is_empty() {
                self.links.remove(name);
            }
        }
        self.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// A snapshot of the links registered under `name`, plus those registered under
    /// the wildcard (no-name) key.
    ///
    /// A snapshot, not a live borrow, because dispatching to these links may mutate
    /// this very map (a handler can remove links from this descriptor while we are
    /// still iterating the set that triggered it).
    pub fn matching(&self, name: &Option<OsString>) -> Vec<LinkRef> {
        let mut matches = Vec::new();
        if let Some(refs) = self.links.get(name) {
            matches.extend(refs.iter().cloned());
        }
        if name.is_some() {
            if let Some(refs) = self.links.get(&None) {
                matches.extend(refs.iter().cloned());
            }
        }
        matches
    }
}
