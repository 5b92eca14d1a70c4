// kernel/mod.rs

//! The thin seam between this crate's path-tracking engine and the raw notification
//! facility it rides on.
//!
//! Everything above this module works in terms of the [`Kernel`] trait rather than any
//! particular backend, so that tests can substitute [`mock::Kernel`] for the real
//! inotify-backed [`linux::Linux`].

use std::ffi::OsString;
use std::fmt::Debug;
use std::hash::Hash;
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;

pub use inotify::{EventMask, WatchMask};

mod linux;
pub use linux::Linux;

#[cfg(test)]
pub mod mock;

/// A watch descriptor identity.
///
/// Implemented by whatever opaque watch handle a [`Kernel`] backend hands out - real
/// inotify watch descriptors compare and hash by kernel identity already, so this is a
/// marker rather than a behavioural trait.
pub trait Wd: Clone + Debug + Eq + Hash {}

/// A single raw event as read from the kernel, translated into this crate's vocabulary.
///
/// `wd` is `None` for events that are not associated with any particular watch (the
/// kernel reports these with the queue-overflow bit set on `mask`).
#[derive(Debug, Clone)]
pub struct RawEvent<W> {
    /// The watch this event concerns, or `None` for a global (queue overflow) event.
    pub wd: Option<W>,

    /// The flags the kernel reported.
    pub mask: EventMask,

    /// The rename cookie linking a `MOVED_FROM`/`MOVED_TO` pair.
    pub cookie: u32,

    /// The child name the event concerns, if any.
    pub name: Option<OsString>,
}

/// A backend capable of placing watches on filesystem paths and reporting change events.
pub trait Kernel: Sized {
    /// The opaque watch identity this backend hands out.
    type Wd: Wd;

    /// Open a new kernel handle.
    fn init() -> io::Result<Self>;

    /// Watch `path`, or update the existing watch on it, with `mask`.
    fn add_watch(&mut self, path: &Path, mask: WatchMask) -> io::Result<Self::Wd>;

    /// Stop watching the given watch descriptor.
    fn remove_watch(&mut self, wd: &Self::Wd) -> io::Result<()>;

    /// Drain the events currently queued by the kernel.
    ///
    /// Blocks until at least one event is available when `block` is `true`; otherwise
    /// returns immediately with whatever is already queued (possibly nothing).
    fn read_events(&mut self, block: bool) -> io::Result<Vec<RawEvent<Self::Wd>>>;

    /// A file descriptor suitable for multiplexing with `poll`/`select`/`mio`.
    fn raw_fd(&self) -> RawFd;
}
