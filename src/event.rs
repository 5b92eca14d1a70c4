// event.rs

//! Events reported to callers of [`crate::Watcher`], real and synthetic.

use std::path::PathBuf;

use bitflags::bitflags;

pub use crate::kernel::EventMask;

bitflags! {
    /// Flags describing a change in the *meaning* of a watched path, as opposed to a
    /// change reported directly by the kernel about a file's contents.
    ///
    /// These occupy bit positions strictly above [`EventMask`]'s highest flag (`ISDIR`,
    /// bit 30), so a [`Event::mask`] can carry bits from either vocabulary without
    /// collision.
    pub struct SyntheticMask: u64 {
        /// The component that gave this path its meaning was moved away.
        const PATH_MOVED_FROM = 1 << 31;

        /// A new component arrived that may complete this path's resolution.
        const PATH_MOVED_TO = 1 << 32;

        /// A component that may complete this path's resolution was created.
        const PATH_CREATE = 1 << 33;

        /// A component this path depended on was deleted.
        const PATH_DELETE = 1 << 34;

        /// The filesystem backing a component was unmounted.
        const PATH_UNMOUNT = 1 << 35;

        /// The union of every other `PATH_*` flag: "this path's meaning changed".
        const PATH_CHANGED = Self::PATH_MOVED_FROM.bits
            | Self::PATH_MOVED_TO.bits
            | Self::PATH_CREATE.bits
            | Self::PATH_DELETE.bits
            | Self::PATH_UNMOUNT.bits;
    }
}

/// A single event reported by [`crate::Watcher::read`].
///
/// `mask` carries either real [`EventMask`] bits (a direct hit on the watched leaf) or
/// [`SyntheticMask`] bits, possibly with `EventMask::ISDIR` folded in - use
/// [`Event::kernel_mask`]/[`Event::synthetic_mask`] to pull them back apart.
#[derive(Debug, Clone)]
pub struct Event {
    /// The user-requested path this event concerns.
    pub path: PathBuf,

    /// The combined kernel/synthetic flags for this event.
    pub mask: u64,

    /// The rename cookie linking a `MOVED_FROM`/`MOVED_TO` pair, or 0 for events with
    /// no such pairing (including every synthetic event).
    pub cookie: u32,

    /// For a synthetic event, the full path of the component whose meaning changed.
    /// For a direct leaf hit, the child name the kernel reported, if any.
    pub name: Option<PathBuf>,
}

impl Event {
    pub(crate) fn kernel(path: PathBuf, mask: EventMask, cookie: u32, name: Option<PathBuf>) -> Self {
        Event {
            path,
            mask: u64::from(mask.bits()),
            cookie,
            name,
        }
    }

    pub(crate) fn synthetic(path: PathBuf, mask: SyntheticMask, name: PathBuf) -> Self {
        Event {
            path,
            mask: mask.bits(),
            cookie: 0,
            name: Some(name),
        }
    }

    /// The real kernel flags set on this event, if any.
    #[must_use]
    pub fn kernel_mask(&self) -> EventMask {
        EventMask::from_bits_truncate(self.mask as u32)
    }

    /// The synthetic `PATH_*` flags set on this event, if any.
    #[must_use]
    pub fn synthetic_mask(&self) -> SyntheticMask {
        SyntheticMask::from_bits_truncate(self.mask)
    }

    /// Whether this event carries any `PATH_*` flag.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        !self.synthetic_mask().is_empty()
    }
}
