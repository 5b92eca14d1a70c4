// lib.rs

//! A path-oriented filesystem change notifier built on Linux inotify.
//!
//! Native inotify is *inode*-oriented: a watch is attached to whatever the kernel
//! resolves a path to at the moment of the call, and nothing is reported if a symlink
//! or intermediate directory is later renamed, replaced, or deleted out from under it -
//! the watch silently keeps pointing at something that is no longer what the caller
//! meant. This crate tracks the full resolution chain for every watched path - one
//! auxiliary watch per directory component and per traversed symlink - so that a
//! change in a path's *meaning* produces a synthetic [`SyntheticMask`] event and the
//! chain is automatically rebuilt against the new resolution.
//!
//! [`Watcher`] is the entry point:
//!
//! ```no_run
//! use pathwatch::{Watcher, WatchMask};
//!
//! let mut watcher = Watcher::open()?;
//! watcher.add("/etc/resolv.conf", WatchMask::MODIFY | WatchMask::CLOSE_WRITE, false)?;
//! for event in watcher.read(true)? {
//!     println!("{event:?}");
//! }
//! # Ok::<(), pathwatch::Error>(())
//! ```

#![warn(
    explicit_outlives_requirements,
    macro_use_extern_crate,
    meta_variable_misuse,
    missing_crate_level_docs,
    missing_docs,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_lifetimes,
    variant_size_differences
)]

mod descriptor;
mod error;
mod event;
mod kernel;
mod link;
mod path_resolver;
mod path_watch;
mod watcher;

pub use error::{Error, Result};
pub use event::{Event, EventMask, SyntheticMask};
pub use kernel::{Kernel, Linux, WatchMask};
pub use watcher::Watcher;

#[cfg(test)]
mod test;
