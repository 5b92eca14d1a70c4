// error.rs

use std::io;
use std::path::PathBuf;

/// Errors that can be surfaced to a caller of this crate.
///
/// Only genuine, non-transient failures reach here. Faults encountered while walking a
/// path - a missing parent, a symlink loop, a directory replaced mid-walk - never
/// propagate as an `Err`; they instead leave the affected watch in an `Unwatchable`
/// state and (once a triggering kernel event arrives) are reported as a synthetic
/// path-changed event. See `PathWatch::reconnect`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A component of the requested path does not exist.
    #[error("no such file or directory: {0}")]
    PathMissing(PathBuf),

    /// A non-final component of the requested path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Resolving the requested path would require following more symlinks than the
    /// kernel permits.
    #[error("too many levels of symbolic links: {0}")]
    SymlinkLoop(PathBuf),

    /// An operation that requires at least one registered watch was attempted with
    /// none registered.
    #[error("no watches are currently registered")]
    NoWatches,

    /// The underlying kernel facility reported a failure unrelated to path resolution
    /// (for example `EMFILE` from `add_watch`, or a failure reading from the
    /// notification file descriptor).
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A specialised [`Result`](std::result::Result) for this crate's public API.
pub type Result<T> = std::result::Result<T, Error>;
