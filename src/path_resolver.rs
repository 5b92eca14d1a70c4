// path_resolver.rs

//! A symlink-resolving path walker.
//!
//! [`PathResolver`] yields the sequence of `(directory, remaining)` pairs visited while
//! resolving a path component-by-component and symlink-by-symlink, so that a caller can
//! place a watch at every location the final target depends on. It is deliberately an
//! `Iterator` rather than a one-shot function: a [`crate::path_watch::PathWatch`] that
//! only got partway through a rebuild before the filesystem changed again resumes by
//! constructing a fresh resolver from its last surviving `(dir, remaining, linkcount)`
//! rather than starting over.
//!
//! Every component is yielded *before* it is classified - including one a symlink
//! itself, so a caller watches the symlink's own name for changes before following it
//! - matching the walk described by the design this crate generalizes from.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, PathBuf};
use std::sync::OnceLock;

/// A resolution-time failure.
///
/// `ConcurrentModification` is deliberately distinct from the other variants: it means
/// the filesystem changed shape while we were looking at it, not that the requested
/// path is actually unreachable, so callers must never report it to a user.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ResolveError {
    #[error("no such file or directory: {0}")]
    PathMissing(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("too many levels of symbolic links: {0}")]
    SymlinkLoop(PathBuf),

    #[error("concurrent filesystem modification")]
    ConcurrentModification,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One step of a resolution: an already-resolved, symlink-free directory, and the
/// suffix of the original path still to be traversed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Step {
    pub dir: PathBuf,
    pub remaining: VecDeque<OsString>,
    pub linkcount: usize,
}

/// A resumable, loop-detecting path walker.
///
/// Construct with [`PathResolver::new`], supplying the starting directory, the
/// components still to resolve, and the symlink count carried over from any prior
/// partial resolution. Drive it as an `Iterator`.
///
/// The walk is computed eagerly at construction time into an ordered buffer of steps,
/// stopping at the first error - there is no externally-observable difference between
/// this and a true lazy generator (every caller drains the iterator fully in one go),
/// and computing it up front keeps the symlink-following recursion a plain function
/// rather than a hand-rolled coroutine.
pub(crate) struct PathResolver {
    steps: VecDeque<Result<Step, ResolveError>>,
}

impl PathResolver {
    pub fn new(dir: PathBuf, remaining: VecDeque<OsString>, linkcount: usize) -> Self {
        let mut steps = Vec::new();
        let mut active = HashSet::new();
        let mut cache = HashMap::new();
        walk(dir, remaining, linkcount, symlinkmax(), &mut active, &mut cache, &mut steps);

        PathResolver {
            steps: steps.into(),
        }
    }
}

impl Iterator for PathResolver {
    type Item = Result<Step, ResolveError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.steps.pop_front()
    }
}

/// Walk `dir`/`remaining` to completion, appending every visited `(dir, remaining)`
/// pair to `steps` in order, stopping (with a trailing `Err`) at the first fault.
///
/// `active` holds the symlinks currently being expanded *in this call* - reused across
/// the recursive calls this function makes so a genuine cycle is detected the moment
/// it reappears, however deep the chain that led back to it. `cache` remembers the
/// directory a symlink ultimately resolved to, so a path that traverses the same
/// symlink twice in one walk doesn't repeat the work.
fn walk(
    mut dir: PathBuf,
    mut remaining: VecDeque<OsString>,
    mut linkcount: usize,
    symlinkmax: usize,
    active: &mut HashSet<PathBuf>,
    cache: &mut HashMap<PathBuf, PathBuf>,
    steps: &mut Vec<Result<Step, ResolveError>>,
) {
    loop {
        steps.push(Ok(Step {
            dir: dir.clone(),
            remaining: remaining.clone(),
            linkcount,
        }));

        let Some(first) = remaining.front().cloned() else {
            return;
        };

        if first == ".." {
            dir.pop();
            remaining.pop_front();
            continue;
        }

        if first.to_str() == Some("/") {
            dir = PathBuf::from("/");
            remaining.pop_front();
            continue;
        }

        let candidate = dir.join(&first);
        let target = match fs::read_link(&candidate) {
            Ok(target) => target,
            Err(error) => {
                match error.raw_os_error() {
                    Some(libc::EINVAL) => {
                        dir = candidate;
                        remaining.pop_front();
                        continue;
                    }
                    Some(libc::ENOENT) => steps.push(Err(ResolveError::PathMissing(candidate))),
                    Some(libc::ENOTDIR) => {
                        steps.push(Err(if dir.is_dir() {
                            ResolveError::ConcurrentModification
                        } else {
                            ResolveError::NotADirectory(dir.clone())
                        }));
                    }
                    Some(libc::ELOOP) => steps.push(Err(ResolveError::ConcurrentModification)),
                    _ => steps.push(Err(error.into())),
                }
                return;
            }
        };

        remaining.pop_front();

        if active.contains(&candidate) {
            steps.push(Err(ResolveError::SymlinkLoop(candidate)));
            return;
        }

        if let Some(cached_dir) = cache.get(&candidate) {
            dir = cached_dir.clone();
            continue;
        }

        linkcount += 1;
        if linkcount > symlinkmax {
            steps.push(Err(ResolveError::SymlinkLoop(candidate)));
            return;
        }

        let rest = remaining.clone();
        let target_is_absolute = target.is_absolute();
        let mut sub_remaining: VecDeque<OsString> = if target_is_absolute {
            target
                .components()
                .filter(|c| !matches!(c, Component::RootDir))
                .map(|c| c.as_os_str().to_os_string())
                .collect()
        } else {
            target.iter().map(OsString::from).collect()
        };
        sub_remaining.extend(rest.iter().cloned());
        let sub_dir = if target_is_absolute { PathBuf::from("/") } else { dir.clone() };

        active.insert(candidate.clone());
        let steps_before = steps.len();
        walk(sub_dir, sub_remaining, linkcount, symlinkmax, active, cache, steps);
        active.remove(&candidate);

        if matches!(steps.last(), Some(Err(_))) {
            return;
        }

        if let Some(resolved_dir) = steps[steps_before..]
            .iter()
            .find_map(|step| step.as_ref().ok().filter(|step| step.remaining == rest).map(|step| step.dir.clone()))
        {
            cache.insert(candidate, resolved_dir);
        }

        return;
    }
}

/// The largest number of symlinks the kernel will follow while resolving one path,
/// probed once per process by following a chain of temporary symlinks until `ELOOP`.
///
/// Ported from `get_symlinkmax` in the Python implementation this crate's design was
/// distilled from.
fn symlinkmax() -> usize {
    static SYMLINKMAX: OnceLock<usize> = OnceLock::new();
    *SYMLINKMAX.get_or_init(probe_symlinkmax)
}

fn probe_symlinkmax() -> usize {
    const PROBE_CAP: usize = 256;

    let dir = match tempdir_for_probe() {
        Some(dir) => dir,
        None => return 40,
    };

    let target = dir.join("target");
    if fs::write(&target, b"").is_err() {
        return 40;
    }

    let mut previous = target;
    for count in 1..=PROBE_CAP {
        let link = dir.join(format!("link{count}"));
        if std::os::unix::fs::symlink(&previous, &link).is_err() {
            return count.saturating_sub(1).max(1);
        }
        if let Err(error) = fs::metadata(&link) {
            if error.raw_os_error() == Some(libc::ELOOP) {
                return count;
            }
            return count.saturating_sub(1).max(1);
        }
        previous = link;
    }

    PROBE_CAP
}

fn tempdir_for_probe() -> Option<PathBuf> {
    let mut dir = std::env::temp_dir();
    dir.push(format!("pathwatch-symlinkmax-{}", std::process::id()));
    fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(path: &str) -> VecDeque<OsString> {
        path.split('/')
            .filter(|c| !c.is_empty())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn resolves_a_plain_relative_path_without_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/leaf"), b"").unwrap();

        let resolver = PathResolver::new(tmp.path().to_path_buf(), components("sub/leaf"), 0);
        let steps: Vec<_> = resolver.collect::<Result<Vec<_>, _>>().unwrap();

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].remaining, components("sub/leaf"));
        assert_eq!(steps.last().unwrap().remaining, VecDeque::new());
    }

    #[test]
    fn follows_a_single_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("real"), b"").unwrap();
        std::os::unix::fs::symlink("real", tmp.path().join("link")).unwrap();

        let resolver = PathResolver::new(tmp.path().to_path_buf(), components("link"), 0);
        let steps: Vec<_> = resolver.collect::<Result<Vec<_>, _>>().unwrap();

        assert_eq!(steps.last().unwrap().dir, tmp.path().join("real"));
    }

    #[test]
    fn yields_a_step_for_the_symlink_itself_before_following_it() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("real"), b"").unwrap();
        std::os::unix::fs::symlink("real", tmp.path().join("link")).unwrap();

        let resolver = PathResolver::new(tmp.path().to_path_buf(), components("link"), 0);
        let steps: Vec<_> = resolver.collect::<Result<Vec<_>, _>>().unwrap();

        // one step naming "link" itself (so a watcher notices it being renamed or
        // replaced), one naming "real" (what it points at), and a final step with
        // nothing left to resolve - three distinct filesystem locations this path
        // depends on.
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].dir, tmp.path());
        assert_eq!(steps[0].remaining, components("link"));
        assert_eq!(steps[1].dir, tmp.path());
        assert_eq!(steps[1].remaining, components("real"));
        assert_eq!(steps[2].dir, tmp.path().join("real"));
        assert_eq!(steps[2].remaining, VecDeque::new());
    }

    #[test]
    fn yields_one_step_per_link_in_a_chain() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("testfile"), b"").unwrap();
        std::os::unix::fs::symlink("testfile", tmp.path().join("link3")).unwrap();
        std::os::unix::fs::symlink("link3", tmp.path().join("link2")).unwrap();
        std::os::unix::fs::symlink("link2", tmp.path().join("link1")).unwrap();

        let resolver = PathResolver::new(tmp.path().to_path_buf(), components("link1"), 0);
        let steps: Vec<_> = resolver.collect::<Result<Vec<_>, _>>().unwrap();

        // link1, link2, link3, testfile: four distinct names resolved within the same
        // directory, plus the final (dir, empty) step once "testfile" is reached.
        assert_eq!(steps.len(), 5);
        let names: Vec<_> = steps
            .iter()
            .filter_map(|step| step.remaining.front().cloned())
            .collect();
        assert_eq!(names, vec!["link1", "link2", "link3", "testfile"]);
        assert_eq!(steps.last().unwrap().remaining, VecDeque::new());
        assert_eq!(steps.last().unwrap().dir, tmp.path().join("testfile"));
    }

    #[test]
    fn detects_a_symlink_loop() {
        let tmp = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(tmp.path().join("b"), tmp.path().join("a")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("a"), tmp.path().join("b")).unwrap();

        let resolver = PathResolver::new(tmp.path().to_path_buf(), components("a"), 0);
        let result: Result<Vec<_>, _> = resolver.collect();

        assert!(matches!(result, Err(ResolveError::SymlinkLoop(_))));
    }

    #[test]
    fn reports_missing_component_as_path_missing() {
        let tmp = tempfile::tempdir().unwrap();

        let resolver = PathResolver::new(tmp.path().to_path_buf(), components("nonexistent"), 0);
        let result: Result<Vec<_>, _> = resolver.collect();

        assert!(matches!(result, Err(ResolveError::PathMissing(_))));
    }

    #[test]
    fn resumes_from_an_arbitrary_midpoint() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("a/b"), b"").unwrap();

        let resolver = PathResolver::new(tmp.path().join("a"), components("b"), 3);
        let steps: Vec<_> = resolver.collect::<Result<Vec<_>, _>>().unwrap();

        assert_eq!(steps.last().unwrap().dir, tmp.path().join("a/b"));
        assert_eq!(steps.last().unwrap().linkcount, 3);
    }
}
