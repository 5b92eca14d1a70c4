// kernel/mock.rs

//! A deterministic, in-memory [`Kernel`](super::Kernel), for tests that need to drive
//! the path-tracking engine through events that are awkward or impossible to provoke
//! reliably from a real filesystem (queue overflow, a contrived chain rebuild).
//!
//! Modelled on `log_collector::watcher::mock::Watcher` from the crate this project
//! started life as: a cheaply-cloneable handle wraps shared, interior-mutable state, so
//! a test can hold onto a [`Handle`] and push events into it while the
//! [`Kernel`](super::Kernel) under test drains them.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::{EventMask, Kernel, RawEvent, Wd, WatchMask};

/// An opaque watch identity handed out by [`Mock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockWd(u64);

impl Wd for MockWd {}

#[derive(Default)]
struct State {
    next_wd: u64,
    watches: Vec<(MockWd, PathBuf, WatchMask)>,
    pending: VecDeque<RawEvent<MockWd>>,
}

/// A handle for a test to drive a [`Mock`] kernel from outside.
///
/// Cloning shares the same underlying state as the [`Mock`] it was obtained from.
#[derive(Clone)]
pub struct Handle(Rc<RefCell<State>>);

impl Handle {
    /// Queue a raw event for the next [`Kernel::read_events`] call to return.
    pub fn push_event(&self, event: RawEvent<MockWd>) {
        self.0.borrow_mut().pending.push_back(event);
    }

    /// Queue an event naming the watch on `path`, as if the kernel had reported
    /// `mask`/`cookie`/`name` against it.
    ///
    /// Panics (as a test-authoring error) if `path` has no live watch.
    pub fn simulate(&self, path: &Path, mask: EventMask, cookie: u32, name: Option<&str>) {
        let wd = self
            .watch_on(path)
            .unwrap_or_else(|| panic!("no watch registered for {}", path.display()));
        self.push_event(RawEvent {
            wd: Some(wd),
            mask,
            cookie,
            name: name.map(OsString::from),
        });
    }

    /// Queue a queue-overflow event, with no associated watch.
    pub fn simulate_overflow(&self) {
        self.push_event(RawEvent {
            wd: None,
            mask: EventMask::Q_OVERFLOW,
            cookie: 0,
            name: None,
        });
    }

    /// The watch descriptor currently registered against `path`, if any.
    pub fn watch_on(&self, path: &Path) -> Option<MockWd> {
        self.0
            .borrow()
            .watches
            .iter()
            .rev()
            .find(|(_, watched, _)| watched == path)
            .map(|(wd, _, _)| *wd)
    }
}

/// An in-memory [`Kernel`](super::Kernel) for tests.
pub struct Mock(Rc<RefCell<State>>);

impl Mock {
    /// A [`Handle`] for driving this kernel's event queue from a test.
    #[must_use]
    pub fn handle(&self) -> Handle {
        Handle(Rc::clone(&self.0))
    }
}

impl Kernel for Mock {
    type Wd = MockWd;

    fn init() -> io::Result<Self> {
        Ok(Mock(Rc::new(RefCell::new(State::default()))))
    }

    fn add_watch(&mut self, path: &Path, mask: WatchMask) -> io::Result<Self::Wd> {
        let mut state = self.0.borrow_mut();

        if let Some((wd, _, existing_mask)) = state
            .watches
            .iter_mut()
            .find(|(_, watched, _)| watched == path)
        {
            let wd = *wd;
            if mask.contains(WatchMask::MASK_ADD) {
                *existing_mask |= mask - WatchMask::MASK_ADD;
            } else {
                *existing_mask = mask;
            }
            return Ok(wd);
        }

        let wd = MockWd(state.next_wd);
        state.next_wd += 1;
        state.watches.push((wd, path.to_path_buf(), mask));
        Ok(wd)
    }

    fn remove_watch(&mut self, wd: &Self::Wd) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        let before = state.watches.len();
        state.watches.retain(|(watched, _, _)| watched != wd);
        if state.watches.len() == before {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no such watch"));
        }
        state.pending.push_back(RawEvent {
            wd: Some(*wd),
            mask: EventMask::IGNORED,
            cookie: 0,
            name: None,
        });
        Ok(())
    }

    fn read_events(&mut self, block: bool) -> io::Result<Vec<RawEvent<Self::Wd>>> {
        let mut state = self.0.borrow_mut();
        if state.pending.is_empty() && block {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "mock kernel has no events queued and cannot actually block",
            ));
        }
        Ok(state.pending.drain(..).collect())
    }

    fn raw_fd(&self) -> RawFd {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_watch_assigns_increasing_ids() {
        let mut kernel = Mock::init().unwrap();
        let a = kernel.add_watch(Path::new("/a"), WatchMask::CREATE).unwrap();
        let b = kernel.add_watch(Path::new("/b"), WatchMask::CREATE).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn add_watch_on_same_path_reuses_descriptor() {
        let mut kernel = Mock::init().unwrap();
        let a = kernel.add_watch(Path::new("/a"), WatchMask::CREATE).unwrap();
        let a2 = kernel
            .add_watch(Path::new("/a"), WatchMask::CREATE | WatchMask::DELETE)
            .unwrap();
        assert_eq!(a, a2);
    }

    #[test]
    fn simulated_events_round_trip() {
        let mut kernel = Mock::init().unwrap();
        let handle = kernel.handle();
        kernel.add_watch(Path::new("/a"), WatchMask::CREATE).unwrap();

        handle.simulate(Path::new("/a"), EventMask::CREATE, 0, Some("child"));
        let events = kernel.read_events(false).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name.as_deref(), Some(OsString::from("child").as_os_str()));
    }

    #[test]
    fn overflow_event_has_no_watch() {
        let mut kernel = Mock::init().unwrap();
        let handle = kernel.handle();
        handle.simulate_overflow();

        let events = kernel.read_events(false).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].wd.is_none());
        assert!(events[0].mask.contains(EventMask::Q_OVERFLOW));
    }
}
