// kernel/linux.rs

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};

use super::{Kernel, RawEvent, Wd};

const BUFFER_SIZE: usize = 4096;

impl Wd for WatchDescriptor {}

/// A [`Kernel`] backed by the real Linux inotify facility, via the `inotify` crate.
pub struct Linux {
    inner: Inotify,
    buffer: [u8; BUFFER_SIZE],
}

impl Kernel for Linux {
    type Wd = WatchDescriptor;

    fn init() -> io::Result<Self> {
        Ok(Linux {
            inner: Inotify::init()?,
            buffer: [0; BUFFER_SIZE],
        })
    }

    fn add_watch(&mut self, path: &Path, mask: WatchMask) -> io::Result<Self::Wd> {
        self.inner.add_watch(path, mask)
    }

    fn remove_watch(&mut self, wd: &Self::Wd) -> io::Result<()> {
        self.inner.rm_watch(wd.clone())
    }

    fn read_events(&mut self, block: bool) -> io::Result<Vec<RawEvent<Self::Wd>>> {
        let events = if block {
            self.inner.read_events_blocking(&mut self.buffer)?
        } else {
            self.inner.read_events(&mut self.buffer)?
        };

        Ok(events
            .map(|event| RawEvent {
                wd: if event.mask.contains(EventMask::Q_OVERFLOW) {
                    None
                } else {
                    Some(event.wd)
                },
                mask: event.mask,
                cookie: event.cookie,
                name: event.name.map(ToOwned::to_owned),
            })
            .collect())
    }

    fn raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
