use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use rustix::event::kqueue::{self, Event, EventFilter, EventFlags, ProcessEventFlags, UserFlags};
use rustix::io::Errno;

/// Identifies the `EVFILT_USER` event used purely to unblock a blocking
/// `kevent()` wait from another thread (the Rust version of the "write a
/// byte to a pipe" workaround the original source left as a TODO).
const WAKE_IDENT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcNote {
    /// a tracked process forked; `child` is the new pid, `parent` the
    /// pid that was being tracked (delivered as `kev.data` in the
    /// original C source)
    Fork { parent: u32, child: u32 },
    Exit { pid: u32, status: i32 },
    TrackErr { pid: u32 },
    Exec { pid: u32 },
}

pub enum WatchEvent {
    Proc(ProcNote),
    /// the notify socket's listening descriptor is readable
    ListenerReadable,
    /// woken for shutdown / no actual kernel event to process
    Wake,
}

/// Thin wrapper around one `kqueue(2)` descriptor, isolating every raw
/// `rustix::event::kqueue` binding behind a small interface so the rest
/// of the watcher never touches a raw event directly.
pub(crate) struct Kqueue {
    fd: OwnedFd,
}

impl Kqueue {
    pub fn new() -> io::Result<Self> {
        let fd = kqueue::kqueue()?;
        let kq = Kqueue { fd };
        kq.submit(&Event::new(
            EventFilter::User {
                ident: WAKE_IDENT,
                flags: UserFlags::empty(),
            },
            EventFlags::ADD | EventFlags::CLEAR,
            0,
        ))?;
        Ok(kq)
    }

    pub fn watch_process(&self, pid: u32) -> io::Result<()> {
        self.submit(&Event::new(
            EventFilter::Proc {
                pid: rustix::process::Pid::from_raw(pid as i32).ok_or(Errno::SRCH)?,
                flags: ProcessEventFlags::EXIT | ProcessEventFlags::TRACK,
            },
            EventFlags::ADD,
            0,
        ))
    }

    pub fn unwatch_process(&self, pid: u32) -> io::Result<()> {
        let Some(pid) = rustix::process::Pid::from_raw(pid as i32) else {
            return Ok(());
        };
        self.submit(&Event::new(
            EventFilter::Proc {
                pid,
                flags: ProcessEventFlags::empty(),
            },
            EventFlags::DELETE,
            0,
        ))
    }

    pub fn watch_listener(&self, fd: BorrowedFd<'_>) -> io::Result<()> {
        self.submit(&Event::new(
            EventFilter::Read(fd.as_raw_fd()),
            EventFlags::ADD | EventFlags::CLEAR,
            0,
        ))
    }

    /// Unblocks one in-progress or future `wait()` call.
    pub fn wake(&self) -> io::Result<()> {
        self.submit(&Event::new(
            EventFilter::User {
                ident: WAKE_IDENT,
                flags: UserFlags::TRIGGER,
            },
            EventFlags::empty(),
            0,
        ))
    }

    fn submit(&self, change: &Event) -> io::Result<()> {
        let mut out = Vec::new();
        unsafe {
            kqueue::kevent(&self.fd, std::slice::from_ref(change), &mut out, None)?;
        }
        Ok(())
    }

    /// Blocks until at least one event is available. A signal interrupting
    /// the wait is not itself an event, so `EINTR` simply loops back in.
    pub fn wait(&self) -> io::Result<Vec<WatchEvent>> {
        let mut out = Vec::with_capacity(8);
        loop {
            match unsafe { kqueue::kevent(&self.fd, &[], &mut out, None) } {
                Ok(_) => break,
                Err(Errno::INTR) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(out.into_iter().filter_map(translate).collect())
    }
}

impl AsFd for Kqueue {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

fn translate(event: Event) -> Option<WatchEvent> {
    match event.filter() {
        EventFilter::Proc { pid, flags } => {
            let pid = pid.as_raw_nonzero().get() as u32;
            if flags.contains(ProcessEventFlags::EXIT) {
                Some(WatchEvent::Proc(ProcNote::Exit {
                    pid,
                    status: event.data() as i32,
                }))
            } else if flags.contains(ProcessEventFlags::CHILD) {
                Some(WatchEvent::Proc(ProcNote::Fork {
                    parent: event.data() as u32,
                    child: pid,
                }))
            } else if flags.contains(ProcessEventFlags::TRACKERR) {
                Some(WatchEvent::Proc(ProcNote::TrackErr { pid }))
            } else if flags.contains(ProcessEventFlags::EXEC) {
                Some(WatchEvent::Proc(ProcNote::Exec { pid }))
            } else {
                None
            }
        }
        EventFilter::Read(_) => Some(WatchEvent::ListenerReadable),
        EventFilter::User { .. } => Some(WatchEvent::Wake),
        _ => None,
    }
}
