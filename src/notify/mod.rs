use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use rustix::io::Errno;
use rustix::net::{AddressFamily, SendFlags, SocketAddrUnix, SocketFlags, SocketType};

/// CLD_EXITED / CLD_KILLED: POSIX `si_code` values for `SIGCHLD`, stable
/// across platforms (unlike the numeric value of `SIGCHLD` itself).
const CLD_EXITED: i32 = 1;
const CLD_KILLED: i32 = 2;

/// The BSD `SIGCHLD` number. Process tracking in this crate is BSD-only
/// (see `watcher`), so there is no Linux variant to pick between.
const SIGCHLD: i32 = 20;

/// Fixed-size record broadcast to every Event Subscriber on process exit:
/// `si_pid`, `si_signo`, `si_code`, `si_status`, each a 32-bit field in
/// native byte order.
#[derive(Debug, Clone, Copy)]
pub struct ExitRecord {
    pub pid: u32,
    pub normal_exit: bool,
    /// exit status if `normal_exit`, terminating signal number otherwise
    pub status: i32,
}

impl ExitRecord {
    pub const WIRE_SIZE: usize = 16;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let si_signo = SIGCHLD;
        let si_code = if self.normal_exit { CLD_EXITED } else { CLD_KILLED };
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..4].copy_from_slice(&(self.pid as i32).to_ne_bytes());
        buf[4..8].copy_from_slice(&si_signo.to_ne_bytes());
        buf[8..12].copy_from_slice(&si_code.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.status.to_ne_bytes());
        buf
    }
}

/// A connected client of the notify socket.
pub struct Subscriber {
    fd: OwnedFd,
}

impl Subscriber {
    /// Sends one exit record. `Ok(false)` means the peer is gone and the
    /// subscriber should be dropped; any other error is logged by the
    /// caller and the subscriber kept.
    pub fn send(&self, record: ExitRecord) -> io::Result<bool> {
        let bytes = record.to_bytes();
        match rustix::net::send(&self.fd, &bytes, SendFlags::NOSIGNAL) {
            Ok(_) => Ok(true),
            Err(Errno::PIPE | Errno::CONNRESET | Errno::NOTCONN) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Passive `SOCK_SEQPACKET` `AF_UNIX` socket accepting Event Subscribers.
/// Bound once at `Manager` startup; removed and rebound if a stale
/// socket file is left over from a previous run.
pub struct NotifyServer {
    listener: OwnedFd,
}

impl NotifyServer {
    pub fn bind(path: &str) -> io::Result<Self> {
        let _ = std::fs::remove_file(path);
        let listener = rustix::net::socket_with(
            AddressFamily::UNIX,
            SocketType::SEQPACKET,
            SocketFlags::NONBLOCK | SocketFlags::CLOEXEC,
            None,
        )?;
        let addr = SocketAddrUnix::new(path)?;
        rustix::net::bind_unix(&listener, &addr)?;
        rustix::net::listen(&listener, 16)?;
        Ok(NotifyServer { listener })
    }

    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }

    /// Accepts one pending connection; called when the watcher observes
    /// the listening descriptor become readable.
    pub fn accept(&self) -> io::Result<Subscriber> {
        let fd = rustix::net::accept(&self.listener)?;
        Ok(Subscriber { fd })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_record_encodes_fields() {
        let record = ExitRecord {
            pid: 4321,
            normal_exit: false,
            status: 9,
        };
        let bytes = record.to_bytes();
        assert_eq!(i32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 4321);
        assert_eq!(i32::from_ne_bytes(bytes[4..8].try_into().unwrap()), SIGCHLD);
        assert_eq!(i32::from_ne_bytes(bytes[8..12].try_into().unwrap()), CLD_KILLED);
        assert_eq!(i32::from_ne_bytes(bytes[12..16].try_into().unwrap()), 9);
    }
}
