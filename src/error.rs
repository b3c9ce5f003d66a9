use std::fmt;

/// Errors surfaced by every Manager operation, shaped after the POSIX
/// errno a Filesystem Host is expected to translate them back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    NotFound,
    AlreadyExists,
    NotDirectory,
    NotSupported,
    PermissionDenied,
    InvalidArgument,
    NoSuchProcess,
    OutOfMemory,
    NoDevice,
}

impl Error {
    /// Bare integer errno, for hosts (like fuser) that want a raw `i32`
    /// rather than a `rustix` error type.
    pub fn errno_raw(self) -> i32 {
        match self {
            Error::NotFound => libc_like::ENOENT,
            Error::AlreadyExists => libc_like::EEXIST,
            Error::NotDirectory => libc_like::ENOTDIR,
            Error::NotSupported => libc_like::EOPNOTSUPP,
            Error::PermissionDenied => libc_like::EPERM,
            Error::InvalidArgument => libc_like::EINVAL,
            Error::NoSuchProcess => libc_like::ESRCH,
            Error::OutOfMemory => libc_like::ENOMEM,
            Error::NoDevice => libc_like::ENODEV,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotFound => "no such file or directory",
            Error::AlreadyExists => "file exists",
            Error::NotDirectory => "not a directory",
            Error::NotSupported => "operation not supported",
            Error::PermissionDenied => "permission denied",
            Error::InvalidArgument => "invalid argument",
            Error::NoSuchProcess => "no such process",
            Error::OutOfMemory => "cannot allocate memory",
            Error::NoDevice => "no such device",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

impl From<Error> for rustix::io::Errno {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound => rustix::io::Errno::NOENT,
            Error::AlreadyExists => rustix::io::Errno::EXIST,
            Error::NotDirectory => rustix::io::Errno::NOTDIR,
            Error::NotSupported => rustix::io::Errno::OPNOTSUPP,
            Error::PermissionDenied => rustix::io::Errno::PERM,
            Error::InvalidArgument => rustix::io::Errno::INVAL,
            Error::NoSuchProcess => rustix::io::Errno::SRCH,
            Error::OutOfMemory => rustix::io::Errno::NOMEM,
            Error::NoDevice => rustix::io::Errno::NODEV,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Numeric errno values, spelled out locally so nothing in this crate,
/// core or adapter, needs to pull in `libc` just for a handful of
/// constants; `errno_raw` hands these back as plain `i32`s to any host
/// (including the `fuse-host` adapter) that wants a bare integer.
mod libc_like {
    pub const ENOENT: i32 = 2;
    pub const ESRCH: i32 = 3;
    pub const EPERM: i32 = 1;
    pub const ENOMEM: i32 = 12;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EINVAL: i32 = 22;
    pub const ENODEV: i32 = 19;
    pub const EOPNOTSUPP: i32 = 45;
}
