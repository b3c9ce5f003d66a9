//! A minimal `fuser::Filesystem` adapter translating FUSE's inode-number
//! callback API into calls against a [`FilesystemHost`]. This exists to
//! demonstrate the seam, not to be a production mount helper: mount
//! options and permission checks beyond what `Manager` itself enforces
//! are left to whoever wires this up for real.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, Request, TimeOrNow,
};

use crate::attr::{Attr, NO_CHANGE};
use crate::handle::HandleId;
use crate::node::{NodeId, NodeKind};

use super::FilesystemHost;

/// A one-second attribute cache, generous enough for a pseudo-filesystem
/// whose content only ever changes in response to explicit writes or
/// process exits the kernel has no other way of learning about anyway.
const ATTR_TTL: Duration = Duration::from_secs(1);

fn node_to_ino(node: NodeId) -> u64 {
    node.idx() as u64 + 1
}

fn ino_to_node(ino: u64) -> NodeId {
    NodeId::from((ino - 1) as usize)
}

fn handle_to_fh(handle: HandleId) -> u64 {
    handle.idx() as u64
}

fn fh_to_handle(fh: u64) -> HandleId {
    HandleId::from(fh as usize)
}

fn file_type(kind: NodeKind) -> FileType {
    if kind.is_dir() {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}

fn file_attr(ino: u64, kind: NodeKind, attr: Attr) -> FileAttr {
    FileAttr {
        ino,
        size: 0,
        blocks: 0,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: file_type(kind),
        perm: (attr.mode & 0o7777) as u16,
        nlink: 1,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

/// Wraps any [`FilesystemHost`] (in practice, a `Manager`) as a
/// `fuser::Filesystem`.
pub struct FuseHost<H> {
    host: Arc<H>,
}

impl<H: FilesystemHost> FuseHost<H> {
    pub fn new(host: Arc<H>) -> Self {
        FuseHost { host }
    }

    fn path_of(&self, ino: u64) -> String {
        self.host.full_path(ino_to_node(ino))
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> String {
        let parent_path = self.path_of(parent);
        let name = name.to_string_lossy();
        if parent_path == "/" {
            format!("/{name}")
        } else {
            format!("{parent_path}/{name}")
        }
    }
}

impl<H: FilesystemHost> Filesystem for FuseHost<H> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = self.child_path(parent, name);
        match self.host.lookup(&path) {
            Ok((node, kind, attr)) => reply.entry(&ATTR_TTL, &file_attr(node_to_ino(node), kind, attr), 0),
            Err(err) => reply.error(err.errno_raw()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let (kind, attr) = self.host.get_attr(ino_to_node(ino));
        reply.attr(&ATTR_TTL, &file_attr(ino, kind, attr));
    }

    /// Only `mode`/`uid`/`gid` are meaningful on a pseudo-file tree with no
    /// real content size or timestamps to set; everything else here is a
    /// no-op acked through to the `get_attr` reply.
    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let node = ino_to_node(ino);
        if let Some(mode) = mode {
            self.host.chmod(node, mode);
        }
        if uid.is_some() || gid.is_some() {
            self.host.chown(node, uid.unwrap_or(NO_CHANGE), gid.unwrap_or(NO_CHANGE));
        }
        let (kind, attr) = self.host.get_attr(node);
        reply.attr(&ATTR_TTL, &file_attr(ino, kind, attr));
    }

    fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let parent_path = self.path_of(parent);
        let name = name.to_string_lossy();
        match self.host.mkdir(&parent_path, &name, mode, req.uid(), req.gid()) {
            Ok((node, attr)) => reply.entry(&ATTR_TTL, &file_attr(node_to_ino(node), NodeKind::CgDir, attr), 0),
            Err(err) => reply.error(err.errno_raw()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = self.child_path(parent, name);
        match self.host.rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno_raw()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let parent_path = self.path_of(parent);
        let new_parent_path = self.path_of(newparent);
        let name = name.to_string_lossy();
        let newname = newname.to_string_lossy();
        match self.host.rename(&parent_path, &name, &new_parent_path, &newname) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno_raw()),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let path = self.path_of(ino);
        let entries = match self.host.readdir(&path) {
            Ok(entries) => entries,
            Err(err) => return reply.error(err.errno_raw()),
        };
        for (i, (name, kind)) in entries.into_iter().enumerate().skip(offset as usize) {
            let child_ino = match name.as_str() {
                "." | ".." => ino,
                _ => self
                    .host
                    .lookup(&self.child_path(ino, OsStr::new(&name)))
                    .map(|(node, _, _)| node_to_ino(node))
                    .unwrap_or(ino),
            };
            if reply.add(child_ino, (i + 1) as i64, file_type(kind), &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = self.path_of(ino);
        match self.host.open(&path) {
            Ok(handle) => reply.opened(handle_to_fh(handle), 0),
            Err(err) => reply.error(err.errno_raw()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.host.read(fh_to_handle(fh), offset.max(0) as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(err.errno_raw()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.host.write(fh_to_handle(fh), data) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(err.errno_raw()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.host.release(fh_to_handle(fh));
        reply.ok();
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        let node = ino_to_node(ino);
        if self.host.inactive(node) {
            self.host.reclaim(node);
        }
    }
}
