#[cfg(feature = "fuse-host")]
pub mod fuse;

use crate::attr::Attr;
use crate::error::Result;
use crate::handle::HandleId;
use crate::node::{NodeId, NodeKind};

/// The operation vocabulary a concrete adapter (FUSE, a 9P server, a
/// native VFS shim) uses to drive a `Manager`. `Manager` implements the
/// actual semantics; a `FilesystemHost` impl is just the seam a given
/// adapter plugs into, so swapping adapters never touches the core.
pub trait FilesystemHost {
    fn lookup(&self, path: &str) -> Result<(NodeId, NodeKind, Attr)>;
    fn get_attr(&self, node: NodeId) -> (NodeKind, Attr);
    fn chmod(&self, node: NodeId, mode: u32);
    fn chown(&self, node: NodeId, uid: u32, gid: u32);
    fn mkdir(&self, parent: &str, name: &str, mode: u32, uid: u32, gid: u32) -> Result<(NodeId, Attr)>;
    fn rmdir(&self, path: &str) -> Result<()>;
    fn rename(&self, parent: &str, name: &str, new_parent: &str, new_name: &str) -> Result<()>;
    fn readdir(&self, path: &str) -> Result<Vec<(String, NodeKind)>>;
    fn open(&self, path: &str) -> Result<HandleId>;
    fn read(&self, handle: HandleId, offset: u64, len: usize) -> Result<Vec<u8>>;
    fn write(&self, handle: HandleId, data: &[u8]) -> Result<usize>;
    fn release(&self, handle: HandleId);
    fn inactive(&self, node: NodeId) -> bool;
    fn reclaim(&self, node: NodeId);
    /// Full slash-separated path from root to `node`; adapters that
    /// address nodes by an opaque numeric handle (FUSE's inode numbers)
    /// use this to translate back into the path vocabulary every other
    /// method here speaks.
    fn full_path(&self, node: NodeId) -> String;
}

impl FilesystemHost for crate::manager::Manager {
    fn lookup(&self, path: &str) -> Result<(NodeId, NodeKind, Attr)> {
        let node = Self::lookup(self, path)?;
        Ok((node, Self::kind_of(self, node), Self::get_attr(self, node)))
    }

    fn get_attr(&self, node: NodeId) -> (NodeKind, Attr) {
        (Self::kind_of(self, node), Self::get_attr(self, node))
    }

    fn chmod(&self, node: NodeId, mode: u32) {
        Self::chmod(self, node, mode);
    }

    fn chown(&self, node: NodeId, uid: u32, gid: u32) {
        Self::chown(self, node, uid, gid);
    }

    fn mkdir(&self, parent: &str, name: &str, mode: u32, uid: u32, gid: u32) -> Result<(NodeId, Attr)> {
        let node = Self::mkdir(self, parent, name, mode, uid, gid)?;
        Ok((node, Self::get_attr(self, node)))
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        Self::rmdir(self, path)
    }

    fn rename(&self, parent: &str, name: &str, new_parent: &str, new_name: &str) -> Result<()> {
        Self::rename(self, parent, name, new_parent, new_name)
    }

    fn readdir(&self, path: &str) -> Result<Vec<(String, NodeKind)>> {
        Self::readdir(self, path)
    }

    fn open(&self, path: &str) -> Result<HandleId> {
        Self::open(self, path)
    }

    fn read(&self, handle: HandleId, offset: u64, len: usize) -> Result<Vec<u8>> {
        Self::read(self, handle, offset, len)
    }

    fn write(&self, handle: HandleId, data: &[u8]) -> Result<usize> {
        Self::write(self, handle, data)
    }

    fn release(&self, handle: HandleId) {
        Self::release(self, handle);
    }

    fn inactive(&self, node: NodeId) -> bool {
        Self::inactive(self, node)
    }

    fn reclaim(&self, node: NodeId) {
        Self::reclaim(self, node);
    }

    fn full_path(&self, node: NodeId) -> String {
        Self::full_path(self, node)
    }
}
