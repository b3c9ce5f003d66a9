use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::attr::Attr;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::handle::{read_snapshot, HandleId, Handles};
use crate::node::{NodeId, NodeKind};
use crate::notify::{ExitRecord, NotifyServer, Subscriber};
use crate::pid_index::{AttachOutcome, PidIndex};
use crate::tree::Tree;
use crate::watcher::{Kqueue, ProcessWatcher};

struct Inner {
    tree: Tree,
    pids: PidIndex,
    handles: Handles,
    subscribers: Vec<Subscriber>,
}

/// The single coarse-grained lock the whole crate is built around:
/// every public operation below takes `inner` for no longer than the
/// one call it serves. The kqueue descriptor and the notify listener
/// sit outside it, since both are plain OS handles that tolerate
/// concurrent use from the watcher thread.
pub struct Manager {
    inner: Mutex<Inner>,
    kqueue: Arc<Kqueue>,
    notify: NotifyServer,
    config: Config,
    watcher: Mutex<Option<ProcessWatcher>>,
    shutting_down: AtomicBool,
}

impl Manager {
    pub fn new(config: Config) -> io::Result<Arc<Manager>> {
        let kqueue = Arc::new(Kqueue::new()?);
        let notify = NotifyServer::bind(&config.notify_socket_path)?;
        kqueue.watch_listener(notify.as_fd())?;

        let tree = Tree::new(config.root_mode, config.root_uid, config.root_gid);
        let manager = Arc::new(Manager {
            inner: Mutex::new(Inner {
                tree,
                pids: PidIndex::new(),
                handles: Handles::new(),
                subscribers: Vec::new(),
            }),
            kqueue: Arc::clone(&kqueue),
            notify,
            config,
            watcher: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        });
        let watcher = ProcessWatcher::spawn(kqueue, Arc::clone(&manager));
        *manager.watcher.lock().unwrap() = Some(watcher);
        Ok(manager)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Wakes the watcher thread and waits for it to exit. Idempotent:
    /// a second call, or a later drop, finds nothing left to do.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.shutdown();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    // ---- Tree operations ----

    /// Resolves `path`, synthesizing a PidDir on the fly if the miss is
    /// under `cgroup.meta` and the final segment parses as a pid, and
    /// bumps the node's host-reference count the way a kernel dentry
    /// cache would on a successful lookup.
    pub fn lookup(&self, path: &str) -> Result<NodeId> {
        let mut inner = self.lock();
        let node = self.resolve(&mut inner, path)?;
        inner.tree.inc_accessed(node);
        Ok(node)
    }

    pub fn get_attr(&self, node: NodeId) -> Attr {
        self.lock().tree.get_attr(node)
    }

    pub fn kind_of(&self, node: NodeId) -> NodeKind {
        self.lock().tree[node].kind
    }

    pub fn chmod(&self, node: NodeId, mode: u32) {
        self.lock().tree.chmod(node, mode);
    }

    pub fn chown(&self, node: NodeId, uid: u32, gid: u32) {
        self.lock().tree.chown(node, uid, gid);
    }

    pub fn mkdir(&self, parent_path: &str, name: &str, mode: u32, uid: u32, gid: u32) -> Result<NodeId> {
        let mut inner = self.lock();
        let parent = self.resolve(&mut inner, parent_path)?;
        if inner.tree[parent].kind != NodeKind::CgDir {
            return Err(Error::NotSupported);
        }
        if inner.tree[parent].children.iter().any(|&c| inner.tree[c].name == name) {
            return Err(Error::AlreadyExists);
        }
        Ok(inner.tree.mkdir(parent, name, mode, uid, gid))
    }

    /// Removes a CgDir and, recursively, every descendant CgDir beneath
    /// it; every pid owned anywhere in the removed subtree is
    /// reassigned to `parent_path`'s directory, matching a cgroup
    /// hierarchy's "processes move up on rmdir" behavior.
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let mut inner = self.lock();
        let node = self.resolve(&mut inner, path)?;
        if node == inner.tree.root || inner.tree[node].kind != NodeKind::CgDir {
            return Err(Error::NotSupported);
        }
        let Inner { tree, pids, .. } = &mut *inner;
        tree.remove(node, &mut |from, to| {
            pids.retain_migrating(from, Some(to));
        });
        Ok(())
    }

    /// Renames `name` under `parent_path` to `new_name` under
    /// `new_parent_path`. A cross-parent rename is always rejected: a
    /// cgroup's parent never changes, only its entry in the directory
    /// listing.
    pub fn rename(&self, parent_path: &str, name: &str, new_parent_path: &str, new_name: &str) -> Result<()> {
        let mut inner = self.lock();
        let parent = self.resolve(&mut inner, parent_path)?;
        let new_parent = self.resolve(&mut inner, new_parent_path)?;
        if parent != new_parent {
            return Err(Error::NotSupported);
        }
        let node = inner.tree[parent]
            .children
            .iter()
            .copied()
            .find(|&c| inner.tree[c].name == name)
            .ok_or(Error::NotFound)?;
        if inner.tree[node].kind != NodeKind::CgDir {
            return Err(Error::NotSupported);
        }
        if name != new_name && inner.tree[parent].children.iter().any(|&c| inner.tree[c].name == new_name) {
            return Err(Error::AlreadyExists);
        }
        inner.tree.rename(node, new_name);
        Ok(())
    }

    /// Full path from root to `node`, for hosts (like the FUSE adapter)
    /// that address nodes by an opaque numeric handle and need the path
    /// vocabulary this Manager's other operations speak.
    pub fn full_path(&self, node: NodeId) -> String {
        self.lock().tree.full_path(node)
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<(String, NodeKind)>> {
        let mut inner = self.lock();
        let node = self.resolve(&mut inner, path)?;
        if !inner.tree[node].kind.is_dir() {
            return Err(Error::NotDirectory);
        }
        inner.tree.inc_accessed(node);
        Ok(inner.tree.readdir(node))
    }

    // ---- File content ----

    /// Opens `path`, materializing pseudo-file content at open time; the
    /// returned Handle's content is a snapshot, never updated in place
    /// (a concurrent write or process exit is only visible on the next
    /// `open`).
    pub fn open(&self, path: &str) -> Result<HandleId> {
        let mut inner = self.lock();
        let node = self.resolve(&mut inner, path)?;
        let snapshot = materialize(&inner, node)?;
        inner.tree.inc_accessed(node);
        Ok(inner.handles.open(node, snapshot))
    }

    pub fn read(&self, handle: HandleId, offset: u64, len: usize) -> Result<Vec<u8>> {
        let inner = self.lock();
        let handle = inner.handles.get(handle).ok_or(Error::InvalidArgument)?;
        Ok(read_snapshot(&handle.snapshot, offset, len).to_vec())
    }

    /// Writes to `cgroup.procs`: the only writable pseudo-file. The
    /// payload is a single pid in ASCII decimal, optionally newline
    /// terminated (mirroring the real cgroupfs write protocol); it
    /// attaches (or re-homes) that pid to the file's owning CgDir.
    pub fn write(&self, handle: HandleId, data: &[u8]) -> Result<usize> {
        let mut inner = self.lock();
        let node = inner.handles.get(handle).ok_or(Error::InvalidArgument)?.node;
        if inner.tree[node].kind != NodeKind::ProcsFile {
            return Err(Error::NoDevice);
        }
        let cgdir = inner.tree[node].parent;
        let text = std::str::from_utf8(data).map_err(|_| Error::InvalidArgument)?;
        let pid = Tree::parse_pid_segment(text.trim_end_matches('\n')).ok_or(Error::InvalidArgument)?;
        self.attach_locked(&mut inner, pid, cgdir)?;
        Ok(data.len())
    }

    pub fn release(&self, handle: HandleId) {
        self.lock().handles.release(handle);
    }

    // ---- Two-phase removal ----

    /// VOP_INACTIVE analogue: the host's last active reference to
    /// `node` just dropped. Returns whether the host should force an
    /// immediate reclaim rather than let the vnode linger in cache.
    pub fn inactive(&self, node: NodeId) -> bool {
        self.lock().tree.inactive(node)
    }

    /// VOP_RECLAIM analogue: the host is destroying its cached vnode
    /// for `node`. Frees the node for real if it was pending removal,
    /// otherwise just clears the host-reference count.
    pub fn reclaim(&self, node: NodeId) {
        self.lock().tree.reclaim(node);
    }

    // ---- Process Index ----

    /// Explicit attach, for a host that seeds already-running pids at
    /// mount time rather than relying solely on a `cgroup.procs` write
    /// or inherited fork tracking.
    pub fn attach(&self, pid: u32, node: NodeId) -> Result<()> {
        let mut inner = self.lock();
        self.attach_locked(&mut inner, pid, node)
    }

    pub fn detach(&self, pid: u32) {
        let mut inner = self.lock();
        inner.pids.remove(pid);
        let _ = self.kqueue.unwatch_process(pid);
    }

    fn attach_locked(&self, inner: &mut Inner, pid: u32, node: NodeId) -> Result<()> {
        self.attach_pid(&mut inner.pids, pid, node)
    }

    fn attach_pid(&self, pids: &mut PidIndex, pid: u32, node: NodeId) -> Result<()> {
        match pids.insert(pid, node) {
            AttachOutcome::Reassigned => Ok(()),
            AttachOutcome::New => {
                if let Err(err) = self.kqueue.watch_process(pid) {
                    pids.remove(pid);
                    log::debug!("cannot track pid {pid}: {err}");
                    return Err(Error::NoSuchProcess);
                }
                Ok(())
            }
        }
    }

    /// Resolves `path` against the live tree. A miss under `cgroup.meta`
    /// whose final segment parses as a pid synthesizes a PidDir (§4.5):
    /// if that pid isn't already in the Process Index, `attach` to the
    /// root CgDir is attempted first — a pid the kernel won't let us
    /// track (already dead) never gets a PidDir, and lookup reports
    /// NotFound instead.
    fn resolve(&self, inner: &mut Inner, path: &str) -> Result<NodeId> {
        let Inner { tree, pids, .. } = &mut *inner;
        tree.lookup(path, false, |tree, pid| {
            if pids.owner(pid).is_none() {
                self.attach_pid(pids, pid, tree.root).map_err(|_| Error::NotFound)?;
            }
            Ok(tree.synthesize_pid_dir(pid))
        })
    }

    // ---- called only from the watcher thread ----

    pub(crate) fn accept_subscriber(&self) {
        match self.notify.accept() {
            Ok(subscriber) => self.lock().subscribers.push(subscriber),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => log::warn!("failed to accept notify subscriber: {err}"),
        }
    }

    pub(crate) fn handle_fork(&self, parent: u32, child: u32) {
        let mut inner = self.lock();
        let owner = match inner.pids.owner(parent) {
            Some(owner) => owner,
            None => {
                log::debug!("fork event for untracked parent pid {parent}; ignoring child {child}");
                return;
            }
        };
        if let Err(err) = self.attach_locked(&mut inner, child, owner) {
            log::warn!("failed to attach forked child pid {child}: {err}");
        }
    }

    pub(crate) fn handle_exit(&self, pid: u32, wait_status: i32) {
        let mut inner = self.lock();
        inner.pids.remove(pid);
        let _ = self.kqueue.unwatch_process(pid);
        let record = ExitRecord {
            pid,
            normal_exit: !was_signaled(wait_status),
            status: decode_status(wait_status),
        };
        inner.subscribers.retain(|subscriber| match subscriber.send(record) {
            Ok(alive) => alive,
            Err(err) => {
                log::warn!("failed to notify subscriber of pid {pid} exit: {err}");
                true
            }
        });
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
        let _ = std::fs::remove_file(&self.config.notify_socket_path);
    }
}

fn materialize(inner: &Inner, node: NodeId) -> Result<Vec<u8>> {
    match inner.tree[node].kind {
        NodeKind::ProcsFile => Ok(procs_file_text(&inner.pids, inner.tree[node].parent)),
        NodeKind::PidCgroupFile => Ok(pid_cgroup_file_text(&inner.tree, &inner.pids, node)),
        NodeKind::EventsFile
        | NodeKind::ReleaseAgentFile
        | NodeKind::NotifyOnReleaseFile
        | NodeKind::CgDir
        | NodeKind::PidRootDir
        | NodeKind::PidDir => Err(Error::NotSupported),
    }
}

fn procs_file_text(pids: &PidIndex, cgdir: NodeId) -> Vec<u8> {
    let owned = pids.pids_owned_by(cgdir);
    let mut text = String::new();
    for pid in owned {
        text.push_str(&pid.to_string());
        text.push('\n');
    }
    text.into_bytes()
}

fn pid_cgroup_file_text(tree: &Tree, pids: &PidIndex, node: NodeId) -> Vec<u8> {
    let pid_dir = tree[node].parent;
    let pid = tree[pid_dir].pid.expect("PidCgroupFile's parent is always a PidDir");
    let owner = pids.owner(pid).unwrap_or(tree.root);
    format!("1:name=systemd:{}\n", tree.full_path(owner)).into_bytes()
}

/// `wait(2)`-style status decoding for the raw value `EVFILT_PROC`
/// reports in `kev.data` on `NOTE_EXIT`.
fn was_signaled(status: i32) -> bool {
    let low = status & 0x7f;
    low != 0 && low != 0x7f
}

fn decode_status(status: i32) -> i32 {
    if was_signaled(status) {
        status & 0x7f
    } else {
        (status >> 8) & 0xff
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;
    use std::time::Duration;

    use rustix::net::{AddressFamily, RecvFlags, SocketAddrUnix, SocketType};

    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            notify_socket_path: dir.path().join("cgrpfs.notify").to_str().unwrap().to_owned(),
            ..Config::default()
        }
    }

    #[test]
    fn mkdir_populate_and_rmdir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::new(test_config(&dir)).unwrap();

        manager.mkdir("/", "workload", 0o755, 0, 0).unwrap();
        let entries = manager.readdir("/").unwrap();
        assert!(entries.iter().any(|(name, _)| name == "workload"));

        // attaching requires a pid the kernel actually knows about
        let mut child = Command::new("sleep").arg("5").spawn().expect("spawn `sleep 5`");
        let pid = child.id();
        manager.attach(pid, manager.lookup("/workload").unwrap()).unwrap();
        let handle = manager.open("/workload/cgroup.procs").unwrap();
        let content = manager.read(handle, 0, 4096).unwrap();
        assert_eq!(content, format!("{pid}\n").into_bytes());
        manager.release(handle);

        manager.rmdir("/workload").unwrap();
        assert_eq!(manager.lookup("/workload"), Err(Error::NotFound));

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn cross_parent_rename_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::new(test_config(&dir)).unwrap();
        manager.mkdir("/", "a", 0o755, 0, 0).unwrap();
        manager.mkdir("/", "b", 0o755, 0, 0).unwrap();
        let err = manager.rename("/", "a", "/b", "a").unwrap_err();
        assert_eq!(err, Error::NotSupported);
    }

    #[test]
    fn pid_dir_synthesis_attaches_to_root_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::new(test_config(&dir)).unwrap();
        let mut child = Command::new("sleep").arg("5").spawn().expect("spawn `sleep 5`");
        let pid = child.id();

        // first lookup synthesizes the PidDir and, per §4.5, attaches the
        // previously-untracked pid to the root CgDir
        let handle = manager.open(&format!("/cgroup.meta/{pid}/cgroup")).unwrap();
        assert_eq!(manager.read(handle, 0, 4096).unwrap(), b"1:name=systemd:/\n");
        manager.release(handle);

        let root_handle = manager.open("/cgroup.procs").unwrap();
        let procs = manager.read(root_handle, 0, 4096).unwrap();
        manager.release(root_handle);
        assert_eq!(procs, format!("{pid}\n").into_bytes());

        // repeated lookups return the same synthesized node, not a fresh one
        let node_a = manager.lookup(&format!("/cgroup.meta/{pid}")).unwrap();
        let node_b = manager.lookup(&format!("/cgroup.meta/{pid}")).unwrap();
        assert_eq!(node_a, node_b);

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn pid_dir_synthesis_fails_for_untrackable_pid() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::new(test_config(&dir)).unwrap();
        // pid 0 is never a real process id; the kernel refuses to track it,
        // so the PidDir is never created and lookup reports NotFound
        assert_eq!(manager.lookup("/cgroup.meta/0"), Err(Error::NotFound));
    }

    #[test]
    fn rmdir_with_outstanding_reference_keeps_working_until_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::new(test_config(&dir)).unwrap();
        let node = manager.mkdir("/", "a", 0o755, 0, 0).unwrap();
        // simulate a host that still has this directory open
        manager.lookup("/a").unwrap();

        manager.rmdir("/a").unwrap();
        // the node is unlinked from the tree but not yet freed: an
        // outstanding reference (the extra `lookup` above) deferred it
        assert_eq!(manager.lookup("/a"), Err(Error::NotFound));
        // the host's reference is now dropping; `inactive` reports the
        // pending removal so the host knows to reclaim immediately
        assert!(manager.inactive(node));
        manager.reclaim(node);
    }

    #[test]
    fn exit_event_removes_tracking_and_notifies_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::new(test_config(&dir)).unwrap();

        let client = rustix::net::socket(AddressFamily::UNIX, SocketType::SEQPACKET, None).unwrap();
        let addr = SocketAddrUnix::new(&manager.config().notify_socket_path).unwrap();
        rustix::net::connect_unix(&client, &addr).unwrap();
        // give the watcher thread a moment to accept the connection
        std::thread::sleep(Duration::from_millis(50));

        let mut child = Command::new("true").spawn().expect("spawn `true`");
        let pid = child.id();
        manager.attach(pid, manager.lookup("/").unwrap()).unwrap();
        child.wait().unwrap();

        std::thread::sleep(Duration::from_millis(200));
        let mut buf = [0u8; ExitRecord::WIRE_SIZE];
        let n = rustix::net::recv(&client, &mut buf, RecvFlags::empty()).unwrap();
        assert_eq!(n, ExitRecord::WIRE_SIZE);
        assert_eq!(i32::from_ne_bytes(buf[0..4].try_into().unwrap()), pid as i32);
        manager.detach(pid);
    }
}
