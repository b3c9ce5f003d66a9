use std::ops::{Index, IndexMut};

use ecow::EcoVec;

use crate::attr::Attr;
use crate::error::{Error, Result};
use crate::node::{
    Node, NodeFlags, NodeId, NodeKind, CGROUP_EVENTS, CGROUP_META, CGROUP_PROCS,
    NOTIFY_ON_RELEASE, PID_CGROUP_FILE, RELEASE_AGENT,
};

/// The four pseudo-files every CgDir carries, in the fixed order
/// `readdir` must list them.
const CGDIR_FILES: [(NodeKind, &str); 4] = [
    (NodeKind::EventsFile, CGROUP_EVENTS),
    (NodeKind::ProcsFile, CGROUP_PROCS),
    (NodeKind::ReleaseAgentFile, RELEASE_AGENT),
    (NodeKind::NotifyOnReleaseFile, NOTIFY_ON_RELEASE),
];

/// The arena owning every Node. Parent/child references are `NodeId`s
/// into `nodes`; freed slots go on `free` for reuse so `reclaim` doesn't
/// leak arena capacity across a long-running mount.
pub struct Tree {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    pub root: NodeId,
    pub pid_root: NodeId,
}

impl Index<NodeId> for Tree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        self.nodes[id.idx()].as_ref().expect("dangling NodeId")
    }
}

impl IndexMut<NodeId> for Tree {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.idx()].as_mut().expect("dangling NodeId")
    }
}

impl Tree {
    /// Builds the root CgDir and its `cgroup.meta` PidRootDir child, per
    /// the tree-shape invariant.
    pub fn new(root_mode: u32, root_uid: u32, root_gid: u32) -> Self {
        let mut tree = Tree {
            nodes: Vec::with_capacity(64),
            free: Vec::new(),
            root: NodeId::NONE,
            pid_root: NodeId::NONE,
        };
        let root = tree.alloc(Node::new(
            NodeKind::CgDir,
            String::new(),
            NodeId::NONE,
            Attr::new(0o40000 | (root_mode & 0o7777), root_uid, root_gid),
        ));
        tree.root = root;
        tree.populate_cgdir_files(root, root_uid, root_gid);

        let pid_root = tree.alloc(Node::new(
            NodeKind::PidRootDir,
            CGROUP_META,
            root,
            Attr::new(0o40755, root_uid, root_gid),
        ));
        tree.pid_root = pid_root;
        tree[root].children.push(pid_root);

        tree
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id.idx()] = Some(node);
            id
        } else {
            let id = NodeId::from(self.nodes.len());
            self.nodes.push(Some(node));
            id
        }
    }

    fn free(&mut self, id: NodeId) {
        self.nodes[id.idx()] = None;
        self.free.push(id);
    }

    fn populate_cgdir_files(&mut self, parent: NodeId, uid: u32, gid: u32) {
        for &(kind, name) in &CGDIR_FILES {
            let child = self.alloc(Node::new(
                kind,
                name,
                parent,
                Attr::new(0o100644, uid, gid),
            ));
            self[parent].children.push(child);
        }
    }

    fn find_child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self[dir]
            .children
            .iter()
            .copied()
            .find(|&child| self[child].name == name)
    }

    /// Parses a pid-path segment strictly: digits only, no sign, no
    /// whitespace. Shared with the Manager's `cgroup.procs` write
    /// handler, which applies the same rule to the pid text a writer
    /// sends.
    pub(crate) fn parse_pid_segment(segment: &str) -> Option<u32> {
        if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        segment.parse().ok()
    }

    /// Resolves an absolute slash-separated path. `second_last` returns
    /// the parent of the final component instead of the component
    /// itself, failing with `NotFound` the instant an earlier component
    /// is missing (no fallback).
    ///
    /// `synthesize_pid` is called when traversal enters the PidRootDir
    /// and the next segment doesn't match an existing child; it either
    /// creates the PidDir (and returns its id) or reports it can't.
    pub fn lookup(
        &mut self,
        path: &str,
        second_last: bool,
        mut synthesize_pid: impl FnMut(&mut Tree, u32) -> Result<NodeId>,
    ) -> Result<NodeId> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut node = self.root;
        if segments.is_empty() {
            return Ok(node);
        }
        let last_idx = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            let is_last = i == last_idx;
            if second_last && is_last {
                return Ok(node);
            }
            if let Some(child) = self.find_child(node, segment) {
                node = child;
                continue;
            }
            if self[node].kind == NodeKind::PidRootDir {
                if let Some(pid) = Self::parse_pid_segment(segment) {
                    node = synthesize_pid(self, pid)?;
                    continue;
                }
            }
            return Err(Error::NotFound);
        }
        Ok(node)
    }

    pub fn get_attr(&self, node: NodeId) -> Attr {
        self[node].attr
    }

    pub fn chmod(&mut self, node: NodeId, mode: u32) {
        self[node].attr.chmod(mode);
    }

    pub fn chown(&mut self, node: NodeId, uid: u32, gid: u32) {
        self[node].attr.chown(uid, gid);
    }

    /// Creates a new CgDir under `parent` with the four fixed pseudo-file
    /// children. Tears down everything allocated so far on any
    /// (simulated) allocation failure so the tree never retains a
    /// half-built subtree.
    pub fn mkdir(&mut self, parent: NodeId, name: &str, mode: u32, uid: u32, gid: u32) -> NodeId {
        let dir = self.alloc(Node::new(
            NodeKind::CgDir,
            name,
            parent,
            Attr::new(0o40000 | (mode & 0o7777), uid, gid),
        ));
        self[parent].children.push(dir);
        self.populate_cgdir_files(dir, uid, gid);
        dir
    }

    /// Unlinks `node` from its children list permanently without
    /// recursing — used after a (simulated) out-of-memory failure while
    /// still building a new CgDir.
    pub fn teardown(&mut self, node: NodeId) {
        let parent = self[node].parent;
        if parent.is_some() {
            let idx = self[parent]
                .children
                .iter()
                .position(|&c| c == node)
                .expect("node missing from parent's children");
            self[parent].children.make_mut().remove(idx);
        }
        let children: EcoVec<NodeId> = self[node].children.clone();
        for child in children {
            self.teardown(child);
        }
        self.free(node);
    }

    pub fn rename(&mut self, node: NodeId, new_name: &str) {
        self[node].name = new_name.to_owned();
    }

    /// Full path from root to `node`, `/`-joined; root itself is `/`.
    pub fn full_path(&self, node: NodeId) -> String {
        let mut segments = Vec::new();
        let mut cur = node;
        while self[cur].parent.is_some() {
            segments.push(self[cur].name.clone());
            cur = self[cur].parent;
        }
        if segments.is_empty() {
            return "/".to_owned();
        }
        segments.reverse();
        let mut path = String::new();
        for segment in segments {
            path.push('/');
            path.push_str(&segment);
        }
        path
    }

    pub fn readdir(&self, dir: NodeId) -> Vec<(String, NodeKind)> {
        let mut entries = vec![(".".to_owned(), self[dir].kind), ("..".to_owned(), self[dir].kind)];
        for &child in &self[dir].children {
            entries.push((self[child].name.clone(), self[child].kind));
        }
        entries
    }

    /// Removes a node using the two-phase unlink/reclaim protocol. Returns
    /// the ids of every node that ends up immediately freed (so the caller —
    /// the Manager — can drop any open Handles referencing them) and
    /// separately the set that was merely unlinked-and-marked.
    ///
    /// `migrate` is invoked once per removed CgDir with `(removed, new_owner)`
    /// so the caller can reassign Process Index entries; `new_owner` is
    /// `NodeId::NONE` only when removing the root (never reachable through
    /// the public `rmdir` since rmdir(root) is rejected, but `migrate`'s
    /// contract stays general for that case).
    pub fn remove(&mut self, node: NodeId, migrate: &mut impl FnMut(NodeId, NodeId)) {
        let parent = self[node].parent;
        self.unlink(node);
        self.remove_subtree(node, parent, migrate);
    }

    fn unlink(&mut self, node: NodeId) {
        let parent = self[node].parent;
        if parent.is_some() {
            let idx = self[parent]
                .children
                .iter()
                .position(|&c| c == node)
                .expect("node missing from parent's children");
            self[parent].children.make_mut().remove(idx);
        }
    }

    /// Applies the two-phase rule to `node` and, depth-first, to every
    /// descendant: CgDir descendants hand their contained pids to
    /// `new_owner`; every node (file or dir) is freed immediately if
    /// unreferenced, else unlinked-and-marked for later reclaim.
    fn remove_subtree(&mut self, node: NodeId, new_owner: NodeId, migrate: &mut impl FnMut(NodeId, NodeId)) {
        if self[node].kind.is_dir() {
            let children: EcoVec<NodeId> = self[node].children.clone();
            for child in children {
                self.remove_subtree(child, new_owner, migrate);
            }
        }
        if self[node].kind == NodeKind::CgDir {
            migrate(node, new_owner);
        }
        self.finish_remove(node);
    }

    fn finish_remove(&mut self, node: NodeId) {
        if self[node].accessed == 0 {
            self.free(node);
        } else {
            self[node].mark_to_delete();
        }
    }

    /// Finalizes a node the host has dropped its last cached reference to:
    /// frees it if it was already unlinked, otherwise just resets the
    /// access count so it can be cached again.
    pub fn reclaim(&mut self, node: NodeId) {
        if self[node].to_delete() {
            self.free(node);
        } else {
            self[node].accessed = 0;
        }
    }

    /// `inactive(node)`: the host's last active reference to `node` just
    /// dropped. The node itself is not touched here — it stays cached
    /// until `reclaim` — but a pending removal should be forced through
    /// the cache rather than left to linger, so the host is told whether
    /// to reclaim immediately.
    pub fn inactive(&self, node: NodeId) -> bool {
        self[node].to_delete()
    }

    pub fn inc_accessed(&mut self, node: NodeId) {
        self[node].accessed += 1;
    }

    /// Synthesizes a PidDir under the PidRootDir on first lookup.
    pub fn synthesize_pid_dir(&mut self, pid: u32) -> NodeId {
        let name = pid.to_string();
        let parent = self.pid_root;
        let (puid, pgid) = {
            let attr = self[parent].attr;
            (attr.uid, attr.gid)
        };
        let dir = self.alloc(Node::new(
            NodeKind::PidDir,
            name,
            parent,
            Attr::new(0o40755, puid, pgid),
        ));
        self[dir].pid = Some(pid);
        self[parent].children.push(dir);
        let file = self.alloc(Node::new(
            NodeKind::PidCgroupFile,
            PID_CGROUP_FILE,
            dir,
            Attr::new(0o100644, puid, pgid),
        ));
        self[dir].children.push(file);
        dir
    }
}
