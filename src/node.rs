use bitflags::bitflags;
use ecow::EcoVec;

use crate::attr::Attr;

/// Fixed directory entry names; every CgDir gets exactly these four
/// children, every PidDir gets exactly the one.
pub const CGROUP_EVENTS: &str = "cgroup.events";
pub const CGROUP_PROCS: &str = "cgroup.procs";
pub const RELEASE_AGENT: &str = "release_agent";
pub const NOTIFY_ON_RELEASE: &str = "notify_on_release";
pub const CGROUP_META: &str = "cgroup.meta";
pub const PID_CGROUP_FILE: &str = "cgroup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    CgDir,
    ProcsFile,
    EventsFile,
    ReleaseAgentFile,
    NotifyOnReleaseFile,
    PidRootDir,
    PidDir,
    PidCgroupFile,
}

impl NodeKind {
    pub fn is_dir(self) -> bool {
        matches!(
            self,
            NodeKind::CgDir | NodeKind::PidRootDir | NodeKind::PidDir
        )
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug)]
    pub struct NodeFlags: u32 {
        /// unlinked from its parent, kept alive only by an outstanding
        /// host reference; freed on the next matching `reclaim`
        const TO_DELETE = 1;
    }
}

/// An index into the Tree's node arena. `NONE` marks "no parent"
/// (the root) and is never a valid live node.
#[derive(PartialEq, Eq, PartialOrd, Clone, Copy, Hash, Debug)]
pub struct NodeId(u32);

impl NodeId {
    pub const NONE: NodeId = NodeId(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn is_some(self) -> bool {
        self != Self::NONE
    }

    pub fn idx(self) -> usize {
        debug_assert_ne!(self, Self::NONE);
        self.0 as usize
    }
}

impl From<usize> for NodeId {
    fn from(value: usize) -> Self {
        assert!(value < Self::NONE.0 as usize);
        NodeId(value as u32)
    }
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub name: String,
    pub parent: NodeId,
    pub children: EcoVec<NodeId>,
    pub attr: Attr,
    /// set only for PidDir
    pub pid: Option<u32>,
    /// CgDir only
    pub notify_on_release: bool,
    /// CgDir only
    pub release_agent: Option<Vec<u8>>,
    /// outstanding host references; 0 means the host holds none
    pub accessed: u32,
    pub flags: NodeFlags,
}

impl Node {
    pub fn new(kind: NodeKind, name: impl Into<String>, parent: NodeId, attr: Attr) -> Self {
        Node {
            kind,
            name: name.into(),
            parent,
            children: EcoVec::new(),
            attr,
            pid: None,
            notify_on_release: false,
            release_agent: None,
            accessed: 0,
            flags: NodeFlags::empty(),
        }
    }

    pub fn to_delete(&self) -> bool {
        self.flags.contains(NodeFlags::TO_DELETE)
    }

    pub fn mark_to_delete(&mut self) {
        self.flags.insert(NodeFlags::TO_DELETE);
    }
}
