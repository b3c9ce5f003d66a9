use hashbrown::hash_table::Entry;
use hashbrown::{DefaultHashBuilder, HashTable};
use std::hash::{BuildHasher, Hash, Hasher};

use crate::node::NodeId;

#[derive(Clone, Copy)]
struct PidEntry {
    pid: u32,
    node: NodeId,
    /// insertion order, assigned once and never touched by a later
    /// reassignment — `cgroup.procs` lists pids in attach order, not pid
    /// numeric order or hash-bucket order.
    seq: u64,
}

/// Mapping from live process-id to the CgDir that currently contains it.
/// Kept as a `hashbrown` raw table keyed by pid.
#[derive(Default)]
pub struct PidIndex {
    table: HashTable<PidEntry>,
    hasher: DefaultHashBuilder,
    next_seq: u64,
}

fn hash_pid(hasher: &DefaultHashBuilder, pid: u32) -> u64 {
    let mut h = hasher.build_hasher();
    pid.hash(&mut h);
    h.finish()
}

pub enum AttachOutcome {
    /// pid was already indexed; its owner was reassigned, no new kernel
    /// registration is needed.
    Reassigned,
    /// pid is new; caller must register it with the kernel event queue.
    New,
}

impl PidIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self, pid: u32) -> Option<NodeId> {
        let hash = hash_pid(&self.hasher, pid);
        self.table
            .find(hash, |entry| entry.pid == pid)
            .map(|entry| entry.node)
    }

    /// Inserts or reassigns `pid` to `node`. Returns whether this is a
    /// brand-new entry (caller must then register kqueue tracking) or a
    /// reassignment of an already-tracked pid (no new registration).
    pub fn insert(&mut self, pid: u32, node: NodeId) -> AttachOutcome {
        let hash = hash_pid(&self.hasher, pid);
        match self
            .table
            .entry(hash, |entry| entry.pid == pid, |entry| hash_pid(&self.hasher, entry.pid))
        {
            Entry::Occupied(mut entry) => {
                entry.get_mut().node = node;
                AttachOutcome::Reassigned
            }
            Entry::Vacant(entry) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                entry.insert(PidEntry { pid, node, seq });
                AttachOutcome::New
            }
        }
    }

    /// Rolls back a just-inserted new entry (kernel-queue registration
    /// failed after `insert` reported `New`).
    pub fn remove(&mut self, pid: u32) -> Option<NodeId> {
        let hash = hash_pid(&self.hasher, pid);
        match self.table.find_entry(hash, |entry| entry.pid == pid) {
            Ok(entry) => Some(entry.remove().0.node),
            Err(_) => None,
        }
    }

    /// Every pid currently owned by `node`, in attach order: the order
    /// `cgroup.procs` must list them in, regardless of pid numeric value
    /// or the table's internal bucket order.
    pub fn pids_owned_by(&self, node: NodeId) -> Vec<u32> {
        let mut entries: Vec<&PidEntry> = self.table.iter().filter(|entry| entry.node == node).collect();
        entries.sort_unstable_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.pid).collect()
    }

    pub fn retain_migrating(&mut self, from: NodeId, to: Option<NodeId>) -> Vec<u32> {
        let mut untracked = Vec::new();
        for entry in self.table.iter_mut() {
            if entry.node == from {
                match to {
                    Some(new_owner) => entry.node = new_owner,
                    None => untracked.push(entry.pid),
                }
            }
        }
        for pid in &untracked {
            self.remove(*pid);
        }
        untracked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    #[test]
    fn insert_new_then_reassign() {
        let mut index = PidIndex::new();
        let a = NodeId::from(0usize);
        let b = NodeId::from(1usize);
        assert!(matches!(index.insert(42, a), AttachOutcome::New));
        assert_eq!(index.owner(42), Some(a));
        assert!(matches!(index.insert(42, b), AttachOutcome::Reassigned));
        assert_eq!(index.owner(42), Some(b));
    }

    #[test]
    fn pids_owned_by_preserves_attach_order_not_pid_order() {
        let mut index = PidIndex::new();
        let node = NodeId::from(0usize);
        // attach a numerically-decreasing sequence; the forked-child case
        // in practice usually goes the other way, but either way the
        // listing must reflect attach order, not `pid` itself
        index.insert(300, node);
        index.insert(10, node);
        index.insert(200, node);
        assert_eq!(index.pids_owned_by(node), vec![300, 10, 200]);

        // reassigning an already-tracked pid keeps its original position
        index.insert(300, node);
        assert_eq!(index.pids_owned_by(node), vec![300, 10, 200]);
    }

    #[test]
    fn migrate_moves_or_untracks() {
        let mut index = PidIndex::new();
        let a = NodeId::from(0usize);
        let b = NodeId::from(1usize);
        index.insert(1, a);
        index.insert(2, a);
        let untracked = index.retain_migrating(a, Some(b));
        assert!(untracked.is_empty());
        assert_eq!(index.owner(1), Some(b));
        assert_eq!(index.owner(2), Some(b));

        let untracked = index.retain_migrating(b, None);
        assert_eq!(untracked.len(), 2);
        assert_eq!(index.owner(1), None);
    }
}
