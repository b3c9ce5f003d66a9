use crate::node::NodeId;

#[derive(PartialEq, Eq, Clone, Copy, Hash, Debug)]
pub struct HandleId(u32);

impl HandleId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for HandleId {
    fn from(value: usize) -> Self {
        assert!(value < u32::MAX as usize);
        HandleId(value as u32)
    }
}

/// An open file description. The byte-string is a snapshot captured at
/// `open` time: reads never observe a later mutation of the backing node.
pub struct Handle {
    pub node: NodeId,
    pub snapshot: Vec<u8>,
}

#[derive(Default)]
pub struct Handles {
    slots: Vec<Option<Handle>>,
    free: Vec<HandleId>,
}

impl Handles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, node: NodeId, snapshot: Vec<u8>) -> HandleId {
        let handle = Handle { node, snapshot };
        if let Some(id) = self.free.pop() {
            self.slots[id.idx()] = Some(handle);
            id
        } else {
            let id = HandleId::from(self.slots.len());
            self.slots.push(Some(handle));
            id
        }
    }

    pub fn get(&self, id: HandleId) -> Option<&Handle> {
        self.slots.get(id.idx()).and_then(|h| h.as_ref())
    }

    /// Drops the Handle (the `release` filesystem operation).
    pub fn release(&mut self, id: HandleId) {
        if id.idx() < self.slots.len() {
            self.slots[id.idx()] = None;
            self.free.push(id);
        }
    }
}

pub fn read_snapshot(snapshot: &[u8], offset: u64, len: usize) -> &[u8] {
    let offset = offset as usize;
    if offset >= snapshot.len() {
        return &[];
    }
    let end = (offset + len).min(snapshot.len());
    &snapshot[offset..end]
}
