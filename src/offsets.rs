//! Resume points for interrupted transfers.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

/// Direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Get,
    Put,
}

/// A remembered offset. Stored as two `u32` halves, the same layout
/// used on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedOffset {
    pub direction: Direction,
    pub local: String,
    pub remote: String,
    hi: u32,
    lo: u32,
}

impl SavedOffset {
    pub fn offset(&self) -> u64 {
        (u64::from(self.hi) << 32) | u64::from(self.lo)
    }

    fn matches(&self, direction: Direction, local: &str, remote: &str) -> bool {
        self.direction == direction && self.local == local && self.remote == remote
    }
}

/// A bounded table of [`SavedOffset`], keyed by direction and both paths.
///
/// When full, the oldest entry is replaced.
#[derive(Debug, Clone)]
pub struct SavedOffsets {
    entries: Vec<SavedOffset>,
    capacity: usize,
}

impl SavedOffsets {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity), capacity }
    }

    pub fn save(&mut self, direction: Direction, local: &str, remote: &str, offset: u64) {
        if self.capacity == 0 {
            return;
        }
        self.entries.retain(|e| !e.matches(direction, local, remote));
        if self.entries.len() >= self.capacity {
            let old = self.entries.remove(0);
            warn!("saved offsets full, dropping {:?} {} {}", old.direction, old.local, old.remote);
        }
        debug!("saving {direction:?} {local} {remote} at {offset}");
        self.entries.push(SavedOffset {
            direction,
            local: local.into(),
            remote: remote.into(),
            hi: (offset >> 32) as u32,
            lo: offset as u32,
        });
    }

    /// The saved offset, or 0 when there is none.
    pub fn lookup(&self, direction: Direction, local: &str, remote: &str) -> u64 {
        self.entries
            .iter()
            .find(|e| e.matches(direction, local, remote))
            .map(|e| e.offset())
            .unwrap_or(0)
    }

    pub fn clear(&mut self, direction: Direction, local: &str, remote: &str) {
        self.entries.retain(|e| !e.matches(direction, local, remote));
    }

    pub fn iter(&self) -> impl Iterator<Item = &SavedOffset> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
