//! Pending deltas and the query-time overlay built from them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::record::VectorRecord;

/// One mutation accepted by the store but not yet folded into a snapshot.
#[derive(Debug, Clone)]
pub enum DeltaOp {
    Upsert(Arc<VectorRecord>),
    Delete { id: String, seq: u64 },
}

impl DeltaOp {
    pub fn id(&self) -> &str {
        match self {
            DeltaOp::Upsert(record) => &record.id,
            DeltaOp::Delete { id, .. } => id,
        }
    }

    /// Store sequence number of the write that produced this op.
    pub fn seq(&self) -> u64 {
        match self {
            DeltaOp::Upsert(record) => record.version,
            DeltaOp::Delete { seq, .. } => *seq,
        }
    }
}

/// Ops accumulated since the last published snapshot, in arrival order.
#[derive(Debug, Default)]
pub struct PendingDelta {
    ops: Vec<DeltaOp>,
}

impl PendingDelta {
    pub fn push(&mut self, op: DeltaOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeltaOp> {
        self.ops.iter()
    }

    /// Drop every op already reflected by a snapshot at `watermark`.
    pub fn retain_after(&mut self, watermark: u64) {
        self.ops.retain(|op| op.seq() > watermark);
    }

    /// The winning op per id: highest sequence number, i.e. the write the
    /// store completed last.
    pub fn collapse(&self) -> Overlay {
        let mut overlay = Overlay::default();
        for op in &self.ops {
            overlay.apply(op.clone());
        }
        overlay
    }
}

/// Per-id latest state not yet in the published snapshot.
#[derive(Debug, Clone)]
pub enum OverlayEntry {
    Upsert(Arc<VectorRecord>),
    Tombstone { seq: u64 },
}

impl OverlayEntry {
    fn seq(&self) -> u64 {
        match self {
            OverlayEntry::Upsert(record) => record.version,
            OverlayEntry::Tombstone { seq } => *seq,
        }
    }
}

/// Immutable-once-published map of id to newest pending state. Entries here
/// shadow the snapshot's entry for the same id.
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    entries: HashMap<String, OverlayEntry>,
}

impl Overlay {
    /// Fold `op` in unless a newer op for the same id is already present.
    pub fn apply(&mut self, op: DeltaOp) {
        let seq = op.seq();
        if let Some(existing) = self.entries.get(op.id()) {
            if existing.seq() >= seq {
                return;
            }
        }
        match op {
            DeltaOp::Upsert(record) => {
                self.entries
                    .insert(record.id.clone(), OverlayEntry::Upsert(record));
            }
            DeltaOp::Delete { id, seq } => {
                self.entries.insert(id, OverlayEntry::Tombstone { seq });
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&OverlayEntry> {
        self.entries.get(id)
    }

    pub fn shadows(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn upserts(&self) -> impl Iterator<Item = &Arc<VectorRecord>> {
        self.entries.values().filter_map(|entry| match entry {
            OverlayEntry::Upsert(record) => Some(record),
            OverlayEntry::Tombstone { .. } => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
