// Block index: one traversal of the document tree per transaction.
//
// Maps block id → (content-start position, order index, text length) plus
// the flat block order. An index is valid only for the exact snapshot
// revision it was built from; `BlockIndexCache` enforces that by holding a
// single revision and evicting the previous one on change. Rebuilding
// unconditionally on every access would hide stale-cache bugs, so the cache
// is the intended access path.

use std::collections::HashMap;

use tracing::{debug, error, warn};

use marginalia_common::types::BlockId;

use crate::doc::{DocRevision, DocSnapshot};

/// Where one identified leaf block sits in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Document-absolute position where the block's content starts.
    pub pos: u32,
    /// Zero-based index in document order.
    pub order: usize,
    /// Text length in characters.
    pub len: u32,
}

/// The per-snapshot block index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndex {
    revision: DocRevision,
    block_map: HashMap<BlockId, BlockEntry>,
    block_order: Vec<BlockId>,
    duplicate_ids: Vec<BlockId>,
}

impl BlockIndex {
    /// Build the index in a single traversal. Only leaf text blocks with a
    /// stable id are indexed. A block id seen more than once collapses to
    /// its first occurrence; later duplicates are excluded and reported.
    pub fn build(snapshot: &DocSnapshot) -> Self {
        let mut block_map = HashMap::new();
        let mut block_order = Vec::new();
        let mut duplicate_ids = Vec::new();

        snapshot.visit_leaves(&mut |leaf| {
            let Some(id) = leaf.block_id else {
                return;
            };
            if block_map.contains_key(id) {
                // Report each offending id once, however many extra
                // occurrences the traversal sees.
                if !duplicate_ids.iter().any(|dup| dup == id) {
                    duplicate_ids.push(id.to_string());
                }
                return;
            }
            block_map.insert(
                id.to_string(),
                BlockEntry {
                    pos: leaf.content_start,
                    order: block_order.len(),
                    len: leaf.text.chars().count() as u32,
                },
            );
            block_order.push(id.to_string());
        });

        if !duplicate_ids.is_empty() {
            warn!(
                revision = snapshot.revision(),
                duplicates = ?duplicate_ids,
                "duplicate block ids collapsed to first occurrence"
            );
        }

        Self { revision: snapshot.revision(), block_map, block_order, duplicate_ids }
    }

    /// Revision of the snapshot this index was built from.
    pub fn revision(&self) -> DocRevision {
        self.revision
    }

    pub fn get(&self, block_id: &str) -> Option<&BlockEntry> {
        self.block_map.get(block_id)
    }

    pub fn order_of(&self, block_id: &str) -> Option<usize> {
        self.block_map.get(block_id).map(|entry| entry.order)
    }

    pub fn contains(&self, block_id: &str) -> bool {
        self.block_map.contains_key(block_id)
    }

    /// Block ids in document order (first occurrences only).
    pub fn block_order(&self) -> &[BlockId] {
        &self.block_order
    }

    /// Block ids that appeared more than once during traversal.
    pub fn duplicate_ids(&self) -> &[BlockId] {
        &self.duplicate_ids
    }

    pub fn len(&self) -> usize {
        self.block_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block_order.is_empty()
    }

    /// Guard against using this index with a snapshot it was not built
    /// from. Programmer error: asserts in debug builds, logs in release.
    pub fn assert_matches(&self, snapshot: &DocSnapshot) {
        if self.revision != snapshot.revision() {
            error!(
                index_revision = self.revision,
                snapshot_revision = snapshot.revision(),
                "block index used against a snapshot it was not built for"
            );
            debug_assert_eq!(
                self.revision,
                snapshot.revision(),
                "stale BlockIndex: built for revision {} but used with {}",
                self.revision,
                snapshot.revision()
            );
        }
    }
}

/// Holds the index for exactly one revision; any other revision is a miss
/// that evicts the previous entry.
#[derive(Debug, Default)]
pub struct BlockIndexCache {
    current: Option<BlockIndex>,
    hits: u64,
    rebuilds: u64,
}

impl BlockIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index for `snapshot`, rebuilding only when the revision
    /// changed since the last call.
    pub fn get_or_build(&mut self, snapshot: &DocSnapshot) -> &BlockIndex {
        let fresh = match &self.current {
            Some(index) if index.revision() == snapshot.revision() => false,
            _ => true,
        };
        if fresh {
            self.current = Some(BlockIndex::build(snapshot));
            self.rebuilds += 1;
            debug!(revision = snapshot.revision(), "block index rebuilt");
        } else {
            self.hits += 1;
        }
        self.current.as_ref().expect("cache entry was just ensured")
    }

    /// (hits, rebuilds) since construction.
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.rebuilds)
    }
}
