// yrs-backed block document store.
//
// Blocks live in two shared types on one Y.Doc: a map `blocks` from block id
// to text content, and an array `order` of block ids giving document order.
// Every mutation (local or a merged remote update) bumps the revision
// counter, so each transaction yields a distinct `DocSnapshot` identity for
// the caches downstream.
//
// The store also implements `CrdtRuntime`: cursor tokens carry a compact
// binary (block id, offset) payload that is validated and clamped against
// the live document on resolve, and the frontier tag is a hash of the
// document's state vector.

use anyhow::{Context, Result};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Array, ArrayRef, Doc, Map, MapRef, ReadTxn, StateVector, Transact, Update};

use marginalia_common::anchor::{AnchorPos, AnchorToken};
use marginalia_common::protocol::gateway::EditPlan;
use marginalia_common::types::BlockId;

use crate::hash::sha256_hex;

use super::{CrdtRuntime, DocRevision, DocSnapshot};

const BLOCKS_MAP: &str = "blocks";
const ORDER_ARRAY: &str = "order";

const CURSOR_VERSION: u8 = 1;
const CURSOR_FIXED_BYTES: usize = 6; // version (1) + block_id len (1) + offset (4)

/// A collaborative block document.
pub struct BlockDoc {
    doc: Doc,
    revision: DocRevision,
}

impl BlockDoc {
    pub fn new() -> Self {
        Self { doc: Doc::new(), revision: 0 }
    }

    /// Create a document with a specific client ID (for deterministic testing).
    pub fn with_client_id(client_id: u64) -> Self {
        let options = yrs::Options { client_id, ..Default::default() };
        Self { doc: Doc::with_options(options), revision: 0 }
    }

    fn blocks(&self) -> MapRef {
        self.doc.get_or_insert_map(BLOCKS_MAP)
    }

    fn order(&self) -> ArrayRef {
        self.doc.get_or_insert_array(ORDER_ARRAY)
    }

    /// Revision of the current document-tree state.
    pub fn revision(&self) -> DocRevision {
        self.revision
    }

    /// Block ids in document order. Ids present in the order array but
    /// missing from the block map (concurrent removal) are skipped.
    pub fn block_order(&self) -> Vec<BlockId> {
        let blocks = self.blocks();
        let order = self.order();
        let txn = self.doc.transact();
        order
            .iter(&txn)
            .map(|value| value.to_string(&txn))
            .filter(|id| blocks.get(&txn, id).is_some())
            .collect()
    }

    pub fn block_count(&self) -> u32 {
        self.block_order().len() as u32
    }

    pub fn block_text(&self, block_id: &str) -> Option<String> {
        let blocks = self.blocks();
        let txn = self.doc.transact();
        blocks.get(&txn, block_id).map(|value| value.to_string(&txn))
    }

    /// Insert a new block at `index` (clamped to the current length).
    pub fn insert_block(&mut self, index: u32, block_id: &str, text: &str) {
        let blocks = self.blocks();
        let order = self.order();
        {
            let mut txn = self.doc.transact_mut();
            let index = index.min(order.len(&txn));
            blocks.insert(&mut txn, block_id, text);
            order.insert(&mut txn, index, block_id);
        }
        self.revision += 1;
    }

    /// Append a new block at the end of the document.
    pub fn push_block(&mut self, block_id: &str, text: &str) {
        let at = self.order_len();
        self.insert_block(at, block_id, text);
    }

    /// Remove a block. Returns false if the block does not exist.
    pub fn remove_block(&mut self, block_id: &str) -> bool {
        let blocks = self.blocks();
        let order = self.order();
        let removed = {
            let mut txn = self.doc.transact_mut();
            if blocks.remove(&mut txn, block_id).is_none() {
                false
            } else {
                if let Some(at) = position_of(&order, &txn, block_id) {
                    order.remove(&mut txn, at);
                }
                true
            }
        };
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// Move a block to `new_index` (clamped). Returns false if absent.
    pub fn move_block(&mut self, block_id: &str, new_index: u32) -> bool {
        let order = self.order();
        let moved = {
            let mut txn = self.doc.transact_mut();
            match position_of(&order, &txn, block_id) {
                None => false,
                Some(at) => {
                    order.remove(&mut txn, at);
                    let target = new_index.min(order.len(&txn));
                    order.insert(&mut txn, target, block_id);
                    true
                }
            }
        };
        if moved {
            self.revision += 1;
        }
        moved
    }

    /// Replace a block's entire text. Returns false if the block is absent.
    pub fn set_block_text(&mut self, block_id: &str, text: &str) -> bool {
        let blocks = self.blocks();
        let updated = {
            let mut txn = self.doc.transact_mut();
            if blocks.get(&txn, block_id).is_none() {
                false
            } else {
                blocks.insert(&mut txn, block_id, text);
                true
            }
        };
        if updated {
            self.revision += 1;
        }
        updated
    }

    /// Replace the character range `[start, end)` of a block's text.
    /// Offsets are clamped to the current text length.
    pub fn splice_block_text(
        &mut self,
        block_id: &str,
        start: u32,
        end: u32,
        replacement: &str,
    ) -> bool {
        let Some(text) = self.block_text(block_id) else {
            return false;
        };
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len() as u32;
        let start = start.min(len) as usize;
        let end = end.min(len).max(start as u32) as usize;

        let mut next = String::with_capacity(text.len() + replacement.len());
        next.extend(&chars[..start]);
        next.push_str(replacement);
        next.extend(&chars[end..]);
        self.set_block_text(block_id, &next)
    }

    /// Apply an accepted gateway edit plan step by step. Returns the number
    /// of steps applied (steps against vanished blocks are skipped).
    pub fn apply_edit_plan(&mut self, plan: &EditPlan) -> usize {
        let mut applied = 0;
        for step in &plan.steps {
            if self.splice_block_text(&step.block_id, step.start, step.end, &step.replacement) {
                applied += 1;
            }
        }
        applied
    }

    /// Apply an incremental binary update from the replication layer.
    pub fn apply_update(&mut self, data: &[u8]) -> Result<()> {
        let update = Update::decode_v1(data).context("failed to decode Yjs update")?;
        self.doc.transact_mut().apply_update(update).context("failed to apply Yjs update")?;
        self.revision += 1;
        Ok(())
    }

    /// Encode the full document state as a binary blob.
    pub fn encode_state(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode the state vector (logical timestamp) for sync protocol.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Compute a diff (update) containing all changes since the given state vector.
    pub fn encode_diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_sv).context("failed to decode state vector")?;
        Ok(self.doc.transact().encode_diff_v1(&sv))
    }

    /// Produce the current document tree as a flat snapshot.
    pub fn snapshot(&self) -> DocSnapshot {
        let blocks = self.blocks();
        let order = self.order();
        let txn = self.doc.transact();
        let entries: Vec<(BlockId, String)> = order
            .iter(&txn)
            .map(|value| value.to_string(&txn))
            .filter_map(|id| {
                let text = blocks.get(&txn, &id).map(|value| value.to_string(&txn))?;
                Some((id, text))
            })
            .collect();
        drop(txn);
        DocSnapshot::from_blocks(self.revision, entries)
    }

    fn order_len(&self) -> u32 {
        let order = self.order();
        let txn = self.doc.transact();
        order.len(&txn)
    }

    fn block_char_len(&self, block_id: &str) -> Option<u32> {
        self.block_text(block_id).map(|t| t.chars().count() as u32)
    }
}

impl Default for BlockDoc {
    fn default() -> Self {
        Self::new()
    }
}

fn position_of<T: ReadTxn>(order: &ArrayRef, txn: &T, block_id: &str) -> Option<u32> {
    order.iter(txn).position(|value| value.to_string(txn) == block_id).map(|i| i as u32)
}

impl CrdtRuntime for BlockDoc {
    fn encode_cursor(&self, block_id: &str, offset: u32) -> Option<AnchorToken> {
        let id_bytes = block_id.as_bytes();
        if id_bytes.len() > u8::MAX as usize || self.block_text(block_id).is_none() {
            return None;
        }
        let mut payload = Vec::with_capacity(CURSOR_FIXED_BYTES + id_bytes.len());
        payload.push(CURSOR_VERSION);
        payload.push(id_bytes.len() as u8);
        payload.extend_from_slice(id_bytes);
        payload.extend_from_slice(&offset.to_le_bytes());
        Some(AnchorToken::cursor(&payload))
    }

    fn resolve_cursor(&self, token: &AnchorToken) -> Option<AnchorPos> {
        let payload = token.cursor_payload()?;
        if payload.len() < CURSOR_FIXED_BYTES || payload[0] != CURSOR_VERSION {
            return None;
        }
        let id_len = payload[1] as usize;
        if payload.len() != CURSOR_FIXED_BYTES + id_len {
            return None;
        }
        let block_id = std::str::from_utf8(&payload[2..2 + id_len]).ok()?.to_string();
        let offset_bytes: [u8; 4] = payload[2 + id_len..].try_into().ok()?;
        let offset = u32::from_le_bytes(offset_bytes);

        // Orphaned cursors (block deleted) do not resolve; surviving
        // cursors clamp into the block's current length.
        let len = self.block_char_len(&block_id)?;
        Some(AnchorPos { block_id, offset: offset.min(len) })
    }

    fn frontier_tag(&self) -> String {
        format!("sv:{}", sha256_hex(&self.encode_state_vector()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_abc() -> BlockDoc {
        let mut doc = BlockDoc::with_client_id(1);
        doc.push_block("a", "alpha");
        doc.push_block("b", "beta");
        doc.push_block("c", "gamma");
        doc
    }

    #[test]
    fn insert_and_read_back() {
        let doc = doc_abc();
        assert_eq!(doc.block_order(), vec!["a", "b", "c"]);
        assert_eq!(doc.block_text("b").as_deref(), Some("beta"));
        assert_eq!(doc.block_count(), 3);
    }

    #[test]
    fn every_mutation_bumps_revision() {
        let mut doc = BlockDoc::new();
        let r0 = doc.revision();
        doc.push_block("a", "text");
        let r1 = doc.revision();
        assert!(r1 > r0);
        doc.set_block_text("a", "other");
        assert!(doc.revision() > r1);
    }

    #[test]
    fn failed_mutations_do_not_bump_revision() {
        let mut doc = doc_abc();
        let r = doc.revision();
        assert!(!doc.remove_block("missing"));
        assert!(!doc.set_block_text("missing", "x"));
        assert!(!doc.move_block("missing", 0));
        assert_eq!(doc.revision(), r);
    }

    #[test]
    fn move_block_reorders() {
        let mut doc = doc_abc();
        assert!(doc.move_block("c", 0));
        assert_eq!(doc.block_order(), vec!["c", "a", "b"]);
        // Clamped past the end.
        assert!(doc.move_block("c", 99));
        assert_eq!(doc.block_order(), vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_block_drops_map_and_order_entries() {
        let mut doc = doc_abc();
        assert!(doc.remove_block("b"));
        assert_eq!(doc.block_order(), vec!["a", "c"]);
        assert_eq!(doc.block_text("b"), None);
    }

    #[test]
    fn splice_replaces_character_range() {
        let mut doc = doc_abc();
        assert!(doc.splice_block_text("a", 0, 5, "omega"));
        assert_eq!(doc.block_text("a").as_deref(), Some("omega"));
        // Clamped range.
        assert!(doc.splice_block_text("a", 3, 99, "!"));
        assert_eq!(doc.block_text("a").as_deref(), Some("ome!"));
    }

    #[test]
    fn snapshot_reflects_order_and_revision() {
        let mut doc = doc_abc();
        doc.move_block("b", 0);
        let snapshot = doc.snapshot();
        assert_eq!(snapshot.revision(), doc.revision());
        assert_eq!(snapshot.block_text("b").as_deref(), Some("beta"));

        let mut ids = Vec::new();
        snapshot.visit_leaves(&mut |leaf| ids.push(leaf.block_id.unwrap().to_string()));
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn concurrent_edits_converge() {
        let mut doc_a = BlockDoc::with_client_id(1);
        doc_a.push_block("a", "shared");
        let mut doc_b = BlockDoc::with_client_id(2);
        doc_b.apply_update(&doc_a.encode_state()).unwrap();

        doc_a.push_block("from-a", "one");
        doc_b.push_block("from-b", "two");

        let diff_a = doc_a.encode_diff(&doc_b.encode_state_vector()).unwrap();
        doc_b.apply_update(&diff_a).unwrap();
        let diff_b = doc_b.encode_diff(&doc_a.encode_state_vector()).unwrap();
        doc_a.apply_update(&diff_b).unwrap();

        assert_eq!(doc_a.block_order(), doc_b.block_order());
        assert_eq!(doc_a.block_text("from-b").as_deref(), Some("two"));
    }

    #[test]
    fn invalid_update_returns_error() {
        let mut doc = BlockDoc::new();
        assert!(doc.apply_update(b"not a valid update").is_err());
    }

    #[test]
    fn cursor_round_trip_and_clamping() {
        let mut doc = doc_abc();
        let token = doc.encode_cursor("a", 3).expect("cursor should encode");
        let pos = doc.resolve_cursor(&token).expect("cursor should resolve");
        assert_eq!(pos.block_id, "a");
        assert_eq!(pos.offset, 3);

        // Block shrank underneath the cursor: offset clamps.
        doc.set_block_text("a", "ab");
        let pos = doc.resolve_cursor(&token).expect("cursor should still resolve");
        assert_eq!(pos.offset, 2);
    }

    #[test]
    fn cursor_for_unknown_block_does_not_encode() {
        let doc = doc_abc();
        assert!(doc.encode_cursor("missing", 0).is_none());
    }

    #[test]
    fn orphaned_cursor_does_not_resolve() {
        let mut doc = doc_abc();
        let token = doc.encode_cursor("b", 1).unwrap();
        doc.remove_block("b");
        assert!(doc.resolve_cursor(&token).is_none());
    }

    #[test]
    fn malformed_cursor_payloads_do_not_resolve() {
        let doc = doc_abc();
        assert!(doc.resolve_cursor(&AnchorToken::from_raw("crdt.????")).is_none());
        assert!(doc.resolve_cursor(&AnchorToken::cursor(&[9, 0, 0, 0, 0, 0])).is_none());
        assert!(doc.resolve_cursor(&AnchorToken::cursor(&[CURSOR_VERSION, 5, b'a'])).is_none());
    }

    #[test]
    fn frontier_tag_tracks_state() {
        let mut doc = BlockDoc::with_client_id(7);
        let before = doc.frontier_tag();
        doc.push_block("a", "text");
        let after = doc.frontier_tag();
        assert_ne!(before, after);
        assert!(after.starts_with("sv:"));
        // Unchanged state keeps the same tag.
        assert_eq!(after, doc.frontier_tag());
    }

    #[test]
    fn edit_plan_application_counts_applied_steps() {
        use marginalia_common::protocol::gateway::EditStep;

        let mut doc = doc_abc();
        let plan = EditPlan {
            steps: vec![
                EditStep { block_id: "a".into(), start: 0, end: 5, replacement: "ALPHA".into() },
                EditStep { block_id: "gone".into(), start: 0, end: 1, replacement: "x".into() },
            ],
        };
        assert_eq!(doc.apply_edit_plan(&plan), 1);
        assert_eq!(doc.block_text("a").as_deref(), Some("ALPHA"));
    }
}
