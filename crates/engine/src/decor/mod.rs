// Decoration cache: per-annotation memoized rendering payloads.
//
// Hash = state | color | sorted(block:from:to) over the resolved ranges,
// using the std hasher (in-memory only; nothing durable). The cache is
// scoped to one snapshot revision — a new revision empties it, which is
// normal operation, not an error. Entries for annotations that left the
// resolved set are purged on every pass so memory stays bounded by the
// live annotation count. Hit/miss counters are observability only.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tracing::trace;

use marginalia_common::types::{AnnotationId, DisplayAnnoState, ResolvedAnnotation, ResolvedRange};

use crate::doc::DocRevision;

/// What the renderer consumes for one annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecorationPayload {
    pub annotation_id: AnnotationId,
    pub state: DisplayAnnoState,
    /// CSS-ish class hint, e.g. `annotation annotation--active_partial`.
    pub class: String,
    pub color: Option<String>,
    pub ranges: Vec<ResolvedRange>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    hash: u64,
    payload: DecorationPayload,
}

#[derive(Debug, Default)]
pub struct DecorationCache {
    revision: Option<DocRevision>,
    entries: HashMap<AnnotationId, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl DecorationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce payloads for the whole resolved set, reusing cached entries
    /// whose hash is unchanged. Call once per resolution pass.
    pub fn get_all(
        &mut self,
        resolved: &[ResolvedAnnotation],
        revision: DocRevision,
    ) -> Vec<DecorationPayload> {
        if self.revision != Some(revision) {
            // New document-tree instance: start from an empty scope.
            self.entries.clear();
            self.revision = Some(revision);
        }

        let payloads: Vec<DecorationPayload> =
            resolved.iter().map(|r| self.get_one(r).clone()).collect();

        // Purge annotations that disappeared from the resolved set.
        self.entries.retain(|id, _| resolved.iter().any(|r| &r.id == id));

        trace!(revision, hits = self.hits, misses = self.misses, "decoration pass complete");
        payloads
    }

    fn get_one(&mut self, resolved: &ResolvedAnnotation) -> &DecorationPayload {
        let hash = decoration_hash(resolved);
        let cached = self.entries.get(&resolved.id).is_some_and(|entry| entry.hash == hash);
        if cached {
            self.hits += 1;
        } else {
            self.misses += 1;
            self.entries
                .insert(resolved.id.clone(), CacheEntry { hash, payload: build_payload(resolved) });
        }
        &self.entries.get(&resolved.id).expect("entry was just ensured").payload
    }

    /// (hits, misses) since construction.
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hash of everything the payload is derived from.
fn decoration_hash(resolved: &ResolvedAnnotation) -> u64 {
    let mut hasher = DefaultHasher::new();
    resolved.state.as_str().hash(&mut hasher);
    resolved.color.hash(&mut hasher);

    let mut keys: Vec<String> = resolved
        .ranges
        .iter()
        .map(|r: &ResolvedRange| format!("{}:{}:{}", r.block_id, r.from, r.to))
        .collect();
    keys.sort();
    keys.hash(&mut hasher);
    hasher.finish()
}

fn build_payload(resolved: &ResolvedAnnotation) -> DecorationPayload {
    DecorationPayload {
        annotation_id: resolved.id.clone(),
        state: resolved.state,
        class: format!("annotation annotation--{}", resolved.state.as_str()),
        color: resolved.color.clone(),
        ranges: resolved.ranges.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(id: &str, color: Option<&str>, ranges: &[(&str, u32, u32)]) -> ResolvedAnnotation {
        ResolvedAnnotation {
            id: id.to_string(),
            state: DisplayAnnoState::Active,
            color: color.map(str::to_string),
            ranges: ranges
                .iter()
                .map(|(b, from, to)| ResolvedRange { block_id: b.to_string(), from: *from, to: *to })
                .collect(),
            chain_order: ranges.iter().map(|(b, _, _)| b.to_string()).collect(),
            missing_block_ids: Vec::new(),
        }
    }

    #[test]
    fn unchanged_pass_hits_for_every_annotation() {
        let mut cache = DecorationCache::new();
        let set = vec![resolved("n1", Some("gold"), &[("a", 1, 4)]), resolved("n2", None, &[("b", 8, 12)])];

        let first = cache.get_all(&set, 1);
        assert_eq!(cache.counters(), (0, 2));

        let second = cache.get_all(&set, 1);
        assert_eq!(cache.counters(), (2, 2));
        assert_eq!(first, second);
    }

    #[test]
    fn color_change_invalidates_only_that_annotation() {
        let mut cache = DecorationCache::new();
        let set = vec![resolved("n1", Some("gold"), &[("a", 1, 4)]), resolved("n2", None, &[("b", 8, 12)])];
        cache.get_all(&set, 1);

        let recolored =
            vec![resolved("n1", Some("teal"), &[("a", 1, 4)]), resolved("n2", None, &[("b", 8, 12)])];
        cache.get_all(&recolored, 1);
        // n2 hit, n1 miss.
        assert_eq!(cache.counters(), (1, 3));
    }

    #[test]
    fn state_change_invalidates() {
        let mut cache = DecorationCache::new();
        let mut one = resolved("n1", None, &[("a", 1, 4)]);
        cache.get_all(std::slice::from_ref(&one), 1);

        one.state = DisplayAnnoState::ActivePartial;
        let payloads = cache.get_all(std::slice::from_ref(&one), 1);
        assert_eq!(cache.counters(), (0, 2));
        assert_eq!(payloads[0].class, "annotation annotation--active_partial");
    }

    #[test]
    fn new_revision_empties_the_scope() {
        let mut cache = DecorationCache::new();
        let set = vec![resolved("n1", None, &[("a", 1, 4)])];
        cache.get_all(&set, 1);
        // Identical content under a new revision is a different tree.
        cache.get_all(&set, 2);
        assert_eq!(cache.counters(), (0, 2));
    }

    #[test]
    fn departed_annotations_are_purged() {
        let mut cache = DecorationCache::new();
        let set = vec![resolved("n1", None, &[("a", 1, 4)]), resolved("n2", None, &[("b", 8, 12)])];
        cache.get_all(&set, 1);
        assert_eq!(cache.len(), 2);

        let only_n2 = vec![resolved("n2", None, &[("b", 8, 12)])];
        cache.get_all(&only_n2, 1);
        assert_eq!(cache.len(), 1);

        // n1 returning is a miss again.
        cache.get_all(&set, 1);
        assert_eq!(cache.counters(), (2, 3));
    }

    #[test]
    fn range_order_does_not_affect_the_hash() {
        let a = resolved("n1", None, &[("a", 1, 4), ("b", 8, 12)]);
        let b = resolved("n1", None, &[("b", 8, 12), ("a", 1, 4)]);
        assert_eq!(decoration_hash(&a), decoration_hash(&b));
    }
}
