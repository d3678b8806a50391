// Annotation resolution: one pass over all annotations for one snapshot.
//
// Pure given its inputs: it never mutates the annotation store. The caller
// (normally the transaction pipeline) applies the computed display states
// back through the store's own mutation surface.

pub mod policy;
pub mod span;

pub use span::{resolve_span, ResolvedOffsets};

use tracing::debug;

use marginalia_common::types::{
    Annotation, BlockId, DisplayAnnoState, ResolvedAnnotation, ResolvedRange,
};

use crate::doc::CrdtRuntime;
use crate::index::BlockIndex;

/// Resolve every annotation against one block-index snapshot.
///
/// Iteration is annotation-id-sorted so decoration stacking order is
/// deterministic. All annotations observe the same index; within one call
/// there are no torn reads.
pub fn resolve_all(
    annotations: &[Annotation],
    index: &BlockIndex,
    runtime: &dyn CrdtRuntime,
) -> Vec<ResolvedAnnotation> {
    let mut ordered: Vec<&Annotation> = annotations.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    let resolved: Vec<ResolvedAnnotation> =
        ordered.into_iter().map(|anno| resolve_one(anno, index, runtime)).collect();

    let partial = resolved.iter().filter(|r| r.state != DisplayAnnoState::Active).count();
    debug!(
        revision = index.revision(),
        annotations = resolved.len(),
        not_fully_active = partial,
        "annotation resolution pass complete"
    );
    resolved
}

fn resolve_one(
    anno: &Annotation,
    index: &BlockIndex,
    runtime: &dyn CrdtRuntime,
) -> ResolvedAnnotation {
    let mut ranges = Vec::with_capacity(anno.spans.len());
    let mut missing_block_ids: Vec<BlockId> = Vec::new();

    for span in &anno.spans {
        match resolve_span(span, index, runtime) {
            Some(offsets) => {
                // The index entry exists whenever the span resolved.
                let entry = index.get(&span.block_id).expect("resolved span has an index entry");
                ranges.push(ResolvedRange {
                    block_id: span.block_id.clone(),
                    from: entry.pos + offsets.start,
                    to: entry.pos + offsets.end,
                });
            }
            None => {
                if !missing_block_ids.contains(&span.block_id) {
                    missing_block_ids.push(span.block_id.clone());
                }
            }
        }
    }

    let state = policy::evaluate(
        &anno.chain,
        anno.stored_state,
        ranges.len(),
        anno.spans.len(),
        index,
    );

    ResolvedAnnotation {
        id: anno.id.clone(),
        state,
        color: anno.color.clone(),
        ranges,
        chain_order: anno.chain.order.clone(),
        missing_block_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginalia_common::types::{ChainPolicy, DisplayAnnoState, Span};

    use crate::doc::{DocSnapshot, NullRuntime};

    fn index_of(blocks: &[(&str, &str)]) -> BlockIndex {
        BlockIndex::build(&DocSnapshot::from_blocks(
            1,
            blocks.iter().map(|(id, text)| (id.to_string(), text.to_string())).collect(),
        ))
    }

    fn anno(id: &str, policy: ChainPolicy, spans: Vec<Span>) -> Annotation {
        let mut a = Annotation::new("note", policy, spans);
        a.id = id.to_string();
        a
    }

    const TIGHT: ChainPolicy = ChainPolicy::RequiredOrder { max_intervening_blocks: 0 };

    #[test]
    fn ranges_are_document_absolute() {
        // "a" content starts at 1, "b" at 8 (5 chars + close/open).
        let index = index_of(&[("a", "hello"), ("b", "world")]);
        let annos = vec![anno("n1", TIGHT, vec![Span::new("a", 1, 3), Span::new("b", 0, 5)])];

        let resolved = resolve_all(&annos, &index, &NullRuntime);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].state, DisplayAnnoState::Active);
        assert_eq!(
            resolved[0].ranges,
            vec![
                ResolvedRange { block_id: "a".into(), from: 2, to: 4 },
                ResolvedRange { block_id: "b".into(), from: 8, to: 13 },
            ]
        );
        assert!(resolved[0].missing_block_ids.is_empty());
    }

    #[test]
    fn iteration_is_id_sorted() {
        let index = index_of(&[("a", "hello")]);
        let annos = vec![
            anno("z-last", TIGHT, vec![Span::new("a", 0, 1)]),
            anno("a-first", TIGHT, vec![Span::new("a", 0, 1)]),
            anno("m-mid", TIGHT, vec![Span::new("a", 0, 1)]),
        ];
        let ids: Vec<String> =
            resolve_all(&annos, &index, &NullRuntime).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a-first", "m-mid", "z-last"]);
    }

    #[test]
    fn unresolved_spans_collect_missing_block_ids() {
        let index = index_of(&[("a", "hello")]);
        let annos = vec![anno(
            "n1",
            TIGHT,
            vec![Span::new("a", 0, 5), Span::new("gone", 0, 3), Span::new("gone", 4, 6)],
        )];

        let resolved = resolve_all(&annos, &index, &NullRuntime);
        assert_eq!(resolved[0].state, DisplayAnnoState::ActivePartial);
        assert_eq!(resolved[0].missing_block_ids, vec!["gone".to_string()]);
        assert_eq!(resolved[0].ranges.len(), 1);
    }

    #[test]
    fn all_spans_unresolvable_is_orphan_with_no_ranges() {
        let index = index_of(&[("a", "hello")]);
        let annos = vec![anno("n1", TIGHT, vec![Span::new("gone", 0, 3)])];

        let resolved = resolve_all(&annos, &index, &NullRuntime);
        assert_eq!(resolved[0].state, DisplayAnnoState::Orphan);
        assert!(resolved[0].ranges.is_empty());
        assert_eq!(resolved[0].missing_block_ids, vec!["gone".to_string()]);
    }

    #[test]
    fn resolution_is_deterministic() {
        let index = index_of(&[("a", "hello"), ("b", "world"), ("c", "again")]);
        let annos = vec![
            anno("n2", ChainPolicy::BoundedGap { max_intervening_blocks: 1 }, vec![
                Span::new("c", 0, 2),
                Span::new("a", 1, 4),
            ]),
            anno("n1", TIGHT, vec![Span::new("b", 0, 5)]),
        ];

        let first = resolve_all(&annos, &index, &NullRuntime);
        let second = resolve_all(&annos, &index, &NullRuntime);
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_all_does_not_mutate_inputs() {
        let index = index_of(&[("a", "hello")]);
        let annos = vec![anno("n1", TIGHT, vec![Span::new("gone", 0, 3)])];
        let before = annos.clone();
        let _ = resolve_all(&annos, &index, &NullRuntime);
        assert_eq!(annos, before);
    }
}
