// Chain healing: repair annotations broken by pure reorders.
//
// Runs only on document-structure-changing transactions. An annotation in
// `active_partial` whose spans all still resolve but whose declared chain
// order no longer matches the document is repairable: rewrite `chain.order`
// to the current block order. Annotations with a genuinely missing block
// are left untouched — healing never fabricates content.

use tracing::info;

use marginalia_common::types::{Annotation, DisplayAnnoState, ResolvedAnnotation};

use crate::index::BlockIndex;

/// Attempt to repair reorder-broken annotations.
///
/// Returns the annotations that were rewritten and whether anything
/// changed; when `did_heal` is true the caller must persist the repairs
/// and re-run resolution rather than render the stale pass.
pub fn heal(
    annotations: &[Annotation],
    resolved: &[ResolvedAnnotation],
    index: &BlockIndex,
) -> (Vec<Annotation>, bool) {
    let mut repaired = Vec::new();

    for outcome in resolved {
        if outcome.state != DisplayAnnoState::ActivePartial {
            continue;
        }
        // A missing block is structural loss, not drift: not repairable.
        if !outcome.missing_block_ids.is_empty() {
            continue;
        }
        let Some(anno) = annotations.iter().find(|a| a.id == outcome.id) else {
            continue;
        };

        let mut members: Vec<(usize, String)> = Vec::with_capacity(anno.chain.order.len());
        let mut all_present = true;
        for block_id in &anno.chain.order {
            match index.order_of(block_id) {
                Some(order) => members.push((order, block_id.clone())),
                None => {
                    all_present = false;
                    break;
                }
            }
        }
        if !all_present {
            continue;
        }

        members.sort_by_key(|(order, _)| *order);
        let new_order: Vec<String> = members.into_iter().map(|(_, id)| id).collect();
        if new_order == anno.chain.order {
            // Order already matches the document; the violation is a gap or
            // adjacency break that reordering cannot fix.
            continue;
        }

        info!(
            annotation_id = %anno.id,
            old_order = ?anno.chain.order,
            new_order = ?new_order,
            "healed annotation chain order"
        );
        let mut updated = anno.clone();
        updated.chain.order = new_order;
        repaired.push(updated);
    }

    let did_heal = !repaired.is_empty();
    (repaired, did_heal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginalia_common::types::{ChainPolicy, Span};

    use crate::doc::{DocSnapshot, NullRuntime};
    use crate::resolve::resolve_all;

    fn index_of(ids: &[&str]) -> BlockIndex {
        BlockIndex::build(&DocSnapshot::from_blocks(
            1,
            ids.iter().map(|id| (id.to_string(), "some text".to_string())).collect(),
        ))
    }

    fn anno_over(id: &str, policy: ChainPolicy, blocks: &[&str]) -> Annotation {
        let spans = blocks.iter().map(|b| Span::new(*b, 0, 4)).collect();
        let mut a = Annotation::new("note", policy, spans);
        a.id = id.to_string();
        a
    }

    const TIGHT: ChainPolicy = ChainPolicy::RequiredOrder { max_intervening_blocks: 0 };

    #[test]
    fn reorder_is_healed() {
        // Declared [a, b]; document reordered to [b, a].
        let index = index_of(&["b", "a"]);
        let annos = vec![anno_over("n1", TIGHT, &["a", "b"])];
        let resolved = resolve_all(&annos, &index, &NullRuntime);
        assert_eq!(resolved[0].state, DisplayAnnoState::ActivePartial);

        let (repaired, did_heal) = heal(&annos, &resolved, &index);
        assert!(did_heal);
        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].chain.order, vec!["b".to_string(), "a".to_string()]);

        // Re-resolution with the repaired chain is clean.
        let re_resolved = resolve_all(&repaired, &index, &NullRuntime);
        assert_eq!(re_resolved[0].state, DisplayAnnoState::Active);
        assert!(re_resolved[0].missing_block_ids.is_empty());
    }

    #[test]
    fn missing_block_is_not_healed() {
        let index = index_of(&["a"]);
        let annos = vec![anno_over("n1", TIGHT, &["a", "gone"])];
        let resolved = resolve_all(&annos, &index, &NullRuntime);
        assert_eq!(resolved[0].state, DisplayAnnoState::ActivePartial);

        let (repaired, did_heal) = heal(&annos, &resolved, &index);
        assert!(!did_heal);
        assert!(repaired.is_empty());
    }

    #[test]
    fn gap_violation_with_correct_order_is_not_healed() {
        // [a, x, b] breaks max_intervening_blocks = 0, but the declared
        // order already matches the document: nothing to rewrite.
        let index = index_of(&["a", "x", "b"]);
        let annos = vec![anno_over("n1", TIGHT, &["a", "b"])];
        let resolved = resolve_all(&annos, &index, &NullRuntime);
        assert_eq!(resolved[0].state, DisplayAnnoState::ActivePartial);

        let (_, did_heal) = heal(&annos, &resolved, &index);
        assert!(!did_heal);
    }

    #[test]
    fn healthy_annotations_are_left_alone() {
        let index = index_of(&["a", "b"]);
        let annos = vec![anno_over("n1", TIGHT, &["a", "b"])];
        let resolved = resolve_all(&annos, &index, &NullRuntime);
        assert_eq!(resolved[0].state, DisplayAnnoState::Active);

        let (repaired, did_heal) = heal(&annos, &resolved, &index);
        assert!(!did_heal);
        assert!(repaired.is_empty());
    }

    #[test]
    fn orphans_are_not_healed() {
        let index = index_of(&["a"]);
        let annos = vec![anno_over("n1", TIGHT, &["gone"])];
        let resolved = resolve_all(&annos, &index, &NullRuntime);
        assert_eq!(resolved[0].state, DisplayAnnoState::Orphan);

        let (_, did_heal) = heal(&annos, &resolved, &index);
        assert!(!did_heal);
    }

    #[test]
    fn heals_only_the_broken_annotations() {
        let index = index_of(&["b", "a", "c"]);
        let annos = vec![
            anno_over("broken", ChainPolicy::BoundedGap { max_intervening_blocks: 2 }, &["a", "b"]),
            anno_over("fine", ChainPolicy::BoundedGap { max_intervening_blocks: 2 }, &["a", "c"]),
        ];
        // BoundedGap tolerates the reversal, so "broken" here needs a
        // required-order policy to actually demote.
        let mut annos = annos;
        annos[0].chain.policy = TIGHT;

        let resolved = resolve_all(&annos, &index, &NullRuntime);
        let (repaired, did_heal) = heal(&annos, &resolved, &index);
        assert!(did_heal);
        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].id, "broken");
    }
}
