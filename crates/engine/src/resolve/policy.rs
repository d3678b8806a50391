// Chain policy evaluation: block order/adjacency → display state.
//
// Pure classification over the block index. This evaluator only ever
// demotes: a clean pass restores the annotation's stored (possibly
// verification-supplied) state, a violation yields ActivePartial, and zero
// resolvable spans yield Orphan. Verification states (ActiveUnverified,
// BrokenGrace) come from an upstream step and pass through unchanged.

use marginalia_common::types::{Chain, ChainPolicy, DisplayAnnoState};

use crate::index::BlockIndex;

/// Compute the display state for one annotation.
///
/// `resolved_spans` / `total_spans` summarize the span-resolution outcome;
/// the chain itself is checked against the index independently, since a
/// chain member can disappear even when every remaining span resolves.
pub fn evaluate(
    chain: &Chain,
    stored_state: DisplayAnnoState,
    resolved_spans: usize,
    total_spans: usize,
    index: &BlockIndex,
) -> DisplayAnnoState {
    if resolved_spans == 0 {
        return DisplayAnnoState::Orphan;
    }
    if resolved_spans < total_spans {
        return DisplayAnnoState::ActivePartial;
    }

    let mut orders = Vec::with_capacity(chain.order.len());
    for block_id in &chain.order {
        match index.order_of(block_id) {
            Some(order) => orders.push(order),
            None => return DisplayAnnoState::ActivePartial,
        }
    }

    if !policy_holds(chain.policy, &orders) {
        return DisplayAnnoState::ActivePartial;
    }

    pass_through(stored_state)
}

/// Check the declared policy against consecutive chain-member order indices.
fn policy_holds(policy: ChainPolicy, orders: &[usize]) -> bool {
    orders.windows(2).all(|pair| {
        let (prev, next) = (pair[0], pair[1]);
        match policy {
            ChainPolicy::RequiredOrder { max_intervening_blocks } => {
                next > prev && (next - prev - 1) as u32 <= max_intervening_blocks
            }
            ChainPolicy::StrictAdjacency { .. } => next == prev + 1,
            ChainPolicy::BoundedGap { max_intervening_blocks } => {
                prev.abs_diff(next) as u32 <= max_intervening_blocks + 1
            }
        }
    })
}

/// On a clean pass, restore the stored state — but never carry forward a
/// previous demotion, and never invent a verification state.
fn pass_through(stored_state: DisplayAnnoState) -> DisplayAnnoState {
    match stored_state {
        DisplayAnnoState::ActiveUnverified => DisplayAnnoState::ActiveUnverified,
        DisplayAnnoState::BrokenGrace => DisplayAnnoState::BrokenGrace,
        DisplayAnnoState::Active
        | DisplayAnnoState::ActivePartial
        | DisplayAnnoState::Orphan => DisplayAnnoState::Active,
    }
}
