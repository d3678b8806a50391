// Transaction pipeline: index → resolve → heal → decorate, in that order.
//
// Runs once per document transaction. Content-only transactions skip
// healing; structural ones (block insert/delete/move/split) run it and,
// when anything was repaired, persist the repairs and resolve again so the
// rendered pass never shows the pre-heal states.

use tracing::debug;

use marginalia_common::types::ResolvedAnnotation;

use crate::decor::{DecorationCache, DecorationPayload};
use crate::doc::{CrdtRuntime, DocSnapshot};
use crate::heal;
use crate::index::BlockIndexCache;
use crate::resolve::resolve_all;
use crate::store::AnnotationStore;

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Run the chain healer on structural transactions.
    pub heal_on_structural: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { heal_on_structural: true }
    }
}

/// Everything a renderer needs after one transaction.
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub resolved: Vec<ResolvedAnnotation>,
    pub decorations: Vec<DecorationPayload>,
    /// True when the healer rewrote at least one chain this pass.
    pub healed: bool,
}

#[derive(Default)]
pub struct TransactionPipeline {
    index_cache: BlockIndexCache,
    decorations: DecorationCache,
    config: PipelineConfig,
}

impl TransactionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { index_cache: BlockIndexCache::new(), decorations: DecorationCache::new(), config }
    }

    /// Process one committed transaction against its post-state snapshot.
    ///
    /// `structural` marks transactions that changed the block structure
    /// rather than only text content.
    pub fn apply_transaction(
        &mut self,
        snapshot: &DocSnapshot,
        structural: bool,
        store: &mut AnnotationStore,
        runtime: &dyn CrdtRuntime,
    ) -> TransactionOutcome {
        let index = self.index_cache.get_or_build(snapshot);
        let annotations = store.all();
        let mut resolved = resolve_all(&annotations, index, runtime);

        let mut healed = false;
        if structural && self.config.heal_on_structural {
            let (repaired, did_heal) = heal::heal(&annotations, &resolved, index);
            if did_heal {
                healed = true;
                for anno in repaired {
                    store.upsert(anno);
                }
                // Chains changed: the pass just computed is stale.
                let fresh = store.all();
                resolved = resolve_all(&fresh, index, runtime);
            }
        }

        store.apply_display_states(&resolved);
        let decorations = self.decorations.get_all(&resolved, snapshot.revision());

        debug!(
            revision = snapshot.revision(),
            structural,
            healed,
            annotations = resolved.len(),
            "transaction pipeline pass complete"
        );
        TransactionOutcome { resolved, decorations, healed }
    }

    /// (index hits, index rebuilds, decoration hits, decoration misses).
    pub fn cache_counters(&self) -> (u64, u64, u64, u64) {
        let (index_hits, rebuilds) = self.index_cache.counters();
        let (decor_hits, decor_misses) = self.decorations.counters();
        (index_hits, rebuilds, decor_hits, decor_misses)
    }
}
