// Conflict-aware edit client: optimistic AI edits with bounded rebase.
//
// Each target span carries a content-hash precondition. On a gateway
// conflict the failed spans are re-resolved (rebase) or found again by text
// search (relocation) and the request is resubmitted once with a fresh
// request id. A conflict that survives the retry fails closed: no edit plan
// is returned, so nothing gets applied. The client never writes annotation
// state; display states belong to the resolution pass, and the upstream
// verification step can query `pending_verification_ids` for the
// annotations an accepted edit touched. Transport failures surface
// immediately and are never retried here.

pub mod transport;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use marginalia_common::protocol::gateway::{
    ApplyResult, GatewayConflict, GatewayRequest, TargetSpan, CURRENT_PROTOCOL_VERSION,
};
use marginalia_common::types::{AnnotationId, Span};

use crate::doc::{CrdtRuntime, DocSnapshot};
use crate::hash::sha256_hex;
use crate::index::BlockIndex;
use crate::resolve::resolve_span;
use crate::store::AnnotationStore;
use transport::{GatewayOutcome, GatewayTransport, TransportError};

/// A span selected for editing, with the text its precondition hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanTarget {
    pub span: Span,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error("edit conflict after {attempts} attempt(s): {message}")]
    Conflict { attempts: u32, message: String, conflict: GatewayConflict },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy)]
pub struct EditClientConfig {
    /// Extra submissions allowed after the first conflict.
    pub max_rebase_attempts: u32,
}

impl Default for EditClientConfig {
    fn default() -> Self {
        Self { max_rebase_attempts: 1 }
    }
}

/// Strategy for re-resolving a failed span against the current document.
pub trait RebaseProvider {
    /// Returns the target with fresh offsets and text, or None when the
    /// span no longer resolves.
    fn rebase(&self, target: &SpanTarget) -> Option<SpanTarget>;
}

/// Fallback strategy: find the original text again after the anchors died.
pub trait RelocationProvider {
    fn relocate(&self, target: &SpanTarget) -> Option<SpanTarget>;
}

/// Rebase by running the normal span resolver against a fresh snapshot.
pub struct SnapshotRebase<'a> {
    pub snapshot: &'a DocSnapshot,
    pub index: &'a BlockIndex,
    pub runtime: &'a dyn CrdtRuntime,
}

impl RebaseProvider for SnapshotRebase<'_> {
    fn rebase(&self, target: &SpanTarget) -> Option<SpanTarget> {
        let offsets = resolve_span(&target.span, self.index, self.runtime)?;
        let text = self.snapshot.block_text(&target.span.block_id)?;
        let mut span = target.span.clone();
        span.start = offsets.start;
        span.end = offsets.end;
        Some(SpanTarget { text: slice_chars(&text, offsets.start, offsets.end), span })
    }
}

/// Relocate by exact text search: the declared block first, then every
/// block in document order. First match wins.
pub struct TextSearchRelocation<'a> {
    pub snapshot: &'a DocSnapshot,
}

impl RelocationProvider for TextSearchRelocation<'_> {
    fn relocate(&self, target: &SpanTarget) -> Option<SpanTarget> {
        if target.text.is_empty() {
            return None;
        }
        let mut candidates: Vec<(String, String)> = Vec::new();
        if let Some(text) = self.snapshot.block_text(&target.span.block_id) {
            candidates.push((target.span.block_id.clone(), text));
        }
        self.snapshot.visit_leaves(&mut |leaf| {
            if let Some(id) = leaf.block_id {
                if id != target.span.block_id {
                    candidates.push((id.to_string(), leaf.text.to_string()));
                }
            }
        });

        for (block_id, text) in candidates {
            if let Some(byte_idx) = text.find(&target.text) {
                let start = text[..byte_idx].chars().count() as u32;
                let end = start + target.text.chars().count() as u32;
                debug!(block_id = %block_id, start, "relocated span by text search");
                return Some(SpanTarget {
                    span: Span::new(&block_id, start, end),
                    text: target.text.clone(),
                });
            }
        }
        None
    }
}

pub struct ConflictAwareEditClient<T: GatewayTransport> {
    transport: T,
    config: EditClientConfig,
}

impl<T: GatewayTransport> ConflictAwareEditClient<T> {
    pub fn new(transport: T, config: EditClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Submit an edit over the target spans, retrying once through rebase
    /// and relocation on conflict.
    ///
    /// Read-only with respect to annotation state: on any error nothing has
    /// been applied and nothing needs rolling back.
    pub fn submit(
        &mut self,
        mut targets: Vec<SpanTarget>,
        instructions: &str,
        payload: serde_json::Value,
        frontier_tag: &str,
        rebase: &dyn RebaseProvider,
        relocate: &dyn RelocationProvider,
    ) -> Result<ApplyResult, EditError> {
        let max_attempts = 1 + self.config.max_rebase_attempts;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let request_id = Uuid::new_v4().to_string();
            // Wire span ids are salted with the request id; keep the map
            // back to target positions for conflict handling.
            let span_ids: Vec<String> =
                targets.iter().map(|t| span_id(&request_id, &t.span)).collect();
            let request = GatewayRequest {
                protocol_version: CURRENT_PROTOCOL_VERSION.to_string(),
                request_id,
                doc_frontier_tag: frontier_tag.to_string(),
                target_spans: targets
                    .iter()
                    .zip(&span_ids)
                    .map(|(target, id)| TargetSpan {
                        span_id: id.clone(),
                        if_match_context_hash: sha256_hex(target.text.as_bytes()),
                    })
                    .collect(),
                instructions: instructions.to_string(),
                payload: payload.clone(),
            };

            match self.transport.submit(&request) {
                Ok(GatewayOutcome::Accepted(accepted)) => {
                    info!(
                        request_id = %accepted.request_id,
                        attempts,
                        steps = accepted.plan.steps.len(),
                        "edit accepted"
                    );
                    return Ok(ApplyResult {
                        request_id: accepted.request_id,
                        plan: accepted.plan,
                        server_frontier: accepted.server_frontier,
                        attempts,
                    });
                }
                Ok(GatewayOutcome::Conflict(conflict)) => {
                    warn!(
                        request_id = %request.request_id,
                        attempts,
                        failed = conflict.failed_preconditions.len(),
                        "edit conflicted"
                    );
                    if attempts >= max_attempts {
                        return Err(EditError::Conflict {
                            attempts,
                            message: conflict.message.clone(),
                            conflict,
                        });
                    }
                    match rebase_failed(&targets, &span_ids, &conflict, rebase, relocate) {
                        Some(rebased) => targets = rebased,
                        None => {
                            return Err(EditError::Conflict {
                                attempts,
                                message: "a conflicted span could not be rebased or relocated"
                                    .to_string(),
                                conflict,
                            });
                        }
                    }
                }
                Err(error) => return Err(EditError::Transport(error)),
            }
        }
    }
}

/// Opaque per-request span id: first 16 hex chars of the salted hash.
fn span_id(request_id: &str, span: &Span) -> String {
    let keyed = format!("{request_id}|{}|{}|{}", span.block_id, span.start, span.end);
    sha256_hex(keyed.as_bytes())[..16].to_string()
}

/// Rebuild the target list after a conflict: failed spans get rebased (or
/// relocated), the rest keep their current placement and text. Returns None
/// when any failed span is unrecoverable.
fn rebase_failed(
    targets: &[SpanTarget],
    span_ids: &[String],
    conflict: &GatewayConflict,
    rebase: &dyn RebaseProvider,
    relocate: &dyn RelocationProvider,
) -> Option<Vec<SpanTarget>> {
    let mut rebased = Vec::with_capacity(targets.len());
    for (target, id) in targets.iter().zip(span_ids) {
        let failed = conflict.failed_preconditions.iter().any(|p| &p.span_id == id);
        if !failed {
            rebased.push(target.clone());
            continue;
        }
        match rebase.rebase(target).or_else(|| relocate.relocate(target)) {
            Some(fresh) => {
                debug!(
                    block_id = %fresh.span.block_id,
                    start = fresh.span.start,
                    end = fresh.span.end,
                    "span rebased for retry"
                );
                rebased.push(fresh);
            }
            None => return None,
        }
    }
    Some(rebased)
}

/// Annotation ids whose spans overlap the edit targets, id-sorted.
///
/// Input for the upstream verification step after an accepted edit. Display
/// states are owned by the resolution pass; this function only reads.
pub fn pending_verification_ids(
    store: &AnnotationStore,
    targets: &[SpanTarget],
) -> Vec<AnnotationId> {
    store
        .all()
        .into_iter()
        .filter(|anno| {
            anno.spans.iter().any(|span| {
                targets.iter().any(|t| {
                    t.span.block_id == span.block_id
                        && t.span.start < span.end
                        && span.start < t.span.end
                })
            })
        })
        .map(|anno| anno.id)
        .collect()
}

fn slice_chars(text: &str, start: u32, end: u32) -> String {
    text.chars().skip(start as usize).take(end.saturating_sub(start) as usize).collect()
}
