// Drag-gesture protocol for annotation span editing.
//
// A gesture is begin → preview* → (commit | abort). Previews are held on
// the handle only; the store sees exactly one durable write, at commit.
// Abort restores nothing because nothing was written — it just hands back
// the pre-gesture snapshot so the caller can verify that invariant.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use marginalia_common::types::{Annotation, AnnotationId, Span};

use crate::store::AnnotationStore;

#[derive(Debug, Error)]
pub enum GestureError {
    #[error("annotation not found: {0}")]
    AnnotationMissing(AnnotationId),
}

/// Live gesture state. Dropped without `commit`, the gesture never happened.
#[derive(Debug, Clone)]
pub struct GestureHandle {
    pub id: Uuid,
    pub annotation_id: AnnotationId,
    origin: Annotation,
    preview_spans: Option<Vec<Span>>,
    pub started_at: DateTime<Utc>,
}

/// What the renderer shows while a gesture is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewState {
    pub annotation_id: AnnotationId,
    pub spans: Vec<Span>,
    /// The original placement renders ghosted while the preview differs.
    pub ghost_source: bool,
}

/// Start a gesture over an existing annotation.
pub fn begin(store: &AnnotationStore, annotation_id: &str) -> Result<GestureHandle, GestureError> {
    let origin = store
        .get(annotation_id)
        .cloned()
        .ok_or_else(|| GestureError::AnnotationMissing(annotation_id.to_string()))?;

    let handle = GestureHandle {
        id: Uuid::new_v4(),
        annotation_id: annotation_id.to_string(),
        origin,
        preview_spans: None,
        started_at: Utc::now(),
    };
    debug!(gesture_id = %handle.id, annotation_id, "gesture started");
    Ok(handle)
}

/// Update the preview. Touches only the handle, never the store.
pub fn preview(handle: &mut GestureHandle, spans: Vec<Span>) -> PreviewState {
    let ghost_source = spans != handle.origin.spans;
    handle.preview_spans = Some(spans.clone());
    PreviewState { annotation_id: handle.annotation_id.clone(), spans, ghost_source }
}

/// Finish the gesture, writing the previewed spans to the store.
///
/// A gesture with no preview (or one identical to the origin) commits
/// nothing. Returns true if a durable write happened.
pub fn commit(handle: GestureHandle, store: &mut AnnotationStore) -> bool {
    let Some(spans) = handle.preview_spans else {
        debug!(gesture_id = %handle.id, "gesture committed with no preview; no write");
        return false;
    };
    if spans == handle.origin.spans {
        debug!(gesture_id = %handle.id, "gesture preview matched origin; no write");
        return false;
    }

    let mut updated = handle.origin;
    updated.chain.order = derive_order(&spans);
    updated.spans = spans;
    debug!(gesture_id = %handle.id, annotation_id = %updated.id, "gesture committed");
    store.upsert(updated);
    true
}

/// Discard the gesture. Returns the untouched pre-gesture annotation.
pub fn abort(handle: GestureHandle) -> Annotation {
    debug!(gesture_id = %handle.id, annotation_id = %handle.annotation_id, "gesture aborted");
    handle.origin
}

/// Chain order follows span declaration order, first occurrence wins.
fn derive_order(spans: &[Span]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for span in spans {
        if !order.contains(&span.block_id) {
            order.push(span.block_id.clone());
        }
    }
    order
}
