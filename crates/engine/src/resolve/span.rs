// Span resolution: map one stored span into current block coordinates.
//
// Anchors are tried first when present; stored numeric offsets are the
// fallback when an anchor is absent or fails to decode. Resolved offsets
// clamp into the block's current length, so minor drift from concurrent
// edits degrades to a clamped range instead of discarding the annotation.
// A span is rejected outright (None) only when its block is gone, an
// anchor resolves to a different block than the span declares, or the
// range inverts after clamping.

use marginalia_common::anchor::{decode_absolute, AnchorToken};
use marginalia_common::types::Span;

use crate::doc::CrdtRuntime;
use crate::index::BlockIndex;

/// Block-relative offsets of a successfully resolved span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOffsets {
    pub start: u32,
    pub end: u32,
}

/// Outcome of resolving one endpoint anchor.
enum EndpointAnchor {
    /// No anchor, or the anchor failed to decode: use the stored offset.
    Fallback,
    /// The anchor resolved inside the span's declared block.
    Offset(u32),
    /// The anchor resolved into a different block than the span declares.
    WrongBlock,
}

fn resolve_endpoint(
    anchor: Option<&AnchorToken>,
    declared_block: &str,
    runtime: &dyn CrdtRuntime,
) -> EndpointAnchor {
    let Some(token) = anchor else {
        return EndpointAnchor::Fallback;
    };

    let decoded = if token.is_absolute() {
        decode_absolute(token)
    } else {
        runtime.resolve_cursor(token)
    };

    match decoded {
        None => EndpointAnchor::Fallback,
        Some(pos) if pos.block_id == declared_block => EndpointAnchor::Offset(pos.offset),
        Some(_) => EndpointAnchor::WrongBlock,
    }
}

/// Resolve `span` against the current block index.
pub fn resolve_span(
    span: &Span,
    index: &BlockIndex,
    runtime: &dyn CrdtRuntime,
) -> Option<ResolvedOffsets> {
    let entry = index.get(&span.block_id)?;

    let start = match resolve_endpoint(span.start_anchor.as_ref(), &span.block_id, runtime) {
        EndpointAnchor::Fallback => span.start,
        EndpointAnchor::Offset(offset) => offset,
        EndpointAnchor::WrongBlock => return None,
    };
    let end = match resolve_endpoint(span.end_anchor.as_ref(), &span.block_id, runtime) {
        EndpointAnchor::Fallback => span.end,
        EndpointAnchor::Offset(offset) => offset,
        EndpointAnchor::WrongBlock => return None,
    };

    let start = start.min(entry.len);
    let end = end.min(entry.len);
    if end <= start {
        return None;
    }
    Some(ResolvedOffsets { start, end })
}
