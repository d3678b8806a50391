// Edit-gateway request/response types for AI-driven document mutations.
//
// The engine only defines the JSON shapes; transport is pluggable. An edit
// request carries per-span content-hash preconditions. The gateway either
// accepts it (returning an edit plan to apply locally) or rejects it with a
// conflict listing the spans whose text changed underneath the request.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::BlockId;

pub const CURRENT_PROTOCOL_VERSION: &str = "marginalia-gateway.v1";

/// One edit target with its optimistic-concurrency precondition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetSpan {
    /// Opaque id derived from `(request_id, block_id, start, end)`.
    pub span_id: String,
    /// SHA-256 hex of the span's resolved text at request-build time.
    pub if_match_context_hash: String,
}

/// An edit request submitted to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayRequest {
    pub protocol_version: String,
    pub request_id: String,
    /// CRDT frontier the spans were resolved against.
    pub doc_frontier_tag: String,
    pub target_spans: Vec<TargetSpan>,
    /// Natural-language instructions for the edit.
    pub instructions: String,
    /// Opaque request payload forwarded unchanged on retry.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl GatewayRequest {
    pub fn new(
        doc_frontier_tag: impl Into<String>,
        target_spans: Vec<TargetSpan>,
        instructions: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            protocol_version: CURRENT_PROTOCOL_VERSION.to_string(),
            request_id: Uuid::new_v4().to_string(),
            doc_frontier_tag: doc_frontier_tag.into(),
            target_spans,
            instructions: instructions.into(),
            payload,
        }
    }
}

/// A precondition the gateway found violated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedPrecondition {
    pub span_id: String,
    /// The hash the gateway computed for the span's current text.
    pub actual_hash: String,
}

/// 409 response body: the request's preconditions no longer hold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConflict {
    pub request_id: String,
    pub message: String,
    pub failed_preconditions: Vec<FailedPrecondition>,
    /// The gateway's current frontier, to re-resolve against.
    pub server_frontier: String,
}

/// One replacement step of an accepted edit plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditStep {
    pub block_id: BlockId,
    pub start: u32,
    pub end: u32,
    pub replacement: String,
}

/// The edit plan returned by the gateway on success, applied through the
/// normal document-transaction path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditPlan {
    pub steps: Vec<EditStep>,
}

/// Success response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayAccepted {
    pub request_id: String,
    pub plan: EditPlan,
    pub server_frontier: String,
}

/// Final outcome of a conflict-aware edit submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    /// Request id of the attempt that was accepted.
    pub request_id: String,
    pub plan: EditPlan,
    pub server_frontier: String,
    /// Total submissions made (1 = no conflict, 2 = one rebase).
    pub attempts: u32,
}
