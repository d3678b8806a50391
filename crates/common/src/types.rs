// Core domain types shared across all Marginalia crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anchor::AnchorToken;

/// Stable identifier of a leaf text block inside a document.
pub type BlockId = String;

/// Identifier of an annotation.
pub type AnnotationId = String;

/// A highlighted span of text inside one block.
///
/// The numeric `start`/`end` offsets are the durable source of truth; the
/// optional anchors are a drift-tolerant refinement resolved first when
/// present. `start < end` always holds once a span has been resolved —
/// unresolvable spans are dropped, never stored reversed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Span {
    pub block_id: BlockId,
    pub start: u32,
    pub end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_anchor: Option<AnchorToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_anchor: Option<AnchorToken>,
}

impl Span {
    pub fn new(block_id: impl Into<BlockId>, start: u32, end: u32) -> Self {
        Self { block_id: block_id.into(), start, end, start_anchor: None, end_anchor: None }
    }
}

/// How strictly an annotation's block order and adjacency must be preserved
/// for the annotation to remain fully active.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ChainPolicy {
    /// Chain members must appear in their declared order, with at most
    /// `max_intervening_blocks` foreign blocks between consecutive members.
    RequiredOrder { max_intervening_blocks: u32 },
    /// Consecutive chain members must be directly adjacent. The gap budget
    /// is fixed at zero; the field is retained for wire compatibility.
    StrictAdjacency {
        #[serde(default)]
        max_intervening_blocks: u32,
    },
    /// Consecutive chain members may be separated by at most
    /// `max_intervening_blocks` foreign blocks, in either direction.
    BoundedGap { max_intervening_blocks: u32 },
}

/// The declared block chain of an annotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chain {
    pub policy: ChainPolicy,
    pub order: Vec<BlockId>,
}

/// Display state of an annotation as computed by the resolution pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisplayAnnoState {
    /// All spans resolved and the chain policy holds.
    Active,
    /// One or more spans unresolved, or the chain policy is violated.
    ActivePartial,
    /// Set by the upstream verification step; passed through unchanged
    /// when resolution is clean.
    ActiveUnverified,
    /// Set by the upstream verification step; passed through unchanged
    /// when resolution is clean.
    BrokenGrace,
    /// Zero resolvable spans. Terminal unless a later pass re-resolves.
    Orphan,
}

impl DisplayAnnoState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::ActivePartial => "active_partial",
            Self::ActiveUnverified => "active_unverified",
            Self::BrokenGrace => "broken_grace",
            Self::Orphan => "orphan",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "active_partial" => Some(Self::ActivePartial),
            "active_unverified" => Some(Self::ActiveUnverified),
            "broken_grace" => Some(Self::BrokenGrace),
            "orphan" => Some(Self::Orphan),
            _ => None,
        }
    }
}

/// A user- or agent-created annotation over one or more blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    pub id: AnnotationId,
    /// The annotation body (comment text, AI note, etc.).
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub chain: Chain,
    /// Durable source of truth for what text is highlighted.
    pub spans: Vec<Span>,
    /// State persisted by the annotation store.
    pub stored_state: DisplayAnnoState,
    /// State computed by the most recent resolution pass.
    pub display_state: DisplayAnnoState,
    /// Whether the upstream verification step has confirmed this annotation
    /// still matches its source text.
    pub verified: bool,
}

impl Annotation {
    /// Create a fresh annotation over the given spans. The chain order is
    /// derived from the span block ids in declaration order.
    pub fn new(content: impl Into<String>, policy: ChainPolicy, spans: Vec<Span>) -> Self {
        let mut order: Vec<BlockId> = Vec::new();
        for span in &spans {
            if !order.contains(&span.block_id) {
                order.push(span.block_id.clone());
            }
        }
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            color: None,
            created_at: Utc::now(),
            chain: Chain { policy, order },
            spans,
            stored_state: DisplayAnnoState::Active,
            display_state: DisplayAnnoState::Active,
            verified: true,
        }
    }
}

/// One span of an annotation mapped into current document coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedRange {
    pub block_id: BlockId,
    /// Document-absolute start position.
    pub from: u32,
    /// Document-absolute end position (exclusive).
    pub to: u32,
}

/// The outcome of resolving one annotation against a document snapshot.
///
/// Transient: rebuilt on every resolution pass, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedAnnotation {
    pub id: AnnotationId,
    pub state: DisplayAnnoState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub ranges: Vec<ResolvedRange>,
    pub chain_order: Vec<BlockId>,
    /// Block ids referenced by spans that could not be resolved.
    pub missing_block_ids: Vec<BlockId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_policy_serializes_tagged() {
        let policy = ChainPolicy::RequiredOrder { max_intervening_blocks: 2 };
        let json = serde_json::to_value(policy).unwrap();
        assert_eq!(json["policy"], "required_order");
        assert_eq!(json["max_intervening_blocks"], 2);

        let back: ChainPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn strict_adjacency_accepts_missing_gap_field() {
        let policy: ChainPolicy = serde_json::from_str(r#"{"policy":"strict_adjacency"}"#).unwrap();
        assert_eq!(policy, ChainPolicy::StrictAdjacency { max_intervening_blocks: 0 });
    }

    #[test]
    fn display_state_round_trips() {
        for state in [
            DisplayAnnoState::Active,
            DisplayAnnoState::ActivePartial,
            DisplayAnnoState::ActiveUnverified,
            DisplayAnnoState::BrokenGrace,
            DisplayAnnoState::Orphan,
        ] {
            assert_eq!(DisplayAnnoState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn display_state_parse_returns_none_for_unknown() {
        assert_eq!(DisplayAnnoState::parse("half_active"), None);
        assert_eq!(DisplayAnnoState::parse(""), None);
    }

    #[test]
    fn new_annotation_derives_chain_order_from_spans() {
        let anno = Annotation::new(
            "note",
            ChainPolicy::BoundedGap { max_intervening_blocks: 1 },
            vec![Span::new("b1", 0, 4), Span::new("b2", 2, 8), Span::new("b1", 10, 12)],
        );
        assert_eq!(anno.chain.order, vec!["b1".to_string(), "b2".to_string()]);
        assert_eq!(anno.display_state, DisplayAnnoState::Active);
        assert!(anno.verified);
    }
}
