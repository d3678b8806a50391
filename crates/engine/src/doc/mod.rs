// Document-tree accessor and CRDT runtime seams.
//
// The engine never reaches into the replication layer directly. It consumes
// an immutable `DocSnapshot` (a block tree tagged with a monotonically
// increasing revision, which stands in for object identity when keying
// caches) and a `CrdtRuntime` (cursor encode/resolve plus the frontier tag
// used as an edit precondition). `BlockDoc` is the bundled yrs-backed
// implementation of both seams.

pub mod block_doc;

pub use block_doc::BlockDoc;

use marginalia_common::anchor::{AnchorPos, AnchorToken};
use marginalia_common::types::BlockId;

/// Monotonic revision counter identifying one document-tree instance.
///
/// Bumped on every transaction, structural or not. Two snapshots with the
/// same revision are the same tree; equal content under different revisions
/// is still a different tree for caching purposes.
pub type DocRevision = u64;

/// A node of the snapshot tree. Only leaf text blocks carrying a stable
/// block id participate in indexing; containers contribute geometry only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocNode {
    Container { children: Vec<DocNode> },
    Leaf { block_id: Option<BlockId>, text: String },
}

impl DocNode {
    pub fn leaf(block_id: impl Into<BlockId>, text: impl Into<String>) -> Self {
        Self::Leaf { block_id: Some(block_id.into()), text: text.into() }
    }

    /// A text leaf without a stable id (never indexed).
    pub fn anonymous_leaf(text: impl Into<String>) -> Self {
        Self::Leaf { block_id: None, text: text.into() }
    }

    pub fn container(children: Vec<DocNode>) -> Self {
        Self::Container { children }
    }
}

/// A leaf text block as seen during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafView<'a> {
    pub block_id: Option<&'a str>,
    pub text: &'a str,
    /// Document-absolute position where the block's content starts.
    pub content_start: u32,
}

/// An immutable view of the document tree at one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSnapshot {
    revision: DocRevision,
    root: DocNode,
}

impl DocSnapshot {
    pub fn new(revision: DocRevision, root: DocNode) -> Self {
        Self { revision, root }
    }

    /// Convenience constructor for a flat document of identified blocks.
    pub fn from_blocks(revision: DocRevision, blocks: Vec<(BlockId, String)>) -> Self {
        let children =
            blocks.into_iter().map(|(id, text)| DocNode::leaf(id, text)).collect();
        Self { revision, root: DocNode::Container { children } }
    }

    pub fn revision(&self) -> DocRevision {
        self.revision
    }

    pub fn root(&self) -> &DocNode {
        &self.root
    }

    /// Depth-first traversal over leaf text blocks.
    ///
    /// Position model: entering any non-root node costs one position,
    /// leaving it costs one, and each character of leaf text costs one. The
    /// root container itself is free, so the first top-level node starts at
    /// position 0 and a leaf entered at `p` has its content start at `p + 1`.
    pub fn visit_leaves(&self, visit: &mut dyn FnMut(LeafView<'_>)) {
        // The root is a boundary, not a node: walk its children directly.
        match &self.root {
            DocNode::Container { children } => {
                let mut pos = 0u32;
                for child in children {
                    pos = visit_node(child, pos, visit);
                }
            }
            leaf @ DocNode::Leaf { .. } => {
                visit_node(leaf, 0, visit);
            }
        }
    }

    /// Text of the first leaf carrying `block_id`, in traversal order.
    /// Later duplicates are invisible here, matching the block index.
    pub fn block_text(&self, block_id: &str) -> Option<String> {
        let mut found: Option<String> = None;
        self.visit_leaves(&mut |leaf| {
            if found.is_none() && leaf.block_id == Some(block_id) {
                found = Some(leaf.text.to_string());
            }
        });
        found
    }
}

fn visit_node(node: &DocNode, pos: u32, visit: &mut dyn FnMut(LeafView<'_>)) -> u32 {
    match node {
        DocNode::Container { children } => {
            let mut inner = pos + 1;
            for child in children {
                inner = visit_node(child, inner, visit);
            }
            inner + 1
        }
        DocNode::Leaf { block_id, text } => {
            let content_start = pos + 1;
            visit(LeafView { block_id: block_id.as_deref(), text, content_start });
            content_start + text.chars().count() as u32 + 1
        }
    }
}

/// The replication layer's cursor surface, treated as a black box.
pub trait CrdtRuntime {
    /// Encode a stable cursor at `(block_id, offset)`. `None` when the
    /// block is unknown to the runtime.
    fn encode_cursor(&self, block_id: &str, offset: u32) -> Option<AnchorToken>;

    /// Resolve a cursor token against the current document state. `None`
    /// for malformed tokens or positions whose block no longer exists.
    fn resolve_cursor(&self, token: &AnchorToken) -> Option<AnchorPos>;

    /// Replication version marker identifying the current document state.
    fn frontier_tag(&self) -> String;
}

/// Runtime for hosts without a replication layer: no cursor support, so
/// spans resolve through their stored offsets only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRuntime;

impl CrdtRuntime for NullRuntime {
    fn encode_cursor(&self, _block_id: &str, _offset: u32) -> Option<AnchorToken> {
        None
    }

    fn resolve_cursor(&self, _token: &AnchorToken) -> Option<AnchorPos> {
        None
    }

    fn frontier_tag(&self) -> String {
        "local".to_string()
    }
}
