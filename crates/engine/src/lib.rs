// marginalia-engine: annotation anchoring and the conflict-aware edit protocol.
//
// One document transaction drives one synchronous resolution pass:
// BlockIndex rebuild (or cache hit) → annotation resolution → decoration
// cache → conditional chain healing. The AI edit flow runs independently
// through the gateway client with content-hash preconditions and a bounded
// rebase retry.

pub mod config;
pub mod decor;
pub mod doc;
pub mod gateway;
pub mod gesture;
pub mod hash;
pub mod heal;
pub mod index;
pub mod pipeline;
pub mod resolve;
pub mod store;
