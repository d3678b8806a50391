// marginalia-common: shared types and wire shapes for the Marginalia workspace

pub mod anchor;
pub mod protocol;
pub mod types;
