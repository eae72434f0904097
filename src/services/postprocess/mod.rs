//! Post-processing pipeline: citation collection and injection, metadata
//! aggregation, and optional claim verification.

pub mod citations;
pub mod metadata;
pub mod verification;

pub use citations::{
    collect_citations, format_sources, inject_citation_context, render_citation_list,
};
pub use metadata::{assemble_metadata, detect_provider, resolve_provider};
pub use verification::verify_claims;
