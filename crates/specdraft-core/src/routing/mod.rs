//! Routing of agent text
//!
//! Discovery output is stripped of thinking annotations first, then split at
//! the first valid `@review:` marker. Stripping always runs before splitting:
//! annotation blocks may contain marker-like text that must never hand off.

mod annotations;
mod splitter;

pub use annotations::strip_thinking;
pub use splitter::{
    extract_payload, has_review_marker, split, MarkerKind, SplitResult, SplitStats, SplitSummary,
};
