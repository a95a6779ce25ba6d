//! gwpolicy engine: classify policy kinds, index attachments, merge documents.

#![forbid(unsafe_code)]

pub mod index;
pub mod merge;
pub mod registry;

pub use index::{PolicyManager, PolicySummary, RejectedPolicy};
pub use merge::{merge_across_levels, merge_same_kind, merge_same_level, merge_similar_kind};
pub use registry::{classify, Classification, PolicyKindRegistry};
