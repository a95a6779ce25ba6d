//! Error taxonomy shared by the engine and resolvers.

use crate::{GroupKind, PolicyKindId};

/// Failures specific to policy classification, decoding, merging and lookup.
///
/// Library entry points return `anyhow::Result`; these travel inside it and can
/// be recovered with `downcast_ref::<PolicyError>()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("classification: {definition}: {reason}")]
    Classification { definition: String, reason: String },
    #[error("decode: {object}: {reason}")]
    Decode { object: String, reason: String },
    #[error("cannot merge policies of different kind; kind1={left}, kind2={right}")]
    KindMismatch { left: PolicyKindId, right: PolicyKindId },
    #[error("not_found: {kind} {namespace}/{name}")]
    NotFound { kind: GroupKind, namespace: String, name: String },
}
