//! GatewayClass: the root of the hierarchy; only its own policies apply.

use anyhow::Result;
use gwpolicy_core::{EffectivePolicySet, GroupKind, ObjRef, Policy, ResourceStore};
use gwpolicy_engine::merge_similar_kind;

use crate::ResolveCtx;

pub fn object_ref(name: &str) -> ObjRef {
    ObjRef::new(&GroupKind::gateway_class(), "", name)
}

pub fn attached_policies<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, name: &str) -> Vec<Policy> {
    ctx.attached_to(&object_ref(name))
}

pub fn effective_policies<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, name: &str) -> Result<EffectivePolicySet> {
    Ok(merge_similar_kind(&attached_policies(ctx, name))?)
}
