//! Gateway: inherits from its GatewayClass and its Namespace.

use anyhow::Result;
use gwpolicy_core::{EffectivePolicySet, GroupKind, ObjRef, Policy, PolicyError, ResourceStore};
use gwpolicy_engine::{merge_across_levels, merge_similar_kind};
use serde::Deserialize;
use tracing::debug;

use crate::{gateway_class, namespace, ResolveCtx};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewaySpec {
    gateway_class_name: String,
}

/// The parts of a Gateway the resolver reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    pub namespace: String,
    pub name: String,
    pub class_name: String,
}

pub fn object_ref(namespace: &str, name: &str) -> ObjRef {
    ObjRef::new(&GroupKind::gateway(), namespace, name)
}

/// Fetch and decode a Gateway; missing objects are [`PolicyError::NotFound`].
pub fn load<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, namespace: &str, name: &str) -> Result<Gateway> {
    let obj = ctx.require(&GroupKind::gateway(), namespace, name)?;
    let spec = obj.get("spec").cloned().unwrap_or_default();
    let spec: GatewaySpec = serde_json::from_value(spec).map_err(|e| PolicyError::Decode {
        object: object_ref(namespace, name).to_string(),
        reason: format!("spec: {}", e),
    })?;
    Ok(Gateway { namespace: namespace.to_string(), name: name.to_string(), class_name: spec.gateway_class_name })
}

pub fn attached_policies<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, namespace: &str, name: &str) -> Vec<Policy> {
    ctx.attached_to(&object_ref(namespace, name))
}

/// Own, namespace and class policies, in that order, unmerged.
pub fn all_policies<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, ns: &str, name: &str) -> Result<Vec<Policy>> {
    let gw = load(ctx, ns, name)?;
    let mut out = attached_policies(ctx, ns, name);
    out.extend(namespace::attached_policies(ctx, ns));
    out.extend(gateway_class::attached_policies(ctx, &gw.class_name));
    Ok(out)
}

pub fn effective_policies<S: ResourceStore + ?Sized>(
    ctx: &ResolveCtx<'_, S>,
    ns: &str,
    name: &str,
) -> Result<EffectivePolicySet> {
    let gw = load(ctx, ns, name)?;
    let own = merge_similar_kind(&attached_policies(ctx, ns, name))?;
    let ns_level = namespace::effective_policies(ctx, ns)?;
    let class = gateway_class::effective_policies(ctx, &gw.class_name)?;
    debug!(gateway = %name, ns = %ns, class = %gw.class_name, own = own.len(), namespace = ns_level.len(), class_policies = class.len(), "folding gateway levels");

    let acc = merge_across_levels(&class, &ns_level)?;
    Ok(merge_across_levels(&acc, &own)?)
}
