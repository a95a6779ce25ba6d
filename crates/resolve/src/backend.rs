//! Backend: policies reach it through every HTTPRoute that forwards to it.

use anyhow::{Context, Result};
use gwpolicy_core::{AnchoredPolicySets, EffectivePolicySet, GroupKind, ObjRef, Policy, ResourceStore};
use gwpolicy_engine::{merge_across_levels, merge_same_level, merge_similar_kind};
use tracing::debug;

use crate::http_route::{self, HttpRoute};
use crate::{namespace, ResolveCtx};

pub fn attached_policies<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, backend: &ObjRef) -> Vec<Policy> {
    ctx.attached_to(backend)
}

/// All HTTPRoutes, in any namespace, with a rule forwarding to `backend`.
///
/// Any HTTPRoute that fails to decode fails the scan.
pub fn routes_for_backend<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, backend: &ObjRef) -> Result<Vec<HttpRoute>> {
    let raw = ctx.store.list_objects(&GroupKind::http_route(), None).context("listing HTTPRoutes")?;
    let mut out = Vec::new();
    for obj in &raw {
        let route = HttpRoute::decode(obj)?;
        if route.references_backend(backend) { out.push(route); }
    }
    debug!(backend = %backend, routes = out.len(), "routes referencing backend");
    Ok(out)
}

/// Own, namespace and every referencing route's policies, unmerged.
pub fn all_policies<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, backend: &ObjRef) -> Result<Vec<Policy>> {
    let mut out = attached_policies(ctx, backend);
    if !backend.namespace.is_empty() {
        out.extend(namespace::attached_policies(ctx, &backend.namespace));
    }
    for route in routes_for_backend(ctx, backend)? {
        out.extend(http_route::all_policies(ctx, &route.namespace, &route.name)?);
    }
    Ok(out)
}

pub fn effective_policies<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, backend: &ObjRef) -> Result<AnchoredPolicySets> {
    effective_policies_with(ctx, backend, |ns, name| http_route::effective_policies(ctx, ns, name))
}

/// Like [`effective_policies`], with the route resolver supplied by the caller.
pub fn effective_policies_with<S, F>(ctx: &ResolveCtx<'_, S>, backend: &ObjRef, mut resolve_route: F) -> Result<AnchoredPolicySets>
where
    S: ResourceStore + ?Sized,
    F: FnMut(&str, &str) -> Result<AnchoredPolicySets>,
{
    let own = merge_similar_kind(&attached_policies(ctx, backend))?;
    // Cluster-scoped backends have no namespace level.
    let ns_level = if backend.namespace.is_empty() {
        EffectivePolicySet::new()
    } else {
        namespace::effective_policies(ctx, &backend.namespace)?
    };

    // Routes are peers: fold them together per Gateway before applying the lower levels.
    let mut out = AnchoredPolicySets::new();
    for route in routes_for_backend(ctx, backend)? {
        for (anchor, set) in resolve_route(&route.namespace, &route.name)? {
            let merged = match out.get(&anchor) {
                Some(existing) => merge_same_level(existing, &set)?,
                None => set,
            };
            out.insert(anchor, merged);
        }
    }

    for (anchor, set) in out.iter_mut() {
        debug!(backend = %backend, gateway = %anchor, routes_level = set.len(), "folding backend levels");
        let acc = merge_across_levels(set, &ns_level)?;
        *set = merge_across_levels(&acc, &own)?;
    }
    Ok(out)
}
