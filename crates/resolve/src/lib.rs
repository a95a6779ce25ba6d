//! gwpolicy resolvers: effective policies per object kind.
//!
//! Each kind has its own module of free functions. Descendants call their
//! ancestors' resolvers explicitly:
//!
//! - GatewayClass, Namespace: only their own attached policies.
//! - Gateway: GatewayClass < Namespace < Gateway.
//! - HTTPRoute: per parent Gateway, Gateway effective < Namespace < HTTPRoute.
//! - Backend: per Gateway, referencing HTTPRoutes (as peers) < Namespace < Backend.

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{Context, Result};
use gwpolicy_core::{
    AnchoredPolicySets, EffectivePolicySet, GroupKind, ObjRef, Policy, PolicyError, ResourceStore,
};
use gwpolicy_engine::PolicyManager;
use metrics::histogram;
use serde_json::{Map, Value as Json};
use tracing::info;

pub mod backend;
pub mod gateway;
pub mod gateway_class;
pub mod http_route;
pub mod namespace;

/// What a resolver needs: the object snapshot and the loaded policies.
pub struct ResolveCtx<'a, S: ResourceStore + ?Sized> {
    pub store: &'a S,
    pub policies: &'a PolicyManager,
}

impl<'a, S: ResourceStore + ?Sized> ResolveCtx<'a, S> {
    pub fn new(store: &'a S, policies: &'a PolicyManager) -> Self { Self { store, policies } }

    pub fn attached_to(&self, obj: &ObjRef) -> Vec<Policy> { self.policies.attached_to(obj) }

    /// Fetch an object or fail with [`PolicyError::NotFound`].
    pub fn require(&self, kind: &GroupKind, namespace: &str, name: &str) -> Result<Json> {
        let obj = self
            .store
            .get_object(kind, namespace, name)
            .with_context(|| format!("getting {} {}/{}", kind, namespace, name))?;
        obj.ok_or_else(|| {
            PolicyError::NotFound { kind: kind.clone(), namespace: namespace.to_string(), name: name.to_string() }.into()
        })
    }
}

/// The kinds that have a resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    GatewayClass,
    Namespace,
    Gateway,
    HttpRoute,
    /// Any backend kind referenced from route rules; usually core `Service`.
    /// Cluster-scoped backends are addressed with an empty namespace.
    Backend { kind: GroupKind, namespaced: bool },
}

impl ObjectKind {
    pub fn group_kind(&self) -> GroupKind {
        match self {
            ObjectKind::GatewayClass => GroupKind::gateway_class(),
            ObjectKind::Namespace => GroupKind::namespace(),
            ObjectKind::Gateway => GroupKind::gateway(),
            ObjectKind::HttpRoute => GroupKind::http_route(),
            ObjectKind::Backend { kind, .. } => kind.clone(),
        }
    }

    /// Core `Service` backend.
    pub fn service() -> Self { ObjectKind::Backend { kind: GroupKind::service(), namespaced: true } }

    pub fn namespaced(&self) -> bool {
        match self {
            ObjectKind::GatewayClass | ObjectKind::Namespace => false,
            ObjectKind::Backend { namespaced, .. } => *namespaced,
            ObjectKind::Gateway | ObjectKind::HttpRoute => true,
        }
    }
}

/// Effective policies; anchored kinds are partitioned by Gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Effective {
    Single(EffectivePolicySet),
    Anchored(AnchoredPolicySets),
}

impl Effective {
    pub fn is_empty(&self) -> bool {
        match self {
            Effective::Single(s) => s.is_empty(),
            Effective::Anchored(a) => a.is_empty(),
        }
    }

    /// Display view: kind id (under anchor where applicable) to flattened spec.
    pub fn to_view(&self) -> Json {
        fn set_view(set: &EffectivePolicySet) -> Json {
            Json::Object(set.iter().map(|(id, p)| (id.to_string(), p.effective_spec())).collect::<Map<_, _>>())
        }
        match self {
            Effective::Single(s) => set_view(s),
            Effective::Anchored(a) => Json::Object(a.iter().map(|(anchor, s)| (anchor.clone(), set_view(s))).collect()),
        }
    }
}

fn scope_ns<'n>(kind: &ObjectKind, namespace: &'n str) -> &'n str {
    if kind.namespaced() { namespace } else { "" }
}

/// Policies directly attached to one object.
pub fn attached_policies<S: ResourceStore + ?Sized>(
    ctx: &ResolveCtx<'_, S>,
    kind: &ObjectKind,
    namespace: &str,
    name: &str,
) -> Vec<Policy> {
    ctx.attached_to(&ObjRef::new(&kind.group_kind(), scope_ns(kind, namespace), name))
}

/// Every policy that can affect the object, unmerged, nearest level first.
pub fn all_policies<S: ResourceStore + ?Sized>(
    ctx: &ResolveCtx<'_, S>,
    kind: &ObjectKind,
    namespace: &str,
    name: &str,
) -> Result<Vec<Policy>> {
    match kind {
        ObjectKind::GatewayClass => Ok(gateway_class::attached_policies(ctx, name)),
        ObjectKind::Namespace => Ok(namespace::attached_policies(ctx, name)),
        ObjectKind::Gateway => gateway::all_policies(ctx, namespace, name),
        ObjectKind::HttpRoute => http_route::all_policies(ctx, namespace, name),
        ObjectKind::Backend { kind: gk, .. } => backend::all_policies(ctx, &ObjRef::new(gk, scope_ns(kind, namespace), name)),
    }
}

/// Effective policies of one object. The object itself must exist in the store.
pub fn effective_policies<S: ResourceStore + ?Sized>(
    ctx: &ResolveCtx<'_, S>,
    kind: &ObjectKind,
    namespace: &str,
    name: &str,
) -> Result<Effective> {
    let t0 = Instant::now();
    let ns = scope_ns(kind, namespace);
    ctx.require(&kind.group_kind(), ns, name)?;
    let out = match kind {
        ObjectKind::GatewayClass => Effective::Single(gateway_class::effective_policies(ctx, name)?),
        ObjectKind::Namespace => Effective::Single(namespace::effective_policies(ctx, name)?),
        ObjectKind::Gateway => Effective::Single(gateway::effective_policies(ctx, ns, name)?),
        ObjectKind::HttpRoute => Effective::Anchored(http_route::effective_policies(ctx, ns, name)?),
        ObjectKind::Backend { kind: gk, .. } => Effective::Anchored(backend::effective_policies(ctx, &ObjRef::new(gk, ns, name))?),
    };
    histogram!("policy_resolve_ms", t0.elapsed().as_secs_f64() * 1000.0);
    info!(kind = %kind.group_kind(), ns = %ns, name = %name, took_ms = %t0.elapsed().as_millis(), "resolved effective policies");
    Ok(out)
}
