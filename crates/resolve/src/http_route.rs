//! HTTPRoute: one effective set per parent Gateway.

use anyhow::Result;
use gwpolicy_core::{
    AnchorId, AnchoredPolicySets, EffectivePolicySet, GroupKind, ObjRef, Policy, PolicyError, ResourceStore,
    GATEWAY_GROUP,
};
use gwpolicy_engine::{merge_across_levels, merge_similar_kind};
use serde::Deserialize;
use serde_json::Value as Json;
use smallvec::SmallVec;
use tracing::debug;

use crate::{gateway, namespace, ResolveCtx};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParentRef {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendRef {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteRule {
    #[serde(default)]
    backend_refs: Vec<BackendRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteSpec {
    #[serde(default)]
    parent_refs: SmallVec<[ParentRef; 2]>,
    #[serde(default)]
    rules: Vec<RouteRule>,
}

/// The parts of an HTTPRoute the resolvers read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRoute {
    pub namespace: String,
    pub name: String,
    pub parent_refs: SmallVec<[ParentRef; 2]>,
    pub backend_refs: Vec<BackendRef>,
}

impl HttpRoute {
    pub fn decode(obj: &Json) -> Result<Self, PolicyError> {
        let reference = ObjRef::of(obj).ok_or_else(|| PolicyError::Decode {
            object: gwpolicy_core::UNKNOWN.to_string(),
            reason: "HTTPRoute missing apiVersion, kind or metadata.name".into(),
        })?;
        let spec: RouteSpec = match obj.get("spec") {
            Some(spec) => serde_json::from_value(spec.clone())
                .map_err(|e| PolicyError::Decode { object: reference.to_string(), reason: format!("spec: {}", e) })?,
            None => RouteSpec::default(),
        };
        Ok(Self {
            namespace: reference.namespace,
            name: reference.name,
            parent_refs: spec.parent_refs,
            backend_refs: spec.rules.into_iter().flat_map(|r| r.backend_refs).collect(),
        })
    }

    /// `(namespace, name)` of every parent Gateway, defaults applied, in declaration order.
    pub fn parent_gateways(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        for p in &self.parent_refs {
            let group = p.group.as_deref().unwrap_or(GATEWAY_GROUP);
            let kind = p.kind.as_deref().unwrap_or("Gateway");
            if group != GATEWAY_GROUP || kind != "Gateway" {
                debug!(route = %self.name, group, kind, parent = %p.name, "ignoring non-Gateway parentRef");
                continue;
            }
            let key = (p.namespace.clone().unwrap_or_else(|| self.namespace.clone()), p.name.clone());
            if !out.contains(&key) { out.push(key); }
        }
        out
    }

    /// Whether any rule forwards to `backend`. Unset group is core, unset kind is Service.
    ///
    /// A backend with an empty namespace is cluster-scoped and matches by name alone.
    pub fn references_backend(&self, backend: &ObjRef) -> bool {
        self.backend_refs.iter().any(|b| {
            b.group.as_deref().unwrap_or("") == backend.group
                && b.kind.as_deref().unwrap_or("Service") == backend.kind
                && b.name == backend.name
                && (backend.namespace.is_empty()
                    || b.namespace.as_deref().filter(|ns| !ns.is_empty()).unwrap_or(&self.namespace) == backend.namespace)
        })
    }
}

pub fn object_ref(namespace: &str, name: &str) -> ObjRef {
    ObjRef::new(&GroupKind::http_route(), namespace, name)
}

pub fn anchor_id(namespace: &str, name: &str) -> AnchorId {
    format!("{}/{}", namespace, name)
}

pub fn load<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, namespace: &str, name: &str) -> Result<HttpRoute> {
    let obj = ctx.require(&GroupKind::http_route(), namespace, name)?;
    Ok(HttpRoute::decode(&obj)?)
}

pub fn attached_policies<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, namespace: &str, name: &str) -> Vec<Policy> {
    ctx.attached_to(&object_ref(namespace, name))
}

/// Own, namespace and every parent Gateway's policies, unmerged.
pub fn all_policies<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, ns: &str, name: &str) -> Result<Vec<Policy>> {
    let route = load(ctx, ns, name)?;
    let mut out = attached_policies(ctx, ns, name);
    out.extend(namespace::attached_policies(ctx, ns));
    for (gw_ns, gw_name) in route.parent_gateways() {
        out.extend(gateway::all_policies(ctx, &gw_ns, &gw_name)?);
    }
    Ok(out)
}

pub fn effective_policies<S: ResourceStore + ?Sized>(
    ctx: &ResolveCtx<'_, S>,
    ns: &str,
    name: &str,
) -> Result<AnchoredPolicySets> {
    effective_policies_with(ctx, ns, name, |gw_ns, gw_name| gateway::effective_policies(ctx, gw_ns, gw_name))
}

/// Like [`effective_policies`], with the parent Gateway resolver supplied by the caller.
pub fn effective_policies_with<S, F>(
    ctx: &ResolveCtx<'_, S>,
    ns: &str,
    name: &str,
    mut resolve_parent: F,
) -> Result<AnchoredPolicySets>
where
    S: ResourceStore + ?Sized,
    F: FnMut(&str, &str) -> Result<EffectivePolicySet>,
{
    let route = load(ctx, ns, name)?;
    let own = merge_similar_kind(&attached_policies(ctx, ns, name))?;
    let ns_level = namespace::effective_policies(ctx, ns)?;

    let mut out = AnchoredPolicySets::new();
    for (gw_ns, gw_name) in route.parent_gateways() {
        let parent = resolve_parent(&gw_ns, &gw_name)?;
        debug!(route = %name, ns = %ns, gateway = %anchor_id(&gw_ns, &gw_name), parent = parent.len(), "folding route levels");
        let acc = merge_across_levels(&parent, &ns_level)?;
        out.insert(anchor_id(&gw_ns, &gw_name), merge_across_levels(&acc, &own)?);
    }
    Ok(out)
}
