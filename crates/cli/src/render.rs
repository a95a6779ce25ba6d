//! Table rows and describe documents for gwpolicyctl.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use gwpolicy_core::{meta_str, to_refs, GroupKind, InMemoryStore, ObjRef, Policy, PolicyKindDescriptor, ResourceStore};
use gwpolicy_engine::{PolicyKindRegistry, PolicyManager};
use gwpolicy_resolve::{attached_policies, effective_policies, http_route::HttpRoute, ObjectKind, ResolveCtx};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRow {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub target_name: String,
    pub target_kind: String,
    pub policy_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCrdRow {
    pub name: String,
    pub group: String,
    pub kind: String,
    pub policy_type: &'static str,
    pub scope: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRow {
    pub namespace: String,
    pub name: String,
    pub hostnames: Vec<String>,
    pub parent_refs: usize,
    pub age: String,
}

/// One object with its direct and effective policies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Described {
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, Json>,
    pub directly_attached_policies: Vec<ObjRef>,
    pub effective_policies: Json,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribedPolicy {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub group: String,
    pub kind: String,
    pub inherited: bool,
    pub target_ref: Json,
    pub spec: Json,
    pub effective_spec: Json,
}

fn policy_type(inherited: bool) -> &'static str {
    if inherited { "Inherited" } else { "Direct" }
}

/// Cluster-scoped entries are visible from every namespace.
fn visible(item_ns: &str, ns: Option<&str>) -> bool {
    ns.map_or(true, |ns| item_ns.is_empty() || item_ns == ns)
}

pub fn policy_rows(pm: &PolicyManager, ns: Option<&str>) -> Vec<PolicyRow> {
    pm.policy_summaries(None)
        .into_iter()
        .filter(|s| visible(&s.policy.namespace, ns))
        .map(|s| PolicyRow {
            name: s.policy.name,
            namespace: s.policy.namespace,
            kind: GroupKind::new(s.policy.group, s.policy.kind).to_string(),
            target_name: s.target.name,
            target_kind: s.target.kind,
            policy_type: policy_type(s.inherited),
        })
        .collect()
}

pub fn policy_crd_rows(registry: &PolicyKindRegistry) -> Vec<PolicyCrdRow> {
    registry
        .iter()
        .map(|d: &PolicyKindDescriptor| PolicyCrdRow {
            name: format!("{}.{}", d.plural, d.group),
            group: d.group.clone(),
            kind: d.kind.clone(),
            policy_type: policy_type(d.inherited),
            scope: if d.namespaced { "Namespaced" } else { "Cluster" },
        })
        .collect()
}

pub fn http_route_rows<S: ResourceStore + ?Sized>(store: &S, ns: Option<&str>, now: DateTime<Utc>) -> Result<Vec<HttpRouteRow>> {
    let mut rows = Vec::new();
    for obj in store.list_objects(&GroupKind::http_route(), ns)? {
        let route = match HttpRoute::decode(&obj) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "skipping undecodable HTTPRoute");
                continue;
            }
        };
        let hostnames = obj
            .get("spec")
            .and_then(|s| s.get("hostnames"))
            .and_then(|h| h.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        rows.push(HttpRouteRow {
            namespace: route.namespace,
            name: route.name,
            hostnames,
            parent_refs: route.parent_refs.len(),
            age: render_age(created_at(&obj), now),
        });
    }
    rows.sort_by(|a, b| a.namespace.cmp(&b.namespace).then(a.name.cmp(&b.name)));
    Ok(rows)
}

pub fn describe_policy(p: &Policy) -> DescribedPolicy {
    let spec = p.document().get("spec").cloned().unwrap_or(Json::Null);
    DescribedPolicy {
        name: p.reference().name.clone(),
        namespace: p.reference().namespace.clone(),
        group: p.reference().group.clone(),
        kind: p.reference().kind.clone(),
        inherited: p.is_inherited(),
        target_ref: spec.get("targetRef").cloned().unwrap_or(Json::Null),
        effective_spec: p.effective_spec(),
        spec,
    }
}

/// Kind-specific fields shown above the policy sections.
fn details(kind: &ObjectKind, obj: &Json) -> BTreeMap<String, Json> {
    let spec = obj.get("spec");
    let field = |k: &str| spec.and_then(|s| s.get(k)).cloned();
    let mut out = BTreeMap::new();
    let mut put = |key: &str, v: Option<Json>| {
        if let Some(v) = v { out.insert(key.to_string(), v); }
    };
    match kind {
        ObjectKind::GatewayClass => put("ControllerName", field("controllerName")),
        ObjectKind::Gateway => put("GatewayClass", field("gatewayClassName")),
        ObjectKind::HttpRoute => {
            put("Hostnames", field("hostnames"));
            put("ParentRefs", field("parentRefs"));
        }
        ObjectKind::Namespace | ObjectKind::Backend { .. } => {}
    }
    out
}

pub fn describe_object<S: ResourceStore + ?Sized>(ctx: &ResolveCtx<'_, S>, kind: &ObjectKind, obj: &Json) -> Result<Described> {
    let name = meta_str(obj, "name").ok_or_else(|| anyhow!("object without metadata.name"))?.to_string();
    let namespace = meta_str(obj, "namespace").unwrap_or("").to_string();
    let direct = attached_policies(ctx, kind, &namespace, &name);
    let effective = effective_policies(ctx, kind, &namespace, &name)?;
    Ok(Described {
        kind: kind.group_kind().to_string(),
        name,
        namespace,
        details: details(kind, obj),
        directly_attached_policies: to_refs(&direct),
        effective_policies: effective.to_view(),
    })
}

/// Split `[type/]name`; the type defaults to `service`.
///
/// `service`, `services` and `svc` mean core Service; anything else is `Kind[.group]`.
pub fn parse_backend(arg: &str) -> (GroupKind, String) {
    let (ty, name) = arg.split_once('/').unwrap_or(("service", arg));
    let gk = match ty.to_ascii_lowercase().as_str() {
        "service" | "services" | "svc" => GroupKind::service(),
        _ => match ty.split_once('.') {
            Some((kind, group)) => GroupKind::new(group, kind),
            None => GroupKind::new("", ty),
        },
    };
    (gk, name.to_string())
}

/// Backend kind with the scope discovery recorded; unknown kinds count as namespaced.
pub fn backend_kind(store: &InMemoryStore, kind: GroupKind) -> ObjectKind {
    let namespaced = store.namespaced(&kind).unwrap_or(true);
    ObjectKind::Backend { kind, namespaced }
}

pub fn created_at(obj: &Json) -> Option<DateTime<Utc>> {
    meta_str(obj, "creationTimestamp")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

pub fn render_age(created: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(created) = created else { return "-".to_string() };
    let mut secs = (now - created).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

/// Left-aligned columns, two spaces apart.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) { *w = (*w).max(cell.len()); }
        }
    }
    let line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells.iter().zip(&widths).map(|(c, w)| format!("{:<w$}", c, w = *w)).collect();
        padded.join("  ").trim_end().to_string()
    };
    let mut out = vec![line(headers.to_vec())];
    for row in rows {
        out.push(line(row.iter().map(String::as_str).collect()));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwpolicy_core::{PolicyKindDefinition, POLICY_LABEL_KEY};
    use serde_json::json;

    fn store() -> InMemoryStore {
        let mut s = InMemoryStore::new();
        s.add_definition(PolicyKindDefinition {
            name: "timeoutpolicies.bar.com".into(),
            group: "bar.com".into(),
            kind: "TimeoutPolicy".into(),
            plural: "timeoutpolicies".into(),
            versions: vec!["v1".into()],
            namespaced: true,
            labels: BTreeMap::from([(POLICY_LABEL_KEY.to_string(), "direct".to_string())]),
        });
        s.extend([
            json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": "default" } }),
            json!({
                "apiVersion": "gateway.networking.k8s.io/v1",
                "kind": "GatewayClass",
                "metadata": { "name": "gc" },
                "spec": { "controllerName": "example.net/gc" }
            }),
            json!({
                "apiVersion": "gateway.networking.k8s.io/v1",
                "kind": "Gateway",
                "metadata": { "name": "gw", "namespace": "default" },
                "spec": { "gatewayClassName": "gc" }
            }),
            json!({
                "apiVersion": "gateway.networking.k8s.io/v1",
                "kind": "HTTPRoute",
                "metadata": { "name": "r", "namespace": "default", "creationTimestamp": "2024-01-01T00:00:00Z" },
                "spec": { "hostnames": ["example.com"], "parentRefs": [{ "name": "gw" }] }
            }),
            json!({
                "apiVersion": "bar.com/v1",
                "kind": "TimeoutPolicy",
                "metadata": { "name": "tp", "namespace": "default" },
                "spec": { "targetRef": { "group": "gateway.networking.k8s.io", "kind": "Gateway", "name": "gw" }, "seconds": 5 }
            }),
            json!({
                "apiVersion": "bar.com/v1",
                "kind": "TimeoutPolicy",
                "metadata": { "name": "broken", "namespace": "default" },
                "spec": { "seconds": 5 }
            }),
            json!({
                "apiVersion": "bar.com/v1",
                "kind": "TimeoutPolicy",
                "metadata": { "name": "elsewhere", "namespace": "other" },
                "spec": { "targetRef": { "kind": "Namespace", "name": "other" } }
            }),
        ])
        .unwrap();
        s
    }

    #[test]
    fn policy_rows_filter_namespace_and_mark_rejected() {
        let s = store();
        let pm = PolicyManager::init(&s, POLICY_LABEL_KEY).unwrap();
        let rows = policy_rows(&pm, Some("default"));
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.name == "tp" && r.target_kind == "Gateway" && r.policy_type == "Direct"));
        assert!(rows.iter().any(|r| r.name == "broken" && r.target_name == gwpolicy_core::UNKNOWN));
        assert_eq!(policy_rows(&pm, None).len(), 3);
    }

    #[test]
    fn policy_crd_rows_show_scope() {
        let s = store();
        let pm = PolicyManager::init(&s, POLICY_LABEL_KEY).unwrap();
        let rows = policy_crd_rows(pm.registry());
        assert_eq!(rows, vec![PolicyCrdRow {
            name: "timeoutpolicies.bar.com".into(),
            group: "bar.com".into(),
            kind: "TimeoutPolicy".into(),
            policy_type: "Direct",
            scope: "Namespaced",
        }]);
    }

    #[test]
    fn http_route_rows_carry_hostnames_and_age() {
        let s = store();
        let now = DateTime::parse_from_rfc3339("2024-01-03T05:00:00Z").unwrap().with_timezone(&Utc);
        let rows = http_route_rows(&s, Some("default"), now).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hostnames, vec!["example.com"]);
        assert_eq!(rows[0].parent_refs, 1);
        assert_eq!(rows[0].age, "2d5h");
    }

    #[test]
    fn describe_gateway_lists_direct_and_effective() {
        let s = store();
        let pm = PolicyManager::init(&s, POLICY_LABEL_KEY).unwrap();
        let ctx = ResolveCtx::new(&s, &pm);
        let gw = s.get_object(&GroupKind::gateway(), "default", "gw").unwrap().unwrap();
        let d = describe_object(&ctx, &ObjectKind::Gateway, &gw).unwrap();
        assert_eq!(d.details.get("GatewayClass"), Some(&json!("gc")));
        assert_eq!(d.directly_attached_policies.len(), 1);
        assert_eq!(d.effective_policies, json!({ "TimeoutPolicy.bar.com": { "seconds": 5 } }));

        let yaml = serde_yaml::to_string(&d).unwrap();
        assert!(yaml.contains("DirectlyAttachedPolicies:"));
        assert!(yaml.contains("EffectivePolicies:"));
    }

    #[test]
    fn backend_argument_forms() {
        assert_eq!(parse_backend("foo"), (GroupKind::service(), "foo".to_string()));
        assert_eq!(parse_backend("svc/foo"), (GroupKind::service(), "foo".to_string()));
        assert_eq!(parse_backend("Bucket.storage.example.com/b1"), (GroupKind::new("storage.example.com", "Bucket"), "b1".to_string()));
    }

    #[test]
    fn cluster_scoped_backend_is_described_without_namespace() {
        let mut s = store();
        let bucket = GroupKind::new("storage.example.com", "Bucket");
        s.set_namespaced(bucket.clone(), false);
        s.insert(json!({ "apiVersion": "storage.example.com/v1", "kind": "Bucket", "metadata": { "name": "b1" } })).unwrap();
        let pm = PolicyManager::init(&s, POLICY_LABEL_KEY).unwrap();
        let ctx = ResolveCtx::new(&s, &pm);

        let kind = backend_kind(&s, bucket);
        assert!(!kind.namespaced());
        assert!(backend_kind(&s, GroupKind::service()).namespaced());

        let obj = s.get_object(&kind.group_kind(), "", "b1").unwrap().unwrap();
        let d = describe_object(&ctx, &kind, &obj).unwrap();
        assert_eq!(d.name, "b1");
        assert!(d.namespace.is_empty());
    }

    #[test]
    fn table_pads_columns() {
        let out = table(&["NAME", "KIND"], &[vec!["a-long-name".into(), "X".into()]]);
        assert_eq!(out, "NAME         KIND\na-long-name  X");
    }

    #[test]
    fn age_without_timestamp() {
        assert_eq!(render_age(None, Utc::now()), "-");
    }
}
