//! gwpolicy kubehub: one-shot cluster listing into an in-memory snapshot.
//!
//! Policy kinds come from CRDs carrying the marker label; everything else is
//! resolved through discovery by group and kind.

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{Context, Result};
use gwpolicy_core::{GroupKind, InMemoryStore, PolicyKindDefinition};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionVersion,
};
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta},
    discovery::{Discovery, Scope},
    Client,
};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from kubeconfig")
}

/// Served versions, storage version first.
fn preferred_versions(versions: &[CustomResourceDefinitionVersion]) -> Vec<String> {
    let mut out: Vec<String> = versions.iter().filter(|v| v.served && v.storage).map(|v| v.name.clone()).collect();
    out.extend(versions.iter().filter(|v| v.served && !v.storage).map(|v| v.name.clone()));
    out
}

pub fn definition_from_crd(crd: &CustomResourceDefinition) -> PolicyKindDefinition {
    let spec = &crd.spec;
    PolicyKindDefinition {
        name: crd.metadata.name.clone().unwrap_or_default(),
        group: spec.group.clone(),
        kind: spec.names.kind.clone(),
        plural: spec.names.plural.clone(),
        versions: preferred_versions(&spec.versions),
        namespaced: spec.scope == "Namespaced",
        labels: crd.metadata.labels.clone().unwrap_or_default(),
    }
}

fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

/// List items often come back without `apiVersion`/`kind`; fill them from the resource.
fn to_raw(mut obj: DynamicObject, ar: &ApiResource) -> Result<Json> {
    if obj.types.is_none() {
        obj.types = Some(TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
    }
    let mut raw = serde_json::to_value(&obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    Ok(raw)
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 404)
}

/// List every object of one resource across namespaces; a 404 means an empty list.
async fn list_all(client: &Client, ar: &ApiResource) -> Result<Vec<Json>> {
    let api: Api<DynamicObject> = Api::all_with(client.clone(), ar);
    match api.list(&ListParams::default()).await {
        Ok(list) => list.items.into_iter().map(|o| to_raw(o, ar)).collect(),
        Err(e) if is_not_found(&e) => {
            warn!(kind = %ar.kind, api_version = %ar.api_version, "resource not served; treating as empty");
            Ok(Vec::new())
        }
        Err(e) => Err(e).with_context(|| format!("listing {} {}", ar.api_version, ar.kind)),
    }
}

fn find_api_resource(discovery: &Discovery, gk: &GroupKind) -> Option<(ApiResource, bool)> {
    for group in discovery.groups() {
        if group.name() != gk.group { continue; }
        for (ar, caps) in group.recommended_resources() {
            if ar.kind == gk.kind {
                return Some((ar, matches!(caps.scope, Scope::Namespaced)));
            }
        }
    }
    None
}

/// Kinds listed for every snapshot besides policies and requested backends.
pub fn hierarchy_kinds() -> [GroupKind; 4] {
    [GroupKind::gateway_class(), GroupKind::gateway(), GroupKind::http_route(), GroupKind::namespace()]
}

/// List policy CRDs (label-exists on `label_key`), their documents, the
/// Gateway API hierarchy and `extra_kinds` into one snapshot.
pub async fn load_snapshot(client: Client, label_key: &str, extra_kinds: &[GroupKind]) -> Result<InMemoryStore> {
    let t0 = Instant::now();
    let mut store = InMemoryStore::new();

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crds = crds
        .list(&ListParams::default().labels(label_key))
        .await
        .context("listing policy CustomResourceDefinitions")?;
    for crd in &crds.items {
        let def = definition_from_crd(crd);
        match def.versions.first() {
            Some(version) => {
                let gvk = GroupVersionKind::gvk(&def.group, version, &def.kind);
                let ar = ApiResource::from_gvk_with_plural(&gvk, &def.plural);
                let docs = list_all(&client, &ar).await?;
                debug!(crd = %def.name, version = %version, documents = docs.len(), "listed policy documents");
                store.extend(docs)?;
            }
            None => debug!(crd = %def.name, "no served version; documents not listed"),
        }
        store.add_definition(def);
    }

    let discovery = Discovery::new(client.clone()).run().await.context("running API discovery")?;
    let mut kinds: Vec<GroupKind> = hierarchy_kinds().to_vec();
    for gk in extra_kinds {
        if !kinds.contains(gk) { kinds.push(gk.clone()); }
    }
    for gk in &kinds {
        let Some((ar, namespaced)) = find_api_resource(&discovery, gk) else {
            warn!(kind = %gk, "kind not served by the cluster; treating as empty");
            continue;
        };
        let objs = list_all(&client, &ar).await?;
        debug!(kind = %gk, namespaced, objects = objs.len(), "listed objects");
        store.set_namespaced(gk.clone(), namespaced);
        store.extend(objs)?;
    }

    info!(policy_kinds = crds.items.len(), objects = store.len(), took_ms = %t0.elapsed().as_millis(), "snapshot loaded");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn crd(versions: Json, scope: &str) -> CustomResourceDefinition {
        serde_json::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {
                "name": "healthcheckpolicies.foo.com",
                "labels": { "gateway.networking.k8s.io/policy": "inherited" }
            },
            "spec": {
                "group": "foo.com",
                "names": { "kind": "HealthCheckPolicy", "plural": "healthcheckpolicies" },
                "scope": scope,
                "versions": versions
            }
        }))
        .unwrap()
    }

    #[test]
    fn crd_converts_to_definition() {
        let def = definition_from_crd(&crd(
            json!([
                { "name": "v1alpha1", "served": true, "storage": false },
                { "name": "v1", "served": true, "storage": true },
                { "name": "v0", "served": false, "storage": false }
            ]),
            "Namespaced",
        ));
        assert_eq!(def.name, "healthcheckpolicies.foo.com");
        assert_eq!(def.group, "foo.com");
        assert_eq!(def.kind, "HealthCheckPolicy");
        assert_eq!(def.plural, "healthcheckpolicies");
        assert_eq!(def.versions, vec!["v1", "v1alpha1"]);
        assert!(def.namespaced);
        assert_eq!(def.labels.get("gateway.networking.k8s.io/policy").map(String::as_str), Some("inherited"));
    }

    #[test]
    fn cluster_scoped_crd_without_served_versions() {
        let def = definition_from_crd(&crd(json!([{ "name": "v1", "served": false, "storage": true }]), "Cluster"));
        assert!(!def.namespaced);
        assert!(def.versions.is_empty());
    }

    #[test]
    fn raw_objects_get_type_meta_and_lose_managed_fields() {
        let ar = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("gateway.networking.k8s.io", "v1", "Gateway"),
            "gateways",
        );
        let obj: DynamicObject = serde_json::from_value(json!({
            "metadata": { "name": "gw", "namespace": "default", "managedFields": [{ "manager": "kubectl" }] },
            "spec": { "gatewayClassName": "c" }
        }))
        .unwrap();
        let raw = to_raw(obj, &ar).unwrap();
        assert_eq!(raw["apiVersion"], "gateway.networking.k8s.io/v1");
        assert_eq!(raw["kind"], "Gateway");
        assert!(raw["metadata"].get("managedFields").is_none());
        assert_eq!(raw["spec"]["gatewayClassName"], "c");
    }
}
