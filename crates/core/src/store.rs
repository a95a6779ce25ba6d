//! Resource store seam and the in-memory snapshot implementation.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{meta_str, GroupKind, PolicyKindDescriptor};

/// Schema registration (a CRD) as far as policy classification cares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyKindDefinition {
    pub name: String,
    pub group: String,
    pub kind: String,
    pub plural: String,
    /// Served versions, preferred first.
    pub versions: Vec<String>,
    pub namespaced: bool,
    pub labels: BTreeMap<String, String>,
}

/// Read-only access to the objects a resolution needs.
///
/// Every method returns whatever is available; an empty list is a valid answer.
pub trait ResourceStore {
    fn list_policy_kind_definitions(&self) -> Result<Vec<PolicyKindDefinition>>;

    /// Documents of one policy kind. `namespace` is ignored for cluster-scoped kinds.
    fn list_policy_documents(&self, kind: &PolicyKindDescriptor, namespace: Option<&str>) -> Result<Vec<Json>>;

    fn get_object(&self, kind: &GroupKind, namespace: &str, name: &str) -> Result<Option<Json>>;

    fn list_objects(&self, kind: &GroupKind, namespace: Option<&str>) -> Result<Vec<Json>>;
}

/// Snapshot of listed objects held in RAM; loaded once per invocation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    definitions: Vec<PolicyKindDefinition>,
    objects: FxHashMap<GroupKind, Vec<Json>>,
    scopes: FxHashMap<GroupKind, bool>,
}

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn add_definition(&mut self, def: PolicyKindDefinition) { self.definitions.push(def); }

    /// Record whether `kind` is namespaced, as reported by discovery.
    pub fn set_namespaced(&mut self, kind: GroupKind, namespaced: bool) { self.scopes.insert(kind, namespaced); }

    /// Scope of `kind` if it was recorded.
    pub fn namespaced(&self, kind: &GroupKind) -> Option<bool> { self.scopes.get(kind).copied() }

    /// Insert a raw object, keyed by its `apiVersion`/`kind`.
    pub fn insert(&mut self, obj: Json) -> Result<()> {
        let gk = GroupKind::of(&obj).ok_or_else(|| anyhow!("object missing apiVersion or kind"))?;
        self.objects.entry(gk).or_default().push(obj);
        Ok(())
    }

    pub fn extend<I: IntoIterator<Item = Json>>(&mut self, objs: I) -> Result<()> {
        for obj in objs { self.insert(obj)?; }
        Ok(())
    }

    pub fn len(&self) -> usize { self.objects.values().map(|v| v.len()).sum() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn in_namespace(obj: &Json, namespace: Option<&str>) -> bool {
        match namespace {
            Some(ns) => meta_str(obj, "namespace").unwrap_or("") == ns,
            None => true,
        }
    }
}

impl ResourceStore for InMemoryStore {
    fn list_policy_kind_definitions(&self) -> Result<Vec<PolicyKindDefinition>> {
        Ok(self.definitions.clone())
    }

    fn list_policy_documents(&self, kind: &PolicyKindDescriptor, namespace: Option<&str>) -> Result<Vec<Json>> {
        let ns = if kind.namespaced { namespace } else { None };
        self.list_objects(&kind.group_kind(), ns)
    }

    fn get_object(&self, kind: &GroupKind, namespace: &str, name: &str) -> Result<Option<Json>> {
        Ok(self
            .objects
            .get(kind)
            .and_then(|objs| {
                objs.iter().find(|o| meta_str(o, "name") == Some(name) && Self::in_namespace(o, Some(namespace)))
            })
            .cloned())
    }

    fn list_objects(&self, kind: &GroupKind, namespace: Option<&str>) -> Result<Vec<Json>> {
        Ok(self
            .objects
            .get(kind)
            .map(|objs| objs.iter().filter(|o| Self::in_namespace(o, namespace)).cloned().collect())
            .unwrap_or_default())
    }
}
