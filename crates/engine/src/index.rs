//! Attachment index: which loaded policies target a given object.

use anyhow::{Context, Result};
use gwpolicy_core::{
    GroupKind, ObjRef, Policy, PolicyError, PolicyKindDescriptor, PolicyKindId, PolicyTargetRef, ResourceStore, UNKNOWN,
};
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::registry::PolicyKindRegistry;

/// A listed policy document that could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedPolicy {
    pub reference: ObjRef,
    pub error: PolicyError,
}

/// Display row for `get policies`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySummary {
    pub policy: ObjRef,
    pub target: PolicyTargetRef,
    pub inherited: bool,
}

type TargetKey = (GroupKind, String);

/// Snapshot of every classified policy, indexed by target group/kind/name.
#[derive(Debug, Clone, Default)]
pub struct PolicyManager {
    registry: PolicyKindRegistry,
    policies: Vec<Policy>,
    by_target: FxHashMap<TargetKey, Vec<usize>>,
    rejected: Vec<RejectedPolicy>,
    warnings: Vec<PolicyError>,
}

impl PolicyManager {
    /// Classify kinds and load all their documents from `store`.
    pub fn init<S: ResourceStore + ?Sized>(store: &S, label_key: &str) -> Result<Self> {
        let classification = PolicyKindRegistry::load(store, label_key)?;
        let mut manager = Self::from_registry(store, classification.registry)?;
        manager.warnings = classification.warnings;
        Ok(manager)
    }

    /// Load documents for an already-built registry.
    pub fn from_registry<S: ResourceStore + ?Sized>(store: &S, registry: PolicyKindRegistry) -> Result<Self> {
        let mut policies = Vec::new();
        let mut rejected = Vec::new();
        for descriptor in registry.iter() {
            let docs = store
                .list_policy_documents(descriptor, None)
                .with_context(|| format!("listing policies of kind {}", descriptor.id))?;
            for doc in docs {
                let reference = ObjRef::of(&doc).unwrap_or_else(|| unknown_ref(descriptor));
                match Policy::decode(descriptor, doc) {
                    Ok(p) => policies.push(p),
                    Err(error) => {
                        warn!(policy = %reference, error = %error, "skipping undecodable policy");
                        rejected.push(RejectedPolicy { reference, error });
                    }
                }
            }
        }
        counter!("policy_documents_loaded", policies.len() as u64);
        counter!("policy_documents_rejected", rejected.len() as u64);
        info!(kinds = registry.len(), policies = policies.len(), rejected = rejected.len(), "policies loaded");
        Ok(Self::build(registry, policies, rejected))
    }

    /// Build directly from decoded policies; handy for tests and offline use.
    pub fn from_policies(registry: PolicyKindRegistry, policies: Vec<Policy>) -> Self {
        Self::build(registry, policies, Vec::new())
    }

    fn build(registry: PolicyKindRegistry, mut policies: Vec<Policy>, rejected: Vec<RejectedPolicy>) -> Self {
        policies.sort_by(|a, b| {
            a.kind_id().cmp(b.kind_id()).then_with(|| a.reference().namespaced_name().cmp(&b.reference().namespaced_name()))
        });
        let mut by_target: FxHashMap<TargetKey, Vec<usize>> = FxHashMap::default();
        for (i, p) in policies.iter().enumerate() {
            let t = p.target_ref();
            by_target.entry((GroupKind::new(t.group.clone(), t.kind.clone()), t.name.clone())).or_default().push(i);
        }
        Self { registry, policies, by_target, rejected, warnings: Vec::new() }
    }

    /// Policies whose `targetRef` points at `obj`.
    ///
    /// Group, kind and name must match exactly. The target namespace defaults to
    /// the policy's own namespace and must then equal the object's namespace.
    pub fn attached_to(&self, obj: &ObjRef) -> Vec<Policy> {
        let key = (obj.group_kind(), obj.name.clone());
        let Some(idxs) = self.by_target.get(&key) else { return Vec::new() };
        idxs.iter()
            .map(|&i| &self.policies[i])
            .filter(|p| p.target_ref().effective_namespace(&p.reference().namespace) == obj.namespace)
            .cloned()
            .collect()
    }

    pub fn policies(&self) -> &[Policy] { &self.policies }
    pub fn rejected(&self) -> &[RejectedPolicy] { &self.rejected }
    pub fn warnings(&self) -> &[PolicyError] { &self.warnings }
    pub fn registry(&self) -> &PolicyKindRegistry { &self.registry }

    pub fn descriptor(&self, id: &PolicyKindId) -> Option<&PolicyKindDescriptor> { self.registry.get(id) }

    /// Policies visible from `namespace`: those living in it plus cluster-scoped ones.
    /// `None` means every namespace.
    pub fn policies_in(&self, namespace: Option<&str>) -> Vec<&Policy> {
        self.policies
            .iter()
            .filter(|p| namespace.map_or(true, |ns| p.reference().namespace.is_empty() || p.reference().namespace == ns))
            .collect()
    }

    /// One row per listed document; undecodable ones carry `<Unknown>` targets.
    pub fn policy_summaries(&self, namespace: Option<&str>) -> Vec<PolicySummary> {
        let in_ns = |r: &ObjRef| namespace.map_or(true, |ns| r.namespace == ns);
        let mut rows: Vec<PolicySummary> = self
            .policies
            .iter()
            .filter(|p| in_ns(p.reference()))
            .map(|p| PolicySummary { policy: p.reference().clone(), target: p.target_ref().clone(), inherited: p.is_inherited() })
            .collect();
        for r in self.rejected.iter().filter(|r| in_ns(&r.reference)) {
            let inherited = self
                .registry
                .get(&PolicyKindId::new(&r.reference.group, &r.reference.kind))
                .map(|d| d.inherited)
                .unwrap_or(false);
            rows.push(PolicySummary {
                policy: r.reference.clone(),
                target: PolicyTargetRef { group: UNKNOWN.into(), kind: UNKNOWN.into(), name: UNKNOWN.into(), namespace: None },
                inherited,
            });
        }
        rows
    }
}

fn unknown_ref(descriptor: &PolicyKindDescriptor) -> ObjRef {
    ObjRef::new(&descriptor.group_kind(), "", UNKNOWN)
}
