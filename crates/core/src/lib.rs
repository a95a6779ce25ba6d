//! gwpolicy core types: object references, policy values and kind descriptors.

#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub mod error;
pub mod patch;
pub mod store;

pub use error::PolicyError;
pub use store::{InMemoryStore, PolicyKindDefinition, ResourceStore};

/// Label marking a CRD as a policy kind; its value carries the classification.
pub const POLICY_LABEL_KEY: &str = "gateway.networking.k8s.io/policy";

/// API group of the Gateway API kinds the resolvers walk.
pub const GATEWAY_GROUP: &str = "gateway.networking.k8s.io";

/// Placeholder shown for fields of documents that could not be decoded.
pub const UNKNOWN: &str = "<Unknown>";

/// Group + kind pair identifying a resource type (version-agnostic).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), kind: kind.into() }
    }

    pub fn gateway_class() -> Self { Self::new(GATEWAY_GROUP, "GatewayClass") }
    pub fn gateway() -> Self { Self::new(GATEWAY_GROUP, "Gateway") }
    pub fn http_route() -> Self { Self::new(GATEWAY_GROUP, "HTTPRoute") }
    pub fn namespace() -> Self { Self::new("", "Namespace") }
    pub fn service() -> Self { Self::new("", "Service") }

    /// Group/kind of a raw object, read from `apiVersion` and `kind`.
    pub fn of(obj: &Json) -> Option<Self> {
        let api_version = obj.get("apiVersion").and_then(|v| v.as_str())?;
        let kind = obj.get("kind").and_then(|v| v.as_str())?;
        Some(Self::new(group_of(api_version), kind))
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() { write!(f, "{}", self.kind) } else { write!(f, "{}.{}", self.kind, self.group) }
    }
}

/// Group part of an `apiVersion` ("" for the core group).
pub fn group_of(api_version: &str) -> &str {
    api_version.split_once('/').map(|(g, _)| g).unwrap_or("")
}

/// Read a string field under `metadata`.
pub fn meta_str<'a>(obj: &'a Json, field: &str) -> Option<&'a str> {
    obj.get("metadata").and_then(|m| m.get(field)).and_then(|v| v.as_str())
}

/// Identifies a concrete object. `namespace` is empty for cluster-scoped objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl ObjRef {
    pub fn new(gk: &GroupKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { group: gk.group.clone(), kind: gk.kind.clone(), name: name.into(), namespace: namespace.into() }
    }

    /// Reference of a raw object; `None` when apiVersion/kind/name are missing.
    pub fn of(obj: &Json) -> Option<Self> {
        let gk = GroupKind::of(obj)?;
        let name = meta_str(obj, "name")?;
        Some(Self::new(&gk, meta_str(obj, "namespace").unwrap_or(""), name))
    }

    pub fn group_kind(&self) -> GroupKind { GroupKind::new(self.group.clone(), self.kind.clone()) }

    /// `namespace/name`, the string precedence ties are broken on.
    pub fn namespaced_name(&self) -> String { format!("{}/{}", self.namespace, self.name) }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.group_kind(), self.name)
        } else {
            write!(f, "{}/{}/{}", self.group_kind(), self.namespace, self.name)
        }
    }
}

/// What a policy document declares it configures (`spec.targetRef`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyTargetRef {
    #[serde(default)]
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl PolicyTargetRef {
    /// Namespace the reference resolves to for a policy living in `policy_namespace`.
    pub fn effective_namespace<'a>(&'a self, policy_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(policy_namespace)
    }
}

/// Stable identifier of a policy kind, e.g. `TimeoutPolicy.example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyKindId(String);

impl PolicyKindId {
    pub fn new(group: &str, kind: &str) -> Self { Self(format!("{}.{}", kind, group)) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for PolicyKindId {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

impl fmt::Display for PolicyKindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Classification of a policy kind, derived once from its schema definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyKindDescriptor {
    pub id: PolicyKindId,
    pub group: String,
    pub kind: String,
    pub plural: String,
    pub version: String,
    pub inherited: bool,
    pub namespaced: bool,
}

impl PolicyKindDescriptor {
    pub fn group_kind(&self) -> GroupKind { GroupKind::new(self.group.clone(), self.kind.clone()) }
}

/// A decoded policy document. Immutable once loaded; merges build new values.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    reference: ObjRef,
    created: Option<DateTime<Utc>>,
    target_ref: PolicyTargetRef,
    kind_id: PolicyKindId,
    inherited: bool,
    document: Json,
}

impl Policy {
    /// Decode a raw document of the given kind.
    pub fn decode(descriptor: &PolicyKindDescriptor, document: Json) -> Result<Self, PolicyError> {
        let label = ObjRef::of(&document).map(|r| r.to_string()).unwrap_or_else(|| UNKNOWN.to_string());
        let decode_err = |reason: String| PolicyError::Decode { object: label.clone(), reason };

        if !document.is_object() {
            return Err(decode_err("document is not an object".into()));
        }
        let reference = ObjRef::of(&document).ok_or_else(|| decode_err("missing apiVersion, kind or metadata.name".into()))?;
        let kind_id = PolicyKindId::new(&reference.group, &reference.kind);
        if kind_id != descriptor.id {
            return Err(decode_err(format!("document kind {} listed as {}", kind_id, descriptor.id)));
        }
        let created = match meta_str(&document, "creationTimestamp") {
            Some(ts) => Some(
                DateTime::parse_from_rfc3339(ts)
                    .map_err(|e| decode_err(format!("creationTimestamp {:?}: {}", ts, e)))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        let raw_target = document
            .get("spec")
            .and_then(|s| s.get("targetRef"))
            .ok_or_else(|| decode_err("missing spec.targetRef".into()))?;
        let target_ref: PolicyTargetRef = serde_json::from_value(raw_target.clone())
            .map_err(|e| decode_err(format!("spec.targetRef: {}", e)))?;

        Ok(Self { reference, created, target_ref, kind_id, inherited: descriptor.inherited, document })
    }

    pub fn reference(&self) -> &ObjRef { &self.reference }
    pub fn created(&self) -> Option<DateTime<Utc>> { self.created }
    pub fn target_ref(&self) -> &PolicyTargetRef { &self.target_ref }
    pub fn kind_id(&self) -> &PolicyKindId { &self.kind_id }
    pub fn is_inherited(&self) -> bool { self.inherited }
    pub fn document(&self) -> &Json { &self.document }

    /// Subtree at `spec.override`, if present.
    pub fn override_section(&self) -> Option<&Json> {
        self.document.get("spec").and_then(|s| s.get("override"))
    }

    /// Subtree at `spec.default`, if present.
    pub fn default_section(&self) -> Option<&Json> {
        self.document.get("spec").and_then(|s| s.get("default"))
    }

    /// Same identity, new document. Used by the merge engine.
    pub fn with_document(&self, document: Json) -> Self {
        Self { document, ..self.clone() }
    }

    /// Whether `self` outranks `other`: older creation wins, ties go to the
    /// lexicographically smaller `namespace/name`.
    pub fn outranks(&self, other: &Policy) -> bool {
        if self.created != other.created {
            return self.created < other.created;
        }
        self.reference.namespaced_name() < other.reference.namespaced_name()
    }

    /// Flattened view of the spec: plain fields, then `default`, then `override` on top.
    pub fn effective_spec(&self) -> Json {
        let mut out = Json::Object(serde_json::Map::new());
        if let Some(spec) = self.document.get("spec").and_then(|s| s.as_object()) {
            for (k, v) in spec {
                if matches!(k.as_str(), "targetRef" | "default" | "override") { continue; }
                if let Some(obj) = out.as_object_mut() { obj.insert(k.clone(), v.clone()); }
            }
        }
        if let Some(d) = self.default_section() { patch::merge_patch(&mut out, d); }
        if let Some(o) = self.override_section() { patch::merge_patch(&mut out, o); }
        out
    }
}

/// Resolved output for one object at one anchor.
pub type EffectivePolicySet = std::collections::BTreeMap<PolicyKindId, Policy>;

/// Anchor identity, `"<namespace>/<name>"` of the top-level ancestor.
pub type AnchorId = String;

/// Effective policies partitioned by anchor.
pub type AnchoredPolicySets = std::collections::BTreeMap<AnchorId, EffectivePolicySet>;

/// References to the policy objects themselves (not their targets).
pub fn to_refs(policies: &[Policy]) -> Vec<ObjRef> {
    policies.iter().map(|p| p.reference.clone()).collect()
}
