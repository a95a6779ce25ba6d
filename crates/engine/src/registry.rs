//! Policy kind classification from labelled schema definitions.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use gwpolicy_core::{PolicyError, PolicyKindDefinition, PolicyKindDescriptor, PolicyKindId, ResourceStore};
use metrics::counter;
use tracing::{debug, info, warn};

/// Immutable table of classified policy kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyKindRegistry {
    kinds: BTreeMap<PolicyKindId, PolicyKindDescriptor>,
}

/// Outcome of classifying a set of definitions.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub registry: PolicyKindRegistry,
    /// One entry per definition that carried the label but could not be classified.
    pub warnings: Vec<PolicyError>,
}

impl PolicyKindRegistry {
    pub fn from_descriptors<I: IntoIterator<Item = PolicyKindDescriptor>>(descriptors: I) -> Self {
        Self { kinds: descriptors.into_iter().map(|d| (d.id.clone(), d)).collect() }
    }

    /// List definitions from the store and classify them.
    pub fn load<S: ResourceStore + ?Sized>(store: &S, label_key: &str) -> Result<Classification> {
        let defs = store.list_policy_kind_definitions().context("listing policy kind definitions")?;
        Ok(classify(&defs, label_key))
    }

    pub fn get(&self, id: &PolicyKindId) -> Option<&PolicyKindDescriptor> { self.kinds.get(id) }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyKindDescriptor> { self.kinds.values() }

    pub fn len(&self) -> usize { self.kinds.len() }
    pub fn is_empty(&self) -> bool { self.kinds.is_empty() }
}

fn parse_marker(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "inherited" | "true" => Some(true),
        "direct" | "false" => Some(false),
        _ => None,
    }
}

/// Classify every definition carrying `label_key`.
///
/// A bad marker value or a definition without versions skips that kind only.
pub fn classify(defs: &[PolicyKindDefinition], label_key: &str) -> Classification {
    let mut out = Classification::default();
    for def in defs {
        let Some(marker) = def.labels.get(label_key) else {
            debug!(definition = %def.name, "no policy label; not a policy kind");
            continue;
        };
        let reject = |reason: String| PolicyError::Classification { definition: def.name.clone(), reason };
        let inherited = match parse_marker(marker) {
            Some(v) => v,
            None => {
                let err = reject(format!("unrecognised {} value {:?}", label_key, marker));
                warn!(error = %err, "skipping policy kind");
                out.warnings.push(err);
                continue;
            }
        };
        let Some(version) = def.versions.first() else {
            let err = reject("definition has no served version".into());
            warn!(error = %err, "skipping policy kind");
            out.warnings.push(err);
            continue;
        };
        let descriptor = PolicyKindDescriptor {
            id: PolicyKindId::new(&def.group, &def.kind),
            group: def.group.clone(),
            kind: def.kind.clone(),
            plural: def.plural.clone(),
            version: version.clone(),
            inherited,
            namespaced: def.namespaced,
        };
        debug!(kind = %descriptor.id, inherited, namespaced = def.namespaced, "classified policy kind");
        out.registry.kinds.insert(descriptor.id.clone(), descriptor);
    }
    counter!("policy_kinds_classified", out.registry.len() as u64);
    info!(kinds = out.registry.len(), skipped = out.warnings.len(), "policy kinds classified");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwpolicy_core::POLICY_LABEL_KEY;

    fn def(name: &str, kind: &str, label: Option<&str>) -> PolicyKindDefinition {
        let mut labels = BTreeMap::new();
        if let Some(v) = label { labels.insert(POLICY_LABEL_KEY.to_string(), v.to_string()); }
        PolicyKindDefinition {
            name: name.into(),
            group: "foo.com".into(),
            kind: kind.into(),
            plural: format!("{}s", kind.to_ascii_lowercase()),
            versions: vec!["v1".into()],
            namespaced: true,
            labels,
        }
    }

    #[test]
    fn classifies_inherited_and_direct() {
        let c = classify(
            &[def("a", "HealthCheckPolicy", Some("inherited")), def("b", "TimeoutPolicy", Some("Direct"))],
            POLICY_LABEL_KEY,
        );
        assert!(c.warnings.is_empty());
        assert_eq!(c.registry.len(), 2);
        assert!(c.registry.get(&"HealthCheckPolicy.foo.com".into()).unwrap().inherited);
        assert!(!c.registry.get(&"TimeoutPolicy.foo.com".into()).unwrap().inherited);
    }

    #[test]
    fn boolean_marker_is_accepted() {
        let c = classify(&[def("a", "APolicy", Some("true")), def("b", "BPolicy", Some("false"))], POLICY_LABEL_KEY);
        assert!(c.registry.get(&"APolicy.foo.com".into()).unwrap().inherited);
        assert!(!c.registry.get(&"BPolicy.foo.com".into()).unwrap().inherited);
    }

    #[test]
    fn bad_marker_skips_only_that_kind() {
        let c = classify(
            &[def("bad", "BadPolicy", Some("sometimes")), def("good", "GoodPolicy", Some("direct")), def("plain", "Widget", None)],
            POLICY_LABEL_KEY,
        );
        assert_eq!(c.registry.len(), 1);
        assert_eq!(c.warnings.len(), 1);
        assert!(matches!(&c.warnings[0], PolicyError::Classification { definition, .. } if definition == "bad"));
    }

    #[test]
    fn missing_version_is_a_warning() {
        let mut d = def("nov", "NoVersionPolicy", Some("direct"));
        d.versions.clear();
        let c = classify(&[d], POLICY_LABEL_KEY);
        assert!(c.registry.is_empty());
        assert_eq!(c.warnings.len(), 1);
    }

    #[test]
    fn custom_label_key() {
        let mut d = def("a", "APolicy", None);
        d.labels.insert("example.com/policy".into(), "inherited".into());
        assert_eq!(classify(&[d.clone()], POLICY_LABEL_KEY).registry.len(), 0);
        assert_eq!(classify(&[d], "example.com/policy").registry.len(), 1);
    }
}
