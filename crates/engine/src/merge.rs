//! Merge engine: same-kind merge, same-level and cross-level map folds.
//!
//! Precedence follows Gateway API conflict resolution: the older policy wins,
//! ties go to the alphabetically smaller `namespace/name`. For inherited kinds
//! the lower-precedence policy keeps control of conflicting `spec.override` keys.

use gwpolicy_core::{patch::merge_patch, EffectivePolicySet, Policy, PolicyError};
use metrics::counter;
use serde_json::{json, Value as Json};
use tracing::debug;

/// Merge `applier` onto `base`. The result carries the applier's identity.
fn merge_ordered(base: &Policy, applier: &Policy) -> Result<Policy, PolicyError> {
    if base.kind_id() != applier.kind_id() {
        return Err(PolicyError::KindMismatch { left: base.kind_id().clone(), right: applier.kind_id().clone() });
    }
    for p in [base, applier] {
        if !p.document().is_object() {
            return Err(PolicyError::Decode { object: p.reference().to_string(), reason: "document is not an object".into() });
        }
    }

    let mut doc: Json = base.document().clone();
    merge_patch(&mut doc, applier.document());

    if base.is_inherited() {
        if let Some(base_override) = base.override_section() {
            merge_patch(&mut doc, &json!({ "spec": { "override": base_override } }));
        }
    }

    counter!("policy_merges_total", 1u64);
    debug!(kind = %applier.kind_id(), base = %base.reference(), applier = %applier.reference(), "merged policies");
    Ok(applier.with_document(doc))
}

/// Merge two policies of one kind; precedence picks the applier.
pub fn merge_same_kind(a: &Policy, b: &Policy) -> Result<Policy, PolicyError> {
    if a.outranks(b) { merge_ordered(b, a) } else { merge_ordered(a, b) }
}

/// Fold a flat list of policies into one policy per kind.
pub fn merge_similar_kind(policies: &[Policy]) -> Result<EffectivePolicySet, PolicyError> {
    let mut out = EffectivePolicySet::new();
    for policy in policies {
        let merged = match out.get(policy.kind_id()) {
            Some(existing) => merge_same_kind(existing, policy)?,
            None => policy.clone(),
        };
        out.insert(policy.kind_id().clone(), merged);
    }
    Ok(out)
}

fn merge_maps<F>(first: &EffectivePolicySet, second: &EffectivePolicySet, merge: F) -> Result<EffectivePolicySet, PolicyError>
where
    F: Fn(&Policy, &Policy) -> Result<Policy, PolicyError>,
{
    let mut out = first.clone();
    for (id, policy) in second {
        let merged = match out.get(id) {
            Some(existing) => merge(existing, policy)?,
            None => policy.clone(),
        };
        out.insert(id.clone(), merged);
    }
    Ok(out)
}

/// Combine maps from peers at one level. Argument order does not matter.
pub fn merge_same_level(a: &EffectivePolicySet, b: &EffectivePolicySet) -> Result<EffectivePolicySet, PolicyError> {
    merge_maps(a, b, merge_same_kind)
}

/// Fold an ancestor's map into a descendant's: the child is always the applier.
pub fn merge_across_levels(parent: &EffectivePolicySet, child: &EffectivePolicySet) -> Result<EffectivePolicySet, PolicyError> {
    merge_maps(parent, child, merge_ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwpolicy_core::{PolicyKindDescriptor, PolicyKindId};

    fn descriptor(kind: &str, inherited: bool) -> PolicyKindDescriptor {
        PolicyKindDescriptor {
            id: PolicyKindId::new("foo.com", kind),
            group: "foo.com".into(),
            kind: kind.into(),
            plural: "x".into(),
            version: "v1".into(),
            inherited,
            namespaced: true,
        }
    }

    fn policy(kind: &str, inherited: bool, name: &str, ts: Option<&str>, spec: Json) -> Policy {
        let mut meta = json!({ "name": name, "namespace": "default" });
        if let Some(ts) = ts { meta["creationTimestamp"] = json!(ts); }
        let mut spec = spec;
        spec["targetRef"] = json!({ "kind": "Namespace", "name": "default" });
        Policy::decode(
            &descriptor(kind, inherited),
            json!({ "apiVersion": "foo.com/v1", "kind": kind, "metadata": meta, "spec": spec }),
        )
        .unwrap()
    }

    fn set(policies: &[Policy]) -> EffectivePolicySet {
        policies.iter().map(|p| (p.kind_id().clone(), p.clone())).collect()
    }

    #[test]
    fn merge_with_self_is_identity() {
        let p = policy("HealthCheckPolicy", true, "hc", None, json!({ "override": { "a": 1 }, "default": { "b": 2 } }));
        let m = merge_same_kind(&p, &p).unwrap();
        assert_eq!(m, p);
    }

    #[test]
    fn older_policy_wins_general_precedence() {
        let old = policy("TimeoutPolicy", false, "zzz", Some("2023-01-01T00:00:00Z"), json!({ "seconds": 30 }));
        let new = policy("TimeoutPolicy", false, "aaa", Some("2023-06-01T00:00:00Z"), json!({ "seconds": 60, "extra": true }));
        let m = merge_same_kind(&new, &old).unwrap();
        assert_eq!(m.reference().name, "zzz");
        assert_eq!(m.document()["spec"]["seconds"], json!(30));
        assert_eq!(m.document()["spec"]["extra"], json!(true));
    }

    #[test]
    fn tie_break_on_namespaced_name() {
        let aaa = policy("HealthCheckPolicy", true, "aaa", None, json!({ "override": { "k": "aaa", "only_a": 1 }, "default": { "d": "aaa" } }));
        let bbb = policy("HealthCheckPolicy", true, "bbb", None, json!({ "override": { "k": "bbb" }, "default": { "d": "bbb" } }));
        for m in [merge_same_kind(&aaa, &bbb).unwrap(), merge_same_kind(&bbb, &aaa).unwrap()] {
            // "default/aaa" outranks: it is the applier and supplies identity and defaults,
            // while "default/bbb" as base keeps its conflicting override keys.
            assert_eq!(m.reference().name, "aaa");
            assert_eq!(m.override_section().unwrap(), &json!({ "k": "bbb", "only_a": 1 }));
            assert_eq!(m.default_section().unwrap(), &json!({ "d": "aaa" }));
        }
    }

    #[test]
    fn kind_mismatch_fails_loudly() {
        let a = policy("HealthCheckPolicy", true, "a", None, json!({}));
        let b = policy("TimeoutPolicy", false, "b", None, json!({}));
        let err = merge_same_kind(&a, &b).unwrap_err();
        assert!(matches!(err, PolicyError::KindMismatch { .. }));
    }

    #[test]
    fn similar_kind_fold_matches_gateway_semantics() {
        let policies = vec![
            policy("HealthCheckPolicy", true, "health-check-1", Some("2023-01-01T00:00:00Z"),
                json!({ "override": { "key1": "a", "key3": "b" }, "default": { "key2": "d", "key4": "e", "key5": "c" } })),
            policy("HealthCheckPolicy", true, "health-check-2", Some("2023-01-01T01:00:00Z"),
                json!({ "override": { "key1": "f" }, "default": { "key2": "i", "key4": "j" } })),
            policy("TimeoutPolicy", false, "timeout-policy-1", None, json!({ "condition": "path=/def", "seconds": 30 })),
            policy("TimeoutPolicy", false, "timeout-policy-2", None, json!({ "condition": "path=/abc", "seconds": 60 })),
        ];
        let got = merge_similar_kind(&policies).unwrap();
        assert_eq!(got.len(), 2);

        let hc = &got[&PolicyKindId::from("HealthCheckPolicy.foo.com")];
        assert_eq!(hc.reference().name, "health-check-1");
        assert_eq!(hc.override_section().unwrap(), &json!({ "key1": "f", "key3": "b" }));
        assert_eq!(hc.default_section().unwrap(), &json!({ "key2": "d", "key4": "e", "key5": "c" }));

        let tp = &got[&PolicyKindId::from("TimeoutPolicy.foo.com")];
        assert_eq!(tp.reference().name, "timeout-policy-1");
        assert_eq!(tp.document()["spec"]["seconds"], json!(30));
        assert_eq!(tp.document()["spec"]["condition"], json!("path=/def"));
    }

    #[test]
    fn same_level_is_commutative() {
        let a = set(&[
            policy("HealthCheckPolicy", true, "a", Some("2023-01-02T00:00:00Z"), json!({ "override": { "x": "a" }, "default": { "y": "a" } })),
            policy("TimeoutPolicy", false, "a", None, json!({ "seconds": 1 })),
        ]);
        let b = set(&[
            policy("HealthCheckPolicy", true, "b", Some("2023-01-01T00:00:00Z"), json!({ "override": { "x": "b" }, "default": { "y": "b" } })),
            policy("RetryPolicy", false, "b", None, json!({ "count": 3 })),
        ]);
        assert_eq!(merge_same_level(&a, &b).unwrap(), merge_same_level(&b, &a).unwrap());
        assert_eq!(merge_same_level(&a, &b).unwrap().len(), 3);
    }

    #[test]
    fn across_levels_child_wins_for_direct_kinds() {
        // The parent is older, so general precedence alone would pick it.
        let parent = set(&[policy("TimeoutPolicy", false, "parent", Some("2023-01-01T00:00:00Z"), json!({ "seconds": 30 }))]);
        let child = set(&[policy("TimeoutPolicy", false, "child", Some("2023-02-01T00:00:00Z"), json!({ "seconds": 60 }))]);
        let pc = merge_across_levels(&parent, &child).unwrap();
        let cp = merge_across_levels(&child, &parent).unwrap();
        let id = PolicyKindId::from("TimeoutPolicy.foo.com");
        assert_eq!(pc[&id].document()["spec"]["seconds"], json!(60));
        assert_eq!(cp[&id].document()["spec"]["seconds"], json!(30));
        assert_ne!(pc, cp);
    }

    #[test]
    fn parent_override_is_sovereign_for_inherited_kinds() {
        let parent = set(&[policy("HealthCheckPolicy", true, "parent", None, json!({ "override": { "k1": "p" } }))]);
        let child = set(&[policy("HealthCheckPolicy", true, "child", None, json!({ "override": { "k1": "c", "k2": "c2" } }))]);
        let got = merge_across_levels(&parent, &child).unwrap();
        let hc = &got[&PolicyKindId::from("HealthCheckPolicy.foo.com")];
        assert_eq!(hc.override_section().unwrap(), &json!({ "k1": "p", "k2": "c2" }));
        assert_eq!(hc.reference().name, "child");
    }

    #[test]
    fn unrelated_kinds_pass_through() {
        let parent = set(&[policy("TimeoutPolicy", false, "p", None, json!({ "seconds": 30 }))]);
        let child = set(&[policy("RetryPolicy", false, "c", None, json!({ "count": 2 }))]);
        let got = merge_across_levels(&parent, &child).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[&PolicyKindId::from("TimeoutPolicy.foo.com")], parent[&PolicyKindId::from("TimeoutPolicy.foo.com")]);
    }
}
