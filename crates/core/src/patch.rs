//! JSON Merge Patch (RFC 7386) over `serde_json::Value` trees.

use serde_json::Value as Json;

/// Apply `patch` onto `target` in place.
///
/// Objects merge key by key, `null` removes a key, everything else (scalars,
/// arrays, type changes) replaces wholesale.
pub fn merge_patch(target: &mut Json, patch: &Json) {
    let Json::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Json::Object(serde_json::Map::new());
    }
    if let Json::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(Json::Null), v);
            }
        }
    }
}

/// Non-mutating variant of [`merge_patch`].
pub fn merged(base: &Json, patch: &Json) -> Json {
    let mut out = base.clone();
    merge_patch(&mut out, patch);
    out
}
