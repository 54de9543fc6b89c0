//! Merging of enabled packages' rewrite tables into one override lookup.

use crate::registry::{Extension, Package, Registry, ResourcePack, ROOT_PACKAGE_ID};
use std::collections::HashMap;

/// URL namespace every override is served under.
pub const NAMESPACE: &str = "packmirror";

/// Merged override map: origin-relative asset key -> prefixed override URL.
///
/// Extensions are layered first, resource packs second, each group in
/// ascending activation sequence; every write overwrites unconditionally, so
/// the last applied package wins. Resource packs therefore always beat
/// extension-level replacements, and within one kind a later sequence beats
/// an earlier one.
pub fn merge_overrides(
    extensions: &Registry<Extension>,
    resourcepacks: &Registry<ResourcePack>,
) -> HashMap<String, String> {
    let mut overrides = HashMap::new();
    apply_layer(&mut overrides, extensions);
    apply_layer(&mut overrides, resourcepacks);
    overrides
}

fn apply_layer<P: Package>(overrides: &mut HashMap<String, String>, registry: &Registry<P>) {
    for (id, record) in registry.enabled_by_sequence() {
        if id == ROOT_PACKAGE_ID {
            continue;
        }
        for rule in record.metadata.rewrite_rules() {
            for key in rule.from_keys() {
                overrides.insert(key, format!("{NAMESPACE}/{}/{id}", P::KIND));
            }
        }
    }
}

/// Point every overridden entry of an upstream resource manifest at the
/// local package namespace instead of the origin.
pub fn apply_to_manifest(
    overrides: &HashMap<String, String>,
    manifest: &mut serde_json::Value,
) {
    let Some(res) = manifest.get_mut("res").and_then(|v| v.as_object_mut()) else {
        return;
    };
    for (key, prefix) in overrides {
        let entry = res
            .entry(key.clone())
            .or_insert_with(|| serde_json::json!({ "prefix": "" }));
        if let Some(object) = entry.as_object_mut() {
            object.insert(
                "prefix".to_string(),
                serde_json::Value::String(prefix.clone()),
            );
        }
    }
}

/// Resolve a requested asset key through one package's own rewrite rules.
/// The first rule whose expanded `from` set contains the key wins.
pub fn resolve_local_key<P: Package>(pack: &P, requested: &str) -> String {
    for rule in pack.rewrite_rules() {
        if rule.from_keys().iter().any(|key| key == requested) {
            return rule.target().to_string();
        }
    }
    requested.to_string()
}
