use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved id of the host itself. Packages may declare a dependency on it;
/// such a dependency is exempt from the enabled check during resolution.
pub const ROOT_PACKAGE_ID: &str = "packmirror";

/// Descriptor fields that accept either a single value or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v.clone()],
            OneOrMany::Many(vs) => vs.clone(),
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

/// Shared head of every package descriptor, immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackMeta {
    #[serde(default = "default_id")]
    pub id: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_author")]
    pub author: OneOrMany<String>,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_preview")]
    pub preview: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

fn default_id() -> String {
    ROOT_PACKAGE_ID.to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_name() -> String {
    "Unnamed".to_string()
}

fn default_author() -> OneOrMany<String> {
    OneOrMany::One("Unknown".to_string())
}

fn default_description() -> String {
    "No description provided.".to_string()
}

fn default_preview() -> String {
    "preview.png".to_string()
}

/// One asset rewrite rule. The shorthand form names a single key replaced on
/// every origin; the full form spells out the source set and target.
///
/// After [`preprocess_rules`] every rule is the `Entry` variant and every
/// `from` set is fully expanded: the original key plus the key prefixed with
/// each alternate origin name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RewriteRule {
    Shorthand(String),
    Entry(RewriteEntry),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteEntry {
    pub from: OneOrMany<String>,
    pub to: String,
    #[serde(default, rename = "all-servers")]
    pub all_servers: bool,
}

impl RewriteRule {
    /// Source keys of this rule, regardless of preprocessing state.
    pub fn from_keys(&self) -> Vec<String> {
        match self {
            RewriteRule::Shorthand(key) => vec![key.clone()],
            RewriteRule::Entry(entry) => entry.from.to_vec(),
        }
    }

    /// Canonical target key.
    pub fn target(&self) -> &str {
        match self {
            RewriteRule::Shorthand(key) => key,
            RewriteRule::Entry(entry) => &entry.to,
        }
    }
}

/// Expand every shorthand and every `all-servers` rule in place.
pub fn preprocess_rules(rules: &mut [RewriteRule], alternate_prefixes: &[String]) {
    for rule in rules.iter_mut() {
        match rule {
            RewriteRule::Shorthand(key) => {
                let mut from = vec![key.clone()];
                from.extend(
                    alternate_prefixes
                        .iter()
                        .map(|prefix| format!("{prefix}/{key}")),
                );
                *rule = RewriteRule::Entry(RewriteEntry {
                    from: OneOrMany::Many(from),
                    to: key.clone(),
                    all_servers: true,
                });
            }
            RewriteRule::Entry(entry) => {
                if entry.all_servers {
                    let mut expanded = Vec::new();
                    for key in entry.from.to_vec() {
                        expanded.push(key.clone());
                        expanded.extend(
                            alternate_prefixes
                                .iter()
                                .map(|prefix| format!("{prefix}/{key}")),
                        );
                    }
                    entry.from = OneOrMany::Many(expanded);
                } else if let OneOrMany::One(key) = &entry.from {
                    entry.from = OneOrMany::Many(vec![key.clone()]);
                }
            }
        }
    }
}

/// A package kind the registry can manage. The kind name doubles as the
/// on-disk directory name, the descriptor file stem and the namespace
/// segment in override URLs.
pub trait Package:
    DeserializeOwned + Serialize + Clone + Send + Sync + 'static
{
    const KIND: &'static str;

    fn meta(&self) -> &PackMeta;

    /// Kind-specific post-load hook, run after validation and before the
    /// descriptor is inserted into the registry.
    fn preprocess(&mut self, alternate_prefixes: &[String]);

    /// Rewrite rules this package contributes to the merged override map.
    fn rewrite_rules(&self) -> &[RewriteRule];
}

/// A resource pack: overrides individual assets of the mirrored client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePack {
    #[serde(flatten)]
    pub meta: PackMeta,
    #[serde(default)]
    pub replace: Vec<RewriteRule>,
}

impl Package for ResourcePack {
    const KIND: &'static str = "resourcepack";

    fn meta(&self) -> &PackMeta {
        &self.meta
    }

    fn preprocess(&mut self, alternate_prefixes: &[String]) {
        preprocess_rules(&mut self.replace, alternate_prefixes);
    }

    fn rewrite_rules(&self) -> &[RewriteRule] {
        &self.replace
    }
}

/// An extension: injects scripts into the client bootstrap, and may embed a
/// resource pack of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    #[serde(flatten)]
    pub meta: PackMeta,
    #[serde(default = "default_entry")]
    pub entry: OneOrMany<String>,
    #[serde(default)]
    pub load_before_game: bool,
    #[serde(default = "default_apply_server")]
    pub apply_server: Vec<usize>,
    #[serde(default)]
    pub resourcepack: Vec<RewriteRule>,
}

fn default_entry() -> OneOrMany<String> {
    OneOrMany::One("script.js".to_string())
}

fn default_apply_server() -> Vec<usize> {
    vec![0, 1, 2]
}

impl Package for Extension {
    const KIND: &'static str = "extension";

    fn meta(&self) -> &PackMeta {
        &self.meta
    }

    fn preprocess(&mut self, alternate_prefixes: &[String]) {
        preprocess_rules(&mut self.resourcepack, alternate_prefixes);
    }

    fn rewrite_rules(&self) -> &[RewriteRule] {
        &self.resourcepack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alternates() -> Vec<String> {
        vec!["jp".to_string(), "en".to_string()]
    }

    #[test]
    fn test_shorthand_expansion() {
        let mut rules = vec![RewriteRule::Shorthand("audio/bgm.mp3".to_string())];
        preprocess_rules(&mut rules, &alternates());

        match &rules[0] {
            RewriteRule::Entry(entry) => {
                assert_eq!(
                    entry.from.to_vec(),
                    vec!["audio/bgm.mp3", "jp/audio/bgm.mp3", "en/audio/bgm.mp3"]
                );
                assert_eq!(entry.to, "audio/bgm.mp3");
                assert!(entry.all_servers);
            }
            RewriteRule::Shorthand(_) => panic!("shorthand not expanded"),
        }
    }

    #[test]
    fn test_all_servers_expansion_keeps_target() {
        let mut rules = vec![RewriteRule::Entry(RewriteEntry {
            from: OneOrMany::Many(vec!["a.png".to_string(), "b.png".to_string()]),
            to: "c.png".to_string(),
            all_servers: true,
        })];
        preprocess_rules(&mut rules, &alternates());

        let keys = rules[0].from_keys();
        assert_eq!(
            keys,
            vec!["a.png", "jp/a.png", "en/a.png", "b.png", "jp/b.png", "en/b.png"]
        );
        assert_eq!(rules[0].target(), "c.png");
    }

    #[test]
    fn test_single_origin_rule_not_expanded() {
        let mut rules = vec![RewriteRule::Entry(RewriteEntry {
            from: OneOrMany::One("x.png".to_string()),
            to: "y.png".to_string(),
            all_servers: false,
        })];
        preprocess_rules(&mut rules, &alternates());

        assert_eq!(rules[0].from_keys(), vec!["x.png"]);
    }

    #[test]
    fn test_descriptor_defaults_fill_missing_fields() {
        let pack: ResourcePack = serde_json::from_str(
            r#"{"id": "mypack", "version": "1.2.0"}"#,
        )
        .unwrap();
        assert_eq!(pack.meta.name, "Unnamed");
        assert_eq!(pack.meta.preview, "preview.png");
        assert!(pack.replace.is_empty());
        assert!(pack.meta.dependencies.is_empty());
    }

    #[test]
    fn test_extension_defaults() {
        let ext: Extension = serde_json::from_str(
            r#"{"id": "myext", "version": "0.1.0"}"#,
        )
        .unwrap();
        assert_eq!(ext.entry.to_vec(), vec!["script.js"]);
        assert!(!ext.load_before_game);
        assert_eq!(ext.apply_server, vec![0, 1, 2]);
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        let pack: ResourcePack = serde_json::from_str(
            r#"{"id": "p", "version": "1.0.0", "homepage": "https://example.com"}"#,
        )
        .unwrap();
        assert_eq!(pack.meta.id, "p");
    }
}
