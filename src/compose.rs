//! Ordering of enabled extensions' injected scripts into the client-side
//! bootstrap payload.

use crate::error::ComposeError;
use crate::fetch::Origin;
use crate::registry::{Extension, OneOrMany, Registry};
use dashmap::DashMap;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, warn};

/// An extension whose id carries this suffix takes over game start instead
/// of being injected before or after it.
pub const LAUNCHER_SUFFIX: &str = "_launcher";

/// Ordered script-loading program the client bootstrap walks: all `pre`
/// scripts, then the launcher (or an explicit game start), then all `post`
/// scripts.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoaderManifest {
    pub code_version: String,
    pub has_launcher: bool,
    pub pre: Vec<String>,
    pub post: Vec<String>,
    pub launcher: String,
}

/// Build the loader manifest from the enabled extensions, in activation
/// order, restricted to those applying to the active server.
///
/// A second launcher is a configuration error surfaced to the operator; it
/// fails this composition but never the process.
pub fn compose_manifest(
    extensions: &Registry<Extension>,
    server_to_play: usize,
    code_version: &str,
) -> Result<LoaderManifest, ComposeError> {
    let mut manifest = LoaderManifest {
        code_version: code_version.to_string(),
        has_launcher: false,
        pre: Vec::new(),
        post: Vec::new(),
        launcher: String::new(),
    };

    for (id, record) in extensions.enabled_by_sequence() {
        let extension = &record.metadata;
        if !extension.apply_server.contains(&server_to_play) {
            continue;
        }

        if id.ends_with(LAUNCHER_SUFFIX) {
            if manifest.has_launcher {
                error!(
                    first = %manifest.launcher,
                    second = %id,
                    "multiple launcher extensions present"
                );
                return Err(ComposeError::DuplicateLauncher {
                    first: manifest.launcher.clone(),
                    second: id.clone(),
                });
            }
            manifest.has_launcher = true;
            manifest.launcher = id.clone();
            continue;
        }

        if extension.load_before_game {
            manifest.pre.push(id.clone());
        } else {
            manifest.post.push(id.clone());
        }
    }

    Ok(manifest)
}

/// Gathered script bodies, keyed by extension id in entry order.
#[derive(Default)]
pub struct ScriptStore {
    scripts: DashMap<String, Vec<String>>,
}

impl ScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: &str, script: String) {
        self.scripts.entry(id.to_string()).or_default().push(script);
    }

    pub fn get(&self, id: &str) -> Vec<String> {
        self.scripts
            .get(id)
            .map(|scripts| scripts.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.scripts.contains_key(id)
    }

    pub fn clear(&self) {
        self.scripts.clear();
    }
}

/// Load every entry script of one extension into the store.
///
/// Remote entries are fetched fresh on every gather and never written to
/// disk. Local entries are read from the extension folder; an unreadable
/// file contributes a placeholder body documenting the failure instead of
/// aborting the other extensions.
pub async fn gather_scripts(
    store: &ScriptStore,
    origin: &Arc<dyn Origin>,
    extension_dir: &Path,
    extension: &Extension,
) {
    let id = &extension.meta.id;
    let entries = match &extension.entry {
        OneOrMany::One(entry) => vec![entry.clone()],
        OneOrMany::Many(entries) => entries.clone(),
    };

    futures::future::join_all(
        entries
            .iter()
            .map(|entry| load_entry(store, origin, extension_dir, id, entry)),
    )
    .await;
}

async fn load_entry(
    store: &ScriptStore,
    origin: &Arc<dyn Origin>,
    extension_dir: &Path,
    id: &str,
    entry: &str,
) {
    if entry.starts_with("http://") || entry.starts_with("https://") {
        match origin.get(entry).await {
            Ok(response) => {
                store.add(id, String::from_utf8_lossy(&response.body).into_owned());
            }
            Err(e) => {
                error!(id = %id, entry = %entry, "remote entry script fetch failed: {e}");
                store.add(
                    id,
                    format!("// failed to load extension {id} from {entry}: {e}"),
                );
            }
        }
        return;
    }

    let path = extension_dir.join(id).join(entry);
    match std::fs::read_to_string(&path) {
        Ok(script) => store.add(id, script),
        Err(e) => {
            warn!(id = %id, path = %path.display(), "entry script unreadable: {e}");
            store.add(
                id,
                format!(
                    "// failed to load extension {id} from {}: {e}",
                    path.display()
                ),
            );
        }
    }
}

/// Emit the bootstrap program executed by the served client.
pub fn render_bootstrap(manifest: &LoaderManifest) -> String {
    let manifest_json =
        serde_json::to_string_pretty(manifest).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"const Packmirror = {{}};
Packmirror.$ = {manifest_json};
[...Packmirror.$.pre, ...Packmirror.$.post, ...(Packmirror.$.hasLauncher ? [Packmirror.$.launcher] : [])].forEach(ext => Packmirror[ext] = {{}});

(async () => {{
  const $ = Packmirror.$;
  await Promise.all(
    ['console', 'fetch'].map(name => addScript(`packmirror/plugin/${{name}}.js`))
  );

  await addScript(`packmirror/${{$.codeVersion}}/code.js`);

  await Promise.all(
    $.pre.map(ext => addScript(`packmirror/extension/scripts/${{ext}}/`))
  );

  if ($.hasLauncher) {{
    await addScript(`packmirror/extension/scripts/${{$.launcher}}/`);
  }} else {{
    new GameMgr();
  }}

  await Promise.all(
    $.post.map(ext => addScript(`packmirror/extension/scripts/${{ext}}/`))
  );
}})();

function addScript(url) {{
  return new Promise((resolve, reject) => {{
    const tag = document.createElement('script');
    tag.src = url;
    tag.async = false;
    tag.onload = resolve;
    tag.onerror = reject;
    document.head.appendChild(tag);
  }});
}}
"#
    )
}

/// Wrap one extension's gathered scripts into an isolated bundle with its
/// scoped console and fetch helpers.
pub fn render_extension_bundle(extension: &Extension, scripts: &[String]) -> String {
    let id = &extension.meta.id;
    let author = extension.meta.author.to_vec().join(", ");
    let guarded: Vec<String> = scripts
        .iter()
        .map(|script| {
            format!(
                "  try {{\n{script}\n  }} catch(e) {{\n    console.error('Unresolved Error', e);\n  }}"
            )
        })
        .collect();
    format!(
        "/**\n * Extension: {id}\n * Author: {author}\n * Version: {version}\n */\n\
((context, console, fetchSelf) => {{\n{body}\n}})(\n  Packmirror.{id},\n  extensionConsole('{id}'),\n  extensionFetch('{id}')\n);\n",
        version = extension.meta.version,
        body = guarded.join("\n")
    )
}

/// Per-extension console shim: prefixes every call with the extension id.
pub fn render_console_shim() -> String {
    r#"const extensionConsole = id => {
  return new Proxy(
    {},
    {
      get: (target, name) => {
        return typeof console[name] !== 'function'
          ? () => undefined
          : (...args) => {
              if (args.length === 0) return undefined;
              else if (typeof args[0] === 'string') args[0] = `[${id}] ${args[0]}`;
              else args = [`[${id}]`, ...args];
              return console[name].apply(this, args);
            };
      }
    }
  );
};
"#
    .to_string()
}

/// Per-extension fetch shim: resolves relative requests inside the
/// extension's own namespace.
pub fn render_fetch_shim() -> String {
    r#"window.extensionFetch = id => {
  return (input, init) => {
    if (typeof input !== 'string') {
      return;
    }
    return fetch(`packmirror/extension/${id}/${input}`, init);
  };
};
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_extension(data_dir: &Path, id: &str, body: &str) {
        let dir = data_dir.join("extension").join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("extension.json"), body).unwrap();
    }

    fn write_active(data_dir: &Path, ids: &[&str]) {
        let dir = data_dir.join("extension");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("active.json"), serde_json::to_string(ids).unwrap()).unwrap();
    }

    fn scanned(data_dir: &Path) -> Registry<Extension> {
        let mut registry = Registry::new(data_dir, vec!["jp".to_string(), "en".to_string()]);
        registry.scan().unwrap();
        registry
    }

    #[test]
    fn test_manifest_buckets_follow_sequence_order() {
        let tmp = TempDir::new().unwrap();
        write_extension(
            tmp.path(),
            "early",
            r#"{"id": "early", "version": "1.0.0", "loadBeforeGame": true}"#,
        );
        write_extension(
            tmp.path(),
            "late",
            r#"{"id": "late", "version": "1.0.0", "loadBeforeGame": true}"#,
        );
        write_extension(tmp.path(), "after", r#"{"id": "after", "version": "1.0.0"}"#);
        write_active(tmp.path(), &["late", "early", "after"]);

        let registry = scanned(tmp.path());
        let manifest = compose_manifest(&registry, 0, "1.2.3").unwrap();

        assert_eq!(manifest.pre, vec!["late", "early"]);
        assert_eq!(manifest.post, vec!["after"]);
        assert!(!manifest.has_launcher);
        assert_eq!(manifest.code_version, "1.2.3");
    }

    #[test]
    fn test_apply_server_filter() {
        let tmp = TempDir::new().unwrap();
        write_extension(
            tmp.path(),
            "jponly",
            r#"{"id": "jponly", "version": "1.0.0", "applyServer": [1]}"#,
        );
        write_active(tmp.path(), &["jponly"]);

        let registry = scanned(tmp.path());
        let manifest = compose_manifest(&registry, 0, "v").unwrap();
        assert!(manifest.pre.is_empty() && manifest.post.is_empty());

        let manifest = compose_manifest(&registry, 1, "v").unwrap();
        assert_eq!(manifest.post, vec!["jponly"]);
    }

    #[test]
    fn test_single_launcher_selected() {
        let tmp = TempDir::new().unwrap();
        write_extension(
            tmp.path(),
            "boot_launcher",
            r#"{"id": "boot_launcher", "version": "1.0.0"}"#,
        );
        write_extension(tmp.path(), "other", r#"{"id": "other", "version": "1.0.0"}"#);
        write_active(tmp.path(), &["boot_launcher", "other"]);

        let registry = scanned(tmp.path());
        let manifest = compose_manifest(&registry, 0, "v").unwrap();

        assert!(manifest.has_launcher);
        assert_eq!(manifest.launcher, "boot_launcher");
        assert_eq!(manifest.post, vec!["other"]);
    }

    #[test]
    fn test_duplicate_launcher_is_composition_error() {
        let tmp = TempDir::new().unwrap();
        write_extension(
            tmp.path(),
            "a_launcher",
            r#"{"id": "a_launcher", "version": "1.0.0"}"#,
        );
        write_extension(
            tmp.path(),
            "b_launcher",
            r#"{"id": "b_launcher", "version": "1.0.0"}"#,
        );
        write_active(tmp.path(), &["a_launcher", "b_launcher"]);

        let registry = scanned(tmp.path());
        match compose_manifest(&registry, 0, "v") {
            Err(ComposeError::DuplicateLauncher { first, second }) => {
                assert_eq!(first, "a_launcher");
                assert_eq!(second, "b_launcher");
            }
            other => panic!("expected DuplicateLauncher, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gather_missing_local_script_yields_placeholder() {
        let tmp = TempDir::new().unwrap();
        write_extension(tmp.path(), "lost", r#"{"id": "lost", "version": "1.0.0"}"#);
        write_active(tmp.path(), &["lost"]);
        let registry = scanned(tmp.path());

        let store = ScriptStore::new();
        let origin: Arc<dyn Origin> = Arc::new(NoNetwork);
        let record = registry.get("lost").unwrap();
        gather_scripts(
            &store,
            &origin,
            &tmp.path().join("extension"),
            &record.metadata,
        )
        .await;

        let scripts = store.get("lost");
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].starts_with("// failed to load extension lost"));
    }

    #[tokio::test]
    async fn test_gather_local_scripts_in_entry_order() {
        let tmp = TempDir::new().unwrap();
        write_extension(
            tmp.path(),
            "multi",
            r#"{"id": "multi", "version": "1.0.0", "entry": ["one.js", "two.js"]}"#,
        );
        write_active(tmp.path(), &["multi"]);
        let dir = tmp.path().join("extension").join("multi");
        fs::write(dir.join("one.js"), "console.log(1)").unwrap();
        fs::write(dir.join("two.js"), "console.log(2)").unwrap();
        let registry = scanned(tmp.path());

        let store = ScriptStore::new();
        let origin: Arc<dyn Origin> = Arc::new(NoNetwork);
        gather_scripts(
            &store,
            &origin,
            &tmp.path().join("extension"),
            &registry.get("multi").unwrap().metadata,
        )
        .await;

        assert_eq!(store.get("multi"), vec!["console.log(1)", "console.log(2)"]);
    }

    #[test]
    fn test_bootstrap_walks_pre_launcher_post() {
        let manifest = LoaderManifest {
            code_version: "0.9.1".to_string(),
            has_launcher: true,
            pre: vec!["first".to_string()],
            post: vec!["second".to_string()],
            launcher: "boot_launcher".to_string(),
        };
        let bootstrap = render_bootstrap(&manifest);
        assert!(bootstrap.contains("\"codeVersion\": \"0.9.1\""));
        assert!(bootstrap.contains("packmirror/extension/scripts/"));
        assert!(bootstrap.contains("new GameMgr()"));
    }

    struct NoNetwork;

    #[async_trait::async_trait]
    impl Origin for NoNetwork {
        async fn get(
            &self,
            _url: &str,
        ) -> std::result::Result<crate::fetch::OriginResponse, crate::error::FetchError> {
            panic!("network access not expected in this test");
        }
    }
}
