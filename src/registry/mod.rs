//! Package lifecycle management: discovery, validation, dependency-aware
//! enable/disable and activation ordering for one package kind.

use crate::error::DependencyIssue;
use semver::{Version, VersionReq};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

pub mod descriptor;
pub mod validator;

pub use descriptor::{
    Extension, OneOrMany, PackMeta, Package, ResourcePack, RewriteEntry, RewriteRule,
    ROOT_PACKAGE_ID,
};

/// Load state of one successfully validated package.
///
/// Invariant: `sequence > 0` exactly when `enabled`; sequences of enabled
/// records form a contiguous 1..N range after every resolution pass.
#[derive(Debug, Clone)]
pub struct LoadRecord<P> {
    pub enabled: bool,
    pub sequence: usize,
    pub errors: Vec<DependencyIssue>,
    pub metadata: P,
}

/// All validated packages of one kind, their enabled/sequence state, and the
/// persisted list of ids the user wants enabled.
pub struct Registry<P: Package> {
    kind_root: PathBuf,
    active_path: PathBuf,
    alternate_prefixes: Vec<String>,
    loaded: HashMap<String, LoadRecord<P>>,
    active: Vec<String>,
    /// Reverse-dependency index: id -> ids of loaded packages that declare a
    /// dependency on it. Maintained on load so a cascading disable does not
    /// rescan every record.
    dependents: HashMap<String, HashSet<String>>,
}

impl<P: Package> Registry<P> {
    pub fn new(data_dir: &Path, alternate_prefixes: Vec<String>) -> Self {
        let kind_root = data_dir.join(P::KIND);
        let active_path = kind_root.join("active.json");
        Self {
            kind_root,
            active_path,
            alternate_prefixes,
            loaded: HashMap::new(),
            active: Vec::new(),
            dependents: HashMap::new(),
        }
    }

    pub fn kind_root(&self) -> &Path {
        &self.kind_root
    }

    /// Folder a given package's payload lives in.
    pub fn package_dir(&self, id: &str) -> PathBuf {
        self.kind_root.join(id)
    }

    /// Read the persisted enabled-id list. A missing or unreadable file
    /// settles to an empty list; the settled state is written back.
    pub fn load_active(&mut self) {
        if self.active_path.exists() {
            match std::fs::read_to_string(&self.active_path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
            {
                Ok(ids) => self.active = ids,
                Err(e) => {
                    error!(kind = P::KIND, "failed to load enabled list: {e}");
                    self.active = Vec::new();
                }
            }
        } else {
            self.active = Vec::new();
        }
        self.save();
    }

    /// Persist the enabled-id list. Rewritten after every load, enable and
    /// disable so restarts see the settled state.
    pub fn save(&self) {
        if let Some(parent) = self.active_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&self.active) {
            Ok(body) => {
                if let Err(e) = std::fs::write(&self.active_path, body) {
                    error!(kind = P::KIND, "failed to persist enabled list: {e}");
                }
            }
            Err(e) => error!(kind = P::KIND, "failed to serialize enabled list: {e}"),
        }
    }

    /// Validate and insert one candidate folder. Rejects are logged and
    /// skipped; the registry is never partially mutated by a failure.
    pub fn load(&mut self, folder: &str) {
        let loaded = &self.loaded;
        match validator::validate_candidate::<P>(
            &self.kind_root,
            folder,
            |id| loaded.contains_key(id),
            &self.alternate_prefixes,
        ) {
            Ok(pack) => self.insert(pack),
            Err(reject) => {
                debug!(kind = P::KIND, folder = %folder, "skipped candidate: {reject}");
            }
        }
    }

    fn insert(&mut self, pack: P) {
        let id = pack.meta().id.clone();
        for dependency in pack.meta().dependencies.keys() {
            self.dependents
                .entry(dependency.clone())
                .or_default()
                .insert(id.clone());
        }
        self.loaded.insert(
            id,
            LoadRecord {
                enabled: false,
                sequence: 0,
                errors: Vec::new(),
                metadata: pack,
            },
        );
    }

    /// Scan the kind directory and rebuild the registry wholesale, then
    /// resolve the persisted enabled list.
    pub fn scan(&mut self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.kind_root)?;
        self.clear();
        self.load_active();

        let mut folders: Vec<String> = std::fs::read_dir(&self.kind_root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        folders.sort();

        for folder in folders {
            self.load(&folder);
        }

        self.enable_from_active();
        self.save();
        Ok(())
    }

    /// Resolve the candidate list into the activatable subset.
    ///
    /// Single forward pass in candidate order: a later candidate cannot
    /// satisfy a dependency of an earlier one that was rejected in the same
    /// pass. Accepted candidates are enabled in their original relative
    /// order and assigned contiguous 1-based sequences.
    pub fn enable_from_active(&mut self) {
        let mut validated: Vec<String> = Vec::new();

        for id in self.active.clone() {
            let Some(record) = self.loaded.get(&id) else {
                // Stale id in the persisted list: the folder is gone.
                debug!(kind = P::KIND, id = %id, "enabled id not loaded, skipping");
                continue;
            };

            if record.enabled {
                validated.push(id);
                continue;
            }

            let mut issues = Vec::new();
            for (dependency, range) in &record.metadata.meta().dependencies {
                match self.loaded.get(dependency) {
                    None => {
                        debug!(kind = P::KIND, id = %id, dependency = %dependency, "dependency not found");
                        issues.push(DependencyIssue::NotFound(dependency.clone()));
                    }
                    Some(dep_record) => {
                        if dependency != ROOT_PACKAGE_ID && !dep_record.enabled {
                            debug!(kind = P::KIND, id = %id, dependency = %dependency, "dependency not enabled");
                            issues.push(DependencyIssue::NotEnabled(dependency.clone()));
                            continue;
                        }
                        let loaded_version = &dep_record.metadata.meta().version;
                        let satisfied = match (
                            VersionReq::parse(range),
                            Version::parse(loaded_version),
                        ) {
                            (Ok(req), Ok(version)) => req.matches(&version),
                            // Both sides were validated at load time.
                            _ => false,
                        };
                        if !satisfied {
                            debug!(
                                kind = P::KIND,
                                id = %id,
                                dependency = %dependency,
                                required = %range,
                                actual = %loaded_version,
                                "dependency version mismatch"
                            );
                            issues.push(DependencyIssue::VersionMismatch {
                                dependency: dependency.clone(),
                                required: range.clone(),
                                actual: loaded_version.clone(),
                            });
                        }
                    }
                }
            }

            let record = self.loaded.get_mut(&id).expect("record probed above");
            if issues.is_empty() {
                record.enabled = true;
                validated.push(id);
            } else {
                record.errors.extend(issues);
            }
        }

        for (index, id) in validated.iter().enumerate() {
            if let Some(record) = self.loaded.get_mut(id) {
                record.sequence = index + 1;
            }
        }
        self.active = validated;
    }

    /// Disable a package and, first, every currently-enabled package that
    /// transitively depends on it.
    pub fn disable(&mut self, id: &str) {
        let mut visited = HashSet::new();
        self.disable_inner(id, &mut visited);
    }

    fn disable_inner(&mut self, id: &str, visited: &mut HashSet<String>) {
        // Dependency graphs are non-self-referential at the id level, but
        // guard anyway so a hand-edited descriptor cannot hang the cascade.
        if !visited.insert(id.to_string()) {
            return;
        }
        let Some(record) = self.loaded.get(id) else {
            return;
        };

        if record.enabled {
            let dependents: Vec<String> = self
                .dependents
                .get(id)
                .map(|ids| {
                    ids.iter()
                        .filter(|dep| {
                            self.loaded
                                .get(*dep)
                                .map_or(false, |record| record.enabled)
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            for dependent in dependents {
                self.disable_inner(&dependent, visited);
            }
        }

        let record = self.loaded.get_mut(id).expect("record probed above");
        record.sequence = 0;
        record.enabled = false;
        self.active.retain(|active| active != id);
    }

    /// Queue a package for enabling and re-resolve the whole candidate list.
    /// The full pass is deliberate: packages previously rejected for a
    /// missing dependency may now be satisfiable.
    pub fn enable(&mut self, id: &str) {
        if let Some(record) = self.loaded.get_mut(id) {
            record.errors.clear();
        }
        if !self.active.iter().any(|active| active == id) {
            self.active.push(id.to_string());
        }
        self.enable_from_active();
    }

    /// Bulk-set every record enabled, clearing errors. Dependency validity
    /// is not recomputed and the persisted list is left untouched.
    pub fn enable_all(&mut self) {
        for record in self.loaded.values_mut() {
            record.enabled = true;
            record.errors.clear();
        }
    }

    /// Bulk-disable every record, clearing errors and the persisted list.
    pub fn disable_all(&mut self) {
        for record in self.loaded.values_mut() {
            record.enabled = false;
            record.errors.clear();
        }
        self.active.clear();
    }

    pub fn change_enable(&mut self, id: &str, enabled: bool) {
        if enabled {
            self.enable(id);
        } else {
            self.disable(id);
        }
        self.save();
    }

    /// Disable a package, delete its folder from disk and clear the registry
    /// for a rescan.
    pub fn remove(&mut self, id: &str) -> std::io::Result<()> {
        self.disable(id);
        let dir = self.package_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        self.save();
        self.clear();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.loaded.clear();
        self.active.clear();
        self.dependents.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.loaded.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&LoadRecord<P>> {
        self.loaded.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = (&String, &LoadRecord<P>)> {
        self.loaded.iter()
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Enabled records in activation order, the sole ordering key for
    /// override precedence and script injection.
    pub fn enabled_by_sequence(&self) -> Vec<(&String, &LoadRecord<P>)> {
        let mut enabled: Vec<_> = self
            .loaded
            .iter()
            .filter(|(_, record)| record.enabled && record.sequence > 0)
            .collect();
        enabled.sort_by_key(|(_, record)| record.sequence);
        enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_pack(data_dir: &Path, id: &str, body: &str) {
        let dir = data_dir.join("resourcepack").join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("resourcepack.json"), body).unwrap();
    }

    fn write_active(data_dir: &Path, ids: &[&str]) {
        let dir = data_dir.join("resourcepack");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("active.json"),
            serde_json::to_string(ids).unwrap(),
        )
        .unwrap();
    }

    fn registry(data_dir: &Path) -> Registry<ResourcePack> {
        Registry::new(data_dir, vec!["jp".to_string(), "en".to_string()])
    }

    #[test]
    fn test_scan_loads_valid_and_skips_invalid() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "good", r#"{"id": "good", "version": "1.0.0"}"#);
        write_pack(tmp.path(), "bad", "{broken");

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();

        assert!(reg.contains("good"));
        assert!(!reg.contains("bad"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_enable_assigns_contiguous_sequences() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "one", r#"{"id": "one", "version": "1.0.0"}"#);
        write_pack(tmp.path(), "two", r#"{"id": "two", "version": "1.0.0"}"#);
        write_active(tmp.path(), &["two", "one"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();

        assert_eq!(reg.get("two").unwrap().sequence, 1);
        assert_eq!(reg.get("one").unwrap().sequence, 2);
    }

    #[test]
    fn test_stale_active_id_skipped_silently() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "real", r#"{"id": "real", "version": "1.0.0"}"#);
        write_active(tmp.path(), &["ghost", "real"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();

        assert!(reg.get("real").unwrap().enabled);
        assert_eq!(reg.get("real").unwrap().sequence, 1);
    }

    #[test]
    fn test_dependency_not_found_recorded() {
        let tmp = TempDir::new().unwrap();
        write_pack(
            tmp.path(),
            "orphan",
            r#"{"id": "orphan", "version": "1.0.0", "dependencies": {"missing": "^1.0.0"}}"#,
        );
        write_active(tmp.path(), &["orphan"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();

        let record = reg.get("orphan").unwrap();
        assert!(!record.enabled);
        assert_eq!(record.sequence, 0);
        assert_eq!(
            record.errors,
            vec![DependencyIssue::NotFound("missing".to_string())]
        );
    }

    #[test]
    fn test_dependency_not_enabled_recorded() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "base", r#"{"id": "base", "version": "1.0.0"}"#);
        write_pack(
            tmp.path(),
            "child",
            r#"{"id": "child", "version": "1.0.0", "dependencies": {"base": "^1.0.0"}}"#,
        );
        write_active(tmp.path(), &["child"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();

        assert_eq!(
            reg.get("child").unwrap().errors,
            vec![DependencyIssue::NotEnabled("base".to_string())]
        );
    }

    #[test]
    fn test_dependency_version_mismatch_recorded() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "base", r#"{"id": "base", "version": "0.9.0"}"#);
        write_pack(
            tmp.path(),
            "child",
            r#"{"id": "child", "version": "1.0.0", "dependencies": {"base": "^1.0.0"}}"#,
        );
        write_active(tmp.path(), &["base", "child"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();

        assert!(reg.get("base").unwrap().enabled);
        assert_eq!(
            reg.get("child").unwrap().errors,
            vec![DependencyIssue::VersionMismatch {
                dependency: "base".to_string(),
                required: "^1.0.0".to_string(),
                actual: "0.9.0".to_string(),
            }]
        );
    }

    #[test]
    fn test_single_pass_no_forward_references() {
        // `late` depends on `early`, but `early` appears after it in the
        // candidate list: a single forward pass must reject `late`.
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "early", r#"{"id": "early", "version": "1.0.0"}"#);
        write_pack(
            tmp.path(),
            "late",
            r#"{"id": "late", "version": "1.0.0", "dependencies": {"early": "^1.0.0"}}"#,
        );
        write_active(tmp.path(), &["late", "early"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();

        assert!(!reg.get("late").unwrap().enabled);
        assert!(reg.get("early").unwrap().enabled);
        assert_eq!(reg.get("early").unwrap().sequence, 1);
    }

    #[test]
    fn test_enable_reruns_whole_pass() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "base", r#"{"id": "base", "version": "1.2.0"}"#);
        write_pack(
            tmp.path(),
            "child",
            r#"{"id": "child", "version": "1.0.0", "dependencies": {"base": "^1.0.0"}}"#,
        );
        write_active(tmp.path(), &["child"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();
        assert!(!reg.get("child").unwrap().enabled);

        // Enabling the dependency re-validates the pending child.
        reg.enable("base");
        // Child still carries its recorded error from the first pass until
        // it is explicitly re-queued.
        reg.enable("child");

        assert!(reg.get("base").unwrap().enabled);
        assert!(reg.get("child").unwrap().enabled);
        assert_eq!(
            reg.get("child").unwrap().sequence,
            reg.get("base").unwrap().sequence + 1
        );
    }

    #[test]
    fn test_cascading_disable() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "a", r#"{"id": "a", "version": "1.0.0"}"#);
        write_pack(
            tmp.path(),
            "b",
            r#"{"id": "b", "version": "1.0.0", "dependencies": {"a": "^1.0.0"}}"#,
        );
        write_pack(
            tmp.path(),
            "c",
            r#"{"id": "c", "version": "1.0.0", "dependencies": {"b": "^1.0.0"}}"#,
        );
        write_pack(tmp.path(), "solo", r#"{"id": "solo", "version": "1.0.0"}"#);
        write_active(tmp.path(), &["a", "b", "c", "solo"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();
        assert!(reg.get("c").unwrap().enabled);

        reg.disable("a");

        for id in ["a", "b", "c"] {
            let record = reg.get(id).unwrap();
            assert!(!record.enabled, "{id} should be disabled");
            assert_eq!(record.sequence, 0);
        }
        // unrelated package untouched
        assert!(reg.get("solo").unwrap().enabled);
    }

    #[test]
    fn test_disable_all_clears_errors_and_active() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "p", r#"{"id": "p", "version": "1.0.0"}"#);
        write_active(tmp.path(), &["p"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();
        reg.disable_all();

        assert!(!reg.get("p").unwrap().enabled);
        assert!(reg.enabled_by_sequence().is_empty());
    }

    #[test]
    fn test_remove_deletes_folder_and_clears() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "doomed", r#"{"id": "doomed", "version": "1.0.0"}"#);
        write_active(tmp.path(), &["doomed"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();
        reg.remove("doomed").unwrap();

        assert!(reg.is_empty());
        assert!(!tmp.path().join("resourcepack").join("doomed").exists());
    }

    #[test]
    fn test_idempotent_reload() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "a", r#"{"id": "a", "version": "1.0.0"}"#);
        write_pack(
            tmp.path(),
            "b",
            r#"{"id": "b", "version": "1.0.0", "dependencies": {"a": "^1.0.0"}}"#,
        );
        write_active(tmp.path(), &["a", "b"]);

        let mut reg = registry(tmp.path());
        reg.scan().unwrap();
        let first: Vec<(String, bool, usize)> = reg
            .enabled_by_sequence()
            .iter()
            .map(|(id, r)| ((*id).clone(), r.enabled, r.sequence))
            .collect();

        reg.scan().unwrap();
        let second: Vec<(String, bool, usize)> = reg
            .enabled_by_sequence()
            .iter()
            .map(|(id, r)| ((*id).clone(), r.enabled, r.sequence))
            .collect();

        assert_eq!(first, second);
    }
}
