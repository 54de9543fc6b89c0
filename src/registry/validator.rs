use crate::error::LoadReject;
use crate::registry::descriptor::{Package, ROOT_PACKAGE_ID};
use regex::Regex;
use semver::{Version, VersionReq};
use std::path::Path;
use std::sync::OnceLock;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[_a-zA-Z0-9]+$").unwrap())
}

/// Run the full validation sequence over one candidate folder and produce
/// the typed descriptor. Short-circuits at the first failure; the caller
/// discards the candidate and continues the scan.
///
/// `is_duplicate` is the registry's membership probe, checked after the
/// folder/id agreement so a duplicate is reported under its settled id.
pub fn validate_candidate<P: Package>(
    kind_root: &Path,
    folder: &str,
    is_duplicate: impl Fn(&str) -> bool,
    alternate_prefixes: &[String],
) -> Result<P, LoadReject> {
    if !id_pattern().is_match(folder) {
        return Err(LoadReject::InvalidId(folder.to_string()));
    }

    let dir = kind_root.join(folder);
    if !dir.is_dir() {
        return Err(LoadReject::FolderMissing(dir.display().to_string()));
    }

    let descriptor_path = dir.join(format!("{}.json", P::KIND));
    if !descriptor_path.is_file() {
        return Err(LoadReject::DescriptorMissing(
            descriptor_path.display().to_string(),
        ));
    }

    let raw = std::fs::read_to_string(&descriptor_path)
        .map_err(|e| LoadReject::Parse(e.to_string()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| LoadReject::Parse(e.to_string()))?;

    // The id must agree with the folder name. A missing id field settles to
    // the root id via the default template, which can never match a folder
    // that failed to declare it.
    let id = value
        .get("id")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(ROOT_PACKAGE_ID);
    if id != folder {
        return Err(LoadReject::IdMismatch {
            folder: folder.to_string(),
            id: id.to_string(),
        });
    }

    if is_duplicate(id) {
        return Err(LoadReject::Duplicate(id.to_string()));
    }

    let mut pack: P =
        serde_json::from_value(value).map_err(|e| LoadReject::Schema(e.to_string()))?;

    if Version::parse(&pack.meta().version).is_err() {
        return Err(LoadReject::BadVersion(pack.meta().version.clone()));
    }

    for (dependency, range) in &pack.meta().dependencies {
        if VersionReq::parse(range).is_err() {
            return Err(LoadReject::BadDependencyRange {
                dependency: dependency.clone(),
                range: range.clone(),
            });
        }
    }

    pack.preprocess(alternate_prefixes);

    Ok(pack)
}
