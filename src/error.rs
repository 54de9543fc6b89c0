use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Data directory inaccessible: {0}")]
    DataDirInaccessible(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown upstream server: {0}")]
    UnknownServer(String),
}

/// Why a candidate descriptor was discarded during a scan. Discarding a
/// candidate never aborts the scan; the reason is logged and the folder is
/// skipped.
#[derive(Error, Debug)]
pub enum LoadReject {
    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("folder not found: {0}")]
    FolderMissing(String),

    #[error("descriptor file not found: {0}")]
    DescriptorMissing(String),

    #[error("JSON parse failed: {0}")]
    Parse(String),

    #[error("folder name and id mismatch: folder is {folder}, but id is {id}")]
    IdMismatch { folder: String, id: String },

    #[error("already loaded or duplicated id: {0}")]
    Duplicate(String),

    #[error("descriptor schema failed: {0}")]
    Schema(String),

    #[error("broken version: {0}")]
    BadVersion(String),

    #[error("broken dependency version range {range} for {dependency}")]
    BadDependencyRange { dependency: String, range: String },
}

/// Structured dependency failure recorded on a load record. These are
/// surfaced through the list output, never thrown.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyIssue {
    #[error("dependencyNotFound, {0}")]
    NotFound(String),

    #[error("dependencyNotEnabled, {0}")]
    NotEnabled(String),

    #[error("dependencyVersionMismatch, {dependency}, {required}, {actual}")]
    VersionMismatch {
        dependency: String,
        required: String,
        actual: String,
    },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("redirect limit exceeded for {0}")]
    RedirectLimit(String),

    #[error("invalid redirect target: {0}")]
    BadRedirect(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Request(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("multiple launcher extensions present: {first} and {second}")]
    DuplicateLauncher { first: String, second: String },
}

pub type Result<T> = std::result::Result<T, MirrorError>;

impl warp::reject::Reject for MirrorError {}
