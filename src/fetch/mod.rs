//! Asset resolution against the upstream origin: cache-aside reads with
//! write-through local caching and reversible obfuscation of flagged assets.

use crate::config::UpstreamConfig;
use crate::error::FetchError;
use bytes::Bytes;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, warn};

pub mod origin;

pub use origin::{HttpOrigin, Origin, OriginResponse};

/// Single-byte key of the reversible obfuscation applied to flagged assets.
pub const XOR_KEY: u8 = 73;

/// Marker substring: asset keys containing it travel obfuscated on the wire.
pub const OBFUSCATED_MARKER: &str = "extendRes";

/// Redirect chains are short by construction; the cap only guards against a
/// misbehaving upstream.
const MAX_REDIRECTS: usize = 10;

/// XOR every byte with the fixed key. Involution: applying it twice yields
/// the original bytes.
pub fn xor(data: &[u8]) -> Vec<u8> {
    data.iter().map(|byte| byte ^ XOR_KEY).collect()
}

/// Whether the resolved key denotes an asset that is obfuscated on the wire.
pub fn is_obfuscated(original_url: &str) -> bool {
    original_url.contains(OBFUSCATED_MARKER)
}

/// A route path denotes a navigable location rather than a concrete asset:
/// it ends in a path separator or carries a query string. Route paths are
/// never cached and never obfuscated.
pub fn is_route_path(original_url: &str) -> bool {
    original_url.ends_with('\\') || original_url.ends_with('/') || original_url.contains('?')
}

fn server_segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^/\d/").unwrap())
}

fn remote_segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // trailing slash optional: a bare `/1` also resolves to the origin root
    PATTERN.get_or_init(|| Regex::new(r"^/\d/?").unwrap())
}

/// Strip the leading single-digit server-index segment from a request path.
pub fn strip_server_segment(url: &str) -> String {
    server_segment_pattern().replace(url, "").into_owned()
}

/// Derive the local cache file for a request path, keyed by server index.
/// The query part never participates in the key.
pub fn cache_path(cache_root: &Path, server_index: usize, original_url: &str) -> PathBuf {
    let without_query = original_url
        .split_once('?')
        .map_or(original_url, |(path, _)| path);
    let mut path = cache_root.join(server_index.to_string());
    for segment in without_query.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

/// Terminal fetch result handed back to the routing layer. Route paths
/// decode the body to text at that boundary; assets stay raw bytes.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub body: Bytes,
}

impl FetchOutcome {
    pub fn into_text(self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Cache-aside fetcher over one set of upstream origins.
pub struct Fetcher {
    origin: Arc<dyn Origin>,
    cache_root: PathBuf,
}

impl Fetcher {
    pub fn new(origin: Arc<dyn Origin>, cache_root: PathBuf) -> Self {
        Self { origin, cache_root }
    }

    /// Absolute upstream URL for a mirrored request path.
    pub fn remote_url(&self, upstream: &UpstreamConfig, original_url: &str) -> String {
        format!(
            "{}{}",
            upstream.domain,
            remote_segment_pattern().replace(original_url, "")
        )
    }

    /// Fetch from the origin, following 301/302 redirects up to the cap.
    /// When `deobfuscate` is set the terminal body is XOR-decoded.
    pub async fn remote_source(
        &self,
        upstream: &UpstreamConfig,
        original_url: &str,
        deobfuscate: bool,
    ) -> Result<(u16, Bytes), FetchError> {
        let mut target = self.remote_url(upstream, original_url);

        for _ in 0..MAX_REDIRECTS {
            let response = self.origin.get(&target).await?;

            if response.status == 301 || response.status == 302 {
                let location = response
                    .location
                    .ok_or_else(|| FetchError::BadRedirect(target.clone()))?;
                target = resolve_redirect(&target, &location)?;
                continue;
            }

            if !(200..400).contains(&response.status) {
                warn!(
                    url = %target,
                    status = response.status,
                    "upstream request failed"
                );
            }

            let body = if deobfuscate {
                Bytes::from(xor(&response.body))
            } else {
                response.body
            };
            return Ok((response.status, body));
        }

        Err(FetchError::RedirectLimit(target))
    }

    /// Resolve a request path to bytes, preferring the local cache.
    ///
    /// Asset paths with a cache file are served locally without touching the
    /// network. Misses go upstream; a terminal non-4xx asset response is run
    /// through `transform` and written through to the cache (best-effort).
    /// The cache always stores pre-obfuscation bytes; when `encode` is set
    /// and the key is flagged, the body is XOR-obfuscated at serve time.
    /// A network-layer failure terminates the request as a 403 carrying the
    /// error detail; it is never retried.
    pub async fn remote_or_cached(
        &self,
        upstream: &UpstreamConfig,
        url: &str,
        encode: bool,
        transform: Option<fn(Bytes) -> Bytes>,
    ) -> FetchOutcome {
        let original_url = strip_server_segment(url);
        let obfuscated = is_obfuscated(&original_url);
        let route = is_route_path(&original_url);
        let local = cache_path(&self.cache_root, upstream.id, &original_url);

        let mut status: u16 = 200;
        let mut data: Option<Bytes> = None;

        if !route && local.exists() {
            match tokio::fs::read(&local).await {
                Ok(bytes) => {
                    debug!(url = %original_url, "serving from local cache");
                    data = Some(Bytes::from(bytes));
                }
                Err(e) => error!(path = %local.display(), "cache read failed: {e}"),
            }
        }

        if data.is_none() {
            match self
                .remote_source(upstream, &original_url, obfuscated && !route)
                .await
            {
                Ok((code, body)) => {
                    status = code;
                    let mut body = body;
                    if !route && !(400..500).contains(&code) {
                        if let Some(transform) = transform {
                            body = transform(body);
                        }
                        self.write_through(&local, &body).await;
                    }
                    data = Some(body);
                }
                Err(e) => {
                    return FetchOutcome {
                        status: 403,
                        body: Bytes::from(e.to_string()),
                    };
                }
            }
        }

        let mut body = data.unwrap_or_default();
        if encode && obfuscated {
            body = Bytes::from(xor(&body));
        }

        FetchOutcome { status, body }
    }

    /// Best-effort cache write: failure is logged and never fails the
    /// in-flight response.
    async fn write_through(&self, local: &Path, body: &Bytes) {
        if let Some(parent) = local.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %local.display(), "cache dir creation failed: {e}");
                return;
            }
        }
        if let Err(e) = tokio::fs::write(local, body).await {
            warn!(path = %local.display(), "cache write failed: {e}");
        }
    }
}

fn resolve_redirect(current: &str, location: &str) -> Result<String, FetchError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(location.to_string());
    }
    let base = url::Url::parse(current)
        .map_err(|_| FetchError::BadRedirect(current.to_string()))?;
    base.join(location)
        .map(|resolved| resolved.to_string())
        .map_err(|_| FetchError::BadRedirect(location.to_string()))
}
