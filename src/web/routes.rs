use crate::compose;
use crate::fetch;
use crate::registry::Package;
use crate::rewrite;
use crate::state::AppState;
use bytes::Bytes;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::{Response, StatusCode};
use warp::hyper::Body;
use warp::path::{FullPath, Tail};
use warp::{Filter, Rejection, Reply};

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    resourcepack_info(state.clone())
        .or(resourcepack_asset(state.clone()))
        .or(extension_scripts(state.clone()))
        .or(extension_info(state.clone()))
        .or(extension_asset(state.clone()))
        .or(plugin_shims())
        .or(upstream_code(state.clone()))
        .or(bootstrap(state.clone()))
        .or(passthrough(state))
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn resourcepack_info(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!(String / "packmirror" / "resourcepack" / String)
        .and(warp::get())
        .and(with_state(state))
        .and_then(|_server: String, id: String, state: Arc<AppState>| async move {
            let registry = state.resourcepacks.read().await;
            Ok::<_, Rejection>(descriptor_reply(
                registry.get(&id).map(|record| &record.metadata),
            ))
        })
}

fn extension_info(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!(String / "packmirror" / "extension" / String)
        .and(warp::get())
        .and(with_state(state))
        .and_then(|_server: String, id: String, state: Arc<AppState>| async move {
            let registry = state.extensions.read().await;
            Ok::<_, Rejection>(descriptor_reply(
                registry.get(&id).map(|record| &record.metadata),
            ))
        })
}

fn descriptor_reply<P: serde::Serialize>(pack: Option<&P>) -> Response<Body> {
    match pack {
        Some(pack) => {
            let body = serde_json::to_string_pretty(pack).unwrap_or_else(|_| "{}".to_string());
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()
        }
        None => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not Found"))
            .unwrap(),
    }
}

fn resourcepack_asset(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::param::<String>()
        .and(warp::path("packmirror"))
        .and(warp::path("resourcepack"))
        .and(warp::path::param::<String>())
        .and(warp::path::tail())
        .and(warp::get())
        .and(with_state(state))
        .and_then(
            |_server: String, id: String, tail: Tail, state: Arc<AppState>| async move {
                let registry = state.resourcepacks.read().await;
                let Some(record) = registry.get(&id) else {
                    return Ok::<_, Rejection>(not_found());
                };
                let assets = registry.package_dir(&id).join("assets");
                let reply = serve_pack_asset(&record.metadata, &assets, tail.as_str()).await;
                Ok(reply)
            },
        )
}

fn extension_asset(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::param::<String>()
        .and(warp::path("packmirror"))
        .and(warp::path("extension"))
        .and(warp::path::param::<String>())
        .and(warp::path::tail())
        .and(warp::get())
        .and(with_state(state))
        .and_then(
            |_server: String, id: String, tail: Tail, state: Arc<AppState>| async move {
                let registry = state.extensions.read().await;
                let Some(record) = registry.get(&id) else {
                    return Ok::<_, Rejection>(not_found());
                };
                let assets = registry.package_dir(&id).join("assets");
                let reply = serve_pack_asset(&record.metadata, &assets, tail.as_str()).await;
                Ok(reply)
            },
        )
}

/// Serve one asset from a package's own `assets/` subtree, resolving the
/// requested key through the package's rewrite rules and obfuscating flagged
/// keys at serve time.
async fn serve_pack_asset<P: Package>(
    pack: &P,
    assets_dir: &std::path::Path,
    requested: &str,
) -> Response<Body> {
    let obfuscated = fetch::is_obfuscated(requested);
    let resolved = rewrite::resolve_local_key(pack, requested);

    match tokio::fs::read(assets_dir.join(&resolved)).await {
        Ok(content) => {
            let body = if obfuscated {
                fetch::xor(&content)
            } else {
                content
            };
            let mut builder = Response::builder().status(StatusCode::OK);
            if let Some(mime) = super::mime_for(&resolved) {
                builder = builder.header("content-type", mime);
            }
            builder.body(Body::from(body)).unwrap()
        }
        Err(_) => not_found(),
    }
}

fn extension_scripts(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::param::<String>()
        .and(warp::path("packmirror"))
        .and(warp::path("extension"))
        .and(warp::path("scripts"))
        .and(warp::path::param::<String>())
        .and(warp::path::tail())
        .and(warp::get())
        .and(with_state(state))
        .and_then(
            |_server: String, id: String, _tail: Tail, state: Arc<AppState>| async move {
                let registry = state.extensions.read().await;
                let Some(record) = registry.get(&id) else {
                    return Ok::<_, Rejection>(not_found());
                };
                let scripts = state.scripts.get(&id);
                let bundle = compose::render_extension_bundle(&record.metadata, &scripts);
                Ok(javascript_reply(bundle))
            },
        )
}

fn plugin_shims() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let console = warp::path!(String / "packmirror" / "plugin" / "console.js")
        .and(warp::get())
        .map(|_server: String| javascript_reply(compose::render_console_shim()));
    let fetch_shim = warp::path!(String / "packmirror" / "plugin" / "fetch.js")
        .and(warp::get())
        .map(|_server: String| javascript_reply(compose::render_fetch_shim()));
    console.or(fetch_shim)
}

/// Upstream game code with the trailing explicit game-start call stripped,
/// so a launcher extension can take over start-up.
fn upstream_code(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!(String / "packmirror" / String / "code.js")
        .and(warp::get())
        .and(with_state(state))
        .and_then(
            |server: String, version: String, state: Arc<AppState>| async move {
                let Some(upstream) = state.config.find_upstream(&server).cloned() else {
                    return Ok::<_, Rejection>(not_found());
                };
                let transform = if upstream.id == 0 {
                    Some(rewrite_region_probe as fn(Bytes) -> Bytes)
                } else {
                    None
                };
                let outcome = state
                    .fetcher
                    .remote_or_cached(&upstream, &format!("/{version}/code.js"), false, transform)
                    .await;
                let code = outcome.into_text();
                let trimmed = code
                    .strip_suffix("new GameMgr();")
                    .map(|rest| format!("{rest}\n"))
                    .unwrap_or(code);
                Ok(javascript_reply(trimmed))
            },
        )
}

/// The default origin probes a region file via a parent-relative path that
/// does not survive mirroring; point it at the local region route instead.
fn rewrite_region_probe(data: Bytes) -> Bytes {
    let text = String::from_utf8_lossy(&data);
    Bytes::from(text.replace("../region/region.txt", "region.txt"))
}

/// The composed bootstrap loader served in place of the client's own
/// entrypoint script.
fn bootstrap(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!(String / String / "code.js")
        .and(warp::get())
        .and(with_state(state))
        .and_then(
            |_server: String, version: String, state: Arc<AppState>| async move {
                let extensions = state.extensions.read().await;
                match compose::compose_manifest(
                    &extensions,
                    state.config.game.server_to_play,
                    &version,
                ) {
                    Ok(manifest) => {
                        Ok::<_, Rejection>(javascript_reply(compose::render_bootstrap(&manifest)))
                    }
                    Err(e) => Ok(Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .body(Body::from(e.to_string()))
                        .unwrap()),
                }
            },
        )
}

/// Everything else mirrors the upstream origin: manifest rewriting, the
/// region probe, root redirects, and the cache-aside asset passthrough.
fn passthrough(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::get()
        .and(warp::path::full())
        .and(
            warp::query::raw()
                .map(Some)
                .or(warp::any().map(|| None::<String>))
                .unify(),
        )
        .and(with_state(state))
        .and_then(
            |path: FullPath, query: Option<String>, state: Arc<AppState>| async move {
                Ok::<_, Rejection>(handle_passthrough(path.as_str(), query, state).await)
            },
        )
}

async fn handle_passthrough(
    path: &str,
    query: Option<String>,
    state: Arc<AppState>,
) -> Response<Body> {
    // The region probe of the default origin is answered locally.
    if path.ends_with("/region.txt") {
        return Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("mainland"))
            .unwrap();
    }

    // A bare server segment redirects to its directory form.
    let bare = path.trim_start_matches('/');
    if !bare.is_empty() && !bare.contains('/') && state.config.find_upstream(bare).is_some() {
        return Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header("location", format!("/{bare}/"))
            .body(Body::empty())
            .unwrap();
    }

    let Some((server_segment, rest)) = split_server_segment(path) else {
        return not_found();
    };
    let Some(upstream) = state.config.find_upstream(server_segment).cloned() else {
        return not_found();
    };

    // The resource manifest is rewritten on the fly, never cached.
    if let Some(filename) = rest.rsplit('/').next() {
        if filename.starts_with("resversion") && filename.ends_with("w.json") {
            return serve_manifest(&state, &upstream, rest).await;
        }
    }

    let rest = rest
        .strip_suffix("index.html")
        .unwrap_or(rest)
        .to_string();
    let rest = if rest.is_empty() { "/".to_string() } else { rest };
    let request_url = match &query {
        Some(query) => format!("{rest}?{query}"),
        None => rest.clone(),
    };

    let outcome = state
        .fetcher
        .remote_or_cached(&upstream, &request_url, true, None)
        .await;

    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    if let Some(mime) = super::mime_for(&rest) {
        builder = builder.header("content-type", mime);
    } else if fetch::is_route_path(&request_url) {
        builder = builder.header("content-type", "text/html; charset=utf-8");
    }

    if fetch::is_route_path(&request_url) {
        builder.body(Body::from(outcome.into_text())).unwrap()
    } else {
        builder.body(Body::from(outcome.body)).unwrap()
    }
}

/// Fetch the upstream resource manifest and point every overridden asset
/// entry at the local package namespace.
async fn serve_manifest(
    state: &Arc<AppState>,
    upstream: &crate::config::UpstreamConfig,
    path: &str,
) -> Response<Body> {
    let remote = state.fetcher.remote_source(upstream, path, false).await;

    let (code, data) = match remote {
        Ok(result) => result,
        Err(e) => {
            return Response::builder()
                .status(StatusCode::FORBIDDEN)
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "code": 403, "message": e.to_string() }).to_string(),
                ))
                .unwrap();
        }
    };

    if code != 200 {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY);
        return Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "code": code,
                    "message": String::from_utf8_lossy(&data).into_owned(),
                })
                .to_string(),
            ))
            .unwrap();
    }

    let mut manifest: serde_json::Value = match serde_json::from_slice(&data) {
        Ok(value) => value,
        Err(e) => {
            return Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .body(Body::from(format!("malformed upstream manifest: {e}")))
                .unwrap();
        }
    };

    let extensions = state.extensions.read().await;
    let resourcepacks = state.resourcepacks.read().await;
    let overrides = rewrite::merge_overrides(&extensions, &resourcepacks);
    rewrite::apply_to_manifest(&overrides, &mut manifest);

    let body = serde_json::to_string_pretty(&manifest).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// Split `/zh/rest/of/path` into the server segment and the remainder
/// (keeping the remainder's leading slash).
fn split_server_segment(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.strip_prefix('/')?;
    match trimmed.find('/') {
        Some(index) => Some((&trimmed[..index], &trimmed[index..])),
        None if !trimmed.is_empty() => Some((trimmed, "/")),
        None => None,
    }
}

fn javascript_reply(body: String) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/javascript")
        .body(Body::from(body))
        .unwrap()
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .unwrap()
}
