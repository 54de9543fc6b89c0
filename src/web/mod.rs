use crate::error::{ConfigError, Result};
use crate::state::AppState;
use std::sync::Arc;

pub mod routes;

pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.proxy.host, state.config.proxy.port);

    tracing::info!("Starting mirror server on {}", addr);

    let routes = routes::routes(state);

    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| ConfigError::Parse(format!("Invalid listen address: {e}")))?;

    warp::serve(routes).run(addr).await;

    tracing::info!("Mirror server stopped");
    Ok(())
}

/// Content type for a served path, derived from its extension. Unknown
/// extensions carry no content-type header.
pub fn mime_for(path: &str) -> Option<&'static str> {
    let extension = std::path::Path::new(path).extension()?.to_str()?;
    match extension {
        "html" | "htm" => Some("text/html; charset=utf-8"),
        "js" => Some("application/javascript"),
        "json" => Some("application/json"),
        "css" => Some("text/css"),
        "txt" => Some("text/plain; charset=utf-8"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "svg" => Some("image/svg+xml"),
        "ico" => Some("image/x-icon"),
        "mp3" => Some("audio/mpeg"),
        "ogg" => Some("audio/ogg"),
        "wav" => Some("audio/wav"),
        "mp4" => Some("video/mp4"),
        "woff" => Some("font/woff"),
        "woff2" => Some("font/woff2"),
        "ttf" => Some("font/ttf"),
        "wasm" => Some("application/wasm"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_lookup() {
        assert_eq!(mime_for("a/b/x.png"), Some("image/png"));
        assert_eq!(mime_for("code.js"), Some("application/javascript"));
        assert_eq!(mime_for("strange.blob"), None);
        assert_eq!(mime_for("noext"), None);
    }
}
