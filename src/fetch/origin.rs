use crate::error::FetchError;
use async_trait::async_trait;
use bytes::Bytes;

/// One raw upstream exchange. Redirects are not followed here; the fetcher
/// drives the redirect chain itself.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: Bytes,
}

/// The upstream HTTP boundary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Origin: Send + Sync + 'static {
    async fn get(&self, url: &str) -> Result<OriginResponse, FetchError>;
}

/// `reqwest`-backed origin with a fixed browser-like User-Agent and no
/// automatic redirect handling.
pub struct HttpOrigin {
    client: reqwest::Client,
}

impl HttpOrigin {
    pub fn new() -> Self {
        let user_agent = format!(
            "Mozilla/5.0 (compatible) Packmirror/{}",
            env!("CARGO_PKG_VERSION")
        );
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(user_agent)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client }
    }
}

impl Default for HttpOrigin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn get(&self, url: &str) -> Result<OriginResponse, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        Ok(OriginResponse {
            status,
            location,
            body,
        })
    }
}
