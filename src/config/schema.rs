use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_upstreams")]
    pub upstreams: Vec<UpstreamConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default = "default_proxy_host")]
    pub host: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    /// Index into `upstreams` of the server the mirrored client plays on.
    #[serde(default)]
    pub server_to_play: usize,
}

/// One upstream origin the mirror can sit in front of. Asset keys of the
/// non-default origins appear prefixed with the origin name in rewrite
/// tables (`jp/…`, `en/…`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    pub id: usize,
    pub name: String,
    pub domain: String,
}

fn default_proxy_port() -> u16 {
    11451
}

fn default_proxy_host() -> String {
    "127.0.0.1".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_upstreams() -> Vec<UpstreamConfig> {
    vec![
        UpstreamConfig {
            id: 0,
            name: "zh".to_string(),
            domain: "https://www.majsoul.com/1".to_string(),
        },
        UpstreamConfig {
            id: 1,
            name: "jp".to_string(),
            domain: "https://game.mahjongsoul.com".to_string(),
        },
        UpstreamConfig {
            id: 2,
            name: "en".to_string(),
            domain: "https://mahjongsoul.game.yo-star.com".to_string(),
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            game: GameConfig::default(),
            data_dir: default_data_dir(),
            upstreams: default_upstreams(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_proxy_port(),
            host: default_proxy_host(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self { server_to_play: 0 }
    }
}

impl Config {
    /// The upstream the mirrored client is configured to play on.
    pub fn active_upstream(&self) -> &UpstreamConfig {
        &self.upstreams[self.game.server_to_play]
    }

    /// Resolve an upstream from the leading URL segment, which may be the
    /// origin name (`zh`) or its numeric id (`0`).
    pub fn find_upstream(&self, segment: &str) -> Option<&UpstreamConfig> {
        self.upstreams
            .iter()
            .find(|u| u.name == segment || u.id.to_string() == segment)
    }

    /// Names of the non-default origins, used when expanding rewrite rules
    /// marked `allServers`.
    pub fn alternate_prefixes(&self) -> Vec<String> {
        self.upstreams
            .iter()
            .filter(|u| u.id != 0)
            .map(|u| u.name.clone())
            .collect()
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("static")
    }

    pub fn resourcepack_dir(&self) -> PathBuf {
        self.data_dir.join("resourcepack")
    }

    pub fn extension_dir(&self) -> PathBuf {
        self.data_dir.join("extension")
    }
}
