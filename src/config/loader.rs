use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use std::path::Path;

pub fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("packmirror.toml"))
        .merge(Json::file("packmirror.json"))
        .merge(Env::prefixed("PACKMIRROR_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;

    Ok(config)
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("PACKMIRROR_").split("_"))
            .extract(),
        Some("json") => Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed("PACKMIRROR_").split("_"))
            .extract(),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml or .json".into(),
            )
            .into())
        }
    };

    let config = config.map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&config)?;

    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.upstreams.is_empty() {
        return Err(ConfigError::Validation("At least one upstream is required".into()).into());
    }

    if config.game.server_to_play >= config.upstreams.len() {
        return Err(ConfigError::Validation(format!(
            "serverToPlay index {} is out of range ({} upstreams configured)",
            config.game.server_to_play,
            config.upstreams.len()
        ))
        .into());
    }

    for upstream in &config.upstreams {
        if !upstream.domain.starts_with("http://") && !upstream.domain.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "Upstream '{}' has invalid domain URL: {}",
                upstream.name, upstream.domain
            ))
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.proxy.port, 11451);
        assert_eq!(config.active_upstream().name, "zh");
    }

    #[test]
    fn test_server_to_play_out_of_range() {
        let mut config = Config::default();
        config.game.server_to_play = 9;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_find_upstream_by_name_or_id() {
        let config = Config::default();
        assert_eq!(config.find_upstream("jp").unwrap().id, 1);
        assert_eq!(config.find_upstream("2").unwrap().name, "en");
        assert!(config.find_upstream("kr").is_none());
    }

    #[test]
    fn test_alternate_prefixes_skip_default_origin() {
        let config = Config::default();
        assert_eq!(config.alternate_prefixes(), vec!["jp", "en"]);
    }
}
