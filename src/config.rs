use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Listen address for the HTTP server.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Directory holding downloaded archives and FCP cache files.
    pub data_dir: PathBuf,
    /// Local copy of the geonames `countryInfo.txt` catalog.
    pub country_info: PathBuf,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the geonames dump export.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Forward proxy for all upstream requests.
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            proxy: None,
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_base_url() -> String {
    "http://download.geonames.org/export/dump".to_string()
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config = toml::from_str(
            "data_dir = \"/var/lib/gazetteer\"\ncountry_info = \"/var/lib/gazetteer/countryInfo.txt\"\n",
        )
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:3000");
        assert_eq!(config.upstream.base_url, "http://download.geonames.org/export/dump");
        assert!(config.upstream.proxy.is_none());
    }

    #[test]
    fn test_proxy_config() {
        let config: Config = toml::from_str(
            "data_dir = \"d\"\ncountry_info = \"c\"\n\n[upstream.proxy]\nhost = \"proxy.internal\"\nport = 8080\n",
        )
        .unwrap();
        let proxy = config.upstream.proxy.unwrap();
        assert_eq!(proxy.host, "proxy.internal");
        assert_eq!(proxy.port, 8080);
    }
}
