//! Process configuration: `./config.json` if present, else `AG2API_*` /
//! `GOOGLE_OAUTH_*` environment variables (spec §6), with built-in
//! defaults. Loaded once at bootstrap and handed around as a read-only
//! value — no global mutable config cache (Design Notes).

use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1200;
pub const DEFAULT_QUOTA_REFRESH_S: u64 = 300;
pub const DEFAULT_OAUTH_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
pub const DEFAULT_OAUTH_CLIENT_SECRET: &str = "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";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub proxy_enabled: bool,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_quota_refresh_s")]
    pub quota_refresh_s: u64,
    #[serde(default = "default_oauth_client_id")]
    pub google_oauth_client_id: String,
    #[serde(default = "default_oauth_client_secret")]
    pub google_oauth_client_secret: String,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_quota_refresh_s() -> u64 {
    DEFAULT_QUOTA_REFRESH_S
}
fn default_oauth_client_id() -> String {
    DEFAULT_OAUTH_CLIENT_ID.to_string()
}
fn default_oauth_client_secret() -> String {
    DEFAULT_OAUTH_CLIENT_SECRET.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_keys: Vec::new(),
            proxy_enabled: false,
            proxy_url: None,
            debug: false,
            retry_delay_ms: default_retry_delay_ms(),
            quota_refresh_s: default_quota_refresh_s(),
            google_oauth_client_id: default_oauth_client_id(),
            google_oauth_client_secret: default_oauth_client_secret(),
        }
    }
}

impl Config {
    /// Loads `./config.json` if it exists, else builds from environment
    /// variables with built-in fallbacks.
    pub fn load() -> anyhow::Result<Self> {
        let path = Path::new("config.json");
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&text)?;
            return Ok(config);
        }
        Ok(Self::from_env())
    }

    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(host) = std::env::var("AG2API_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("AG2API_PORT") {
            if let Ok(parsed) = port.parse() {
                config.port = parsed;
            }
        }
        if let Ok(keys) = std::env::var("AG2API_API_KEYS") {
            config.api_keys = parse_api_keys(&keys);
        }
        if let Ok(enabled) = std::env::var("AG2API_PROXY_ENABLED") {
            config.proxy_enabled = is_truthy(&enabled);
        }
        if let Ok(url) = std::env::var("AG2API_PROXY_URL") {
            config.proxy_url = Some(url);
        }
        if let Ok(debug) = std::env::var("AG2API_DEBUG") {
            config.debug = is_truthy(&debug);
        }
        if let Ok(delay) = std::env::var("AG2API_RETRY_DELAY_MS") {
            if let Ok(parsed) = delay.parse() {
                config.retry_delay_ms = parsed;
            }
        }
        if let Ok(refresh) = std::env::var("AG2API_QUOTA_REFRESH_S") {
            if let Ok(parsed) = refresh.parse() {
                config.quota_refresh_s = parsed;
            }
        }
        if let Ok(client_id) = std::env::var("GOOGLE_OAUTH_CLIENT_ID") {
            config.google_oauth_client_id = client_id;
        }
        if let Ok(client_secret) = std::env::var("GOOGLE_OAUTH_CLIENT_SECRET") {
            config.google_oauth_client_secret = client_secret;
        }
        config
    }
}

/// `api_keys` accepts either a comma-separated string or a JSON array.
fn parse_api_keys(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<String>>(trimmed) {
            return values;
        }
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_api_keys() {
        assert_eq!(parse_api_keys("a, b ,c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn parses_json_array_api_keys() {
        assert_eq!(parse_api_keys(r#"["a","b"]"#), vec!["a", "b"]);
    }

    #[test]
    fn truthy_values_recognized() {
        assert!(is_truthy("true"));
        assert!(is_truthy("1"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
    }
}
