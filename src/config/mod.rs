//! Settings and configuration module
//!
//! [`AcquisitionConfig`] gathers every tunable of the engine. It can be
//! built in code, loaded from JSON and then overridden from `BOOKFETCH_*`
//! environment variables.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::external_deps::captcha::CaptchaConfig;
use crate::modules::directory::sanitize_component;
use crate::modules::download::DownloadConfig;
use crate::modules::proxy::{ProxyConfig, SessionPoolConfig};
use crate::sources::SourceSite;

pub const ENV_PROXY_HOST: &str = "BOOKFETCH_PROXY_HOST";
pub const ENV_PROXY_PORT: &str = "BOOKFETCH_PROXY_PORT";
pub const ENV_PROXY_USER: &str = "BOOKFETCH_PROXY_USER";
pub const ENV_PROXY_PASS: &str = "BOOKFETCH_PROXY_PASS";
pub const ENV_CAPTCHA_KEY: &str = "BOOKFETCH_CAPTCHA_KEY";
pub const ENV_HEADLESS: &str = "BOOKFETCH_HEADLESS";
pub const ENV_CHROME_PATH: &str = "BOOKFETCH_CHROME_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid config JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: String, value: String },
}

/// Captcha oracle settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptchaSettings {
    /// Oracle API key; hard challenges are unsupported without one.
    pub api_key: Option<String>,
    /// Base URL of a TwoCaptcha-compatible oracle.
    pub base_url: Option<String>,
    pub initial_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        let defaults = CaptchaConfig::default();
        Self {
            api_key: None,
            base_url: None,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            max_attempts: defaults.max_attempts,
        }
    }
}

impl CaptchaSettings {
    pub fn captcha_config(&self) -> CaptchaConfig {
        CaptchaConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_attempts,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            extra_args: Vec::new(),
        }
    }
}

/// Every wait in the flow, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub navigation_ms: u64,
    /// Also caps captcha oracle solving, whatever `CaptchaSettings` allows.
    pub challenge_ms: u64,
    pub results_ms: u64,
    pub direct_link_ms: u64,
    pub direct_link_poll_ms: u64,
    pub chunk_ms: u64,
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_ms: 60_000,
            challenge_ms: 150_000,
            results_ms: 60_000,
            direct_link_ms: 90_000,
            direct_link_poll_ms: 1_000,
            chunk_ms: 60_000,
            connect_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn challenge(&self) -> Duration {
        Duration::from_millis(self.challenge_ms)
    }

    pub fn results(&self) -> Duration {
        Duration::from_millis(self.results_ms)
    }

    pub fn direct_link(&self) -> Duration {
        Duration::from_millis(self.direct_link_ms)
    }

    pub fn direct_link_poll(&self) -> Duration {
        Duration::from_millis(self.direct_link_poll_ms.max(1))
    }

    pub fn download(&self) -> DownloadConfig {
        DownloadConfig {
            connect_timeout: Duration::from_millis(self.connect_ms),
            chunk_timeout: Duration::from_millis(self.chunk_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub pool_size: u32,
    pub profile_root: PathBuf,
    pub proxy: Option<ProxyConfig>,
    pub captcha: CaptchaSettings,
    pub browser: BrowserSettings,
    pub timeouts: TimeoutConfig,
    /// Mirror domains move; overrides the built-in base URL per site.
    pub site_base_urls: HashMap<SourceSite, String>,
    /// Root for page dumps, defaults to `<output_root>/debug`. Each
    /// acquisition writes under its own identifier below it.
    pub debug_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        let pool = SessionPoolConfig::default();
        Self {
            pool_size: pool.pool_size,
            profile_root: pool.profile_root,
            proxy: None,
            captcha: CaptchaSettings::default(),
            browser: BrowserSettings::default(),
            timeouts: TimeoutConfig::default(),
            site_base_urls: HashMap::new(),
            debug_dir: None,
            user_agent: None,
            accept_language: None,
        }
    }
}

impl AcquisitionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `BOOKFETCH_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup; unset keys are left alone.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_PROXY_HOST) {
            self.proxy.get_or_insert_with(ProxyConfig::default).host = host;
        }
        if let Some(port) = lookup(ENV_PROXY_PORT) {
            let parsed = port.trim().parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                key: ENV_PROXY_PORT.into(),
                value: port.clone(),
            })?;
            self.proxy.get_or_insert_with(ProxyConfig::default).port = parsed;
        }
        if let Some(user) = lookup(ENV_PROXY_USER) {
            self.proxy.get_or_insert_with(ProxyConfig::default).username = Some(user);
        }
        if let Some(pass) = lookup(ENV_PROXY_PASS) {
            self.proxy.get_or_insert_with(ProxyConfig::default).password = Some(pass);
        }
        if let Some(key) = lookup(ENV_CAPTCHA_KEY) {
            self.captcha.api_key = Some(key);
        }
        if let Some(headless) = lookup(ENV_HEADLESS) {
            self.browser.headless = parse_bool(&headless).ok_or(ConfigError::InvalidValue {
                key: ENV_HEADLESS.into(),
                value: headless.clone(),
            })?;
        }
        if let Some(path) = lookup(ENV_CHROME_PATH) {
            self.browser.chrome_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn base_url(&self, site: SourceSite) -> Result<Url, ConfigError> {
        let raw = self
            .site_base_urls
            .get(&site)
            .map(String::as_str)
            .unwrap_or(site.profile().default_base_url);
        let normalized = if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{raw}/")
        };
        Url::parse(&normalized).map_err(|_| ConfigError::InvalidValue {
            key: format!("site_base_urls.{site:?}"),
            value: raw.to_string(),
        })
    }

    pub fn session_pool(&self) -> SessionPoolConfig {
        SessionPoolConfig {
            pool_size: self.pool_size,
            profile_root: self.profile_root.clone(),
            proxy: self.proxy.clone(),
        }
    }

    pub fn debug_dir_for(&self, output_root: &Path, identifier: &str) -> PathBuf {
        self.debug_dir
            .clone()
            .unwrap_or_else(|| output_root.join("debug"))
            .join(sanitize_component(identifier))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AcquisitionConfig::default();
        assert_eq!(config.pool_size, 36);
        assert!(config.browser.headless);
        assert_eq!(config.timeouts.results(), Duration::from_secs(60));
        assert_eq!(config.captcha.captcha_config().max_attempts, 24);
        assert!(config.captcha.api_key().is_none());
    }

    #[test]
    fn debug_dirs_are_keyed_per_acquisition() {
        let mut config = AcquisitionConfig::default();
        let root = Path::new("/books");
        assert_eq!(
            config.debug_dir_for(root, "978-0-13-449416-6"),
            PathBuf::from("/books/debug/978-0-13-449416-6")
        );
        assert_ne!(
            config.debug_dir_for(root, "9780134494166"),
            config.debug_dir_for(root, "9781617294556")
        );

        config.debug_dir = Some(PathBuf::from("/var/dumps"));
        assert_eq!(
            config.debug_dir_for(root, "../9780134494166"),
            PathBuf::from("/var/dumps/9780134494166")
        );
    }

    #[test]
    fn loads_partial_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bookfetch.json");
        fs::write(
            &path,
            r#"{
                "pool_size": 8,
                "proxy": { "host": "proxy.example.net", "port": 8000, "username": "customer" },
                "captcha": { "api_key": "abc" },
                "timeouts": { "navigation_ms": 1000 },
                "site_base_urls": { "annas_archive": "https://annas-archive.example" }
            }"#,
        )
        .unwrap();

        let config = AcquisitionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.pool_size, 8);
        let proxy = config.proxy.as_ref().unwrap();
        assert_eq!(proxy.session_suffix, "-session-{id}");
        assert_eq!(config.captcha.api_key(), Some("abc"));
        assert_eq!(config.timeouts.navigation(), Duration::from_secs(1));
        assert_eq!(config.timeouts.challenge(), Duration::from_secs(150));
        assert_eq!(
            config.base_url(SourceSite::AnnasArchive).unwrap().as_str(),
            "https://annas-archive.example/"
        );
        assert_eq!(
            config.base_url(SourceSite::LibraryGenesis).unwrap().as_str(),
            "https://libgen.li/"
        );
    }

    #[test]
    fn bad_json_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            AcquisitionConfig::from_json_file(&path),
            Err(ConfigError::Json { .. })
        ));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_PROXY_HOST, "10.0.0.2"),
            (ENV_PROXY_PORT, "3128"),
            (ENV_PROXY_USER, "user"),
            (ENV_PROXY_PASS, "pass"),
            (ENV_CAPTCHA_KEY, "key"),
            (ENV_HEADLESS, "false"),
        ]
        .into_iter()
        .collect();

        let mut config = AcquisitionConfig::default();
        config
            .apply_env_from(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();

        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.host, "10.0.0.2");
        assert_eq!(proxy.port, 3128);
        assert_eq!(proxy.password.as_deref(), Some("pass"));
        assert_eq!(config.captcha.api_key(), Some("key"));
        assert!(!config.browser.headless);
    }

    #[test]
    fn invalid_env_port_is_rejected() {
        let mut config = AcquisitionConfig::default();
        let err = config
            .apply_env_from(|key| (key == ENV_PROXY_PORT).then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_PROXY_PORT));
    }
}
