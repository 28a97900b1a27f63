//! Sticky proxy sessions and isolated browser profiles.
//!
//! Each acquisition draws a random session id from a fixed pool. The id is
//! baked into the proxy username so the upstream provider keeps one exit IP
//! for the whole attempt, and it names a fresh browser profile directory that
//! is deleted when the session is released.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use tokio::fs;

/// Placeholder replaced by the session id in [`ProxyConfig::session_suffix`].
pub const SESSION_ID_PLACEHOLDER: &str = "{id}";

/// Upstream proxy credentials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Appended to the username; `{id}` becomes the session id.
    pub session_suffix: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            username: None,
            password: None,
            session_suffix: "-session-{id}".into(),
        }
    }
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty() && self.port != 0
    }

    fn endpoint_for(&self, session_id: u32) -> ProxyEndpoint {
        let username = self.username.as_ref().map(|base| {
            let suffix = self
                .session_suffix
                .replace(SESSION_ID_PLACEHOLDER, &session_id.to_string());
            format!("{base}{suffix}")
        });

        ProxyEndpoint {
            host: self.host.clone(),
            port: self.port,
            username,
            password: self.password.clone(),
        }
    }
}

/// Concrete proxy identity bound to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// `host:port`, as expected by `--proxy-server`.
    pub fn server(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.server())
    }
}

#[derive(Debug, Clone)]
pub struct SessionPoolConfig {
    pub pool_size: u32,
    pub profile_root: PathBuf,
    pub proxy: Option<ProxyConfig>,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 36,
            profile_root: std::env::temp_dir().join("bookfetch-profiles"),
            proxy: None,
        }
    }
}

/// One acquisition's outbound identity. Not `Clone`: it is handed back to
/// [`ProxySessionPool::release`] by value.
#[derive(Debug, PartialEq, Eq)]
pub struct ProxySession {
    session_id: u32,
    endpoint: Option<ProxyEndpoint>,
    profile_dir: PathBuf,
}

impl ProxySession {
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn endpoint(&self) -> Option<&ProxyEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }
}

#[derive(Debug, Clone)]
pub struct ProxySessionPool {
    config: SessionPoolConfig,
}

impl ProxySessionPool {
    pub fn new(config: SessionPoolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionPoolConfig {
        &self.config
    }

    /// Draw a session id uniformly from `1..=pool_size` and create its profile
    /// directory. Ids are not tracked; two concurrent sessions may share one.
    pub async fn allocate(&self) -> io::Result<ProxySession> {
        let pool_size = self.config.pool_size.max(1);
        let session_id = rand::thread_rng().gen_range(1..=pool_size);

        fs::create_dir_all(&self.config.profile_root).await?;
        let profile_dir = self.create_profile_dir(session_id).await?;

        let endpoint = self
            .config
            .proxy
            .as_ref()
            .filter(|proxy| proxy.is_configured())
            .map(|proxy| proxy.endpoint_for(session_id));

        log::debug!(
            "allocated proxy session {} (proxied={}) with profile {}",
            session_id,
            endpoint.is_some(),
            profile_dir.display()
        );

        Ok(ProxySession {
            session_id,
            endpoint,
            profile_dir,
        })
    }

    async fn create_profile_dir(&self, session_id: u32) -> io::Result<PathBuf> {
        let stem = format!("profile_{}_{}", session_id, Utc::now().timestamp_millis());
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                stem.clone()
            } else {
                format!("{stem}_{attempt}")
            };
            let candidate = self.config.profile_root.join(name);
            match fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(err),
            }
        }
    }

    /// Discard the session and delete its profile directory. Removal failures
    /// are logged only.
    pub async fn release(&self, session: ProxySession) {
        match fs::remove_dir_all(&session.profile_dir).await {
            Ok(()) => log::debug!(
                "released proxy session {} and removed {}",
                session.session_id,
                session.profile_dir.display()
            ),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::warn!(
                "failed to remove browser profile {}: {}",
                session.profile_dir.display(),
                err
            ),
        }
    }
}

impl Default for ProxySessionPool {
    fn default() -> Self {
        Self::new(SessionPoolConfig::default())
    }
}
