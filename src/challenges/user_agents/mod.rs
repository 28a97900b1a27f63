//! User-Agent profile selection.
//!
//! The browser and the download client must present the same identity, so
//! a profile is picked once per acquisition from a small table of current
//! desktop browsers, or built from a caller-supplied override.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::thread_rng;

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

static VALID_PLATFORMS: &[&str] = &["linux", "windows", "darwin"];

#[derive(Debug, Clone, Copy)]
struct AgentEntry {
    platform: &'static str,
    browser: &'static str,
    user_agent: &'static str,
}

/// Desktop agents only: mobile layouts change the markup the selectors expect.
static BUILT_IN_AGENTS: Lazy<Vec<AgentEntry>> = Lazy::new(|| {
    vec![
        AgentEntry {
            platform: "windows",
            browser: "chrome",
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        },
        AgentEntry {
            platform: "windows",
            browser: "edge",
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.80",
        },
        AgentEntry {
            platform: "darwin",
            browser: "chrome",
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        },
        AgentEntry {
            platform: "linux",
            browser: "chrome",
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        },
        AgentEntry {
            platform: "linux",
            browser: "chrome",
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        },
    ]
});

/// Options to filter/select a profile.
#[derive(Debug, Clone, Default)]
pub struct UserAgentOptions {
    pub custom: Option<String>,
    pub platform: Option<String>,
    pub browser: Option<String>,
    pub accept_language: Option<String>,
}

/// Final selected profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentProfile {
    pub user_agent: String,
    pub accept_language: String,
    pub accept: String,
}

impl UserAgentProfile {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.into(),
            accept: DEFAULT_ACCEPT.into(),
        }
    }
}

/// Retrieve a profile using given options.
pub fn get_user_agent_profile(opts: &UserAgentOptions) -> Result<UserAgentProfile, UserAgentError> {
    let accept_language = opts
        .accept_language
        .clone()
        .unwrap_or_else(|| DEFAULT_ACCEPT_LANGUAGE.to_string());

    if let Some(custom) = opts.custom.as_deref().map(str::trim) {
        if custom.is_empty() {
            return Err(UserAgentError::InvalidOptions("custom user agent is empty".into()));
        }
        return Ok(UserAgentProfile {
            user_agent: custom.to_string(),
            accept_language,
            accept: DEFAULT_ACCEPT.into(),
        });
    }

    if let Some(platform) = opts.platform.as_deref()
        && !VALID_PLATFORMS.contains(&platform)
    {
        return Err(UserAgentError::InvalidOptions(
            format!("Invalid platform '{platform}'; valid: {}", VALID_PLATFORMS.join(", ")).into(),
        ));
    }

    let candidates: Vec<&AgentEntry> = BUILT_IN_AGENTS
        .iter()
        .filter(|entry| opts.platform.as_deref().is_none_or(|p| entry.platform == p))
        .filter(|entry| opts.browser.as_deref().is_none_or(|b| entry.browser == b))
        .collect();

    let entry = candidates
        .choose(&mut thread_rng())
        .ok_or(UserAgentError::ProfileNotFound)?;

    Ok(UserAgentProfile {
        user_agent: entry.user_agent.to_string(),
        accept_language,
        accept: DEFAULT_ACCEPT.into(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum UserAgentError {
    #[error("invalid user-agent options: {0}")]
    InvalidOptions(Cow<'static, str>),
    #[error("no matching user-agent profile found")]
    ProfileNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selection_returns_desktop_profile() {
        let profile = get_user_agent_profile(&UserAgentOptions::default()).unwrap();
        assert!(profile.user_agent.starts_with("Mozilla/5.0"));
        assert!(!profile.user_agent.contains("Mobile"));
        assert_eq!(profile.accept_language, DEFAULT_ACCEPT_LANGUAGE);
    }

    #[test]
    fn filters_by_platform_and_browser() {
        let profile = get_user_agent_profile(&UserAgentOptions {
            platform: Some("windows".into()),
            browser: Some("edge".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(profile.user_agent.contains("Edg/"));

        let missing = get_user_agent_profile(&UserAgentOptions {
            platform: Some("darwin".into()),
            browser: Some("edge".into()),
            ..Default::default()
        });
        assert!(matches!(missing, Err(UserAgentError::ProfileNotFound)));
    }

    #[test]
    fn custom_agent_wins() {
        let profile = get_user_agent_profile(&UserAgentOptions {
            custom: Some("MyAgent/1.0".into()),
            accept_language: Some("de-DE,de;q=0.9".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(profile.user_agent, "MyAgent/1.0");
        assert_eq!(profile.accept_language, "de-DE,de;q=0.9");
    }

    #[test]
    fn rejects_unknown_platform() {
        let err = get_user_agent_profile(&UserAgentOptions {
            platform: Some("amiga".into()),
            ..Default::default()
        });
        assert!(matches!(err, Err(UserAgentError::InvalidOptions(_))));
    }
}
