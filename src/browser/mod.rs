//! Headless browser session.
//!
//! The acquisition flow only ever talks to a browser through [`BrowserPage`],
//! which keeps the engine testable with scripted pages and confines the
//! Chrome DevTools specifics to [`chromium`].

pub mod chromium;
mod debug;
mod interrupt;

pub use chromium::ChromiumLauncher;
pub use debug::DebugArtifacts;
pub use interrupt::{INTERRUPT_EXIT_CODE, InterruptGuard, SessionRegistry};

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use crate::challenges::user_agents::UserAgentProfile;
use crate::modules::proxy::ProxySession;

/// Snapshot of the rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub url: Url,
    pub title: String,
    pub html: String,
}

impl PageContent {
    pub fn new(url: Url, title: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url,
            title: title.into(),
            html: html.into(),
        }
    }

    /// Visible body text with whitespace collapsed.
    pub fn visible_text(&self) -> String {
        let document = Html::parse_document(&self.html);
        let root = document
            .select(&BODY_SELECTOR)
            .next()
            .unwrap_or_else(|| document.root_element());

        let mut words = Vec::new();
        for node in root.descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|element| matches!(element.name(), "script" | "style" | "noscript"))
            });
            if !hidden {
                words.extend(text.split_whitespace());
            }
        }
        words.join(" ")
    }

    /// First `max_chars` characters of [`visible_text`](Self::visible_text).
    pub fn preview(&self, max_chars: usize) -> String {
        self.visible_text().chars().take(max_chars).collect()
    }
}

static BODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("body").expect("invalid body selector"));

/// Cookie exported from the browser, reused by the download client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

impl BrowserCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: "/".into(),
        }
    }
}

/// Render cookies as a single `Cookie` request header value.
pub fn cookie_header(cookies: &[BrowserCookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("devtools protocol error: {0}")]
    Protocol(String),
    #[error("browser session already closed")]
    Closed,
}

/// Options applied when a browser is launched for one acquisition.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub user_agent: UserAgentProfile,
    pub chrome_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    pub fn new(user_agent: UserAgentProfile) -> Self {
        Self {
            headless: true,
            user_agent,
            chrome_path: None,
            extra_args: Vec::new(),
        }
    }
}

/// A single page in a live browser session.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait until the DOM is ready (not network idle).
    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<(), BrowserError>;

    async fn content(&self) -> Result<PageContent, BrowserError>;

    async fn current_url(&self) -> Result<Url, BrowserError>;

    async fn cookies(&self) -> Result<Vec<BrowserCookie>, BrowserError>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError>;

    /// Wait for the next navigation to finish. `Ok(false)` means none happened
    /// within `timeout`.
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<bool, BrowserError>;

    /// User agent the page presents, reused for out-of-browser downloads.
    fn user_agent(&self) -> &str;

    /// Close the page and its browser. Safe to call more than once.
    async fn close(&self) -> Result<(), BrowserError>;
}

/// Starts a browser bound to a proxy session.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(
        &self,
        session: &ProxySession,
        options: &LaunchOptions,
    ) -> Result<Box<dyn BrowserPage>, BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_skips_scripts_and_collapses_whitespace() {
        let page = PageContent::new(
            Url::parse("https://example.com/").unwrap(),
            "Example",
            r#"<html><head><title>Example</title><style>p { color: red }</style></head>
               <body><h1>Search   results</h1>
               <script>var hidden = true;</script>
               <p>First
                  book</p></body></html>"#,
        );

        assert_eq!(page.visible_text(), "Search results First book");
        assert_eq!(page.preview(6), "Search");
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let cookies = vec![
            BrowserCookie::new("cf_clearance", "abc", "example.com"),
            BrowserCookie::new("__ddg1_", "xyz", "example.com"),
        ];
        assert_eq!(
            cookie_header(&cookies).as_deref(),
            Some("cf_clearance=abc; __ddg1_=xyz")
        );
        assert!(cookie_header(&[]).is_none());
    }
}
