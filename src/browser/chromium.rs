//! Chrome DevTools backed browser session (chromiumoxide).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use url::Url;

use super::{
    BrowserCookie, BrowserError, BrowserLauncher, BrowserPage, InterruptGuard, LaunchOptions,
    PageContent,
};
use crate::challenges::core::{PollPolicy, poll_until};
use crate::modules::proxy::{ProxyEndpoint, ProxySession};

const READY_STATE_INTERVAL: Duration = Duration::from_millis(100);

const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--no-sandbox",
    "--disable-gpu",
];

type SharedBrowser = Arc<Mutex<Option<Browser>>>;

/// Launches one Chromium instance per proxy session.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self
    }

    fn config(session: &ProxySession, options: &LaunchOptions) -> Result<BrowserConfig, BrowserError> {
        let mut builder = BrowserConfig::builder().user_data_dir(session.profile_dir());

        if let Some(path) = &options.chrome_path {
            if !path.exists() {
                return Err(BrowserError::ExecutableNotFound(path.display().to_string()));
            }
            builder = builder.chrome_executable(path);
        }

        if !options.headless {
            builder = builder.with_head();
        }

        if let Some(endpoint) = session.endpoint() {
            builder = builder.arg(format!("--proxy-server=http://{}", endpoint.server()));
        }

        builder = builder.arg(format!("--lang={}", primary_language(&options.user_agent.accept_language)));
        for arg in STEALTH_ARGS {
            builder = builder.arg(*arg);
        }
        for arg in &options.extra_args {
            builder = builder.arg(arg);
        }

        builder.build().map_err(BrowserError::Launch)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn open(
        &self,
        session: &ProxySession,
        options: &LaunchOptions,
    ) -> Result<Box<dyn BrowserPage>, BrowserError> {
        let config = Self::config(session, options)?;

        log::info!(
            "launching browser for session {} (headless={})",
            session.session_id(),
            options.headless
        );

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let mut tasks = vec![tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    log::trace!("browser handler event error: {}", err);
                }
            }
        })];

        let browser: SharedBrowser = Arc::new(Mutex::new(Some(browser)));
        let interrupt = install_interrupt_guard(&browser, session.profile_dir());

        let page = match new_configured_page(&browser, session.endpoint(), options, &mut tasks).await {
            Ok(page) => page,
            Err(err) => {
                shutdown_browser(&browser).await;
                tasks.iter().for_each(JoinHandle::abort);
                return Err(err);
            }
        };

        Ok(Box::new(ChromiumPage {
            page,
            browser,
            tasks,
            user_agent: options.user_agent.user_agent.clone(),
            closed: AtomicBool::new(false),
            _interrupt: interrupt,
        }))
    }
}

async fn new_configured_page(
    browser: &SharedBrowser,
    endpoint: Option<&ProxyEndpoint>,
    options: &LaunchOptions,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Result<Page, BrowserError> {
    let page = {
        let guard = browser.lock().await;
        let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
        browser.new_page("about:blank").await.map_err(protocol)?
    };

    let user_agent = SetUserAgentOverrideParams::builder()
        .user_agent(options.user_agent.user_agent.clone())
        .accept_language(options.user_agent.accept_language.clone())
        .build()
        .map_err(BrowserError::Protocol)?;
    page.execute(user_agent).await.map_err(protocol)?;

    if let Some(endpoint) = endpoint
        && let Some(username) = &endpoint.username
    {
        let password = endpoint.password.clone().unwrap_or_default();
        tasks.extend(install_proxy_auth(&page, username.clone(), password).await?);
    }

    Ok(page)
}

/// Answer proxy authentication challenges through the Fetch domain.
///
/// With auth handling enabled every request is paused, so a second listener
/// resumes the ones that carry no challenge.
async fn install_proxy_auth(
    page: &Page,
    username: String,
    password: String,
) -> Result<Vec<JoinHandle<()>>, BrowserError> {
    let mut auth_events = page
        .event_listener::<EventAuthRequired>()
        .await
        .map_err(protocol)?;
    let mut paused_events = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(protocol)?;

    page.execute(EnableParams::builder().handle_auth_requests(true).build())
        .await
        .map_err(protocol)?;

    let auth_page = page.clone();
    let auth_task = tokio::spawn(async move {
        while let Some(event) = auth_events.next().await {
            let response = AuthChallengeResponse {
                response: AuthChallengeResponseResponse::ProvideCredentials,
                username: Some(username.clone()),
                password: Some(password.clone()),
            };
            let params = ContinueWithAuthParams::new(event.request_id.clone(), response);
            if let Err(err) = auth_page.execute(params).await {
                log::debug!("failed to answer proxy auth challenge: {}", err);
            }
        }
    });

    let paused_page = page.clone();
    let paused_task = tokio::spawn(async move {
        while let Some(event) = paused_events.next().await {
            let params = ContinueRequestParams::new(event.request_id.clone());
            if let Err(err) = paused_page.execute(params).await {
                log::trace!("failed to resume paused request: {}", err);
            }
        }
    });

    Ok(vec![auth_task, paused_task])
}

fn install_interrupt_guard(browser: &SharedBrowser, profile_dir: &Path) -> InterruptGuard {
    let browser = Arc::clone(browser);
    let profile_dir: PathBuf = profile_dir.to_path_buf();
    InterruptGuard::install(format!("browser profile {}", profile_dir.display()), move || async move {
        shutdown_browser(&browser).await;
        if let Err(err) = tokio::fs::remove_dir_all(&profile_dir).await {
            log::warn!("failed to remove profile {}: {}", profile_dir.display(), err);
        }
    })
}

async fn shutdown_browser(browser: &SharedBrowser) {
    let Some(mut browser) = browser.lock().await.take() else {
        return;
    };
    if let Err(err) = browser.close().await {
        log::debug!("browser close command failed: {}", err);
    }
    if let Err(err) = browser.wait().await {
        log::debug!("waiting for browser exit failed: {}", err);
    }
}

fn primary_language(accept_language: &str) -> &str {
    accept_language
        .split([',', ';'])
        .next()
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .unwrap_or("en-US")
}

fn protocol(err: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(err.to_string())
}

/// Page handle returned by [`ChromiumLauncher`].
pub struct ChromiumPage {
    page: Page,
    browser: SharedBrowser,
    tasks: Vec<JoinHandle<()>>,
    user_agent: String,
    closed: AtomicBool,
    _interrupt: InterruptGuard,
}

impl ChromiumPage {
    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }

    async fn wait_for_dom_ready(&self, url: &Url, budget: Duration) -> Result<(), BrowserError> {
        let page = &self.page;
        poll_until(PollPolicy::new(READY_STATE_INTERVAL, budget), || async move {
            let state = page.evaluate("document.readyState").await.ok()?;
            let state = state.value()?.as_str()?.to_string();
            matches!(state.as_str(), "interactive" | "complete").then_some(())
        })
        .await
        .map_err(|_| BrowserError::NavigationTimeout {
            url: url.to_string(),
            timeout: budget,
        })
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn navigate(&self, url: &Url, limit: Duration) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let started = Instant::now();
        let params = NavigateParams::builder()
            .url(url.as_str())
            .build()
            .map_err(|reason| BrowserError::Navigation {
                url: url.to_string(),
                reason,
            })?;

        let response = timeout(limit, self.page.execute(params))
            .await
            .map_err(|_| BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout: limit,
            })?
            .map_err(|err| BrowserError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        if let Some(reason) = response.result.error_text.clone() {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason,
            });
        }

        let remaining = limit.saturating_sub(started.elapsed());
        self.wait_for_dom_ready(url, remaining).await
    }

    async fn content(&self) -> Result<PageContent, BrowserError> {
        self.ensure_open()?;
        let html = self.page.content().await.map_err(protocol)?;
        let title = self
            .page
            .get_title()
            .await
            .map_err(protocol)?
            .unwrap_or_default();
        let url = self.current_url().await?;
        Ok(PageContent::new(url, title, html))
    }

    async fn current_url(&self) -> Result<Url, BrowserError> {
        self.ensure_open()?;
        let raw = self
            .page
            .url()
            .await
            .map_err(protocol)?
            .unwrap_or_else(|| "about:blank".to_string());
        Url::parse(&raw).map_err(protocol)
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>, BrowserError> {
        self.ensure_open()?;
        let cookies = self.page.get_cookies().await.map_err(protocol)?;
        Ok(cookies
            .into_iter()
            .map(|cookie| BrowserCookie {
                name: cookie.name,
                value: cookie.value,
                domain: cookie.domain,
                path: cookie.path,
            })
            .collect())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        self.ensure_open()?;
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn wait_for_navigation(&self, limit: Duration) -> Result<bool, BrowserError> {
        self.ensure_open()?;
        match timeout(limit, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(err)) => Err(protocol(err)),
            Err(_) => Ok(false),
        }
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(err) = self.page.clone().close().await {
            log::debug!("page close failed: {}", err);
        }
        shutdown_browser(&self.browser).await;
        self.tasks.iter().for_each(JoinHandle::abort);
        Ok(())
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        self.tasks.iter().for_each(JoinHandle::abort);
    }
}
