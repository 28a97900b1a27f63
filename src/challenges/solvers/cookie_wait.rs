//! Soft challenge handling: wait for the gate's own script to set a
//! clearance cookie.

use std::time::Duration;

use async_trait::async_trait;

use super::ChallengeHandler;
use crate::browser::{BrowserCookie, BrowserPage, PageContent};
use crate::challenges::core::{ChallengeFailure, ChallengeOutcome, PollPolicy, poll_until};
use crate::challenges::detectors::ChallengeDetection;

/// Cookie name prefixes that signal a passed browser check
/// (`cf_clearance`, `__ddg1_`, `__ddgid_`, `__ddgmark_`, ...).
pub const CLEARANCE_COOKIE_PREFIXES: &[&str] = &["cf_clearance", "__ddg", "ddg_"];

pub fn is_clearance_cookie(cookie: &BrowserCookie) -> bool {
    CLEARANCE_COOKIE_PREFIXES
        .iter()
        .any(|prefix| cookie.name.starts_with(prefix))
}

pub struct CookieClearanceSolver {
    poll_interval: Duration,
    navigation_wait: Duration,
}

impl Default for CookieClearanceSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieClearanceSolver {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            navigation_wait: Duration::from_secs(10),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upper bound on the post-clearance redirect wait.
    pub fn with_navigation_wait(mut self, wait: Duration) -> Self {
        self.navigation_wait = wait;
        self
    }
}

#[async_trait]
impl ChallengeHandler for CookieClearanceSolver {
    fn name(&self) -> &'static str {
        "cookie-clearance"
    }

    async fn solve(
        &self,
        page: &dyn BrowserPage,
        content: &PageContent,
        _detection: &ChallengeDetection,
        timeout: Duration,
    ) -> ChallengeOutcome {
        let policy = PollPolicy::new(self.poll_interval, timeout);
        let cleared = poll_until(policy, || async move {
            match page.cookies().await {
                Ok(cookies) => cookies.into_iter().find(is_clearance_cookie),
                Err(err) => {
                    log::debug!("cookie read failed while waiting for clearance: {}", err);
                    None
                }
            }
        })
        .await;

        let cookie = match cleared {
            Ok(cookie) => cookie,
            Err(timeout) => {
                log::warn!(
                    "no clearance cookie on {} after {} check(s)",
                    content.url,
                    timeout.attempts
                );
                return ChallengeOutcome::Failed(ChallengeFailure::Timeout);
            }
        };

        log::debug!("clearance cookie {} set for {}", cookie.name, cookie.domain);

        match page.wait_for_navigation(self.navigation_wait).await {
            Ok(true) => log::debug!("challenge page redirected after clearance"),
            Ok(false) => log::debug!("no navigation after clearance; continuing"),
            Err(err) => log::debug!("navigation wait after clearance failed: {}", err),
        }

        ChallengeOutcome::Cleared
    }
}
