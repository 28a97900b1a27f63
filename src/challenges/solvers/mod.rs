//! Challenge solvers.
//!
//! [`ChallengeSolver`] classifies the rendered page and hands it to the
//! handler for its class: soft gates clear themselves once their script sets
//! a clearance cookie, hard gates need a CAPTCHA token from an oracle.

mod captcha;
mod cookie_wait;

pub use captcha::CaptchaChallengeSolver;
pub use cookie_wait::{CLEARANCE_COOKIE_PREFIXES, CookieClearanceSolver, is_clearance_cookie};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{BrowserPage, PageContent};
use crate::challenges::core::{ChallengeClass, ChallengeFailure, ChallengeOutcome};
use crate::challenges::detectors::{ChallengeDetection, ChallengeDetector, ChallengeType};
use crate::external_deps::captcha::{CaptchaConfig, CaptchaProvider};

/// Strategy for one class of challenge.
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn solve(
        &self,
        page: &dyn BrowserPage,
        content: &PageContent,
        detection: &ChallengeDetection,
        timeout: Duration,
    ) -> ChallengeOutcome;
}

/// What [`ChallengeSolver::inspect_and_clear`] saw and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearReport {
    pub challenge: Option<ChallengeType>,
    pub outcome: ChallengeOutcome,
}

/// Detects and clears whatever challenge the current page carries.
pub struct ChallengeSolver {
    detector: ChallengeDetector,
    soft: CookieClearanceSolver,
    hard: CaptchaChallengeSolver,
}

impl Default for ChallengeSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeSolver {
    pub fn new() -> Self {
        Self {
            detector: ChallengeDetector::new(),
            soft: CookieClearanceSolver::new(),
            hard: CaptchaChallengeSolver::new(),
        }
    }

    /// Attach the oracle used for hard challenges.
    pub fn with_captcha_provider(mut self, provider: Arc<dyn CaptchaProvider>) -> Self {
        self.hard = self.hard.with_provider(provider);
        self
    }

    pub fn with_captcha_config(mut self, config: CaptchaConfig) -> Self {
        self.hard = self.hard.with_config(config);
        self
    }

    pub fn with_cookie_solver(mut self, solver: CookieClearanceSolver) -> Self {
        self.soft = solver;
        self
    }

    pub fn with_captcha_solver(mut self, solver: CaptchaChallengeSolver) -> Self {
        self.hard = solver;
        self
    }

    pub fn has_captcha_provider(&self) -> bool {
        self.hard.has_provider()
    }

    /// Clear the challenge on the current page, if any.
    pub async fn clear(&self, page: &dyn BrowserPage, timeout: Duration) -> ChallengeOutcome {
        self.inspect_and_clear(page, timeout).await.outcome
    }

    /// Like [`clear`](Self::clear) but also reports which challenge was seen.
    pub async fn inspect_and_clear(&self, page: &dyn BrowserPage, timeout: Duration) -> ClearReport {
        let content = match page.content().await {
            Ok(content) => content,
            Err(err) => {
                log::warn!("could not read page for challenge detection: {}", err);
                return ClearReport {
                    challenge: None,
                    outcome: ChallengeOutcome::Failed(ChallengeFailure::Unsupported(format!(
                        "page unreadable: {err}"
                    ))),
                };
            }
        };

        let Some(detection) = self.detector.detect(&content.title, &content.html) else {
            return ClearReport {
                challenge: None,
                outcome: ChallengeOutcome::NotPresent,
            };
        };

        let handler: &dyn ChallengeHandler = match detection.class() {
            ChallengeClass::Soft => &self.soft,
            ChallengeClass::Hard => &self.hard,
        };

        log::info!(
            "{} detected on {} (confidence {:.2}); solving with {}",
            detection.pattern_name,
            content.url,
            detection.confidence,
            handler.name()
        );

        let outcome = handler.solve(page, &content, &detection, timeout).await;
        ClearReport {
            challenge: Some(detection.challenge_type),
            outcome,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use url::Url;

    use crate::browser::{BrowserCookie, BrowserError, BrowserPage, PageContent};

    /// Page with fixed content whose cookie jar changes on each read.
    pub(crate) struct ScriptedPage {
        pub content: PageContent,
        cookie_reads: Mutex<VecDeque<Vec<BrowserCookie>>>,
        pub scripts: Mutex<Vec<String>>,
    }

    impl ScriptedPage {
        pub(crate) fn new(title: &str, html: &str) -> Self {
            Self {
                content: PageContent::new(
                    Url::parse("https://books.test/slow_download/abc/0/0").unwrap(),
                    title,
                    html,
                ),
                cookie_reads: Mutex::new(VecDeque::new()),
                scripts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn with_cookie_reads(self, reads: Vec<Vec<BrowserCookie>>) -> Self {
            *self.cookie_reads.lock().unwrap() = reads.into();
            self
        }
    }

    #[async_trait]
    impl BrowserPage for ScriptedPage {
        async fn navigate(&self, _url: &Url, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn content(&self) -> Result<PageContent, BrowserError> {
            Ok(self.content.clone())
        }

        async fn current_url(&self) -> Result<Url, BrowserError> {
            Ok(self.content.url.clone())
        }

        async fn cookies(&self) -> Result<Vec<BrowserCookie>, BrowserError> {
            let mut reads = self.cookie_reads.lock().unwrap();
            if reads.len() > 1 {
                Ok(reads.pop_front().unwrap_or_default())
            } else {
                Ok(reads.front().cloned().unwrap_or_default())
            }
        }

        async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
            self.scripts.lock().unwrap().push(script.to_string());
            Ok(serde_json::Value::Bool(true))
        }

        async fn wait_for_navigation(&self, _timeout: Duration) -> Result<bool, BrowserError> {
            Ok(false)
        }

        fn user_agent(&self) -> &str {
            "scripted"
        }

        async fn close(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }
}
