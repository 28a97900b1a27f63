//! Hard challenge handling.
//!
//! Extracts the widget site key, asks the configured oracle for a token,
//! writes the token into the response fields the widget reads and fires the
//! page's registered callback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::ChallengeHandler;
use crate::browser::{BrowserPage, PageContent};
use crate::challenges::core::{ChallengeFailure, ChallengeOutcome, extract_site_key};
use crate::challenges::detectors::{ChallengeDetection, ChallengeType};
use crate::external_deps::captcha::{
    CaptchaConfig, CaptchaError, CaptchaKind, CaptchaProvider, CaptchaTask, solve_captcha,
};

const RESPONSE_FIELDS: &[&str] = &[
    "g-recaptcha-response",
    "h-captcha-response",
    "cf-turnstile-response",
];

/// Solver for reCAPTCHA, hCaptcha and Turnstile widgets.
pub struct CaptchaChallengeSolver {
    provider: Option<Arc<dyn CaptchaProvider>>,
    config: CaptchaConfig,
    settle_delay: Duration,
}

impl Default for CaptchaChallengeSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptchaChallengeSolver {
    pub fn new() -> Self {
        Self {
            provider: None,
            config: CaptchaConfig::default(),
            settle_delay: Duration::from_secs(2),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn CaptchaProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_config(mut self, config: CaptchaConfig) -> Self {
        self.config = config;
        self
    }

    /// Pause after the callback fires, giving the page time to react.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }
}

fn captcha_kind(challenge: ChallengeType) -> Option<CaptchaKind> {
    match challenge {
        ChallengeType::Recaptcha => Some(CaptchaKind::Recaptcha),
        ChallengeType::HCaptcha => Some(CaptchaKind::HCaptcha),
        ChallengeType::Turnstile => Some(CaptchaKind::Turnstile),
        ChallengeType::DdosGuard | ChallengeType::CloudflareInterstitial => None,
    }
}

/// Script that fills every known response field with `token` and invokes
/// `callback` when the page defines it. Evaluates to `true` if it did.
pub(crate) fn injection_script(token: &str, callback: Option<&str>) -> String {
    let token = serde_json::Value::String(token.to_string()).to_string();
    let callback = match callback {
        Some(name) => serde_json::Value::String(name.to_string()).to_string(),
        None => "null".to_string(),
    };
    let fields = serde_json::to_string(RESPONSE_FIELDS).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"(() => {{
    const token = {token};
    for (const name of {fields}) {{
        document.querySelectorAll('[name="' + name + '"], #' + name).forEach((el) => {{
            el.value = token;
            el.innerHTML = token;
        }});
    }}
    const callback = {callback};
    if (callback && typeof window[callback] === "function") {{
        window[callback](token);
        return true;
    }}
    return false;
}})()"#
    )
}

#[async_trait]
impl ChallengeHandler for CaptchaChallengeSolver {
    fn name(&self) -> &'static str {
        "captcha-oracle"
    }

    async fn solve(
        &self,
        page: &dyn BrowserPage,
        content: &PageContent,
        detection: &ChallengeDetection,
        timeout: Duration,
    ) -> ChallengeOutcome {
        let Some(provider) = self.provider.as_deref() else {
            return ChallengeOutcome::Failed(ChallengeFailure::Unsupported(
                "no captcha oracle configured".into(),
            ));
        };

        let Some(kind) = captcha_kind(detection.challenge_type) else {
            return ChallengeOutcome::Failed(ChallengeFailure::Unsupported(format!(
                "{} is not a captcha widget",
                detection.pattern_name
            )));
        };

        let Some(site_key) = extract_site_key(&content.html) else {
            log::warn!("{} on {} has no extractable site key", detection.pattern_name, content.url);
            return ChallengeOutcome::Failed(ChallengeFailure::NoSiteKey);
        };

        log::debug!(
            "site key found via {} strategy (callback: {})",
            site_key.strategy.name(),
            site_key.callback.as_deref().unwrap_or("none")
        );

        let task = CaptchaTask::new(site_key.site_key.clone(), content.url.clone(), kind);
        let solved = tokio::time::timeout(timeout, solve_captcha(provider, &task, &self.config)).await;
        let solution = match solved {
            Ok(Ok(solution)) => solution,
            Err(_) => {
                log::warn!("captcha oracle gave no token within {:?}", timeout);
                return ChallengeOutcome::Failed(ChallengeFailure::Timeout);
            }
            Ok(Err(CaptchaError::Timeout { attempts })) => {
                log::warn!("captcha oracle produced no token after {} poll(s)", attempts);
                return ChallengeOutcome::Failed(ChallengeFailure::Timeout);
            }
            Ok(Err(err)) => {
                log::warn!("captcha oracle {} failed: {}", provider.name(), err);
                return ChallengeOutcome::Failed(ChallengeFailure::OracleRejected(err.to_string()));
            }
        };

        let script = injection_script(&solution.token, site_key.callback.as_deref());
        match page.evaluate(&script).await {
            Ok(serde_json::Value::Bool(true)) => log::debug!("captcha callback invoked"),
            Ok(_) => log::debug!("captcha token injected; no callback registered"),
            Err(err) => {
                return ChallengeOutcome::Failed(ChallengeFailure::Unsupported(format!(
                    "token injection failed: {err}"
                )));
            }
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        ChallengeOutcome::Cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges::detectors::ChallengeDetector;
    use crate::challenges::solvers::test_support::ScriptedPage;
    use crate::external_deps::captcha::PollStatus;

    const KEY: &str = "6LcR_okUAAAAAPYrPe-HK_0RULO1aZM15ENyM-Mf";

    struct FixedOracle {
        submit: Result<&'static str, &'static str>,
        token: &'static str,
    }

    #[async_trait]
    impl CaptchaProvider for FixedOracle {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn submit(&self, _task: &CaptchaTask) -> Result<String, CaptchaError> {
            self.submit
                .map(str::to_string)
                .map_err(|reason| CaptchaError::Rejected(reason.to_string()))
        }

        async fn poll(&self, _job_id: &str) -> Result<PollStatus, CaptchaError> {
            Ok(PollStatus::Ready(self.token.to_string()))
        }
    }

    fn widget_page() -> ScriptedPage {
        ScriptedPage::new(
            "Slow download",
            &format!(
                r#"<div class="g-recaptcha" data-sitekey="{KEY}" data-callback="onCaptcha"></div>
                   <script src="https://www.google.com/recaptcha/api.js"></script>
                   <textarea name="g-recaptcha-response"></textarea>"#
            ),
        )
    }

    fn solver(oracle: FixedOracle) -> CaptchaChallengeSolver {
        CaptchaChallengeSolver::new()
            .with_provider(Arc::new(oracle))
            .with_config(CaptchaConfig {
                initial_delay: Duration::ZERO,
                poll_interval: Duration::from_millis(5),
                max_attempts: 3,
            })
            .with_settle_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn injects_token_and_fires_callback() {
        let page = widget_page();
        let detection = ChallengeDetector::new()
            .detect(&page.content.title, &page.content.html)
            .unwrap();

        let outcome = solver(FixedOracle {
            submit: Ok("17"),
            token: "03AGdBq-token",
        })
        .solve(&page, &page.content, &detection, Duration::from_secs(1))
        .await;

        assert_eq!(outcome, ChallengeOutcome::Cleared);
        let scripts = page.scripts.lock().unwrap();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("\"03AGdBq-token\""));
        assert!(scripts[0].contains("\"onCaptcha\""));
        assert!(scripts[0].contains("g-recaptcha-response"));
    }

    #[tokio::test]
    async fn oracle_rejection_is_reported() {
        let page = widget_page();
        let detection = ChallengeDetector::new()
            .detect(&page.content.title, &page.content.html)
            .unwrap();

        let outcome = solver(FixedOracle {
            submit: Err("ERROR_ZERO_BALANCE"),
            token: "",
        })
        .solve(&page, &page.content, &detection, Duration::from_secs(1))
        .await;

        assert!(matches!(
            outcome,
            ChallengeOutcome::Failed(ChallengeFailure::OracleRejected(ref reason)) if reason.contains("ERROR_ZERO_BALANCE")
        ));
        assert!(page.scripts.lock().unwrap().is_empty());
    }

    struct SlowOracle;

    #[async_trait]
    impl CaptchaProvider for SlowOracle {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn submit(&self, _task: &CaptchaTask) -> Result<String, CaptchaError> {
            Ok("99".into())
        }

        async fn poll(&self, _job_id: &str) -> Result<PollStatus, CaptchaError> {
            Ok(PollStatus::Pending)
        }
    }

    #[tokio::test]
    async fn oracle_is_cut_off_at_the_challenge_timeout() {
        let page = widget_page();
        let detection = ChallengeDetector::new()
            .detect(&page.content.title, &page.content.html)
            .unwrap();
        let solver = CaptchaChallengeSolver::new()
            .with_provider(Arc::new(SlowOracle))
            .with_config(CaptchaConfig {
                initial_delay: Duration::from_millis(10),
                poll_interval: Duration::from_secs(5),
                max_attempts: 24,
            })
            .with_settle_delay(Duration::ZERO);

        let started = std::time::Instant::now();
        let outcome = solver
            .solve(&page, &page.content, &detection, Duration::from_millis(100))
            .await;

        assert_eq!(outcome, ChallengeOutcome::Failed(ChallengeFailure::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(page.scripts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_site_key_fails_fast() {
        let page = ScriptedPage::new(
            "Verify",
            r#"<script src="https://www.google.com/recaptcha/api.js"></script><div class="g-recaptcha"></div>"#,
        );
        let detection = ChallengeDetector::new()
            .detect(&page.content.title, &page.content.html)
            .unwrap();

        let outcome = solver(FixedOracle {
            submit: Ok("1"),
            token: "t",
        })
        .solve(&page, &page.content, &detection, Duration::from_secs(1))
        .await;
        assert_eq!(outcome, ChallengeOutcome::Failed(ChallengeFailure::NoSiteKey));
    }

    #[test]
    fn script_escapes_token() {
        let script = injection_script("a\"b", None);
        assert!(script.contains(r#"const token = "a\"b";"#));
        assert!(script.contains("const callback = null;"));
    }
}
