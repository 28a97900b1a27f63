//! Captcha oracle integrations.
//!
//! A solving oracle is an unreliable, rate-limited remote service: a job is
//! submitted with the widget site key and page URL, then polled until a token
//! shows up. [`CaptchaProvider`] models exactly that pair of calls and
//! [`solve_captcha`] drives it under a bounded polling policy.

mod twocaptcha;

pub use twocaptcha::TwoCaptchaProvider;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::sleep;
use url::Url;

use crate::challenges::core::{PollPolicy, poll_until};

/// High-level configuration that controls captcha solving behaviour.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    /// Grace period before the first poll; oracles rarely answer sooner.
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(15),
            poll_interval: Duration::from_secs(5),
            max_attempts: 24,
        }
    }
}

/// Widget family, used by oracles to pick a solving method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaKind {
    Recaptcha,
    HCaptcha,
    Turnstile,
}

/// Details describing the captcha the page issued.
#[derive(Debug, Clone)]
pub struct CaptchaTask {
    pub site_key: String,
    pub page_url: Url,
    pub kind: CaptchaKind,
}

impl CaptchaTask {
    pub fn new(site_key: impl Into<String>, page_url: Url, kind: CaptchaKind) -> Self {
        Self {
            site_key: site_key.into(),
            page_url,
            kind,
        }
    }
}

/// State of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Ready(String),
}

/// Resolved captcha token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaSolution {
    pub token: String,
    pub job_id: String,
}

/// Common result type returned by captcha solving.
pub type CaptchaResult = Result<CaptchaSolution, CaptchaError>;

/// Shared interface implemented by captcha vendors.
#[async_trait]
pub trait CaptchaProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submit a job and return the oracle's job id.
    async fn submit(&self, task: &CaptchaTask) -> Result<String, CaptchaError>;

    /// Check a previously submitted job.
    async fn poll(&self, job_id: &str) -> Result<PollStatus, CaptchaError>;
}

/// Errors surfaced by captcha providers.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha provider misconfigured: {0}")]
    Configuration(String),
    #[error("captcha job rejected by oracle: {0}")]
    Rejected(String),
    #[error("captcha provider request failed: {0}")]
    Provider(String),
    #[error("captcha solving timed out after {attempts} poll(s)")]
    Timeout { attempts: u32 },
    #[error("captcha transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CaptchaError {
    /// Errors worth another poll rather than abandoning the job.
    fn is_transient(&self) -> bool {
        matches!(self, CaptchaError::Http(_))
    }
}

/// Submit `task` and poll until the oracle returns a token or the attempt
/// budget runs out.
pub async fn solve_captcha(
    provider: &dyn CaptchaProvider,
    task: &CaptchaTask,
    config: &CaptchaConfig,
) -> CaptchaResult {
    let job_id = provider.submit(task).await?;
    log::debug!(
        "captcha job {} submitted to {} for {}",
        job_id,
        provider.name(),
        task.page_url
    );

    if config.initial_delay > Duration::ZERO {
        sleep(config.initial_delay).await;
    }

    let policy = PollPolicy::from_attempts(config.poll_interval, config.max_attempts);
    let job = job_id.as_str();
    let outcome = poll_until(policy, || async move {
        match provider.poll(job).await {
            Ok(PollStatus::Ready(token)) => Some(Ok(token)),
            Ok(PollStatus::Pending) => None,
            Err(err) if err.is_transient() => {
                log::debug!("captcha poll for job {} failed transiently: {}", job, err);
                None
            }
            Err(err) => Some(Err(err)),
        }
    })
    .await;

    match outcome {
        Ok(Ok(token)) => Ok(CaptchaSolution { token, job_id }),
        Ok(Err(err)) => Err(err),
        Err(timeout) => Err(CaptchaError::Timeout {
            attempts: timeout.attempts,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedProvider {
        submit: Result<String, String>,
        polls: Mutex<Vec<Result<PollStatus, String>>>,
    }

    impl ScriptedProvider {
        fn new(submit: Result<&str, &str>, polls: Vec<Result<PollStatus, &str>>) -> Self {
            Self {
                submit: submit.map(str::to_string).map_err(str::to_string),
                polls: Mutex::new(
                    polls
                        .into_iter()
                        .rev()
                        .map(|p| p.map_err(str::to_string))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl CaptchaProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn submit(&self, _task: &CaptchaTask) -> Result<String, CaptchaError> {
            self.submit.clone().map_err(CaptchaError::Rejected)
        }

        async fn poll(&self, _job_id: &str) -> Result<PollStatus, CaptchaError> {
            self.polls
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(PollStatus::Pending))
                .map_err(CaptchaError::Provider)
        }
    }

    fn quick_config(max_attempts: u32) -> CaptchaConfig {
        CaptchaConfig {
            initial_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            max_attempts,
        }
    }

    fn task() -> CaptchaTask {
        CaptchaTask::new(
            "6LcR_okUAAAAAPYrPe-HK_0RULO1aZM15ENyM-Mf",
            Url::parse("https://example.com/slow_download/abc/0/0").unwrap(),
            CaptchaKind::Recaptcha,
        )
    }

    #[tokio::test]
    async fn returns_token_after_pending_polls() {
        let provider = ScriptedProvider::new(
            Ok("42"),
            vec![
                Ok(PollStatus::Pending),
                Ok(PollStatus::Pending),
                Ok(PollStatus::Ready("token-xyz".into())),
            ],
        );

        let solution = solve_captcha(&provider, &task(), &quick_config(10))
            .await
            .expect("token");
        assert_eq!(solution.token, "token-xyz");
        assert_eq!(solution.job_id, "42");
    }

    #[tokio::test]
    async fn rejected_submission_is_reported() {
        let provider = ScriptedProvider::new(Err("ERROR_WRONG_GOOGLEKEY"), vec![]);
        let err = solve_captcha(&provider, &task(), &quick_config(3))
            .await
            .expect_err("should fail");
        assert!(matches!(err, CaptchaError::Rejected(ref reason) if reason == "ERROR_WRONG_GOOGLEKEY"));
    }

    #[tokio::test]
    async fn exhausted_polls_time_out() {
        let provider = ScriptedProvider::new(Ok("7"), vec![]);
        let err = solve_captcha(&provider, &task(), &quick_config(3))
            .await
            .expect_err("should time out");
        assert!(matches!(err, CaptchaError::Timeout { .. }));
    }

    #[tokio::test]
    async fn fatal_poll_error_stops_polling() {
        let provider = ScriptedProvider::new(
            Ok("9"),
            vec![Ok(PollStatus::Pending), Err("ERROR_CAPTCHA_UNSOLVABLE")],
        );
        let err = solve_captcha(&provider, &task(), &quick_config(10))
            .await
            .expect_err("should fail");
        assert!(matches!(err, CaptchaError::Provider(_)));
    }
}
