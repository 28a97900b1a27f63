use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{CaptchaError, CaptchaKind, CaptchaProvider, CaptchaTask, PollStatus};

const DEFAULT_BASE_URL: &str = "https://2captcha.com/";
const NOT_READY: &str = "CAPCHA_NOT_READY";

/// Adapter for oracles speaking the TwoCaptcha `in.php` / `res.php` protocol.
#[derive(Debug, Clone)]
pub struct TwoCaptchaProvider {
    api_key: String,
    base_url: Url,
    client: reqwest::Client,
}

/// Envelope returned by both endpoints when `json=1` is requested.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: i64,
    request: String,
}

impl TwoCaptchaProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CaptchaError> {
        let base_url = Url::parse(DEFAULT_BASE_URL)
            .map_err(|err| CaptchaError::Configuration(err.to_string()))?;
        Self::with_base_url(api_key, base_url)
    }

    /// Point the adapter at a compatible oracle (self-hosted or test double).
    pub fn with_base_url(api_key: impl Into<String>, base_url: Url) -> Result<Self, CaptchaError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CaptchaError::Configuration("empty api key".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            api_key,
            base_url,
            client,
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url, CaptchaError> {
        self.base_url
            .join(name)
            .map_err(|err| CaptchaError::Configuration(err.to_string()))
    }
}

#[async_trait]
impl CaptchaProvider for TwoCaptchaProvider {
    fn name(&self) -> &'static str {
        "twocaptcha"
    }

    async fn submit(&self, task: &CaptchaTask) -> Result<String, CaptchaError> {
        let (method, key_field) = match task.kind {
            CaptchaKind::Recaptcha => ("userrecaptcha", "googlekey"),
            CaptchaKind::HCaptcha => ("hcaptcha", "sitekey"),
            CaptchaKind::Turnstile => ("turnstile", "sitekey"),
        };

        let form = [
            ("key", self.api_key.as_str()),
            ("method", method),
            (key_field, task.site_key.as_str()),
            ("pageurl", task.page_url.as_str()),
            ("json", "1"),
        ];

        let response: ApiResponse = self
            .client
            .post(self.endpoint("in.php")?)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status == 1 {
            Ok(response.request)
        } else {
            Err(CaptchaError::Rejected(response.request))
        }
    }

    async fn poll(&self, job_id: &str) -> Result<PollStatus, CaptchaError> {
        let query = [
            ("key", self.api_key.as_str()),
            ("action", "get"),
            ("id", job_id),
            ("json", "1"),
        ];

        let response: ApiResponse = self
            .client
            .get(self.endpoint("res.php")?)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match (response.status, response.request.as_str()) {
            (1, _) => Ok(PollStatus::Ready(response.request)),
            (_, NOT_READY) => Ok(PollStatus::Pending),
            _ => Err(CaptchaError::Provider(response.request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> TwoCaptchaProvider {
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        TwoCaptchaProvider::with_base_url("test-key", base).unwrap()
    }

    fn task() -> CaptchaTask {
        CaptchaTask::new(
            "6LcR_okUAAAAAPYrPe-HK_0RULO1aZM15ENyM-Mf",
            Url::parse("https://example.com/challenge").unwrap(),
            CaptchaKind::Recaptcha,
        )
    }

    #[tokio::test]
    async fn submit_sends_recaptcha_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/in.php"))
            .and(body_string_contains("method=userrecaptcha"))
            .and(body_string_contains("googlekey=6LcR_okUAAAAAPYrPe-HK_0RULO1aZM15ENyM-Mf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 1, "request": "2122988149"})))
            .expect(1)
            .mount(&server)
            .await;

        let job = provider(&server).submit(&task()).await.expect("job id");
        assert_eq!(job, "2122988149");
    }

    #[tokio::test]
    async fn submit_maps_error_status_to_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/in.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 0, "request": "ERROR_ZERO_BALANCE"})))
            .mount(&server)
            .await;

        let err = provider(&server).submit(&task()).await.expect_err("rejected");
        assert!(matches!(err, CaptchaError::Rejected(ref reason) if reason == "ERROR_ZERO_BALANCE"));
    }

    #[tokio::test]
    async fn poll_distinguishes_pending_ready_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .and(query_param("id", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 0, "request": "CAPCHA_NOT_READY"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .and(query_param("id", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 1, "request": "03AGdBq25"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .and(query_param("id", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 0, "request": "ERROR_CAPTCHA_UNSOLVABLE"})))
            .mount(&server)
            .await;

        let provider = provider(&server);
        assert_eq!(provider.poll("1").await.unwrap(), PollStatus::Pending);
        assert_eq!(
            provider.poll("2").await.unwrap(),
            PollStatus::Ready("03AGdBq25".into())
        );
        assert!(matches!(provider.poll("3").await, Err(CaptchaError::Provider(_))));
    }

    #[test]
    fn empty_key_is_a_configuration_error() {
        let err = TwoCaptchaProvider::new("  ").expect_err("should reject");
        assert!(matches!(err, CaptchaError::Configuration(_)));
    }
}
