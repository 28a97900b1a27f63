//! Verified, streamed file download.
//!
//! Once a mirror exposes a direct link the file is fetched outside the
//! browser with a plain HTTP client that presents the same identity: user
//! agent, cookies, referer and proxy session. The body is streamed into a
//! `.part` file next to the target and renamed only after the last chunk,
//! so the final path never holds a truncated file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use http::header::{COOKIE, REFERER};
use reqwest::{Client, Proxy};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use url::Url;

use crate::browser::{BrowserCookie, cookie_header};
use crate::modules::proxy::ProxyEndpoint;

const UNKNOWN_LENGTH_STEP: u64 = 5 * 1024 * 1024;
const PERCENT_STEP: u8 = 10;
const PDF_MAGIC: &[u8] = b"%PDF";

/// Words of a title long enough to be meaningful in a URL (more than 3 chars).
pub fn significant_words(title: &str) -> Vec<String> {
    title
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}

/// Check that a direct link plausibly points at the requested book.
///
/// The percent-decoded, lower-cased URL must contain a significant title word
/// or the identifier; the identifier is also compared with `-` and spaces
/// removed so `978-0-13-595705-9` matches `9780135957059`.
pub fn verify_download_url(url: &str, title: &str, identifier: &str) -> bool {
    let decoded = urlencoding::decode(url)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| url.to_string())
        .to_lowercase();

    if significant_words(title).iter().any(|word| decoded.contains(word.as_str())) {
        return true;
    }

    let identifier = identifier.trim().to_lowercase();
    if identifier.is_empty() {
        return false;
    }
    if decoded.contains(&identifier) {
        return true;
    }

    let compact_id = compact(&identifier);
    !compact_id.is_empty() && compact(&decoded).contains(&compact_id)
}

fn compact(value: &str) -> String {
    value.chars().filter(|ch| *ch != '-' && !ch.is_whitespace()).collect()
}

/// Download milestone reported to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_written: u64,
    pub total: Option<u64>,
    /// Present only when the server announced a length.
    pub percent: Option<u8>,
}

pub type ProgressFn = dyn Fn(&DownloadProgress) + Send + Sync;

/// Emits a milestone at each 10% step, or every 5 MiB when the length is
/// unknown.
#[derive(Debug, Clone)]
struct MilestoneTracker {
    total: Option<u64>,
    next_percent: u8,
    next_bytes: u64,
}

impl MilestoneTracker {
    fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|len| *len > 0),
            next_percent: PERCENT_STEP,
            next_bytes: UNKNOWN_LENGTH_STEP,
        }
    }

    fn advance(&mut self, bytes_written: u64) -> Option<DownloadProgress> {
        match self.total {
            Some(total) => {
                let percent = ((bytes_written.saturating_mul(100)) / total).min(100) as u8;
                if percent < self.next_percent {
                    return None;
                }
                self.next_percent = (percent / PERCENT_STEP + 1).saturating_mul(PERCENT_STEP);
                Some(DownloadProgress {
                    bytes_written,
                    total: Some(total),
                    percent: Some(percent),
                })
            }
            None => {
                if bytes_written < self.next_bytes {
                    return None;
                }
                self.next_bytes = (bytes_written / UNKNOWN_LENGTH_STEP + 1) * UNKNOWN_LENGTH_STEP;
                Some(DownloadProgress {
                    bytes_written,
                    total: None,
                    percent: None,
                })
            }
        }
    }
}

/// Everything needed to fetch one file.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: Url,
    pub referer: Option<Url>,
    pub cookies: Vec<BrowserCookie>,
    pub target: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub connect_timeout: Duration,
    /// Applies to the response headers and to every body chunk.
    pub chunk_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            chunk_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("server answered {status} for {url}")]
    Status { status: u16, url: String },
    #[error("download of {url} stalled")]
    Timeout { url: String },
    #[error("{url} returned an empty body")]
    Empty { url: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP client bound to one browser identity.
#[derive(Debug, Clone)]
pub struct DownloadStreamer {
    client: Client,
    config: DownloadConfig,
}

impl DownloadStreamer {
    pub fn new(
        user_agent: &str,
        proxy: Option<&ProxyEndpoint>,
        config: DownloadConfig,
    ) -> Result<Self, DownloadError> {
        let mut builder = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(config.connect_timeout);

        if let Some(endpoint) = proxy {
            let mut proxy = Proxy::all(endpoint.url())?;
            if let Some(username) = &endpoint.username {
                proxy = proxy.basic_auth(username, endpoint.password.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    /// Stream `request.url` into `request.target`, returning the byte count.
    pub async fn fetch(
        &self,
        request: &DownloadRequest,
        progress: Option<&(dyn Fn(&DownloadProgress) + Send + Sync + '_)>,
    ) -> Result<u64, DownloadError> {
        let part = part_path(&request.target);
        match self.stream_to(request, &part, progress).await {
            Ok(written) => {
                fs::rename(&part, &request.target).await?;
                log::info!(
                    "saved {} ({} bytes)",
                    request.target.display(),
                    written
                );
                Ok(written)
            }
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(&part).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    log::warn!("failed to remove partial file {}: {}", part.display(), cleanup);
                }
                Err(err)
            }
        }
    }

    async fn stream_to(
        &self,
        request: &DownloadRequest,
        part: &Path,
        progress: Option<&(dyn Fn(&DownloadProgress) + Send + Sync + '_)>,
    ) -> Result<u64, DownloadError> {
        let url = request.url.to_string();
        let mut builder = self.client.get(request.url.clone());
        if let Some(cookies) = cookie_header(&request.cookies) {
            builder = builder.header(COOKIE, cookies);
        }
        if let Some(referer) = &request.referer {
            builder = builder.header(REFERER, referer.as_str());
        }

        let mut response = timeout(self.config.chunk_timeout, builder.send())
            .await
            .map_err(|_| DownloadError::Timeout { url: url.clone() })??;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let total = response.content_length();
        if total.is_none() {
            log::info!("{} did not announce a length; progress is unknown", url);
        }

        let mut tracker = MilestoneTracker::new(total);
        let mut file = File::create(part).await?;
        let mut written = 0u64;
        let mut head = Vec::with_capacity(PDF_MAGIC.len());

        loop {
            let chunk = timeout(self.config.chunk_timeout, response.chunk())
                .await
                .map_err(|_| DownloadError::Timeout { url: url.clone() })??;
            let Some(chunk) = chunk else {
                break;
            };

            if head.len() < PDF_MAGIC.len() {
                let needed = PDF_MAGIC.len() - head.len();
                head.extend_from_slice(&chunk[..needed.min(chunk.len())]);
            }

            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(milestone) = tracker.advance(written)
                && let Some(report) = progress
            {
                report(&milestone);
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        if written == 0 {
            return Err(DownloadError::Empty { url });
        }
        if head != PDF_MAGIC {
            log::warn!("{} does not start with a PDF header; keeping it anyway", url);
        }

        Ok(written)
    }
}

/// `<target>.part`
pub fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
