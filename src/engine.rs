//! Acquisition orchestration.
//!
//! Wires the proxy session pool, the browser, the challenge solver, the
//! source parsers, the directory guard and the download streamer into one
//! `acquire` call that either leaves a verified file on disk or explains why
//! it could not.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use url::Url;

use crate::browser::{
	BrowserError, BrowserLauncher, BrowserPage, ChromiumLauncher, DebugArtifacts, LaunchOptions,
	PageContent,
};
use crate::challenges::core::{ChallengeFailure, ChallengeOutcome, PollPolicy, poll_until};
use crate::challenges::solvers::{ChallengeSolver, ClearReport};
use crate::challenges::user_agents::{UserAgentOptions, get_user_agent_profile};
use crate::config::{AcquisitionConfig, ConfigError};
use crate::external_deps::captcha::{CaptchaProvider, TwoCaptchaProvider};
use crate::modules::directory::{
	AskAnswer, AskFn, DirectoryDecision, DirectoryGuard, OverwritePolicy, target_dir, target_file,
};
use crate::modules::download::{
	DownloadError, DownloadProgress, DownloadRequest, DownloadStreamer, ProgressFn,
	verify_download_url,
};
use crate::modules::events::{
	AcquisitionEvent, AcquisitionState, ChallengeEvent, ErrorEvent, EventDispatcher, EventHandler,
	LoggingHandler, MirrorAttemptEvent, NavigationEvent, ProgressEvent,
};
use crate::modules::proxy::{ProxyConfig, ProxySession, ProxySessionPool};
use crate::sources::{
	CandidateRecord, MirrorLink, SearchError, SearchMode, SearchResolver, SourceSite, direct_link,
	select_mirrors,
};

/// Result alias used across the orchestration layer.
pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

/// One book to fetch. Immutable for the duration of an acquisition.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
	/// Title or ISBN-like key used as the search query.
	pub identifier: String,
	/// Overrides the title reported by the source for naming and verification.
	pub display_title: Option<String>,
	pub output_root: PathBuf,
	pub overwrite_policy: OverwritePolicy,
	pub source_site: SourceSite,
}

impl AcquisitionRequest {
	pub fn new(identifier: impl Into<String>, output_root: impl Into<PathBuf>) -> Self {
		Self {
			identifier: identifier.into(),
			display_title: None,
			output_root: output_root.into(),
			overwrite_policy: OverwritePolicy::default(),
			source_site: SourceSite::default(),
		}
	}

	pub fn with_title(mut self, title: impl Into<String>) -> Self {
		self.display_title = Some(title.into());
		self
	}

	pub fn with_overwrite_policy(mut self, policy: OverwritePolicy) -> Self {
		self.overwrite_policy = policy;
		self
	}

	pub fn with_source_site(mut self, site: SourceSite) -> Self {
		self.source_site = site;
		self
	}
}

/// A file that made it to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadResult {
	pub filepath: PathBuf,
	pub bytes_written: u64,
	/// Zero-based position of the winning mirror in the ordered list.
	pub source_mirror_index: usize,
	pub title: String,
	pub identifier: String,
}

/// Picks one of several search hits. Returning `None` abandons the request.
pub trait CandidateChooser: Send + Sync {
	fn choose(&self, request: &AcquisitionRequest, candidates: &[CandidateRecord]) -> Option<usize>;
}

/// Why a single mirror could not deliver. Always recoverable: the engine
/// moves on to the next mirror.
#[derive(Debug, Error)]
pub enum MirrorAttemptError {
	#[error("challenge on {url} not cleared: {failure}")]
	Challenge { url: String, failure: ChallengeFailure },
	#[error("no direct link appeared on {url}")]
	NoDirectLink { url: String },
	#[error("direct link does not match the request: {url}")]
	VerificationMismatch { url: String },
	#[error("navigation failed: {0}")]
	Navigation(#[from] BrowserError),
	#[error("download failed: {0}")]
	Download(#[from] DownloadError),
}

#[derive(Debug)]
pub struct MirrorFailure {
	pub index: usize,
	pub url: Url,
	pub error: MirrorAttemptError,
}

/// High-level error surfaced by the engine.
#[derive(Debug, Error)]
pub enum AcquisitionError {
	#[error("no candidates found for `{query}`: {reason}")]
	NoCandidatesFound {
		query: String,
		reason: String,
		debug_dir: Option<PathBuf>,
	},
	#[error("challenge on {url} was not cleared in time")]
	ChallengeTimeout { url: String },
	#[error("captcha oracle failure: {reason}")]
	ChallengeOracleFailure { reason: String },
	#[error("mirror link does not match the requested book: {url}")]
	MirrorVerificationMismatch { url: String },
	#[error("transport error: {0}")]
	TransportError(String),
	#[error("all {attempts} mirror(s) failed")]
	AllMirrorsExhausted {
		attempts: usize,
		failures: Vec<MirrorFailure>,
	},
	#[error("target directory {path:?} exists and was {decision}")]
	DirectoryConflictCancelled {
		path: PathBuf,
		decision: DirectoryDecision,
	},
	#[error(transparent)]
	Browser(#[from] BrowserError),
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),
	#[error(transparent)]
	Config(#[from] ConfigError),
}

impl From<MirrorAttemptError> for AcquisitionError {
	fn from(err: MirrorAttemptError) -> Self {
		match err {
			MirrorAttemptError::Challenge {
				url,
				failure: ChallengeFailure::Timeout,
			} => AcquisitionError::ChallengeTimeout { url },
			MirrorAttemptError::Challenge { failure, .. } => AcquisitionError::ChallengeOracleFailure {
				reason: failure.to_string(),
			},
			MirrorAttemptError::VerificationMismatch { url } => {
				AcquisitionError::MirrorVerificationMismatch { url }
			}
			other @ (MirrorAttemptError::NoDirectLink { .. }
			| MirrorAttemptError::Navigation(_)
			| MirrorAttemptError::Download(_)) => AcquisitionError::TransportError(other.to_string()),
		}
	}
}

/// Fluent builder for [`AcquisitionEngine`].
pub struct AcquisitionEngineBuilder {
	config: AcquisitionConfig,
	launcher: Option<Arc<dyn BrowserLauncher>>,
	captcha_provider: Option<Arc<dyn CaptchaProvider>>,
	challenge_solver: Option<ChallengeSolver>,
	handlers: Vec<Arc<dyn EventHandler>>,
	chooser: Option<Arc<dyn CandidateChooser>>,
	ask: Option<Arc<AskFn>>,
	progress: Option<Arc<ProgressFn>>,
}

impl AcquisitionEngineBuilder {
	pub fn new() -> Self {
		Self {
			config: AcquisitionConfig::default(),
			launcher: None,
			captcha_provider: None,
			challenge_solver: None,
			handlers: Vec::new(),
			chooser: None,
			ask: None,
			progress: None,
		}
	}

	pub fn with_config(mut self, config: AcquisitionConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
		self.launcher = Some(launcher);
		self
	}

	/// Overrides the oracle that would otherwise be built from the config key.
	pub fn with_captcha_provider(mut self, provider: Arc<dyn CaptchaProvider>) -> Self {
		self.captcha_provider = Some(provider);
		self
	}

	pub fn with_proxy_config(mut self, proxy: ProxyConfig) -> Self {
		self.config.proxy = Some(proxy);
		self
	}

	pub fn with_challenge_solver(mut self, solver: ChallengeSolver) -> Self {
		self.challenge_solver = Some(solver);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	/// Consult `chooser` with every search hit instead of taking the first.
	pub fn with_candidate_chooser(mut self, chooser: Arc<dyn CandidateChooser>) -> Self {
		self.chooser = Some(chooser);
		self
	}

	pub fn with_ask_callback<F>(mut self, ask: F) -> Self
	where
		F: Fn(&Path) -> AskAnswer + Send + Sync + 'static,
	{
		self.ask = Some(Arc::new(ask));
		self
	}

	pub fn with_progress_callback<F>(mut self, progress: F) -> Self
	where
		F: Fn(&DownloadProgress) + Send + Sync + 'static,
	{
		self.progress = Some(Arc::new(progress));
		self
	}

	pub fn build(self) -> AcquisitionResult<AcquisitionEngine> {
		let provider = match self.captcha_provider {
			Some(provider) => Some(provider),
			None => oracle_from_config(&self.config)?,
		};

		let mut solver = self.challenge_solver.unwrap_or_else(|| {
			ChallengeSolver::new().with_captcha_config(self.config.captcha.captcha_config())
		});
		if let Some(provider) = provider {
			solver = solver.with_captcha_provider(provider);
		}

		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		for handler in self.handlers {
			events.register_handler(handler);
		}

		let launcher = self
			.launcher
			.unwrap_or_else(|| Arc::new(ChromiumLauncher::new()));

		Ok(AcquisitionEngine {
			inner: Arc::new(EngineInner {
				pool: ProxySessionPool::new(self.config.session_pool()),
				config: self.config,
				launcher,
				solver,
				events,
				chooser: self.chooser,
				ask: self.ask,
				progress: self.progress,
			}),
		})
	}
}

impl Default for AcquisitionEngineBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn oracle_from_config(config: &AcquisitionConfig) -> AcquisitionResult<Option<Arc<dyn CaptchaProvider>>> {
	let Some(key) = config.captcha.api_key() else {
		return Ok(None);
	};

	let invalid = |key: &str, value: String| ConfigError::InvalidValue {
		key: key.to_string(),
		value,
	};

	let provider = match config.captcha.base_url.as_deref() {
		Some(raw) => {
			let base = Url::parse(raw).map_err(|_| invalid("captcha.base_url", raw.to_string()))?;
			TwoCaptchaProvider::with_base_url(key, base)
		}
		None => TwoCaptchaProvider::new(key),
	}
	.map_err(|err| invalid("captcha", err.to_string()))?;

	Ok(Some(Arc::new(provider)))
}

struct EngineInner {
	config: AcquisitionConfig,
	pool: ProxySessionPool,
	launcher: Arc<dyn BrowserLauncher>,
	solver: ChallengeSolver,
	events: EventDispatcher,
	chooser: Option<Arc<dyn CandidateChooser>>,
	ask: Option<Arc<AskFn>>,
	progress: Option<Arc<ProgressFn>>,
}

/// Per-request values threaded through the mirror loop.
struct MirrorContext<'a> {
	request: &'a AcquisitionRequest,
	page: &'a dyn BrowserPage,
	streamer: &'a DownloadStreamer,
	debug: &'a DebugArtifacts,
	title: &'a str,
	target: &'a Path,
}

/// Main acquisition orchestrator. Cheap to clone; clones share configuration.
#[derive(Clone)]
pub struct AcquisitionEngine {
	inner: Arc<EngineInner>,
}

impl AcquisitionEngine {
	/// Engine with default configuration and a Chromium browser.
	pub fn new() -> AcquisitionResult<Self> {
		AcquisitionEngineBuilder::new().build()
	}

	/// Obtain a builder to customise the engine instance.
	pub fn builder() -> AcquisitionEngineBuilder {
		AcquisitionEngineBuilder::new()
	}

	pub fn config(&self) -> &AcquisitionConfig {
		&self.inner.config
	}

	/// Run one acquisition end to end.
	///
	/// A fresh proxy session and browser are used, and both are torn down on
	/// every path before this returns.
	pub async fn acquire(&self, request: &AcquisitionRequest) -> AcquisitionResult<DownloadResult> {
		let inner = &self.inner;
		let id = request.identifier.as_str();
		inner.events.state(id, AcquisitionState::Idle);

		let result = match inner.pool.allocate().await {
			Ok(session) => {
				let result = inner.acquire_in_session(request, &session).await;
				inner.pool.release(session).await;
				result
			}
			Err(err) => Err(AcquisitionError::Io(err)),
		};

		match &result {
			Ok(download) => {
				log::info!(
					"acquired `{}` from mirror #{} into {}",
					download.title,
					download.source_mirror_index + 1,
					download.filepath.display()
				);
				inner.events.state(id, AcquisitionState::Done);
			}
			Err(err) => {
				inner.events.dispatch(AcquisitionEvent::Error(ErrorEvent {
					identifier: id.to_string(),
					error: err.to_string(),
					timestamp: Utc::now(),
				}));
				inner.events.state(id, AcquisitionState::Failed(err.to_string()));
			}
		}

		result
	}

	/// Run independent acquisitions concurrently, each with its own session.
	/// Results come back in request order.
	pub async fn acquire_batch(
		&self,
		requests: Vec<AcquisitionRequest>,
		concurrency: usize,
	) -> Vec<AcquisitionResult<DownloadResult>> {
		let mut results: Vec<(usize, AcquisitionResult<DownloadResult>)> =
			stream::iter(requests.into_iter().enumerate())
				.map(|(position, request)| {
					let engine = self.clone();
					async move { (position, engine.acquire(&request).await) }
				})
				.buffer_unordered(concurrency.max(1))
				.collect()
				.await;

		results.sort_by_key(|(position, _)| *position);
		results.into_iter().map(|(_, result)| result).collect()
	}
}

impl EngineInner {
	async fn acquire_in_session(
		&self,
		request: &AcquisitionRequest,
		session: &ProxySession,
	) -> AcquisitionResult<DownloadResult> {
		let options = self.launch_options()?;
		let page = self.launcher.open(session, &options).await?;

		let result = self.run(request, session, page.as_ref()).await;

		if let Err(err) = page.close().await {
			log::warn!("failed to close browser session {}: {}", session.session_id(), err);
		}
		result
	}

	fn launch_options(&self) -> AcquisitionResult<LaunchOptions> {
		let profile = get_user_agent_profile(&UserAgentOptions {
			custom: self.config.user_agent.clone(),
			accept_language: self.config.accept_language.clone(),
			..UserAgentOptions::default()
		})
		.map_err(|err| ConfigError::InvalidValue {
			key: "user_agent".into(),
			value: err.to_string(),
		})?;

		Ok(LaunchOptions {
			headless: self.config.browser.headless,
			user_agent: profile,
			chrome_path: self.config.browser.chrome_path.clone(),
			extra_args: self.config.browser.extra_args.clone(),
		})
	}

	async fn run(
		&self,
		request: &AcquisitionRequest,
		session: &ProxySession,
		page: &dyn BrowserPage,
	) -> AcquisitionResult<DownloadResult> {
		let id = request.identifier.as_str();
		let site = request.source_site;
		let base = self.config.base_url(site)?;
		let debug = DebugArtifacts::new(self.config.debug_dir_for(&request.output_root, id));

		self.events.state(id, AcquisitionState::Resolving);
		let search_url = site
			.profile()
			.search_url(&base, id)
			.map_err(|err| AcquisitionError::TransportError(err.to_string()))?;
		self.visit(id, page, &search_url, &debug).await?;
		self.clear_resolving_challenge(id, page, &search_url).await?;

		let candidate = self.resolve_candidate(request, page, &base, &debug).await?;
		let title = request
			.display_title
			.as_deref()
			.map(str::trim)
			.filter(|title| !title.is_empty())
			.or_else(|| Some(candidate.title.trim()).filter(|title| !title.is_empty()))
			.unwrap_or(id)
			.to_string();

		let dir = target_dir(&request.output_root, &title, id);
		let decision = DirectoryGuard::reserve(&dir, request.overwrite_policy, self.ask.as_deref()).await?;
		if !decision.proceeds() {
			return Err(AcquisitionError::DirectoryConflictCancelled { path: dir, decision });
		}
		let target = target_file(&dir, &title);

		let detail = self.visit(id, page, &candidate.detail_href, &debug).await?;
		self.clear_resolving_challenge(id, page, &candidate.detail_href).await?;
		let detail = match page.content().await {
			Ok(content) => content,
			Err(err) => {
				log::debug!("re-reading detail page failed, using first snapshot: {}", err);
				detail
			}
		};

		let mirrors = select_mirrors(&detail.html, site, &detail.url);
		log::info!("{} mirror(s) listed for `{}`", mirrors.len(), title);

		let streamer = DownloadStreamer::new(page.user_agent(), session.endpoint(), self.config.timeouts.download())
			.map_err(|err| AcquisitionError::TransportError(err.to_string()))?;

		let ctx = MirrorContext {
			request,
			page,
			streamer: &streamer,
			debug: &debug,
			title: &title,
			target: &target,
		};

		let mut failures = Vec::new();
		for (index, mirror) in mirrors.iter().enumerate() {
			self.events.state(id, AcquisitionState::MirrorTrying(index));

			let attempt = self.try_mirror(&ctx, mirror).await;
			self.events.dispatch(AcquisitionEvent::MirrorAttempt(MirrorAttemptEvent {
				identifier: id.to_string(),
				index,
				url: mirror.url.clone(),
				success: attempt.is_ok(),
				reason: attempt.as_ref().err().map(ToString::to_string),
				timestamp: Utc::now(),
			}));

			match attempt {
				Ok(bytes_written) => {
					return Ok(DownloadResult {
						filepath: target,
						bytes_written,
						source_mirror_index: index,
						title,
						identifier: id.to_string(),
					});
				}
				Err(error) => failures.push(MirrorFailure {
					index,
					url: mirror.url.clone(),
					error,
				}),
			}
		}

		Err(AcquisitionError::AllMirrorsExhausted {
			attempts: failures.len(),
			failures,
		})
	}

	/// Run the search and pick one candidate.
	async fn resolve_candidate(
		&self,
		request: &AcquisitionRequest,
		page: &dyn BrowserPage,
		base: &Url,
		debug: &DebugArtifacts,
	) -> AcquisitionResult<CandidateRecord> {
		let id = request.identifier.as_str();
		let mode = if self.chooser.is_some() {
			SearchMode::All
		} else {
			SearchMode::FirstOnly
		};
		let resolver = SearchResolver::new(self.config.timeouts.results())
			.with_debug_artifacts(debug.clone());

		let mut candidates = match resolver.search(page, id, request.source_site, base, mode).await {
			Ok(candidates) => candidates,
			Err(SearchError::Browser(err)) => return Err(err.into()),
			Err(SearchError::ResultsTimeout { selector, debug_dir }) => {
				return Err(AcquisitionError::NoCandidatesFound {
					query: id.to_string(),
					reason: format!("results container `{selector}` never appeared"),
					debug_dir,
				});
			}
			Err(SearchError::NoResults { query }) => {
				return Err(AcquisitionError::NoCandidatesFound {
					query,
					reason: "search returned no results".into(),
					debug_dir: Some(debug.dir().to_path_buf()),
				});
			}
		};

		let choice = match &self.chooser {
			Some(chooser) if candidates.len() > 1 => chooser.choose(request, &candidates),
			_ => Some(0),
		};

		match choice.filter(|index| *index < candidates.len()) {
			Some(index) => Ok(candidates.swap_remove(index)),
			None => Err(AcquisitionError::NoCandidatesFound {
				query: id.to_string(),
				reason: "no candidate was selected".into(),
				debug_dir: None,
			}),
		}
	}

	/// Challenges before a mirror is chosen have nothing to fail over to.
	async fn clear_resolving_challenge(
		&self,
		id: &str,
		page: &dyn BrowserPage,
		url: &Url,
	) -> AcquisitionResult<()> {
		self.events.state(id, AcquisitionState::ChallengeClearing);
		let report = self.solver.inspect_and_clear(page, self.config.timeouts.challenge()).await;
		self.emit_challenge(id, url, &report);

		match report.outcome {
			ChallengeOutcome::Failed(ChallengeFailure::Timeout) => Err(AcquisitionError::ChallengeTimeout {
				url: url.to_string(),
			}),
			ChallengeOutcome::Failed(failure) => Err(AcquisitionError::ChallengeOracleFailure {
				reason: failure.to_string(),
			}),
			ChallengeOutcome::Cleared | ChallengeOutcome::NotPresent => Ok(()),
		}
	}

	async fn try_mirror(&self, ctx: &MirrorContext<'_>, mirror: &MirrorLink) -> Result<u64, MirrorAttemptError> {
		let id = ctx.request.identifier.as_str();
		let page = ctx.page;
		let site = ctx.request.source_site;

		self.visit(id, page, &mirror.url, ctx.debug).await?;

		let report = self.solver.inspect_and_clear(page, self.config.timeouts.challenge()).await;
		self.emit_challenge(id, &mirror.url, &report);
		if let ChallengeOutcome::Failed(failure) = report.outcome {
			return Err(MirrorAttemptError::Challenge {
				url: mirror.url.to_string(),
				failure,
			});
		}

		let policy = PollPolicy::new(self.config.timeouts.direct_link_poll(), self.config.timeouts.direct_link());
		let link = poll_until(policy, || async move {
			let content = page.content().await.ok()?;
			direct_link(&content.html, site, &content.url)
		})
		.await
		.map_err(|_| MirrorAttemptError::NoDirectLink {
			url: mirror.url.to_string(),
		})?;

		self.events.state(id, AcquisitionState::Verifying);
		if !verify_download_url(link.as_str(), ctx.title, id) {
			return Err(MirrorAttemptError::VerificationMismatch { url: link.to_string() });
		}

		self.events.state(id, AcquisitionState::Downloading);
		let download = DownloadRequest {
			url: link,
			referer: page.current_url().await.ok(),
			cookies: page.cookies().await?,
			target: ctx.target.to_path_buf(),
		};

		let progress = |milestone: &DownloadProgress| {
			self.events.dispatch(AcquisitionEvent::Progress(ProgressEvent {
				identifier: id.to_string(),
				bytes_written: milestone.bytes_written,
				total: milestone.total,
				percent: milestone.percent,
				timestamp: Utc::now(),
			}));
			if let Some(callback) = &self.progress {
				callback(milestone);
			}
		};

		Ok(ctx.streamer.fetch(&download, Some(&progress)).await?)
	}

	/// Navigate, snapshot the page for debugging and report the navigation.
	async fn visit(
		&self,
		id: &str,
		page: &dyn BrowserPage,
		url: &Url,
		debug: &DebugArtifacts,
	) -> Result<PageContent, BrowserError> {
		let started = Instant::now();
		if let Err(err) = page.navigate(url, self.config.timeouts.navigation()).await {
			if let Ok(content) = page.content().await {
				debug.write(&content).await;
			}
			return Err(err);
		}

		let content = page.content().await?;
		debug.write(&content).await;
		self.events.dispatch(AcquisitionEvent::Navigation(NavigationEvent {
			identifier: id.to_string(),
			url: content.url.clone(),
			title: content.title.clone(),
			latency: started.elapsed(),
			timestamp: Utc::now(),
		}));
		Ok(content)
	}

	fn emit_challenge(&self, id: &str, url: &Url, report: &ClearReport) {
		let Some(challenge) = report.challenge else {
			return;
		};
		self.events.dispatch(AcquisitionEvent::Challenge(ChallengeEvent {
			identifier: id.to_string(),
			url: url.clone(),
			challenge_type: format!("{challenge:?}"),
			outcome: report.outcome.label().to_string(),
			success: report.outcome.is_passable(),
			timestamp: Utc::now(),
		}));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mirror_errors_map_into_taxonomy() {
		let timeout: AcquisitionError = MirrorAttemptError::Challenge {
			url: "https://books.test/slow_download/a/0/0".into(),
			failure: ChallengeFailure::Timeout,
		}
		.into();
		assert!(matches!(timeout, AcquisitionError::ChallengeTimeout { .. }));

		let oracle: AcquisitionError = MirrorAttemptError::Challenge {
			url: "https://books.test/slow_download/a/0/0".into(),
			failure: ChallengeFailure::OracleRejected("ERROR_ZERO_BALANCE".into()),
		}
		.into();
		assert!(matches!(oracle, AcquisitionError::ChallengeOracleFailure { ref reason } if reason.contains("ERROR_ZERO_BALANCE")));

		let mismatch: AcquisitionError = MirrorAttemptError::VerificationMismatch {
			url: "https://cdn.test/other.pdf".into(),
		}
		.into();
		assert!(matches!(mismatch, AcquisitionError::MirrorVerificationMismatch { .. }));

		let transport: AcquisitionError = MirrorAttemptError::NoDirectLink {
			url: "https://books.test/slow_download/a/0/1".into(),
		}
		.into();
		assert!(matches!(transport, AcquisitionError::TransportError(_)));
	}

	#[test]
	fn request_builder_defaults() {
		let request = AcquisitionRequest::new("9780135957059", "/tmp/books")
			.with_title("The Pragmatic Programmer");
		assert_eq!(request.overwrite_policy, OverwritePolicy::Ask);
		assert_eq!(request.source_site, SourceSite::AnnasArchive);
		assert_eq!(request.display_title.as_deref(), Some("The Pragmatic Programmer"));
	}

	#[test]
	fn config_key_builds_oracle() {
		let mut config = AcquisitionConfig::default();
		assert!(oracle_from_config(&config).unwrap().is_none());

		config.captcha.api_key = Some("key".into());
		config.captcha.base_url = Some("http://127.0.0.1:9/".into());
		assert!(oracle_from_config(&config).unwrap().is_some());

		config.captcha.base_url = Some("not a url".into());
		assert!(matches!(
			oracle_from_config(&config),
			Err(AcquisitionError::Config(ConfigError::InvalidValue { .. }))
		));
	}
}
