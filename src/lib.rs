//! # bookfetch-rs
//!
//! Challenge-aware book acquisition. Given a title or ISBN the engine searches
//! a shadow-library source through a real browser, clears DDoS-Guard style
//! interstitials and CAPTCHA gates, walks the mirror list until one serves the
//! file it asked for and streams it to disk.
//!
//! ## Example
//!
//! ```no_run
//! use bookfetch_rs::{AcquisitionEngine, AcquisitionRequest, OverwritePolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = AcquisitionEngine::new()?;
//!     let request = AcquisitionRequest::new("9780135957059", "./library")
//!         .with_overwrite_policy(OverwritePolicy::Skip);
//!     let result = engine.acquire(&request).await?;
//!     println!("saved {} bytes to {}", result.bytes_written, result.filepath.display());
//!     Ok(())
//! }
//! ```

mod engine;

pub mod browser;
pub mod challenges;
pub mod config;
pub mod external_deps;
pub mod modules;
pub mod sources;

pub use crate::engine::{
    AcquisitionEngine,
    AcquisitionEngineBuilder,
    AcquisitionError,
    AcquisitionRequest,
    AcquisitionResult,
    CandidateChooser,
    DownloadResult,
    MirrorAttemptError,
    MirrorFailure,
};

pub use crate::browser::{
    BrowserCookie,
    BrowserError,
    BrowserLauncher,
    BrowserPage,
    ChromiumLauncher,
    LaunchOptions,
    PageContent,
};

pub use crate::challenges::core::{ChallengeFailure, ChallengeOutcome};

pub use crate::challenges::detectors::{ChallengeDetection, ChallengeDetector, ChallengeType};

pub use crate::challenges::solvers::{
    CaptchaChallengeSolver,
    ChallengeSolver,
    CookieClearanceSolver,
};

pub use crate::challenges::user_agents::{
    UserAgentOptions,
    UserAgentProfile,
    get_user_agent_profile,
};

pub use crate::config::{AcquisitionConfig, ConfigError};

pub use crate::external_deps::captcha::{CaptchaConfig, CaptchaProvider, TwoCaptchaProvider};

pub use crate::modules::{
    AcquisitionEvent,
    AcquisitionState,
    AskAnswer,
    DirectoryDecision,
    DownloadProgress,
    EventHandler,
    OverwritePolicy,
    ProxyConfig,
};

pub use crate::sources::{CandidateRecord, SourceSite};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
