//! Cross-cutting services module
//!
//! Session isolation, the event bus, target-directory handling and the
//! download streamer used by the acquisition engine.

pub mod directory;
pub mod download;
pub mod events;
pub mod proxy;

// Re-export commonly used types
pub use directory::{AskAnswer, AskFn, DirectoryDecision, DirectoryGuard, OverwritePolicy};
pub use download::{
    DownloadConfig, DownloadError, DownloadProgress, DownloadRequest, DownloadStreamer, ProgressFn,
    verify_download_url,
};
pub use events::{
    AcquisitionEvent, AcquisitionState, ChallengeEvent, ErrorEvent, EventDispatcher, EventHandler,
    LoggingHandler, MirrorAttemptEvent, NavigationEvent, ProgressEvent, StateEvent,
};
pub use proxy::{ProxyConfig, ProxyEndpoint, ProxySession, ProxySessionPool, SessionPoolConfig};
