//! Acquisition event bus.
//!
//! Every state transition and every mirror attempt is broadcast as an
//! [`AcquisitionEvent`], which is how logging and tests observe the flow.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Where a single acquisition currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Resolving,
    ChallengeClearing,
    /// Zero-based index into the ordered mirror list.
    MirrorTrying(usize),
    Verifying,
    Downloading,
    Done,
    Failed(String),
}

impl AcquisitionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AcquisitionState::Done | AcquisitionState::Failed(_))
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionState::Idle => f.write_str("idle"),
            AcquisitionState::Resolving => f.write_str("resolving"),
            AcquisitionState::ChallengeClearing => f.write_str("challenge-clearing"),
            AcquisitionState::MirrorTrying(index) => write!(f, "mirror-trying({index})"),
            AcquisitionState::Verifying => f.write_str("verifying"),
            AcquisitionState::Downloading => f.write_str("downloading"),
            AcquisitionState::Done => f.write_str("done"),
            AcquisitionState::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateEvent {
    pub identifier: String,
    pub state: AcquisitionState,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NavigationEvent {
    pub identifier: String,
    pub url: Url,
    pub title: String,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChallengeEvent {
    pub identifier: String,
    pub url: Url,
    pub challenge_type: String,
    /// Outcome label (`cleared`, `timeout`, `no-sitekey`, ...).
    pub outcome: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MirrorAttemptEvent {
    pub identifier: String,
    pub index: usize,
    pub url: Url,
    pub success: bool,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub identifier: String,
    pub bytes_written: u64,
    pub total: Option<u64>,
    pub percent: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub identifier: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    StateChanged(StateEvent),
    Navigation(NavigationEvent),
    Challenge(ChallengeEvent),
    MirrorAttempt(MirrorAttemptEvent),
    Progress(ProgressEvent),
    Error(ErrorEvent),
}

impl AcquisitionEvent {
    pub fn identifier(&self) -> &str {
        match self {
            AcquisitionEvent::StateChanged(event) => &event.identifier,
            AcquisitionEvent::Navigation(event) => &event.identifier,
            AcquisitionEvent::Challenge(event) => &event.identifier,
            AcquisitionEvent::MirrorAttempt(event) => &event.identifier,
            AcquisitionEvent::Progress(event) => &event.identifier,
            AcquisitionEvent::Error(event) => &event.identifier,
        }
    }
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &AcquisitionEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: AcquisitionEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }

    pub fn state(&self, identifier: &str, state: AcquisitionState) {
        self.dispatch(AcquisitionEvent::StateChanged(StateEvent {
            identifier: identifier.to_string(),
            state,
            timestamp: Utc::now(),
        }));
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &AcquisitionEvent) {
        match event {
            AcquisitionEvent::StateChanged(change) => {
                log::debug!("[{}] state -> {}", change.identifier, change.state);
            }
            AcquisitionEvent::Navigation(nav) => {
                log::debug!(
                    "[{}] loaded {} \"{}\" ({:.2}s)",
                    nav.identifier,
                    nav.url,
                    nav.title,
                    nav.latency.as_secs_f64()
                );
            }
            AcquisitionEvent::Challenge(challenge) => {
                log::info!(
                    "[{}] challenge {} on {} -> {}",
                    challenge.identifier,
                    challenge.challenge_type,
                    challenge.url,
                    challenge.outcome
                );
            }
            AcquisitionEvent::MirrorAttempt(attempt) if attempt.success => {
                log::info!("[{}] mirror #{} succeeded: {}", attempt.identifier, attempt.index + 1, attempt.url);
            }
            AcquisitionEvent::MirrorAttempt(attempt) => {
                log::warn!(
                    "[{}] mirror #{} failed: {} ({})",
                    attempt.identifier,
                    attempt.index + 1,
                    attempt.url,
                    attempt.reason.as_deref().unwrap_or("unknown")
                );
            }
            AcquisitionEvent::Progress(progress) => match progress.percent {
                Some(percent) => log::info!("[{}] downloaded {}%", progress.identifier, percent),
                None => log::info!(
                    "[{}] downloaded {:.1} MiB",
                    progress.identifier,
                    progress.bytes_written as f64 / (1024.0 * 1024.0)
                ),
            },
            AcquisitionEvent::Error(error) => {
                log::warn!("[{}] {}", error.identifier, error.error);
            }
        }
    }
}
