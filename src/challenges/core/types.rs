//! Core data structures shared across challenge detection and solving.

use std::fmt;

/// Result of attempting to clear whatever challenge a navigation landed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// A challenge was present and has been cleared.
    Cleared,
    /// A challenge was present and could not be cleared.
    Failed(ChallengeFailure),
    /// The page did not carry a challenge.
    NotPresent,
}

impl ChallengeOutcome {
    /// `true` when the page can be used (cleared or never challenged).
    pub fn is_passable(&self) -> bool {
        !matches!(self, ChallengeOutcome::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChallengeOutcome::Cleared => "cleared",
            ChallengeOutcome::Failed(failure) => failure.reason(),
            ChallengeOutcome::NotPresent => "not-present",
        }
    }
}

/// Why a challenge could not be cleared. None of these are fatal for the
/// acquisition as a whole; they mean "try a different mirror".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeFailure {
    /// Hard challenge without an extractable site key.
    NoSiteKey,
    /// The solving oracle refused the job or reported an unsolvable task.
    OracleRejected(String),
    /// Clearance cookie or oracle token never arrived.
    Timeout,
    /// The challenge needs something this session does not have.
    Unsupported(String),
}

impl ChallengeFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            ChallengeFailure::NoSiteKey => "no-sitekey",
            ChallengeFailure::OracleRejected(_) => "oracle-rejected",
            ChallengeFailure::Timeout => "timeout",
            ChallengeFailure::Unsupported(_) => "unsupported",
        }
    }
}

impl fmt::Display for ChallengeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeFailure::OracleRejected(detail) | ChallengeFailure::Unsupported(detail) => {
                write!(f, "{} ({detail})", self.reason())
            }
            _ => f.write_str(self.reason()),
        }
    }
}

/// Coarse challenge family used to pick a solving strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeClass {
    /// Resolves itself once client-side script sets a clearance cookie.
    Soft,
    /// Requires a CAPTCHA token.
    Hard,
}
