//! Core utilities shared by challenge detectors and solvers.

pub mod analysis;
pub mod polling;
pub mod types;

pub use analysis::{SiteKeyMatch, SiteKeyStrategy, extract_site_key};
pub use polling::{PollPolicy, PollTimeout, poll_until};
pub use types::{ChallengeClass, ChallengeFailure, ChallengeOutcome};
