//! Integrations that rely on third-party services.
//!
//! Currently this is the captcha solving oracle consumed by the hard
//! challenge solver.

pub mod captcha;

pub use captcha::TwoCaptchaProvider;
