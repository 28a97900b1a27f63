//! Challenge detection module.
//!
//! Pattern-based identification of anti-automation gates on a rendered page.
//! Every site-layout detail about *what a challenge looks like* lives in the
//! table below; solvers only see the classified result.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::challenges::core::ChallengeClass;

/// Challenge families recognised by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    /// DDoS-Guard style "checking your browser" interstitial.
    DdosGuard,
    /// Cloudflare "Just a moment..." interstitial without an interactive widget.
    CloudflareInterstitial,
    Recaptcha,
    HCaptcha,
    Turnstile,
}

impl ChallengeType {
    pub fn class(&self) -> ChallengeClass {
        match self {
            ChallengeType::DdosGuard | ChallengeType::CloudflareInterstitial => ChallengeClass::Soft,
            ChallengeType::Recaptcha | ChallengeType::HCaptcha | ChallengeType::Turnstile => {
                ChallengeClass::Hard
            }
        }
    }
}

/// Pattern definition used to match pages against known challenge signatures.
#[derive(Debug, Clone)]
struct ChallengePattern {
    id: &'static str,
    name: &'static str,
    challenge_type: ChallengeType,
    base_confidence: f32,
    patterns: Vec<Regex>,
}

impl ChallengePattern {
    fn new(
        id: &'static str,
        name: &'static str,
        challenge_type: ChallengeType,
        base_confidence: f32,
        raw_patterns: &[&str],
    ) -> Self {
        let patterns = raw_patterns
            .iter()
            .map(|pattern| build_regex(pattern))
            .collect();

        Self {
            id,
            name,
            challenge_type,
            base_confidence,
            patterns,
        }
    }
}

/// Static list of known challenge signatures.
static KNOWN_PATTERNS: Lazy<Vec<ChallengePattern>> = Lazy::new(|| {
    vec![
        ChallengePattern::new(
            "ddos_guard",
            "DDoS-Guard browser check",
            ChallengeType::DdosGuard,
            0.90,
            &[
                r"<title>\s*DDoS-Guard\s*</title>",
                r"/\.well-known/ddos-guard/",
                r"Checking your browser before accessing",
                r"ddos-guard\.net",
            ],
        ),
        ChallengePattern::new(
            "cf_interstitial",
            "Cloudflare interstitial",
            ChallengeType::CloudflareInterstitial,
            0.90,
            &[
                r"<title>\s*Just a moment\.\.\.\s*</title>",
                r"/cdn-cgi/challenge-platform/",
                r"window\._cf_chl_opt\s*=",
                r"Verifying you are human",
            ],
        ),
        ChallengePattern::new(
            "recaptcha",
            "Google reCAPTCHA",
            ChallengeType::Recaptcha,
            0.98,
            &[
                r#"class=['"][^'"]*g-recaptcha[^'"]*['"]"#,
                r"www\.(?:google|recaptcha)\.(?:com|net)/recaptcha/api",
                r"recaptcha/api2/anchor",
                r#"name=['"]g-recaptcha-response['"]"#,
            ],
        ),
        ChallengePattern::new(
            "hcaptcha",
            "hCaptcha",
            ChallengeType::HCaptcha,
            0.98,
            &[
                r#"class=['"][^'"]*h-captcha[^'"]*['"]"#,
                r"hcaptcha\.com/1/api\.js",
                r#"name=['"]h-captcha-response['"]"#,
            ],
        ),
        ChallengePattern::new(
            "cf_turnstile",
            "Cloudflare Turnstile",
            ChallengeType::Turnstile,
            0.99,
            &[
                r#"class=['"][^'"]*cf-turnstile[^'"]*['"]"#,
                r"challenges\.cloudflare\.com/turnstile/v0/api\.js",
                r"cf-turnstile-response",
            ],
        ),
    ]
});

/// Detection output returned to the solver.
#[derive(Debug, Clone)]
pub struct ChallengeDetection {
    pub pattern_id: &'static str,
    pub pattern_name: &'static str,
    pub challenge_type: ChallengeType,
    pub confidence: f32,
    pub matched_indicators: Vec<String>,
}

impl ChallengeDetection {
    pub fn class(&self) -> ChallengeClass {
        self.challenge_type.class()
    }
}

/// Pattern-based challenge detector.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    known_patterns: Vec<ChallengePattern>,
    min_confidence: f32,
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeDetector {
    pub fn new() -> Self {
        Self {
            known_patterns: KNOWN_PATTERNS.clone(),
            min_confidence: 0.2,
        }
    }

    /// Detect a challenge on a page given its title and serialized DOM.
    ///
    /// Hard challenges outrank soft ones when both match, since an
    /// interstitial carrying a widget will not clear on its own.
    pub fn detect(&self, title: &str, html: &str) -> Option<ChallengeDetection> {
        let haystack = format!("<title>{}</title>\n{}", title.trim(), html);
        let mut best: Option<ChallengeDetection> = None;

        for pattern in &self.known_patterns {
            let Some((confidence, matched)) = self.evaluate_pattern(pattern, &haystack) else {
                continue;
            };

            let better = match &best {
                None => true,
                Some(current) => {
                    let rank = |class: ChallengeClass| matches!(class, ChallengeClass::Hard) as u8;
                    (rank(pattern.challenge_type.class()), confidence)
                        > (rank(current.class()), current.confidence)
                }
            };

            if better {
                best = Some(ChallengeDetection {
                    pattern_id: pattern.id,
                    pattern_name: pattern.name,
                    challenge_type: pattern.challenge_type,
                    confidence,
                    matched_indicators: matched,
                });
            }
        }

        best
    }

    fn evaluate_pattern(
        &self,
        pattern: &ChallengePattern,
        haystack: &str,
    ) -> Option<(f32, Vec<String>)> {
        let matches: Vec<_> = pattern
            .patterns
            .iter()
            .filter(|regex| regex.is_match(haystack))
            .map(|regex| regex.as_str().to_string())
            .collect();

        if matches.is_empty() {
            return None;
        }

        let total = pattern.patterns.len() as f32;
        let confidence = ((matches.len() as f32 / total) * pattern.base_confidence).min(1.0);

        if confidence < self.min_confidence {
            return None;
        }

        Some((confidence, matches))
    }
}

fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid challenge detection regex `{}`: {}", pattern, err))
}
