//! Challenge page parsing helpers.
//!
//! Extracts the parameters a hard challenge needs before it can be handed to a
//! solving oracle: the widget site key and, when the page registers one, the
//! JavaScript callback that consumes the token.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use url::Url;

/// Site key plus the strategy that located it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteKeyMatch {
    pub site_key: String,
    pub callback: Option<String>,
    pub strategy: SiteKeyStrategy,
}

/// Extraction strategies, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKeyStrategy {
    /// Element carrying both `data-sitekey` and `data-callback`.
    CallbackAttribute,
    /// Any element carrying `data-sitekey`.
    DataAttribute,
    /// Widget iframe whose query string carries `k=` or `sitekey=`.
    IframeQuery,
    /// `sitekey: "..."` style literals inside inline scripts.
    InlineScript,
}

impl SiteKeyStrategy {
    pub const ORDER: [SiteKeyStrategy; 4] = [
        SiteKeyStrategy::CallbackAttribute,
        SiteKeyStrategy::DataAttribute,
        SiteKeyStrategy::IframeQuery,
        SiteKeyStrategy::InlineScript,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SiteKeyStrategy::CallbackAttribute => "callback-attribute",
            SiteKeyStrategy::DataAttribute => "data-attribute",
            SiteKeyStrategy::IframeQuery => "iframe-query",
            SiteKeyStrategy::InlineScript => "inline-script",
        }
    }

    fn apply(&self, document: &Html, html: &str) -> Option<SiteKeyMatch> {
        match self {
            SiteKeyStrategy::CallbackAttribute => document
                .select(&CALLBACK_ELEMENT_SELECTOR)
                .find_map(|element| {
                    let site_key = valid_key(element.value().attr("data-sitekey")?)?;
                    let callback = element
                        .value()
                        .attr("data-callback")
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string);
                    Some(self.matched(site_key, callback))
                }),
            SiteKeyStrategy::DataAttribute => document
                .select(&SITEKEY_ELEMENT_SELECTOR)
                .find_map(|element| valid_key(element.value().attr("data-sitekey")?))
                .map(|site_key| self.matched(site_key, None)),
            SiteKeyStrategy::IframeQuery => document
                .select(&IFRAME_SELECTOR)
                .find_map(|element| site_key_from_iframe(element.value().attr("src")?))
                .map(|site_key| self.matched(site_key, None)),
            SiteKeyStrategy::InlineScript => SCRIPT_SITEKEY_RE
                .captures(html)
                .and_then(|caps| caps.get(1))
                .and_then(|m| valid_key(m.as_str()))
                .map(|site_key| self.matched(site_key, None)),
        }
    }

    fn matched(&self, site_key: String, callback: Option<String>) -> SiteKeyMatch {
        SiteKeyMatch {
            site_key,
            callback,
            strategy: *self,
        }
    }
}

/// Run the extraction strategies in order and stop at the first hit.
pub fn extract_site_key(html: &str) -> Option<SiteKeyMatch> {
    let document = Html::parse_document(html);
    SiteKeyStrategy::ORDER
        .iter()
        .find_map(|strategy| strategy.apply(&document, html))
}

fn site_key_from_iframe(src: &str) -> Option<String> {
    let decoded = html_escape::decode_html_entities(src);
    let absolute = if decoded.starts_with("//") {
        format!("https:{decoded}")
    } else {
        decoded.into_owned()
    };
    let url = Url::parse(&absolute).ok()?;
    url.query_pairs()
        .find(|(name, _)| name == "k" || name == "sitekey")
        .and_then(|(_, value)| valid_key(&value))
}

fn valid_key(raw: &str) -> Option<String> {
    let key = raw.trim();
    SITEKEY_SHAPE_RE.is_match(key).then(|| key.to_string())
}

static CALLBACK_ELEMENT_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[data-sitekey][data-callback]").expect("invalid callback selector")
});

static SITEKEY_ELEMENT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-sitekey]").expect("invalid sitekey selector"));

static IFRAME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("iframe[src]").expect("invalid iframe selector"));

static SITEKEY_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z_\-]{20,64}$").expect("invalid sitekey shape regex"));

static SCRIPT_SITEKEY_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r#"['"]?site_?key['"]?\s*[:=,]\s*['"]([0-9A-Za-z_\-]{20,64})['"]"#)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("invalid inline sitekey regex")
});

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "6LcR_okUAAAAAPYrPe-HK_0RULO1aZM15ENyM-Mf";

    #[test]
    fn prefers_explicit_callback_attribute() {
        let html = format!(
            r#"<div data-sitekey="{KEY}"></div>
               <div class="g-recaptcha" data-sitekey="{KEY}" data-callback="onSolved"></div>"#
        );
        let found = extract_site_key(&html).expect("site key");
        assert_eq!(found.strategy, SiteKeyStrategy::CallbackAttribute);
        assert_eq!(found.callback.as_deref(), Some("onSolved"));
        assert_eq!(found.site_key, KEY);
    }

    #[test]
    fn falls_back_to_generic_data_attribute() {
        let html = format!(r#"<div class="h-captcha" data-sitekey="{KEY}"></div>"#);
        let found = extract_site_key(&html).expect("site key");
        assert_eq!(found.strategy, SiteKeyStrategy::DataAttribute);
        assert!(found.callback.is_none());
    }

    #[test]
    fn reads_iframe_query_string() {
        let html = format!(
            r#"<iframe src="https://www.google.com/recaptcha/api2/anchor?ar=1&amp;k={KEY}&amp;co=aHR0cHM6"></iframe>"#
        );
        let found = extract_site_key(&html).expect("site key");
        assert_eq!(found.strategy, SiteKeyStrategy::IframeQuery);
        assert_eq!(found.site_key, KEY);
    }

    #[test]
    fn reads_inline_script_literal() {
        let html = format!(
            r#"<script>grecaptcha.render('captcha', {{ 'sitekey': '{KEY}', theme: 'dark' }});</script>"#
        );
        let found = extract_site_key(&html).expect("site key");
        assert_eq!(found.strategy, SiteKeyStrategy::InlineScript);
    }

    #[test]
    fn rejects_pages_without_key() {
        let html = r#"<div class="g-recaptcha" data-sitekey="short"></div><p>nothing</p>"#;
        assert!(extract_site_key(html).is_none());
    }
}
