//! Mirror enumeration and direct-link discovery.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{FILE_HREF_RE, SourceSite};

/// A candidate download page on a mirror server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorLink {
    pub url: Url,
    pub has_waitlist: bool,
}

/// Mirror links from a detail page, no-waitlist mirrors first.
///
/// The partition is stable and repeated hrefs keep their first position.
pub fn select_mirrors(detail_html: &str, site: SourceSite, base: &Url) -> Vec<MirrorLink> {
    let profile = site.profile();
    let document = Html::parse_document(detail_html);

    let mut links: Vec<MirrorLink> = Vec::new();
    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if !profile.mirror_href.is_match(href) {
            continue;
        }
        let Ok(url) = base.join(href) else {
            continue;
        };
        if links.iter().any(|link| link.url == url) {
            continue;
        }

        let has_waitlist = mentions_waitlist(&surrounding_text(anchor));
        links.push(MirrorLink { url, has_waitlist });
    }

    let (mut ordered, waiting): (Vec<_>, Vec<_>) =
        links.into_iter().partition(|link| !link.has_waitlist);
    ordered.extend(waiting);
    ordered
}

/// Final file link on a mirror page, if it has rendered yet.
///
/// Prefers an anchor whose text matches the site's "download now" wording and
/// falls back to any href ending in a known ebook extension.
pub fn direct_link(mirror_html: &str, site: SourceSite, base: &Url) -> Option<Url> {
    let profile = site.profile();
    let document = Html::parse_document(mirror_html);

    let usable = |anchor: &ElementRef<'_>| -> Option<Url> {
        let href = anchor.value().attr("href")?.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        base.join(href).ok()
    };

    document
        .select(&ANCHOR_SELECTOR)
        .filter(|anchor| profile.direct_text.is_match(&element_text(anchor)))
        .find_map(|anchor| usable(&anchor))
        .or_else(|| {
            document
                .select(&ANCHOR_SELECTOR)
                .filter(|anchor| {
                    anchor
                        .value()
                        .attr("href")
                        .is_some_and(|href| FILE_HREF_RE.is_match(href.trim()))
                })
                .find_map(|anchor| usable(&anchor))
        })
}

/// `true` when `text` mentions a waitlist that is not negated ("no waitlist").
pub fn mentions_waitlist(text: &str) -> bool {
    WAITLIST_RE
        .captures_iter(text)
        .any(|caps| caps.get(1).is_none())
}

fn surrounding_text(anchor: ElementRef<'_>) -> String {
    let own = element_text(&anchor);
    match anchor.parent().and_then(ElementRef::wrap) {
        Some(parent) => format!("{} {}", own, element_text(&parent)),
        None => own,
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("invalid anchor selector"));

static WAITLIST_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\b(no\s+)?wait\s*-?\s*list")
        .case_insensitive(true)
        .build()
        .expect("invalid waitlist regex")
});
