//! Source sites and their page layouts.
//!
//! Everything that depends on a site's markup (selectors, link patterns,
//! URL templates) lives in [`SiteProfile`], so a layout change on one mirror
//! network touches a single table entry.

pub mod mirrors;
pub mod search;

pub use mirrors::{MirrorLink, direct_link, select_mirrors};
pub use search::{CandidateRecord, SearchError, SearchMode, SearchResolver, parse_results};

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use url::Url;

/// Supported book sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSite {
    #[default]
    AnnasArchive,
    LibraryGenesis,
}

impl SourceSite {
    pub fn profile(&self) -> &'static SiteProfile {
        match self {
            SourceSite::AnnasArchive => &ANNAS_ARCHIVE,
            SourceSite::LibraryGenesis => &LIBRARY_GENESIS,
        }
    }
}

impl fmt::Display for SourceSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile().name)
    }
}

/// Layout description of one source site.
#[derive(Debug)]
pub struct SiteProfile {
    pub name: &'static str,
    pub default_base_url: &'static str,
    /// Relative search path; the query is appended percent-encoded.
    pub search_path: &'static str,
    /// Appears once results have rendered.
    pub results_container: &'static str,
    /// One element per search hit.
    pub result_item: &'static str,
    /// Link to the record's detail page, relative to a result item.
    /// `None` when the result item is itself the link.
    pub detail_link: Option<&'static str>,
    pub title_selector: &'static str,
    /// Href pattern of slow/free mirror links on the detail page.
    pub mirror_href: Regex,
    /// Anchor text of the final file link on a mirror page.
    pub direct_text: Regex,
}

impl SiteProfile {
    /// Search page URL for `query` under `base`.
    pub fn search_url(&self, base: &Url, query: &str) -> Result<Url, url::ParseError> {
        base.join(&format!("{}{}", self.search_path, urlencoding::encode(query.trim())))
    }

    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(self.default_base_url)
    }

    pub fn results_selector(&self) -> scraper::Selector {
        parse_selector(self.results_container)
    }
}

pub(crate) fn parse_selector(raw: &str) -> scraper::Selector {
    scraper::Selector::parse(raw)
        .unwrap_or_else(|err| panic!("invalid site selector `{}`: {:?}", raw, err))
}

fn build_regex(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid site regex `{}`: {}", pattern, err))
}

static ANNAS_ARCHIVE: Lazy<SiteProfile> = Lazy::new(|| SiteProfile {
    name: "Anna's Archive",
    default_base_url: "https://annas-archive.org/",
    search_path: "search?q=",
    results_container: "div.js-aarecord-list-outer",
    result_item: "a[href^='/md5/']",
    detail_link: None,
    title_selector: "h3",
    mirror_href: build_regex(r"/slow_download/"),
    direct_text: build_regex(r"download\s+now"),
});

static LIBRARY_GENESIS: Lazy<SiteProfile> = Lazy::new(|| SiteProfile {
    name: "Library Genesis",
    default_base_url: "https://libgen.li/",
    search_path: "index.php?req=",
    results_container: "table#tablelibgen",
    result_item: "table#tablelibgen tbody tr",
    detail_link: Some("a[href*='edition.php']"),
    title_selector: "a[href*='edition.php']",
    mirror_href: build_regex(r"ads\.php\?md5="),
    direct_text: build_regex(r"^\s*get\s*$"),
});

/// Href suffixes that identify a final ebook file on any mirror.
pub(crate) static FILE_HREF_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\.(pdf|epub|djvu|mobi|azw3)(\?.*)?$")
        .case_insensitive(true)
        .build()
        .expect("invalid file href regex")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_encodes_query() {
        let profile = SourceSite::AnnasArchive.profile();
        let base = profile.base_url().unwrap();
        let url = profile.search_url(&base, " The Pragmatic Programmer ").unwrap();
        assert_eq!(
            url.as_str(),
            "https://annas-archive.org/search?q=The%20Pragmatic%20Programmer"
        );

        let libgen = SourceSite::LibraryGenesis.profile();
        let url = libgen
            .search_url(&Url::parse("https://libgen.example/").unwrap(), "9780135957059")
            .unwrap();
        assert_eq!(url.as_str(), "https://libgen.example/index.php?req=9780135957059");
    }

    #[test]
    fn selectors_parse() {
        for site in [SourceSite::AnnasArchive, SourceSite::LibraryGenesis] {
            let profile = site.profile();
            profile.results_selector();
            parse_selector(profile.result_item);
            parse_selector(profile.title_selector);
            if let Some(detail) = profile.detail_link {
                parse_selector(detail);
            }
        }
    }

    #[test]
    fn file_suffixes() {
        assert!(FILE_HREF_RE.is_match("https://cdn.example/get/book.PDF"));
        assert!(FILE_HREF_RE.is_match("/d/book.epub?token=1"));
        assert!(!FILE_HREF_RE.is_match("/md5/abcdef"));
    }
}
