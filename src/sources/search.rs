//! Search result resolution.

use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html};
use thiserror::Error;
use url::Url;

use super::{SourceSite, parse_selector};
use crate::browser::{BrowserError, BrowserPage, DebugArtifacts, PageContent};
use crate::challenges::core::{PollPolicy, poll_until};

/// One search hit, in the order the source ranked it.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub detail_href: Url,
    pub title: String,
    /// `0.0` when the listing shows no size.
    pub approx_size_mb: f64,
}

/// How many results automatic flows look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Only the top hit; the source's ranking is trusted.
    #[default]
    FirstOnly,
    All,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(
        "results container `{selector}` never appeared (debug artifacts: {})",
        .debug_dir.as_ref().map(|dir| dir.display().to_string()).unwrap_or_else(|| "not written".into())
    )]
    ResultsTimeout {
        selector: String,
        debug_dir: Option<PathBuf>,
    },
    #[error("no results for `{query}`")]
    NoResults { query: String },
}

/// Reads search hits from a rendered results page.
#[derive(Debug, Clone)]
pub struct SearchResolver {
    results_timeout: Duration,
    poll_interval: Duration,
    debug: Option<DebugArtifacts>,
}

impl Default for SearchResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl SearchResolver {
    pub fn new(results_timeout: Duration) -> Self {
        Self {
            results_timeout,
            poll_interval: Duration::from_millis(500),
            debug: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_debug_artifacts(mut self, debug: DebugArtifacts) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Collect candidates from `page`, which must already show the results
    /// for `query`.
    pub async fn search(
        &self,
        page: &dyn BrowserPage,
        query: &str,
        site: SourceSite,
        base: &Url,
        mode: SearchMode,
    ) -> Result<Vec<CandidateRecord>, SearchError> {
        let profile = site.profile();
        let selector = profile.results_selector();
        let policy = PollPolicy::new(self.poll_interval, self.results_timeout);

        let selector_ref = &selector;
        let waited = poll_until(policy, || async move {
            let content = page.content().await.ok()?;
            let ready = Html::parse_document(&content.html)
                .select(selector_ref)
                .next()
                .is_some();
            ready.then_some(content)
        })
        .await;

        let content = match waited {
            Ok(content) => content,
            Err(timeout) => {
                log::warn!(
                    "results container `{}` missing after {:?} for `{}`",
                    profile.results_container,
                    timeout.elapsed,
                    query
                );
                let debug_dir = self.dump(page).await;
                return Err(SearchError::ResultsTimeout {
                    selector: profile.results_container.to_string(),
                    debug_dir,
                });
            }
        };

        let mut candidates = parse_results(&content.html, site, base);
        log::info!(
            "{} result(s) for `{}` on {}",
            candidates.len(),
            query,
            profile.name
        );

        if candidates.is_empty() {
            self.dump(page).await;
            return Err(SearchError::NoResults {
                query: query.to_string(),
            });
        }

        if mode == SearchMode::FirstOnly {
            candidates.truncate(1);
        }
        Ok(candidates)
    }

    async fn dump(&self, page: &dyn BrowserPage) -> Option<PathBuf> {
        let debug = self.debug.as_ref()?;
        let content: PageContent = page.content().await.ok()?;
        debug.write(&content).await;
        Some(debug.dir().to_path_buf())
    }
}

/// Parse search hits from a results page. Order is preserved and repeated
/// detail links are merged into the first occurrence.
pub fn parse_results(html: &str, site: SourceSite, base: &Url) -> Vec<CandidateRecord> {
    let profile = site.profile();
    let document = Html::parse_document(html);
    let container = profile.results_selector();
    let item_selector = parse_selector(profile.result_item);
    let title_selector = parse_selector(profile.title_selector);
    let detail_selector = profile.detail_link.map(parse_selector);

    let roots: Vec<ElementRef<'_>> = {
        let found: Vec<_> = document.select(&container).collect();
        if found.is_empty() {
            vec![document.root_element()]
        } else {
            found
        }
    };

    let mut records: Vec<CandidateRecord> = Vec::new();
    for root in roots {
        for item in root.select(&item_selector) {
            let link = match &detail_selector {
                Some(selector) => item.select(selector).next(),
                None => Some(item),
            };
            let Some(href) = link.and_then(|link| link.value().attr("href")) else {
                continue;
            };
            let Ok(detail_href) = base.join(href.trim()) else {
                log::debug!("skipping unparsable result href {}", href);
                continue;
            };

            let item_text = collapsed_text(item);
            let title = item
                .select(&title_selector)
                .map(collapsed_text)
                .find(|text| !text.is_empty())
                .or_else(|| link.map(collapsed_text))
                .unwrap_or_default();
            let approx_size_mb = parse_size_mb(&item_text);

            match records.iter_mut().find(|record| record.detail_href == detail_href) {
                Some(existing) => {
                    if existing.title.is_empty() {
                        existing.title = title;
                    }
                    if existing.approx_size_mb == 0.0 {
                        existing.approx_size_mb = approx_size_mb;
                    }
                }
                None => records.push(CandidateRecord {
                    detail_href,
                    title,
                    approx_size_mb,
                }),
            }
        }
    }

    records
}

fn collapsed_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// First `NN(.N) KB|MB|GB` figure in `text`, in megabytes; `0.0` if none.
pub fn parse_size_mb(text: &str) -> f64 {
    let Some(caps) = SIZE_RE.captures(text) else {
        return 0.0;
    };
    let Ok(value) = caps[1].replace(',', ".").parse::<f64>() else {
        return 0.0;
    };
    match caps[2].to_ascii_lowercase().chars().next() {
        Some('k') => value / 1024.0,
        Some('g') => value * 1024.0,
        _ => value,
    }
}

static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"(\d+(?:[.,]\d+)?)\s*(KB|MB|GB|KiB|MiB|GiB)\b")
        .case_insensitive(true)
        .build()
        .expect("invalid size regex")
});

#[cfg(test)]
mod tests {
    use super::*;

    const ANNAS_RESULTS: &str = r#"
        <html><body>
        <div class="js-aarecord-list-outer">
            <div><a href="/md5/aaa111"><img src="cover.jpg"></a>
                 <a href="/md5/aaa111"><h3>The Pragmatic Programmer</h3>
                   <div>English [en], pdf, 4.8MB, 2019</div></a></div>
            <div><a href="/md5/bbb222"><h3>The Pragmatic Programmer (1st ed.)</h3>
                   <div>epub, 850KB</div></a></div>
            <div><a href="/md5/ccc333"><h3>Pragmatic Thinking</h3><div>pdf, 1.2 GB</div></a></div>
        </div>
        <a href="/md5/zzz999">Sidebar link outside results</a>
        </body></html>"#;

    fn base() -> Url {
        Url::parse("https://books.test/").unwrap()
    }

    #[test]
    fn parses_annas_results_in_order() {
        let records = parse_results(ANNAS_RESULTS, SourceSite::AnnasArchive, &base());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].detail_href.as_str(), "https://books.test/md5/aaa111");
        assert_eq!(records[0].title, "The Pragmatic Programmer");
        assert!((records[0].approx_size_mb - 4.8).abs() < 1e-9);
        assert!((records[1].approx_size_mb - 850.0 / 1024.0).abs() < 1e-9);
        assert!((records[2].approx_size_mb - 1228.8).abs() < 1e-9);
    }

    #[test]
    fn parses_libgen_rows() {
        let html = r#"
            <table id="tablelibgen"><tbody>
              <tr><td><a href="edition.php?id=42">Rust in Action</a></td><td>12 MB</td></tr>
              <tr><td>no link here</td></tr>
            </tbody></table>"#;
        let records = parse_results(html, SourceSite::LibraryGenesis, &base());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].detail_href.as_str(), "https://books.test/edition.php?id=42");
        assert_eq!(records[0].title, "Rust in Action");
        assert_eq!(records[0].approx_size_mb, 12.0);
    }

    #[test]
    fn size_parsing() {
        assert_eq!(parse_size_mb("pdf, 3,5 MB"), 3.5);
        assert_eq!(parse_size_mb("2 GiB"), 2048.0);
        assert_eq!(parse_size_mb("no size"), 0.0);
    }
}
