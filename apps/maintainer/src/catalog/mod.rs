//! Sitemap crawl — builds the page catalog when the context carries no pages.
//!
//! Handles both `<urlset>` documents and `<sitemapindex>` documents; an index
//! is followed one level deep.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::models::page::{slug_from_url, Page};
use crate::net::{NetError, TextSource};

/// Age assigned to entries without `<lastmod>`.
pub const UNKNOWN_AGE_DAYS: i64 = 365;

static URL_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<url>(.*?)</url>").expect("url block regex"));
static SITEMAP_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<sitemap>(.*?)</sitemap>").expect("sitemap block regex"));
static LOC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<loc>\s*(.*?)\s*</loc>").expect("loc regex"));
static LASTMOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<lastmod>\s*(.*?)\s*</lastmod>").expect("lastmod regex"));

#[derive(Debug, Clone, PartialEq)]
struct SitemapEntry {
    loc: String,
    lastmod: Option<DateTime<Utc>>,
}

/// Crawls `sitemap_url` into catalog pages. A failing child sitemap is
/// logged and skipped; a failing root is an error.
pub async fn crawl_sitemap<S: TextSource + ?Sized>(
    source: &S,
    sitemap_url: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Page>, NetError> {
    let root = source.fetch_text(sitemap_url).await?;

    let children = entries(&SITEMAP_BLOCK, &root);
    let mut found = entries(&URL_BLOCK, &root);
    for child in &children {
        match source.fetch_text(&child.loc).await {
            Ok(body) => {
                let nested = entries(&URL_BLOCK, &body);
                debug!(sitemap = %child.loc, urls = nested.len(), "Child sitemap read");
                found.extend(nested);
            }
            Err(e) => warn!(sitemap = %child.loc, error = %e, "Child sitemap skipped"),
        }
    }

    let mut seen = std::collections::HashSet::new();
    let pages: Vec<Page> = found
        .into_iter()
        .filter(|entry| seen.insert(entry.loc.clone()))
        .map(|entry| to_page(entry, now))
        .collect();

    info!(
        sitemap = %sitemap_url,
        children = children.len(),
        pages = pages.len(),
        "Sitemap crawled"
    );
    Ok(pages)
}

fn entries(block: &Regex, xml: &str) -> Vec<SitemapEntry> {
    block
        .captures_iter(xml)
        .filter_map(|cap| {
            let inner = cap.get(1)?.as_str();
            let loc = unescape(LOC.captures(inner)?.get(1)?.as_str());
            if loc.is_empty() {
                return None;
            }
            let lastmod = LASTMOD
                .captures(inner)
                .and_then(|c| c.get(1))
                .and_then(|m| parse_lastmod(m.as_str()));
            Some(SitemapEntry { loc, lastmod })
        })
        .collect()
}

fn to_page(entry: SitemapEntry, now: DateTime<Utc>) -> Page {
    let age_in_days = entry
        .lastmod
        .map(|at| (now - at).num_days().max(0))
        .unwrap_or(UNKNOWN_AGE_DAYS);
    Page {
        id: None,
        slug: slug_from_url(&entry.loc).unwrap_or_default(),
        url: Some(entry.loc),
        title: String::new(),
        last_modified: entry.lastmod,
        age_in_days,
        is_priority: false,
    }
}

/// Accepts full RFC 3339 timestamps and bare `YYYY-MM-DD` dates.
fn parse_lastmod(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn unescape(raw: &str) -> String {
    let raw = raw
        .trim_start_matches("<![CDATA[")
        .trim_end_matches("]]>")
        .trim();
    raw.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct FakeSource(HashMap<String, String>);

    #[async_trait]
    impl TextSource for FakeSource {
        async fn fetch_text(&self, url: &str) -> Result<String, NetError> {
            self.0.get(url).cloned().ok_or_else(|| NetError::FetchFailed {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_urlset_ages_from_lastmod() {
        let xml = r#"<?xml version="1.0"?>
            <urlset>
              <url><loc>https://site.test/guides/tents/</loc><lastmod>2025-02-19T10:00:00+00:00</lastmod></url>
              <url><loc>https://site.test/about/</loc></url>
            </urlset>"#;
        let source = FakeSource(HashMap::from([("https://site.test/sitemap.xml".to_string(), xml.to_string())]));
        let pages = crawl_sitemap(&source, "https://site.test/sitemap.xml", now()).await.unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].age_in_days, 9);
        assert_eq!(pages[0].slug, "tents");
        assert_eq!(pages[0].identity(), Some("https://site.test/guides/tents/"));
        assert_eq!(pages[1].age_in_days, UNKNOWN_AGE_DAYS);
    }

    #[tokio::test]
    async fn test_index_is_followed_one_level() {
        let index = r#"<sitemapindex>
              <sitemap><loc>https://site.test/post-sitemap.xml</loc></sitemap>
              <sitemap><loc>https://site.test/missing.xml</loc></sitemap>
            </sitemapindex>"#;
        let posts = r#"<urlset>
              <url><loc>https://site.test/a/?x=1&amp;y=2</loc><lastmod>2025-01-30</lastmod></url>
              <url><loc>https://site.test/a/?x=1&amp;y=2</loc></url>
            </urlset>"#;
        let source = FakeSource(HashMap::from([
            ("https://site.test/sitemap_index.xml".to_string(), index.to_string()),
            ("https://site.test/post-sitemap.xml".to_string(), posts.to_string()),
        ]));
        let pages = crawl_sitemap(&source, "https://site.test/sitemap_index.xml", now())
            .await
            .unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].url.as_deref(), Some("https://site.test/a/?x=1&y=2"));
        assert_eq!(pages[0].age_in_days, 30);
    }

    #[tokio::test]
    async fn test_unreachable_root_is_an_error() {
        let source = FakeSource(HashMap::new());
        let err = crawl_sitemap(&source, "https://site.test/sitemap.xml", now()).await;
        assert!(matches!(err, Err(NetError::FetchFailed { .. })));
    }
}
