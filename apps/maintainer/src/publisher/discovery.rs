//! Post id discovery from a page's public HTML.
//!
//! Tried in order: the REST discovery link (`<link rel="alternate"
//! type="application/json" href=".../wp/v2/posts/N">`), the shortlink
//! (`?p=N`), then theme body markers (`postid-N` class, `post-N` id).

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

static REST_POST_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/wp/v2/posts/(\d+)").expect("rest href regex"));
static SHORTLINK_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]p=(\d+)").expect("shortlink regex"));
static POSTID_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)postid-(\d+)(?:\s|$)").expect("postid regex"));
static POST_ID_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^post-(\d+)$").expect("post id regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    RestLink,
    Shortlink,
    BodyMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovered {
    pub post_id: u64,
    pub source: DiscoverySource,
}

pub fn discover_post_id(raw_html: &str) -> Option<Discovered> {
    let document = Html::parse_document(raw_html);

    let found = first_capture(&document, "link[rel~='alternate'][type='application/json']", "href", &REST_POST_HREF)
        .map(|id| (id, DiscoverySource::RestLink))
        .or_else(|| {
            first_capture(&document, "link[rel~='shortlink']", "href", &SHORTLINK_PARAM)
                .map(|id| (id, DiscoverySource::Shortlink))
        })
        .or_else(|| {
            first_capture(&document, "body[class]", "class", &POSTID_CLASS)
                .or_else(|| first_capture(&document, "article[id], div[id]", "id", &POST_ID_ATTR))
                .map(|id| (id, DiscoverySource::BodyMarker))
        });

    found.map(|(post_id, source)| Discovered { post_id, source })
}

fn first_capture(document: &Html, selector: &str, attr: &str, pattern: &Regex) -> Option<u64> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .filter_map(|value| pattern.captures(value))
        .filter_map(|cap| cap.get(1)?.as_str().parse::<u64>().ok())
        .find(|id| *id > 0)
}
