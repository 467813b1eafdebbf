//! HTML inspection helpers shared by the staleness check, validator and publisher.

use scraper::{ElementRef, Html, Node, Selector};

const MAIN_CONTENT_SELECTORS: &[&str] = &[
    ".entry-content",
    ".post-content",
    "article",
    "main",
    "[role='main']",
    "#content",
    "body",
];

/// A link found in a content body.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub href: String,
    pub text: String,
    pub internal: bool,
}

/// Inner HTML of the main content area of a full page, falling back to the whole document.
pub fn main_content(raw_html: &str) -> String {
    let document = Html::parse_document(raw_html);
    for selector_str in MAIN_CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(main) = document.select(&selector).next() {
                return main.inner_html().trim().to_string();
            }
        }
    }
    document.root_element().inner_html()
}

/// Contents of the document `<title>`, trimmed.
pub fn document_title(raw_html: &str) -> Option<String> {
    let document = Html::parse_document(raw_html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Visible text of a fragment, skipping script and style contents.
pub fn visible_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    for node in fragment.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .map(|name| name == "script" || name == "style")
            .unwrap_or(false);
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

/// All anchors with an href. Relative links and links to `site_host` are internal.
pub fn links(html: &str, site_host: Option<&str>) -> Vec<Link> {
    let fragment = Html::parse_fragment(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    fragment
        .select(&selector)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim().to_string();
            if href.is_empty() || href.starts_with('#') || href.starts_with("mailto:") {
                return None;
            }
            let internal = is_internal(&href, site_host);
            Some(Link {
                text: anchor_text(&a),
                href,
                internal,
            })
        })
        .collect()
}

fn anchor_text(a: &ElementRef<'_>) -> String {
    a.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn is_internal(href: &str, site_host: Option<&str>) -> bool {
    match url::Url::parse(href) {
        Ok(parsed) => match (parsed.host_str(), site_host) {
            (Some(host), Some(site)) => host.trim_start_matches("www.") == site.trim_start_matches("www."),
            _ => false,
        },
        Err(_) => true,
    }
}

/// Host of a page url, used to classify links.
pub fn host_of(page_url: &str) -> Option<String> {
    url::Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_content_prefers_entry_content() {
        let page = "<html><head><title> Best Tents </title></head><body><nav>menu</nav>\
            <div class=\"entry-content\"><p>Body</p></div></body></html>";
        assert_eq!(main_content(page), "<p>Body</p>");
        assert_eq!(document_title(page), Some("Best Tents".to_string()));
    }

    #[test]
    fn test_visible_text_skips_scripts() {
        let text = visible_text("<p>Hello world</p><script>var x = 1;</script>");
        assert_eq!(word_count(&text), 2);
    }

    #[test]
    fn test_links_classify_internal_and_external() {
        let html = "<a href=\"/guides/tents\">tents</a>\
            <a href=\"https://www.site.test/x\">x page</a>\
            <a href=\"https://other.test/y\">Other source</a>\
            <a href=\"#top\">top</a>";
        let found = links(html, Some("site.test"));
        assert_eq!(found.len(), 3);
        assert!(found[0].internal);
        assert!(found[1].internal);
        assert!(!found[2].internal);
        assert_eq!(found[2].text, "Other source");
    }
}
