//! Content Protection — shields non-prose subtrees from the generation step.
//!
//! `protect` swaps every protected subtree for an opaque text token and
//! records the serialized subtree. `restore` puts them back. Every token must
//! come back exactly once; anything else is a corruption and is reported as
//! `ProtectionError::Mismatch`, never repaired silently.
//!
//! Round trip: `restore(protect(x).html, protect(x).map) == canonicalize(x)`,
//! where `canonicalize` is parse + serialize of the same fragment.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Text;
use scraper::{Html, Node, Selector};
use serde::Serialize;
use thiserror::Error;

/// Images, embeds, raw/code blocks, non-comparison tables and verified reference blocks.
const PROTECTED_SELECTOR: &str = "img, picture, figure, video, audio, iframe, embed, object, \
    pre, code, .wp-block-html, .wp-block-embed, .wp-block-code, \
    table:not(.comparison-table), .verified-references";

static SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(PROTECTED_SELECTOR).expect("protected selector is valid"));

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%%PROTECTED_\d+%%").expect("token pattern is valid"));

#[derive(Debug, Error, PartialEq)]
pub enum ProtectionError {
    #[error(
        "Protected content mismatch: missing {missing:?}, duplicated {duplicated:?}, unknown {unknown:?}"
    )]
    Mismatch {
        missing: Vec<String>,
        duplicated: Vec<String>,
        unknown: Vec<String>,
    },
}

/// Ordered placeholder token → original markup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProtectedElementMap {
    entries: Vec<(String, String)>,
}

impl ProtectedElementMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(t, m)| (t.as_str(), m.as_str()))
    }

    /// True if one of the protected fragments is a verified reference block.
    pub fn has_verified_references(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, markup)| markup.contains("verified-references"))
    }
}

#[derive(Debug, Clone)]
pub struct Protected {
    pub html: String,
    pub map: ProtectedElementMap,
}

pub fn placeholder(index: usize) -> String {
    format!("%%PROTECTED_{index}%%")
}

/// Parses and re-serializes a fragment. `restore(protect(x))` equals this.
pub fn canonicalize(html: &str) -> String {
    serialize_fragment(&Html::parse_fragment(html))
}

/// Replaces every protected subtree with a placeholder token.
///
/// Nested matches (an `img` inside a protected `figure`) travel with their
/// outermost protected ancestor.
pub fn protect(html: &str) -> Protected {
    let mut doc = Html::parse_fragment(html);

    let matched_set: HashSet<_> = doc.select(&SELECTOR).map(|el| el.id()).collect();

    let mut targets = Vec::new();
    for el in doc.select(&SELECTOR) {
        let nested = el.ancestors().any(|a| matched_set.contains(&a.id()));
        if !nested {
            targets.push((el.id(), el.html()));
        }
    }

    let mut map = ProtectedElementMap::default();
    for (index, (id, markup)) in targets.into_iter().enumerate() {
        let token = placeholder(index);
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.insert_before(Node::Text(Text {
                text: token.as_str().into(),
            }));
            node.detach();
        }
        map.entries.push((token, markup));
    }

    Protected {
        html: serialize_fragment(&doc),
        map,
    }
}

/// Puts every protected fragment back in place of its token.
pub fn restore(html: &str, map: &ProtectedElementMap) -> Result<String, ProtectionError> {
    let mut missing = Vec::new();
    let mut duplicated = Vec::new();
    for (token, _) in map.iter() {
        match html.matches(token).count() {
            0 => missing.push(token.to_string()),
            1 => {}
            _ => duplicated.push(token.to_string()),
        }
    }
    let known: HashSet<&str> = map.iter().map(|(token, _)| token).collect();
    let unknown: Vec<String> = TOKEN_PATTERN
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|token| !known.contains(token))
        .map(String::from)
        .collect();

    if !missing.is_empty() || !duplicated.is_empty() || !unknown.is_empty() {
        return Err(ProtectionError::Mismatch {
            missing,
            duplicated,
            unknown,
        });
    }

    let mut restored = html.to_string();
    for (token, markup) in map.iter() {
        restored = restored.replacen(token, markup, 1);
    }
    Ok(restored)
}

fn serialize_fragment(doc: &Html) -> String {
    doc.root_element().inner_html()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = concat!(
        "<p>Intro text about tents.</p>",
        "<figure><img src=\"tent.jpg\"><figcaption>Tent</figcaption></figure>",
        "<p>More prose here.</p>",
        "<table><tbody><tr><td>size</td></tr></tbody></table>",
        "<iframe src=\"https://video.test/embed/1\"></iframe>",
        "<pre><code>let x = 1;</code></pre>",
        "<p>Closing prose.</p>"
    );

    #[test]
    fn test_protect_replaces_outermost_subtrees() {
        let protected = protect(ARTICLE);
        assert_eq!(protected.map.len(), 4);
        assert!(!protected.html.contains("<img"));
        assert!(!protected.html.contains("<table"));
        assert!(!protected.html.contains("<iframe"));
        assert!(!protected.html.contains("<pre"));
        assert!(protected.html.contains("%%PROTECTED_0%%"));
        assert!(protected.html.contains("<p>More prose here.</p>"));
    }

    #[test]
    fn test_round_trip_is_identity() {
        let protected = protect(ARTICLE);
        let restored = restore(&protected.html, &protected.map).unwrap();
        assert_eq!(restored, canonicalize(ARTICLE));
        assert_eq!(restored, ARTICLE);
    }

    #[test]
    fn test_round_trip_survives_prose_edits() {
        let protected = protect(ARTICLE);
        let edited = protected
            .html
            .replace("Intro text about tents.", "A rewritten 2026 introduction.")
            .replace("Closing prose.", "New closing paragraph with more words.");
        let restored = restore(&edited, &protected.map).unwrap();

        for (_, markup) in protected.map.iter() {
            assert_eq!(restored.matches(markup).count(), 1, "lost {markup}");
        }
        assert!(restored.contains("<figure><img src=\"tent.jpg\"><figcaption>Tent</figcaption></figure>"));
        assert!(restored.contains("A rewritten 2026 introduction."));
    }

    #[test]
    fn test_comparison_table_is_left_editable() {
        let html = "<table class=\"comparison-table\"><tbody><tr><td>a</td></tr></tbody></table>";
        let protected = protect(html);
        assert!(protected.map.is_empty());
        assert_eq!(protected.html, html);
    }

    #[test]
    fn test_verified_references_are_protected() {
        let html = "<p>x</p><section class=\"verified-references\"><h2>References</h2></section>";
        let protected = protect(html);
        assert_eq!(protected.map.len(), 1);
        assert!(protected.map.has_verified_references());
    }

    #[test]
    fn test_missing_placeholder_is_surfaced() {
        let protected = protect(ARTICLE);
        let damaged = protected.html.replace("%%PROTECTED_1%%", "");
        let err = restore(&damaged, &protected.map).unwrap_err();
        assert_eq!(
            err,
            ProtectionError::Mismatch {
                missing: vec!["%%PROTECTED_1%%".to_string()],
                duplicated: vec![],
                unknown: vec![],
            }
        );
    }

    #[test]
    fn test_duplicated_and_unknown_placeholders_are_surfaced() {
        let protected = protect(ARTICLE);
        let damaged = format!("{} %%PROTECTED_0%% %%PROTECTED_42%%", protected.html);
        match restore(&damaged, &protected.map).unwrap_err() {
            ProtectionError::Mismatch {
                missing,
                duplicated,
                unknown,
            } => {
                assert!(missing.is_empty());
                assert_eq!(duplicated, vec!["%%PROTECTED_0%%".to_string()]);
                assert_eq!(unknown, vec!["%%PROTECTED_42%%".to_string()]);
            }
        }
    }

    #[test]
    fn test_plain_prose_has_nothing_to_protect() {
        let protected = protect("<p>Only words.</p>");
        assert!(protected.map.is_empty());
        assert_eq!(restore(&protected.html, &protected.map).unwrap(), "<p>Only words.</p>");
    }
}
