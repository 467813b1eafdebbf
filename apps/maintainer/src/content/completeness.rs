//! Completeness Validator — makes sure FAQ, Conclusion and References exist.
//!
//! Missing FAQ/Conclusion sections are generated through the section prompts
//! and inserted before an existing Conclusion heading (else appended).
//! References are only ever produced by the verified search path; an
//! unverified References section is deleted and regenerated, and without a
//! search capability references are skipped entirely.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::content::extract::visible_text;
use crate::content::sanitize::sanitize;
use crate::llm_client::prompts::{OutputFormat, PromptKey};
use crate::llm_client::{GenerationError, Generator};
use crate::progress::ProgressFeed;
use crate::search::{build_verified_references, SearchProvider};

const CONTEXT_CHARS: usize = 1500;
const MAX_REFERENCE_LINKS: usize = 5;

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h([2-6])\b[^>]*>(.*?)</h[2-6]\s*>").expect("heading pattern"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Faq,
    Conclusion,
    References,
}

const SECTION_PATTERNS: &[(SectionKind, &[&str])] = &[
    (SectionKind::Faq, &["faq", "frequently asked", "common questions"]),
    (
        SectionKind::Conclusion,
        &["conclusion", "final thoughts", "wrapping up", "bottom line", "the verdict"],
    ),
    (SectionKind::References, &["references", "sources", "citations", "further reading"]),
];

/// A heading found in a body, with the byte offset of its opening tag.
#[derive(Debug, Clone)]
struct Heading {
    level: u8,
    start: usize,
    text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletenessReport {
    pub html: String,
    pub added: Vec<SectionKind>,
    pub removed_unverified_references: bool,
    pub references_skipped: bool,
}

#[cfg(test)]
impl CompletenessReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || self.removed_unverified_references
    }
}

fn headings(html: &str) -> Vec<Heading> {
    HEADING
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let level = caps[1].parse::<u8>().ok()?;
            let text = TAG.replace_all(&caps[2], " ").to_lowercase();
            Some(Heading {
                level,
                start: whole.start(),
                text: text.split_whitespace().collect::<Vec<_>>().join(" "),
            })
        })
        .collect()
}

/// References headings must lead with the keyword ("Power Sources" is prose).
fn heading_matches(heading: &Heading, kind: SectionKind) -> bool {
    SECTION_PATTERNS
        .iter()
        .filter(|(k, _)| *k == kind)
        .flat_map(|(_, words)| words.iter())
        .any(|w| match kind {
            SectionKind::References => heading.text.starts_with(w),
            _ => heading.text.contains(w),
        })
}

fn find_section(html: &str, kind: SectionKind) -> Option<Heading> {
    headings(html).into_iter().find(|h| heading_matches(h, kind))
}

/// True if the body carries a block produced by the verified references path.
pub fn has_verified_references(html: &str) -> bool {
    html.contains("data-verified=\"true\"") && html.contains("verified-references")
}

/// Mandatory sections absent from `html`. A protected verified reference
/// block counts as present.
pub fn missing_sections(html: &str, protected_references: bool) -> Vec<SectionKind> {
    [SectionKind::Faq, SectionKind::Conclusion, SectionKind::References]
        .into_iter()
        .filter(|kind| match kind {
            SectionKind::References => {
                !(protected_references
                    || has_verified_references(html)
                    || find_section(html, *kind).is_some())
            }
            _ => find_section(html, *kind).is_none(),
        })
        .collect()
}

/// Byte offset where a generated section goes: before the Conclusion heading if any, else the end.
fn anchor_point(html: &str) -> usize {
    find_section(html, SectionKind::Conclusion)
        .map(|h| h.start)
        .unwrap_or(html.len())
}

fn insert_at(html: &str, at: usize, fragment: &str) -> String {
    let mut out = String::with_capacity(html.len() + fragment.len() + 2);
    out.push_str(&html[..at]);
    if at > 0 && !html[..at].ends_with('\n') {
        out.push('\n');
    }
    out.push_str(fragment);
    if at < html.len() {
        out.push('\n');
    }
    out.push_str(&html[at..]);
    out
}

/// Removes an unverified References section: from its heading to the next
/// heading of the same or higher rank.
fn remove_unverified_references(html: &str) -> Option<String> {
    if has_verified_references(html) {
        return None;
    }
    let all = headings(html);
    let (index, heading) = all
        .iter()
        .enumerate()
        .find(|(_, h)| heading_matches(h, SectionKind::References))?;
    let end = all[index + 1..]
        .iter()
        .find(|h| h.level <= heading.level)
        .map(|h| h.start)
        .unwrap_or(html.len());
    let mut out = String::with_capacity(html.len());
    out.push_str(html[..heading.start].trim_end());
    out.push_str(&html[end..]);
    Some(out)
}

pub struct CompletenessValidator<'a> {
    pub generator: &'a dyn Generator,
    pub search: Option<&'a dyn SearchProvider>,
    pub progress: &'a ProgressFeed,
}

impl<'a> CompletenessValidator<'a> {
    /// Adds whatever mandatory sections are missing from `html`.
    ///
    /// `protected_references` is true when a verified reference block was
    /// lifted out by content protection and will be restored later.
    pub async fn ensure_complete(
        &self,
        html: &str,
        title: &str,
        protected_references: bool,
        page: Option<&str>,
    ) -> Result<CompletenessReport, GenerationError> {
        let mut report = CompletenessReport {
            html: html.to_string(),
            added: Vec::new(),
            removed_unverified_references: false,
            references_skipped: false,
        };

        if !protected_references {
            if let Some(cleaned) = remove_unverified_references(&report.html) {
                report.html = cleaned;
                report.removed_unverified_references = true;
                self.progress
                    .info(page, "Removed unverified References section");
            }
        }

        let context = truncate_chars(&visible_text(&report.html), CONTEXT_CHARS);
        let context = if context.trim().is_empty() {
            title.to_string()
        } else {
            context
        };

        for kind in missing_sections(&report.html, protected_references) {
            match kind {
                SectionKind::Faq | SectionKind::Conclusion => {
                    let key = if kind == SectionKind::Faq {
                        PromptKey::SectionFaq
                    } else {
                        PromptKey::SectionConclusion
                    };
                    let fragment = self
                        .generator
                        .generate(key, &[title.to_string(), context.clone()], OutputFormat::Html)
                        .await?;
                    let fragment = ensure_heading(&sanitize(&fragment), kind);
                    let at = if kind == SectionKind::Faq {
                        anchor_point(&report.html)
                    } else {
                        report.html.len()
                    };
                    report.html = insert_at(&report.html, at, &fragment);
                    report.added.push(kind);
                    self.progress.info(page, format!("Added {kind:?} section"));
                }
                SectionKind::References => {
                    let Some(search) = self.search else {
                        report.references_skipped = true;
                        self.progress.warn(
                            page,
                            "No link verification configured, skipping References",
                        );
                        continue;
                    };
                    match build_verified_references(search, title, MAX_REFERENCE_LINKS).await {
                        Some(block) => {
                            let links = block.matches("<li>").count();
                            let at = report.html.len();
                            report.html = insert_at(&report.html, at, &block);
                            report.added.push(kind);
                            self.progress
                                .info(page, format!("Added References with {links} verified links"));
                        }
                        None => {
                            report.references_skipped = true;
                            self.progress
                                .warn(page, "No reachable reference links found, skipping References");
                        }
                    }
                }
            }
        }

        Ok(report)
    }
}

fn ensure_heading(fragment: &str, kind: SectionKind) -> String {
    let has_heading = headings(fragment)
        .iter()
        .any(|h| heading_matches(h, kind));
    if has_heading {
        return fragment.to_string();
    }
    let heading = match kind {
        SectionKind::Faq => "Frequently Asked Questions",
        SectionKind::Conclusion => "Conclusion",
        SectionKind::References => "References",
    };
    format!("<h2>{heading}</h2>\n{fragment}")
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max)
        .collect()
}
