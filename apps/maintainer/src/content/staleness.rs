//! Staleness heuristic — decides whether a page is worth any generation spend.
//!
//! Nothing here calls a provider. Thresholds come from `StalenessConfig`.

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::content::completeness::{missing_sections, SectionKind};
use crate::content::extract::{links, visible_text, word_count};

static SHORTCODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[/?(?:vc_|et_pb_|fusion_|caption|gallery|embed|su_)[^\]]*\]")
        .expect("shortcode pattern")
});
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(20\d{2})\b").expect("year pattern"));

const FLUFF_PHRASES: &[&str] = &[
    "in today's fast-paced world",
    "in today's digital age",
    "it is important to note",
    "it's important to note",
    "look no further",
    "unlock the power",
    "game-changer",
    "delve into",
    "in the ever-evolving",
    "without further ado",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessConfig {
    pub target_year: i32,
    pub superseded_years: Vec<i32>,
    pub min_words: usize,
    pub min_external_links: usize,
    pub min_internal_links: usize,
    pub min_title_len: usize,
}

impl StalenessConfig {
    pub fn for_year(target_year: i32) -> Self {
        Self {
            target_year,
            superseded_years: (1..=3).map(|back| target_year - back).collect(),
            min_words: 1200,
            min_external_links: 2,
            min_internal_links: 3,
            min_title_len: 30,
        }
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self::for_year(Utc::now().year())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
    BrokenShortcodes { count: usize },
    MissingTargetYear { year: i32 },
    SupersededYears { years: Vec<i32> },
    WeakInternalLinks { count: usize },
    MissingSections { sections: Vec<SectionKind> },
    FewExternalLinks { found: usize, required: usize },
    FewInternalLinks { found: usize, required: usize },
    MissingStructuredData,
    ThinContent { words: usize, required: usize },
    WeakTitle { length: usize },
    FluffPhrases { phrases: Vec<String> },
}

impl StaleReason {
    /// Structural problems a targeted patch cannot fix.
    pub fn needs_full_rewrite(&self) -> bool {
        matches!(
            self,
            StaleReason::BrokenShortcodes { .. }
                | StaleReason::ThinContent { .. }
                | StaleReason::MissingStructuredData
        )
    }

    pub fn describe(&self) -> String {
        match self {
            StaleReason::BrokenShortcodes { count } => format!("{count} broken shortcodes"),
            StaleReason::MissingTargetYear { year } => format!("no mention of {year}"),
            StaleReason::SupersededYears { years } => format!("outdated years {years:?}"),
            StaleReason::WeakInternalLinks { count } => {
                format!("{count} single-word internal links")
            }
            StaleReason::MissingSections { sections } => format!("missing sections {sections:?}"),
            StaleReason::FewExternalLinks { found, required } => {
                format!("{found}/{required} external links")
            }
            StaleReason::FewInternalLinks { found, required } => {
                format!("{found}/{required} internal links")
            }
            StaleReason::MissingStructuredData => "no structured data".to_string(),
            StaleReason::ThinContent { words, required } => format!("{words}/{required} words"),
            StaleReason::WeakTitle { length } => format!("weak title ({length} chars)"),
            StaleReason::FluffPhrases { phrases } => format!("fluff phrases {phrases:?}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StalenessReport {
    pub reasons: Vec<StaleReason>,
    pub word_count: usize,
}

impl StalenessReport {
    pub fn needs_update(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// True when only soft issues fired and the body is long enough to patch in place.
    pub fn surgical_candidate(&self, config: &StalenessConfig) -> bool {
        self.needs_update()
            && self.word_count >= config.min_words
            && !self.reasons.iter().any(|r| {
                r.needs_full_rewrite() || matches!(r, StaleReason::MissingSections { .. })
            })
    }

    pub fn summary(&self) -> String {
        self.reasons
            .iter()
            .map(StaleReason::describe)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Inspects a page and lists every reason it needs an update.
///
/// `raw_page` is the full public HTML (structured data usually lives in
/// `<head>`), `body` the extracted main content.
pub fn needs_update(
    raw_page: &str,
    body: &str,
    title: &str,
    site_host: Option<&str>,
    config: &StalenessConfig,
) -> StalenessReport {
    let text = visible_text(body);
    let text_lower = text.to_lowercase();
    let words = word_count(&text);
    let mut reasons = Vec::new();

    let shortcodes = SHORTCODE.find_iter(&text).count();
    if shortcodes > 0 {
        reasons.push(StaleReason::BrokenShortcodes { count: shortcodes });
    }

    let haystack = format!("{title} {text}");
    let years: Vec<i32> = YEAR
        .captures_iter(&haystack)
        .filter_map(|c| c[1].parse::<i32>().ok())
        .collect();
    if !years.contains(&config.target_year) {
        reasons.push(StaleReason::MissingTargetYear {
            year: config.target_year,
        });
    }
    let mut superseded: Vec<i32> = years
        .iter()
        .copied()
        .filter(|y| config.superseded_years.contains(y))
        .collect();
    superseded.sort_unstable();
    superseded.dedup();
    if !superseded.is_empty() {
        reasons.push(StaleReason::SupersededYears { years: superseded });
    }

    let all_links = links(body, site_host);
    let internal: Vec<_> = all_links.iter().filter(|l| l.internal).collect();
    let external = all_links.len() - internal.len();
    let weak_internal = internal
        .iter()
        .filter(|l| l.text.split_whitespace().count() == 1)
        .count();
    if weak_internal > 0 {
        reasons.push(StaleReason::WeakInternalLinks {
            count: weak_internal,
        });
    }

    let missing = missing_sections(body, false);
    if !missing.is_empty() {
        reasons.push(StaleReason::MissingSections { sections: missing });
    }

    if external < config.min_external_links {
        reasons.push(StaleReason::FewExternalLinks {
            found: external,
            required: config.min_external_links,
        });
    }
    if internal.len() < config.min_internal_links {
        reasons.push(StaleReason::FewInternalLinks {
            found: internal.len(),
            required: config.min_internal_links,
        });
    }

    if !raw_page.contains("application/ld+json") {
        reasons.push(StaleReason::MissingStructuredData);
    }

    if words < config.min_words {
        reasons.push(StaleReason::ThinContent {
            words,
            required: config.min_words,
        });
    }

    let title_len = title.trim().chars().count();
    if title_len < config.min_title_len {
        reasons.push(StaleReason::WeakTitle { length: title_len });
    }

    let fluff: Vec<String> = FLUFF_PHRASES
        .iter()
        .filter(|p| text_lower.contains(*p))
        .map(|p| p.to_string())
        .collect();
    if !fluff.is_empty() {
        reasons.push(StaleReason::FluffPhrases { phrases: fluff });
    }

    StalenessReport {
        reasons,
        word_count: words,
    }
}
