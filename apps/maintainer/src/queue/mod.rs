//! Priority Queue Builder — ordered, deduplicated, filtered work list.
//!
//! Output: explicit priority urls first (input order, sentinel age), then the
//! remaining catalog sorted by descending `age_in_days`. The sort is stable so
//! ties keep catalog order. Pages inside their ledger cooldown are filtered.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ledger::{Ledger, LedgerError};
use crate::models::page::Page;

// ────────────────────────────────────────────────────────────────────────────
// Exclusion rules
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExclusionRules {
    /// Literal prefixes matched against the page url, its path and its id.
    pub prefixes: Vec<String>,
    /// Category slugs matched against the first path segment.
    pub categories: Vec<String>,
}

impl ExclusionRules {
    pub fn new(prefixes: &[String], categories: &[String]) -> Self {
        Self {
            prefixes: clean(prefixes),
            categories: clean(categories)
                .into_iter()
                .map(|c| c.trim_matches('/').to_lowercase())
                .collect(),
        }
    }

    pub fn excludes(&self, page: &Page) -> bool {
        let path = page.url.as_deref().map(path_of);
        let candidates = [page.url.as_deref(), path.as_deref(), page.id.as_deref()];

        let prefix_hit = self.prefixes.iter().any(|prefix| {
            candidates
                .iter()
                .flatten()
                .any(|value| value.starts_with(prefix.as_str()))
        });
        if prefix_hit {
            return true;
        }

        match path.as_deref().and_then(category_of) {
            Some(category) => self.categories.iter().any(|c| *c == category),
            None => false,
        }
    }
}

fn clean(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn path_of(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Category slug of a path: `/category/<slug>/…` or the first segment.
pub fn category_of(path: &str) -> Option<String> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let first = segments.next()?;
    let slug = if first.eq_ignore_ascii_case("category") {
        segments.next()?
    } else {
        first
    };
    Some(slug.to_lowercase())
}

// ────────────────────────────────────────────────────────────────────────────
// Queue building
// ────────────────────────────────────────────────────────────────────────────

/// A page left out of the queue and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedPage {
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueOutcome {
    pub pages: Vec<Page>,
    pub dropped: Vec<DroppedPage>,
    pub locked: usize,
    pub excluded: usize,
}

impl QueueOutcome {
    pub fn head(&self) -> Option<&Page> {
        self.pages.first()
    }
}

/// Builds the ordered work list for one scheduler iteration.
///
/// Exclusion rules apply to the general catalog only; an explicitly listed
/// priority url is always considered.
pub async fn build_queue(
    catalog: &[Page],
    priority_urls: &[String],
    rules: &ExclusionRules,
    priority_only: bool,
    ledger: &Ledger,
    now: DateTime<Utc>,
) -> Result<QueueOutcome, LedgerError> {
    let mut outcome = QueueOutcome::default();
    let mut seen: HashSet<String> = HashSet::new();

    for url in priority_urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
        if !seen.insert(url.to_string()) {
            continue;
        }
        let template = catalog.iter().find(|p| p.url.as_deref() == Some(url));
        let page = Page::priority(url, template);
        if let Some(id) = page.id.as_deref() {
            seen.insert(id.to_string());
        }
        if ledger.is_locked(&page, now).await? {
            debug!(url = %url, "Priority page inside cooldown, skipped");
            outcome.locked += 1;
            continue;
        }
        outcome.pages.push(page);
    }

    if priority_only {
        return Ok(outcome);
    }

    let mut regular = Vec::with_capacity(catalog.len());
    for page in catalog {
        let Some(identity) = page.identity() else {
            warn!(title = %page.title, "Catalog page has neither id nor url, dropped");
            outcome.dropped.push(DroppedPage {
                title: page.title.clone(),
                reason: "missing id and url".to_string(),
            });
            continue;
        };
        let by_url = page.url.as_deref().map(|u| seen.contains(u)).unwrap_or(false);
        if by_url || !seen.insert(identity.to_string()) {
            continue;
        }
        if rules.excludes(page) {
            outcome.excluded += 1;
            continue;
        }
        if ledger.is_locked(page, now).await? {
            outcome.locked += 1;
            continue;
        }
        regular.push(page.clone());
    }

    regular.sort_by(|a, b| b.age_in_days.cmp(&a.age_in_days));
    outcome.pages.extend(regular);

    debug!(
        queued = outcome.pages.len(),
        locked = outcome.locked,
        excluded = outcome.excluded,
        dropped = outcome.dropped.len(),
        "Queue built"
    );
    Ok(outcome)
}
