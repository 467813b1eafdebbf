use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Age assigned to priority pages so they always sort ahead of the catalog.
pub const PRIORITY_AGE_SENTINEL: i64 = i64::MAX;

/// A published page as read from the catalog for one scheduler cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub age_in_days: i64,
    #[serde(default)]
    pub is_priority: bool,
}

impl Page {
    /// Identity used for ledger keys and dedup. Falls back to the url when no id is set.
    pub fn identity(&self) -> Option<&str> {
        non_empty(self.id.as_deref()).or_else(|| non_empty(self.url.as_deref()))
    }

    /// Wraps a priority url as a page that sorts ahead of every catalog entry.
    pub fn priority(url: &str, template: Option<&Page>) -> Self {
        let mut page = template.cloned().unwrap_or_else(|| Page {
            id: Some(url.to_string()),
            url: Some(url.to_string()),
            title: String::new(),
            slug: slug_from_url(url).unwrap_or_default(),
            last_modified: None,
            age_in_days: 0,
            is_priority: false,
        });
        if page.url.is_none() {
            page.url = Some(url.to_string());
        }
        page.age_in_days = PRIORITY_AGE_SENTINEL;
        page.is_priority = true;
        page
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Last non-empty path segment of a url, used as a slug guess.
pub fn slug_from_url(raw: &str) -> Option<String> {
    let path = match url::Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => raw.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .last()
        .map(|segment| segment.to_lowercase())
}
