use serde::{Deserialize, Serialize};

use crate::models::page::Page;

/// Host-supplied inputs for the maintenance loop. Replaced wholesale by `update_context`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceContext {
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default)]
    pub priority_urls: Vec<String>,
    #[serde(default)]
    pub excluded_prefixes: Vec<String>,
    #[serde(default)]
    pub excluded_categories: Vec<String>,
    #[serde(default)]
    pub priority_only: bool,
    #[serde(default)]
    pub sitemap_url: Option<String>,
}

impl MaintenanceContext {
    /// True when there is neither a catalog nor anything to crawl one from.
    pub fn has_no_source(&self) -> bool {
        self.pages.is_empty()
            && self.priority_urls.is_empty()
            && self
                .sitemap_url
                .as_deref()
                .map(|u| u.trim().is_empty())
                .unwrap_or(true)
    }
}
