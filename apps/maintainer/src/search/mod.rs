//! Search and link verification capability.
//!
//! Verified reference blocks are only ever rendered from links that this
//! capability has confirmed reachable; without it, references are skipped.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::net::NetError;

const SERPER_URL: &str = "https://google.serper.dev/search";
/// Only the first KiB is requested when checking reachability.
const VERIFY_RANGE: &str = "bytes=0-1023";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganicResult {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<OrganicResult>, NetError>;
    async fn verify_reachable(&self, url: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

pub struct SerperSearch {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl SerperSearch {
    pub fn new(api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            timeout,
        })
    }

    fn net_error(&self, url: &str, err: reqwest::Error) -> NetError {
        if err.is_timeout() {
            NetError::FetchTimeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            NetError::FetchFailed {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(&self, query: &str) -> Result<Vec<OrganicResult>, NetError> {
        let response = self
            .client
            .post(SERPER_URL)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query, "num": 10 }))
            .send()
            .await
            .map_err(|e| self.net_error(SERPER_URL, e))?;

        if !response.status().is_success() {
            return Err(NetError::FetchFailed {
                url: SERPER_URL.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        let body: SerperResponse = response
            .json()
            .await
            .map_err(|e| self.net_error(SERPER_URL, e))?;
        debug!(query, results = body.organic.len(), "Search finished");
        Ok(body.organic)
    }

    async fn verify_reachable(&self, url: &str) -> bool {
        let result = self
            .client
            .get(url)
            .header(header::RANGE, VERIFY_RANGE)
            .send()
            .await;
        match result {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status == StatusCode::PARTIAL_CONTENT
            }
            Err(e) => {
                debug!(url, error = %e, "Reference link unreachable");
                false
            }
        }
    }
}

/// Searches for `title` and renders a verified reference block from the
/// first `max_links` reachable results. Returns `None` when nothing verified.
pub async fn build_verified_references(
    search: &dyn SearchProvider,
    title: &str,
    max_links: usize,
) -> Option<String> {
    let results = match search.search(title).await {
        Ok(results) => results,
        Err(e) => {
            warn!(title, error = %e, "Reference search failed");
            return None;
        }
    };

    let mut verified = Vec::new();
    for result in results {
        if verified.len() >= max_links {
            break;
        }
        if !result.link.starts_with("http") {
            continue;
        }
        if search.verify_reachable(&result.link).await {
            verified.push(result);
        }
    }
    if verified.is_empty() {
        return None;
    }
    Some(render_references(&verified))
}

fn render_references(results: &[OrganicResult]) -> String {
    let items: String = results
        .iter()
        .map(|r| {
            format!(
                "<li><a href=\"{}\" target=\"_blank\" rel=\"nofollow noopener\">{}</a></li>",
                escape_attr(&r.link),
                escape_text(&r.title)
            )
        })
        .collect();
    format!(
        "<section class=\"verified-references\" data-verified=\"true\"><h2>References</h2><ul>{items}</ul></section>"
    )
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

#[cfg(test)]
pub mod fakes {
    use super::*;

    /// Search fake: fixed results, reachability decided by a url allow-list.
    pub struct FakeSearch {
        pub results: Vec<OrganicResult>,
        pub reachable: Vec<String>,
    }

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn search(&self, _query: &str) -> Result<Vec<OrganicResult>, NetError> {
            Ok(self.results.clone())
        }

        async fn verify_reachable(&self, url: &str) -> bool {
            self.reachable.iter().any(|u| u == url)
        }
    }

    pub fn result(title: &str, link: &str) -> OrganicResult {
        OrganicResult {
            title: title.to_string(),
            link: link.to_string(),
            snippet: String::new(),
        }
    }
}
