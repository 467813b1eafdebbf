use anyhow::{Context, Result};
use chrono::{Datelike, Utc};

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing.
#[derive(Debug, Clone)]
pub struct Config {
    /// REST root, e.g. `https://site/wp-json/wp/v2`.
    pub wp_base_url: String,
    pub wp_username: String,
    pub wp_app_password: String,
    pub redis_url: String,
    /// No key → no generation capability; the scheduler refuses to start.
    pub anthropic_api_key: Option<String>,
    /// No key → references are skipped rather than fabricated.
    pub search_api_key: Option<String>,
    pub proxy_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub http_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    pub target_year: i32,
    /// Concurrency for bulk analysis/article runs.
    pub batch_workers: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            wp_base_url: require_env("WP_BASE_URL")?,
            wp_username: require_env("WP_USERNAME")?,
            wp_app_password: require_env("WP_APP_PASSWORD")?,
            redis_url: require_env("REDIS_URL")?,
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            search_api_key: optional_env("SEARCH_API_KEY"),
            proxy_url: optional_env("PROXY_URL"),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS", 30)?,
            llm_timeout_secs: parse_env("LLM_TIMEOUT_SECS", 180)?,
            target_year: parse_env("TARGET_YEAR", Utc::now().year())?,
            batch_workers: parse_env("BATCH_WORKERS", 4)?,
        })
    }

    /// Scheme + host of the REST root, used to resolve relative page ids.
    pub fn site_url(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.wp_base_url).ok()?;
        let origin = parsed.origin();
        origin.is_tuple().then(|| origin.ascii_serialization())
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    pub(crate) fn test_default() -> Self {
        Config {
            wp_base_url: "https://site.test/wp-json/wp/v2".to_string(),
            wp_username: "editor".to_string(),
            wp_app_password: "secret".to_string(),
            redis_url: "redis://127.0.0.1/".to_string(),
            anthropic_api_key: None,
            search_api_key: None,
            proxy_url: None,
            port: 8080,
            rust_log: "info".to_string(),
            http_timeout_secs: 30,
            llm_timeout_secs: 180,
            target_year: 2025,
            batch_workers: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_url_is_origin_of_rest_root() {
        assert_eq!(Config::test_default().site_url().as_deref(), Some("https://site.test"));
    }

    #[test]
    fn test_site_url_rejects_garbage() {
        let cfg = Config {
            wp_base_url: "not a url".to_string(),
            ..Config::test_default()
        };
        assert_eq!(cfg.site_url(), None);
    }
}
