//! Per-page pipeline: fetch → staleness gate → lock → protect → generate →
//! complete → critic → sanitize → restore → publish → commit.
//!
//! Ledger rules:
//! - short or unreachable content writes nothing (retried next cycle)
//! - an up-to-date page is marked processed without any generation call
//! - the lock is written before the first generation call
//! - zero net change releases the lock
//! - any failure after locking records a failure and its backoff window

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::content::completeness::CompletenessValidator;
use crate::content::critic::run_critic_loop;
use crate::content::extract::{document_title, host_of, main_content, visible_text};
use crate::content::protection::{canonicalize, protect, restore, ProtectionError};
use crate::content::sanitize::sanitize;
use crate::content::staleness::{needs_update, StaleReason, StalenessConfig};
use crate::ledger::{Ledger, LedgerError};
use crate::llm_client::prompts::PromptKey;
use crate::llm_client::{generate_json, GenerationError, Generator};
use crate::models::content::{ContentItem, GeneratedContent, SurgicalSnippet};
use crate::models::page::{slug_from_url, Page};
use crate::net::NetError;
use crate::progress::ProgressFeed;
use crate::publisher::{PublishError, PublishOutcome, Publisher};
use crate::search::SearchProvider;

/// Main-content bodies shorter than this are treated as a failed fetch.
const MIN_CONTENT_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No generation capability configured")]
    NoGenerator,

    #[error("Page has no fetchable url")]
    NoUrl,

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Protection(#[from] ProtectionError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageOutcome {
    /// Inside its cooldown window; nothing was done.
    Locked,
    /// Fetched body too short; ledger untouched.
    ShortContent { chars: usize },
    /// No staleness signal; marked processed.
    UpToDate,
    /// Regenerated but identical after restoration; lock released.
    NoChanges,
    Published {
        post_id: u64,
        created: bool,
        full_rewrite: bool,
        critic_score: Option<u8>,
    },
}

/// Per-page staleness verdict for bulk analysis.
#[derive(Debug, Clone, Serialize)]
pub struct PageAnalysis {
    pub page: String,
    pub needs_update: bool,
    pub surgical: bool,
    pub word_count: usize,
    pub reasons: Vec<StaleReason>,
}

/// Article JSON returned by the refresh/new prompts.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArticleDraft {
    #[serde(default)]
    title: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    meta_description: String,
    html_body: String,
    #[serde(default)]
    schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SurgicalPlan {
    #[serde(default)]
    snippets: Vec<SurgicalSnippet>,
}

pub struct PagePipeline {
    ledger: Ledger,
    publisher: Publisher,
    generator: Option<Arc<dyn Generator>>,
    search: Option<Arc<dyn SearchProvider>>,
    progress: Arc<ProgressFeed>,
    staleness: StalenessConfig,
    /// Origin used to resolve relative page ids, e.g. `https://site`.
    site_url: Option<String>,
}

impl PagePipeline {
    pub fn new(
        ledger: Ledger,
        publisher: Publisher,
        generator: Option<Arc<dyn Generator>>,
        search: Option<Arc<dyn SearchProvider>>,
        progress: Arc<ProgressFeed>,
        staleness: StalenessConfig,
        site_url: Option<String>,
    ) -> Self {
        Self {
            ledger,
            publisher,
            generator,
            search,
            progress,
            staleness,
            site_url: site_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn progress(&self) -> &Arc<ProgressFeed> {
        &self.progress
    }

    fn generator(&self) -> Result<&dyn Generator, PipelineError> {
        self.generator.as_deref().ok_or(PipelineError::NoGenerator)
    }

    /// Absolute url for a page: its url, else an absolute id, else the id
    /// joined onto the site origin.
    pub fn page_url(&self, page: &Page) -> Option<String> {
        if let Some(url) = page.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Some(url.trim().to_string());
        }
        let id = page.id.as_deref()?.trim();
        if id.starts_with("http://") || id.starts_with("https://") {
            return Some(id.to_string());
        }
        match (&self.site_url, id.starts_with('/')) {
            (Some(site), true) => Some(format!("{site}{id}")),
            _ => None,
        }
    }

    pub async fn process_page(
        &self,
        page: &Page,
        now: DateTime<Utc>,
    ) -> Result<PageOutcome, PipelineError> {
        let label = page.identity().unwrap_or("-").to_string();
        let progress = Some(label.as_str());

        if self.ledger.is_locked(page, now).await? {
            debug!(page = %label, "Inside cooldown, skipped");
            return Ok(PageOutcome::Locked);
        }

        let url = self.page_url(page).ok_or(PipelineError::NoUrl)?;
        let raw = self.publisher.backend().fetch_text(&url).await?;
        let body = main_content(&raw);
        if body.len() < MIN_CONTENT_CHARS {
            self.progress.warn(
                progress,
                format!("Fetched content too short ({} chars), will retry", body.len()),
            );
            return Ok(PageOutcome::ShortContent { chars: body.len() });
        }

        let title = page_title(page, &raw);
        let report = needs_update(&raw, &body, &title, host_of(&url).as_deref(), &self.staleness);
        if !report.needs_update() {
            self.ledger.record_success(page, now).await?;
            self.progress.info(progress, "Up to date, no changes needed");
            return Ok(PageOutcome::UpToDate);
        }

        let generator = self.generator()?;
        self.ledger.lock(page, now).await?;
        self.progress
            .info(progress, format!("Updating: {}", report.summary()));

        let surgical = report.surgical_candidate(&self.staleness);
        let result = self
            .regenerate(generator, page, &url, &raw, &body, &title, &report.summary(), surgical)
            .await;

        match result {
            Ok(Some(published)) => {
                self.ledger.record_success(page, Utc::now()).await?;
                Ok(PageOutcome::Published {
                    post_id: published.0.post_id,
                    created: published.0.created,
                    full_rewrite: !surgical,
                    critic_score: published.1,
                })
            }
            Ok(None) => {
                self.ledger.release(page).await?;
                self.progress
                    .info(progress, "No net changes, lock released for retry");
                Ok(PageOutcome::NoChanges)
            }
            Err(e) => {
                self.progress.error(progress, format!("Update failed: {e}"));
                let backoff = self.ledger.record_failure(page, Utc::now()).await?;
                self.progress.warn(
                    progress,
                    format!(
                        "Failure #{}; retry in {} minutes",
                        backoff.fail_count,
                        backoff.retry_after.num_minutes()
                    ),
                );
                Err(e)
            }
        }
    }

    /// `Ok(None)` when the result equals the current body.
    #[allow(clippy::too_many_arguments)]
    async fn regenerate(
        &self,
        generator: &dyn Generator,
        page: &Page,
        url: &str,
        raw: &str,
        body: &str,
        title: &str,
        reasons: &str,
        surgical: bool,
    ) -> Result<Option<(PublishOutcome, Option<u8>)>, PipelineError> {
        let label = page.identity().unwrap_or(url);
        let year = self.staleness.target_year.to_string();
        let protected = protect(body);
        debug!(page = %label, protected = protected.map.len(), "Body protected");

        let mut generated = if surgical {
            let plan: SurgicalPlan = generate_json(
                generator,
                PromptKey::SurgicalPatch,
                &[reasons.to_string(), year.clone(), protected.html.clone()],
            )
            .await?;
            let (html, applied) = self.apply_snippets(&protected.html, plan.snippets, label);
            GeneratedContent {
                title: title.to_string(),
                slug: page_slug(page, url),
                meta_description: String::new(),
                html_body: html,
                structured_data_schema: None,
                is_full_rewrite: false,
                surgical_snippets: Some(applied),
            }
        } else {
            let draft: ArticleDraft = generate_json(
                generator,
                PromptKey::RefreshArticle,
                &[year.clone(), title.to_string(), protected.html.clone()],
            )
            .await?;
            into_generated(draft, title, &page_slug(page, url))
        };

        let validator = CompletenessValidator {
            generator,
            search: self.search.as_deref(),
            progress: &self.progress,
        };
        let completed = validator
            .ensure_complete(
                &generated.html_body,
                &generated.title,
                protected.map.has_verified_references(),
                Some(label),
            )
            .await?;

        let critic = run_critic_loop(generator, &completed.html).await;
        if let Some(score) = critic.score {
            self.progress
                .info(Some(label), format!("Critic score {score}/100"));
        }

        let restored = restore(&sanitize(&critic.html), &protected.map)?;
        if same_content(&restored, body) {
            return Ok(None);
        }
        generated.html_body = restored;

        let mut item = ContentItem::refresh(label, Some(url.to_string()), raw.to_string());
        item.generated = Some(generated);
        let outcome = self.publisher.publish(&item).await?;
        Ok(Some((outcome, critic.score)))
    }

    /// Applies each snippet once; a snippet whose `find` is absent is skipped.
    fn apply_snippets(
        &self,
        html: &str,
        snippets: Vec<SurgicalSnippet>,
        label: &str,
    ) -> (String, Vec<SurgicalSnippet>) {
        let mut out = html.to_string();
        let mut applied = Vec::new();
        for snippet in snippets {
            if snippet.find.is_empty() || !out.contains(&snippet.find) {
                self.progress.warn(
                    Some(label),
                    format!("Snippet not found, skipped: {}", preview(&snippet.find)),
                );
                continue;
            }
            out = out.replacen(&snippet.find, &snippet.replace, 1);
            applied.push(snippet);
        }
        self.progress
            .info(Some(label), format!("Applied {} surgical edits", applied.len()));
        (out, applied)
    }

    /// Generates, completes, grades and publishes a brand-new article.
    pub async fn create_article(&self, keyword: &str) -> Result<PublishOutcome, PipelineError> {
        let generator = self.generator()?;
        let year = self.staleness.target_year.to_string();
        let draft: ArticleDraft = generate_json(
            generator,
            PromptKey::NewArticle,
            &[keyword.to_string(), year],
        )
        .await?;
        let mut generated = into_generated(draft, keyword, &slugify(keyword));

        let validator = CompletenessValidator {
            generator,
            search: self.search.as_deref(),
            progress: &self.progress,
        };
        let completed = validator
            .ensure_complete(&generated.html_body, &generated.title, false, Some(keyword))
            .await?;
        let critic = run_critic_loop(generator, &completed.html).await;
        generated.html_body = sanitize(&critic.html);

        let mut item = ContentItem::new_article();
        item.generated = Some(generated);
        let outcome = self.publisher.publish(&item).await?;
        info!(keyword, post_id = outcome.post_id, "Article published");
        Ok(outcome)
    }

    /// Staleness verdict only; no ledger writes, no generation.
    pub async fn analyze_page(&self, page: &Page) -> Result<PageAnalysis, PipelineError> {
        let url = self.page_url(page).ok_or(PipelineError::NoUrl)?;
        let raw = self.publisher.backend().fetch_text(&url).await?;
        let body = main_content(&raw);
        let title = page_title(page, &raw);
        let report = needs_update(&raw, &body, &title, host_of(&url).as_deref(), &self.staleness);
        Ok(PageAnalysis {
            page: page.identity().unwrap_or(&url).to_string(),
            needs_update: report.needs_update(),
            surgical: report.surgical_candidate(&self.staleness),
            word_count: report.word_count,
            reasons: report.reasons,
        })
    }
}

fn page_title(page: &Page, raw: &str) -> String {
    if !page.title.trim().is_empty() {
        return page.title.trim().to_string();
    }
    document_title(raw)
        .map(|t| t.split(" | ").next().unwrap_or(&t).trim().to_string())
        .unwrap_or_else(|| page.slug.replace('-', " "))
}

fn page_slug(page: &Page, url: &str) -> String {
    if !page.slug.trim().is_empty() {
        return page.slug.trim().to_string();
    }
    slug_from_url(url).unwrap_or_default()
}

fn into_generated(draft: ArticleDraft, fallback_title: &str, fallback_slug: &str) -> GeneratedContent {
    GeneratedContent {
        title: if draft.title.trim().is_empty() {
            fallback_title.to_string()
        } else {
            draft.title.trim().to_string()
        },
        slug: if draft.slug.trim().is_empty() {
            fallback_slug.to_string()
        } else {
            slugify(&draft.slug)
        },
        meta_description: draft.meta_description,
        html_body: draft.html_body,
        structured_data_schema: draft.schema.filter(|s| !s.is_null()),
        is_full_rewrite: true,
        surgical_snippets: None,
    }
}

/// Lowercase ascii words joined with single dashes.
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Equal after parse/serialize, ignoring whitespace-only differences.
fn same_content(a: &str, b: &str) -> bool {
    let squash = |html: &str| canonicalize(html).split_whitespace().collect::<Vec<_>>().join(" ");
    squash(a) == squash(b)
}

fn preview(text: &str) -> String {
    let flat = visible_text(text);
    let flat = if flat.trim().is_empty() { text.to_string() } else { flat };
    flat.chars().take(60).collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::ledger::store::MemoryStore;
    use crate::ledger::LedgerPolicy;
    use crate::llm_client::fakes::ScriptedGenerator;
    use crate::publisher::fakes::FakeBackend;

    pub const PAGE_URL: &str = "https://site.test/guides/best-tents/";

    /// Thin, dated page with an image; already has FAQ and Conclusion.
    pub fn stale_page_html() -> String {
        let filler = "Tents keep you dry and warm on long trips outdoors. ".repeat(20);
        format!(
            r#"<html><head><title>Best Tents 2022 | Site</title></head>
            <body class="single postid-42"><article class="entry-content">
            <p>{filler}</p><img src="/uploads/tent.jpg"><p>Updated for 2022.</p>
            <h2>FAQ</h2><p>Q and A.</p><h2>Conclusion</h2><p>Pick one.</p>
            </article></body></html>"#
        )
    }

    pub const REFRESHED_JSON: &str = r#"{"title": "Best Tents for 2025 Camping Trips Reviewed",
        "slug": "best-tents", "metaDescription": "Our 2025 picks.",
        "htmlBody": "<p>Fresh 2025 picks.</p>%%PROTECTED_0%%<h2>FAQ</h2><p>Q and A.</p><h2>Conclusion</h2><p>Pick one.</p>",
        "schema": {"@type": "Article"}}"#;

    pub fn page() -> Page {
        Page {
            id: Some("/guides/best-tents/".to_string()),
            url: Some(PAGE_URL.to_string()),
            title: "Best Tents 2022".to_string(),
            slug: "best-tents".to_string(),
            last_modified: None,
            age_in_days: 400,
            is_priority: false,
        }
    }

    pub fn happy_generator() -> Arc<ScriptedGenerator> {
        Arc::new(
            ScriptedGenerator::default()
                .reply(PromptKey::RefreshArticle, REFRESHED_JSON)
                .reply(PromptKey::CriticGrade, r#"{"score": 95, "issues": []}"#),
        )
    }

    pub fn pipeline(
        backend: Arc<FakeBackend>,
        generator: Option<Arc<ScriptedGenerator>>,
        store: Arc<MemoryStore>,
    ) -> PagePipeline {
        pipeline_with(backend, generator.map(|g| g as Arc<dyn Generator>), store)
    }

    pub fn pipeline_with(
        backend: Arc<FakeBackend>,
        generator: Option<Arc<dyn Generator>>,
        store: Arc<MemoryStore>,
    ) -> PagePipeline {
        let progress = Arc::new(ProgressFeed::new());
        PagePipeline::new(
            Ledger::new(store, LedgerPolicy::default()),
            Publisher::new(backend, progress.clone()),
            generator,
            None,
            progress,
            StalenessConfig::for_year(2025),
            Some("https://site.test".to_string()),
        )
    }
}
