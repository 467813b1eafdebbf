//! Scheduler Loop — the single maintenance worker.
//!
//! One page at a time. `stop()` only flips a flag; the loop observes it
//! between iterations (a pending pause is cut short, in-flight page work is
//! never interrupted). Until the loop has actually exited, `start()` keeps
//! answering `AlreadyRunning`, so a stop/start pair can never leave two loops
//! working. Every iteration runs in its own task so a panic is contained and
//! treated like any other unexpected error.

pub mod handlers;
pub mod pipeline;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::catalog::crawl_sitemap;
use crate::ledger::LedgerError;
use crate::models::context::MaintenanceContext;
use crate::models::page::Page;
use crate::net::NetError;
use crate::queue::{build_queue, ExclusionRules};
use pipeline::{PageOutcome, PagePipeline};

/// Pauses between iterations.
#[derive(Debug, Clone)]
pub struct SchedulerTimings {
    /// Queue was empty.
    pub idle: Duration,
    pub success: Duration,
    pub page_failure: Duration,
    /// Anything that escaped the page boundary (ledger, crawl, panic).
    pub unexpected: Duration,
    /// How long a crawled sitemap catalog is reused.
    pub catalog_ttl: chrono::Duration,
}

impl Default for SchedulerTimings {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(60),
            success: Duration::from_secs(15),
            page_failure: Duration::from_secs(5),
            unexpected: Duration::from_secs(10),
            catalog_ttl: chrono::Duration::hours(6),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum StartError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("No generation capability configured")]
    NoGenerator,

    #[error("Catalog is empty and no sitemap is configured")]
    EmptyCatalog,
}

#[derive(Debug, Error)]
enum IterationError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Sitemap crawl failed: {0}")]
    Catalog(#[from] NetError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub iterations: u64,
    pub processed: u64,
    pub published: u64,
    pub skipped: u64,
    pub failed: u64,
    pub current_page: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    #[serde(flatten)]
    pub stats: SchedulerStats,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pause {
    Idle,
    Success,
    PageFailure,
    Unexpected,
}

struct CrawledCatalog {
    sitemap_url: String,
    pages: Vec<Page>,
    fetched_at: DateTime<Utc>,
}

pub struct Scheduler {
    pipeline: Arc<PagePipeline>,
    timings: SchedulerTimings,
    context: RwLock<MaintenanceContext>,
    crawled: RwLock<Option<CrawledCatalog>>,
    /// Stop not requested.
    running: AtomicBool,
    /// A loop task exists (possibly draining its last page).
    active: AtomicBool,
    /// Bumped on every start; a loop only runs while it owns the latest one.
    generation: AtomicU64,
    wake: Notify,
    stats: Mutex<SchedulerStats>,
}

/// Clears `active` when the loop exits, however it exits.
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Scheduler {
    pub fn new(pipeline: Arc<PagePipeline>, timings: SchedulerTimings) -> Self {
        Self {
            pipeline,
            timings,
            context: RwLock::new(MaintenanceContext::default()),
            crawled: RwLock::new(None),
            running: AtomicBool::new(false),
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            wake: Notify::new(),
            stats: Mutex::new(SchedulerStats::default()),
        }
    }

    pub fn pipeline(&self) -> &Arc<PagePipeline> {
        &self.pipeline
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True while a loop task is alive, including after `stop()` until the
    /// in-flight page finishes.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Validates prerequisites and spawns the loop.
    pub async fn start(
        self: &Arc<Self>,
        context: MaintenanceContext,
    ) -> Result<JoinHandle<()>, StartError> {
        if self.is_running() || self.is_active() {
            return Err(StartError::AlreadyRunning);
        }
        if !self.pipeline.has_generator() {
            self.pipeline
                .progress()
                .error(None, "Cannot start: no generation capability configured");
            return Err(StartError::NoGenerator);
        }
        if context.has_no_source() {
            self.pipeline
                .progress()
                .error(None, "Cannot start: no pages, priority urls or sitemap");
            return Err(StartError::EmptyCatalog);
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StartError::AlreadyRunning);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.running.store(true, Ordering::SeqCst);

        *self.context.write().await = context;
        self.pipeline.progress().info(None, "Scheduler started");
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.run_loop(generation).await }))
    }

    /// Returns whether the scheduler was running.
    pub fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if was_running {
            self.pipeline
                .progress()
                .info(None, "Stop requested; finishing current page");
            self.wake.notify_waiters();
        }
        was_running
    }

    /// Replaces the context; picked up by the next iteration.
    pub async fn update_context(&self, context: MaintenanceContext) {
        *self.context.write().await = context;
        self.pipeline.progress().info(None, "Context updated");
    }

    pub async fn context(&self) -> MaintenanceContext {
        self.context.read().await.clone()
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            stats: self.lock_stats().clone(),
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, SchedulerStats> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn owns(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run_loop(self: Arc<Self>, generation: u64) {
        let _active = ActiveGuard(&self.active);
        info!(generation, "Scheduler loop started");
        while self.owns(generation) {
            let this = Arc::clone(&self);
            let pause = match tokio::spawn(async move { this.run_iteration().await }).await {
                Ok(Ok(pause)) => pause,
                Ok(Err(e)) => {
                    self.record_unexpected(e.to_string());
                    Pause::Unexpected
                }
                Err(join_error) => {
                    self.record_unexpected(format!("iteration aborted: {join_error}"));
                    Pause::Unexpected
                }
            };
            self.lock_stats().iterations += 1;

            // Registered before the flag check so a concurrent stop() is not missed.
            let woken = self.wake.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();
            if !self.owns(generation) {
                break;
            }
            let duration = self.pause_for(pause);
            debug!(?pause, secs = duration.as_secs(), "Pausing");
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = woken => {}
            }
        }
        self.lock_stats().current_page = None;
        self.pipeline.progress().info(None, "Scheduler stopped");
        info!(generation, "Scheduler loop stopped");
    }

    fn pause_for(&self, pause: Pause) -> Duration {
        match pause {
            Pause::Idle => self.timings.idle,
            Pause::Success => self.timings.success,
            Pause::PageFailure => self.timings.page_failure,
            Pause::Unexpected => self.timings.unexpected,
        }
    }

    fn record_unexpected(&self, message: String) {
        error!(error = %message, "Scheduler iteration failed");
        self.pipeline
            .progress()
            .error(None, format!("Unexpected error: {message}"));
        self.lock_stats().last_error = Some(message);
    }

    /// Builds the queue and processes its head.
    async fn run_iteration(&self) -> Result<Pause, IterationError> {
        let context = self.context().await;
        let now = Utc::now();
        let catalog = self.catalog(&context, now).await?;

        let rules = ExclusionRules::new(&context.excluded_prefixes, &context.excluded_categories);
        let queue = build_queue(
            &catalog,
            &context.priority_urls,
            &rules,
            context.priority_only,
            self.pipeline.ledger(),
            now,
        )
        .await?;
        for dropped in &queue.dropped {
            self.pipeline.progress().warn(
                None,
                format!("Dropped \"{}\": {}", dropped.title, dropped.reason),
            );
        }

        let Some(page) = queue.head().cloned() else {
            self.pipeline
                .progress()
                .info(None, "No pages need processing, waiting");
            return Ok(Pause::Idle);
        };

        let label = page.identity().unwrap_or("-").to_string();
        self.lock_stats().current_page = Some(label.clone());
        self.pipeline.progress().info(
            Some(&label),
            format!("Processing ({} in queue)", queue.pages.len()),
        );

        let result = self.pipeline.process_page(&page, now).await;

        let mut stats = self.lock_stats();
        stats.current_page = None;
        stats.processed += 1;
        Ok(match result {
            Ok(PageOutcome::Published { .. }) => {
                stats.published += 1;
                Pause::Success
            }
            Ok(_) => {
                stats.skipped += 1;
                Pause::PageFailure
            }
            Err(e) => {
                stats.failed += 1;
                stats.last_error = Some(format!("{label}: {e}"));
                Pause::PageFailure
            }
        })
    }

    /// Context pages, or the sitemap crawl (cached for `catalog_ttl`).
    async fn catalog(
        &self,
        context: &MaintenanceContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<Page>, NetError> {
        if !context.pages.is_empty() {
            return Ok(context.pages.clone());
        }
        let Some(sitemap_url) = context
            .sitemap_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Ok(Vec::new());
        };

        if let Some(cached) = self.crawled.read().await.as_ref() {
            if cached.sitemap_url == sitemap_url && now - cached.fetched_at < self.timings.catalog_ttl {
                return Ok(cached.pages.clone());
            }
        }

        let backend = self.pipeline.publisher().backend();
        let pages = crawl_sitemap(backend.as_ref(), sitemap_url, now).await?;
        self.pipeline.progress().info(
            None,
            format!("Crawled {} pages from {sitemap_url}", pages.len()),
        );
        *self.crawled.write().await = Some(CrawledCatalog {
            sitemap_url: sitemap_url.to_string(),
            pages: pages.clone(),
            fetched_at: now,
        });
        Ok(pages)
    }
}
