use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::batch::run_bounded;
use crate::errors::AppError;
use crate::models::context::MaintenanceContext;
use crate::models::page::Page;
use crate::progress::ProgressEvent;
use crate::scheduler::pipeline::{PageAnalysis, PipelineError};
use crate::scheduler::SchedulerStatus;
use crate::state::AppState;

const DEFAULT_PROGRESS_LIMIT: usize = 50;
const MAX_BATCH_ITEMS: usize = 200;

/// GET /api/v1/scheduler/status
pub async fn handle_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

/// POST /api/v1/scheduler/start
pub async fn handle_start(
    State(state): State<AppState>,
    Json(context): Json<MaintenanceContext>,
) -> Result<(StatusCode, Json<SchedulerStatus>), AppError> {
    // The loop is detached; stop() is the only way to end it.
    let _handle = state.scheduler.start(context).await?;
    Ok((StatusCode::ACCEPTED, Json(state.scheduler.status())))
}

/// POST /api/v1/scheduler/stop
pub async fn handle_stop(State(state): State<AppState>) -> Json<SchedulerStatus> {
    state.scheduler.stop();
    Json(state.scheduler.status())
}

/// PUT /api/v1/scheduler/context
pub async fn handle_update_context(
    State(state): State<AppState>,
    Json(context): Json<MaintenanceContext>,
) -> StatusCode {
    state.scheduler.update_context(context).await;
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct ProgressQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/scheduler/progress
pub async fn handle_progress(
    State(state): State<AppState>,
    Query(params): Query<ProgressQuery>,
) -> Json<Vec<ProgressEvent>> {
    Json(state.progress().recent(params.limit.unwrap_or(DEFAULT_PROGRESS_LIMIT)))
}

// ────────────────────────────────────────────────────────────────────────────
// Bulk operations
// ────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    /// Pages to analyze; defaults to the scheduler's current catalog.
    #[serde(default)]
    pub pages: Vec<Page>,
    pub workers: Option<usize>,
}

#[derive(Serialize)]
pub struct BatchFailure {
    pub item: String,
    pub error: String,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub analyses: Vec<PageAnalysis>,
    pub failures: Vec<BatchFailure>,
}

/// POST /api/v1/pages/analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let pages = if req.pages.is_empty() {
        state.scheduler.context().await.pages
    } else {
        req.pages
    };
    if pages.is_empty() {
        return Err(AppError::Validation("No pages to analyze".to_string()));
    }
    if pages.len() > MAX_BATCH_ITEMS {
        return Err(AppError::Validation(format!(
            "At most {MAX_BATCH_ITEMS} pages per request"
        )));
    }

    let pipeline = Arc::clone(state.pipeline());
    let progress = Arc::clone(state.progress());
    let workers = req.workers.unwrap_or(state.config.batch_workers);
    let results = run_bounded(
        pages,
        workers,
        |page| {
            let pipeline = Arc::clone(&pipeline);
            async move {
                let label = page.identity().unwrap_or("-").to_string();
                pipeline.analyze_page(&page).await.map_err(|e| (label, e))
            }
        },
        |done, total| progress.info(None, format!("Analyzed {done}/{total} pages")),
    )
    .await;

    let mut response = AnalyzeResponse {
        analyses: Vec::new(),
        failures: Vec::new(),
    };
    for result in results {
        match result {
            Ok(analysis) => response.analyses.push(analysis),
            Err((item, e)) => response.failures.push(BatchFailure {
                item,
                error: e.to_string(),
            }),
        }
    }
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub keywords: Vec<String>,
    pub workers: Option<usize>,
}

#[derive(Serialize)]
pub struct GeneratedArticle {
    pub keyword: String,
    pub post_id: u64,
    pub link: String,
    pub created: bool,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub articles: Vec<GeneratedArticle>,
    pub failures: Vec<BatchFailure>,
}

/// POST /api/v1/articles/generate
pub async fn handle_generate_articles(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    if !state.pipeline().has_generator() {
        return Err(AppError::Pipeline(PipelineError::NoGenerator));
    }
    let keywords: Vec<String> = req
        .keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return Err(AppError::Validation("At least one keyword is required".to_string()));
    }
    if keywords.len() > MAX_BATCH_ITEMS {
        return Err(AppError::Validation(format!(
            "At most {MAX_BATCH_ITEMS} keywords per request"
        )));
    }

    let pipeline = Arc::clone(state.pipeline());
    let progress = Arc::clone(state.progress());
    let workers = req.workers.unwrap_or(state.config.batch_workers);
    let results = run_bounded(
        keywords,
        workers,
        |keyword| {
            let pipeline = Arc::clone(&pipeline);
            async move {
                match pipeline.create_article(&keyword).await {
                    Ok(outcome) => Ok(GeneratedArticle {
                        keyword,
                        post_id: outcome.post_id,
                        link: outcome.link,
                        created: outcome.created,
                    }),
                    Err(e) => Err(BatchFailure {
                        item: keyword,
                        error: e.to_string(),
                    }),
                }
            }
        },
        |done, total| progress.info(None, format!("Generated {done}/{total} articles")),
    )
    .await;

    let (articles, failures): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    Ok(Json(GenerateResponse {
        articles: articles.into_iter().filter_map(Result::ok).collect(),
        failures: failures.into_iter().filter_map(Result::err).collect(),
    }))
}
