pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::scheduler::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Scheduler control
        .route("/api/v1/scheduler/status", get(handlers::handle_status))
        .route("/api/v1/scheduler/start", post(handlers::handle_start))
        .route("/api/v1/scheduler/stop", post(handlers::handle_stop))
        .route(
            "/api/v1/scheduler/context",
            put(handlers::handle_update_context),
        )
        .route("/api/v1/scheduler/progress", get(handlers::handle_progress))
        // Bulk operations
        .route("/api/v1/pages/analyze", post(handlers::handle_analyze))
        .route(
            "/api/v1/articles/generate",
            post(handlers::handle_generate_articles),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ledger::store::MemoryStore;
    use crate::publisher::fakes::FakeBackend;
    use crate::scheduler::pipeline::fixtures::{happy_generator, page, pipeline, stale_page_html, PAGE_URL};
    use crate::scheduler::{Scheduler, SchedulerTimings};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(with_generator: bool) -> Router {
        let backend = Arc::new(FakeBackend::default().with_page(PAGE_URL, &stale_page_html()));
        let generator = with_generator.then(happy_generator);
        let scheduler = Scheduler::new(
            Arc::new(pipeline(backend, generator, Arc::new(MemoryStore::new()))),
            SchedulerTimings::default(),
        );
        build_router(AppState {
            scheduler: Arc::new(scheduler),
            config: Config::test_default(),
        })
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(false)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["service"], "maintainer");
    }

    #[tokio::test]
    async fn test_start_without_generator_is_unprocessable() {
        let response = app(false)
            .oneshot(json_request(
                "POST",
                "/api/v1/scheduler/start",
                json!({ "pages": [page()] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body_json(response).await["error"]["code"],
            "UNPROCESSABLE_ENTITY"
        );
    }

    #[tokio::test]
    async fn test_start_then_conflict_then_stop() {
        let app = app(true);
        let start = || json_request("POST", "/api/v1/scheduler/start", json!({ "pages": [page()] }));

        let first = app.clone().oneshot(start()).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(first).await["running"], true);

        let second = app.clone().oneshot(start()).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let stop = app
            .clone()
            .oneshot(Request::post("/api/v1/scheduler/stop").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(stop).await["running"], false);
    }

    #[tokio::test]
    async fn test_context_update_and_progress_feed() {
        let app = app(false);
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/v1/scheduler/context",
                json!({ "priorityUrls": ["https://site.test/x/"], "priorityOnly": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let progress = app
            .oneshot(
                Request::get("/api/v1/scheduler/progress?limit=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let events = body_json(progress).await;
        assert_eq!(events.as_array().map(Vec::len), Some(1));
        assert_eq!(events[0]["message"], "Context updated");
    }

    #[tokio::test]
    async fn test_analyze_reports_reasons() {
        let response = app(false)
            .oneshot(json_request(
                "POST",
                "/api/v1/pages/analyze",
                json!({ "pages": [page()] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["analyses"][0]["needs_update"], true);
        assert_eq!(body["failures"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn test_generate_requires_keywords() {
        let response = app(true)
            .oneshot(json_request(
                "POST",
                "/api/v1/articles/generate",
                json!({ "keywords": ["  "] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
