use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use opportunity_common::{PipelineError, SearchRequest};

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default, rename = "async")]
    run_async: bool,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/search", post(api_search))
        .route("/api/runs/{id}", get(api_run_status))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Runs the pipeline inline, or with `?async=true` in a tracked task
/// whose status is polled at `/api/runs/{id}`.
pub async fn api_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
    Json(request): Json<SearchRequest>,
) -> Response {
    // Reject bad input before a run id is handed out.
    if let Err(e) = request.validate() {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let run_id = Uuid::new_v4();
    state.registry.queue(run_id);

    if query.run_async {
        let task_state = state.clone();
        tokio::spawn(async move {
            execute(&task_state, run_id, request).await;
        });
        info!(%run_id, "Search run queued");
        return (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "runId": run_id })),
        )
            .into_response();
    }

    match execute(&state, run_id, request).await {
        Ok(response) => Json(response).into_response(),
        Err(PipelineError::Validation(msg)) => error_response(StatusCode::BAD_REQUEST, msg),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn execute(
    state: &AppState,
    run_id: Uuid,
    request: SearchRequest,
) -> Result<opportunity_common::SearchResponse, PipelineError> {
    match state
        .orchestrator
        .run_with(run_id, request, state.registry.as_ref())
        .await
    {
        Ok(outcome) => {
            state
                .registry
                .complete(run_id, outcome.items.len(), outcome.stats.clone());
            Ok(outcome.into_response())
        }
        Err(e) => {
            warn!(%run_id, error = %e, "Search run failed");
            state.registry.fail(run_id, e.to_string());
            Err(e)
        }
    }
}

pub async fn api_run_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.registry.get(id) {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown run {id}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use opportunity_common::PipelineConfig;
    use opportunity_scout::testing::{post, MockEmbedder, MockLanguageModel, MockSearcher};
    use opportunity_scout::{PipelineDeps, PipelineOrchestrator};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::RunRegistry;

    fn app() -> (Router, Arc<AppState>) {
        let items = (0..12).map(|i| post(&format!("r{i}"), 1)).collect();
        let deps = PipelineDeps::new(Arc::new(MockSearcher::new().on_any(vec![items])))
            .with_embedder(Arc::new(MockEmbedder::new(8)))
            .with_gate_llm(Arc::new(MockLanguageModel::new().respond_with("yes")));
        let mut config = PipelineConfig::default();
        config.pipeline.hydrate_results = false;

        let state = Arc::new(AppState {
            orchestrator: Arc::new(PipelineOrchestrator::new(deps, config)),
            registry: Arc::new(RunRegistry::default()),
        });
        (build_router(state.clone()), state)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn search_body(max_posts: u32) -> Value {
        serde_json::json!({
            "audience": "software developers",
            "questions": ["How do they describe slow CI pipelines?"],
            "maxPosts": max_posts,
            "ageDays": 90,
            "minScore": 2,
            "embedProvider": "openai",
            "premium": true,
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sync_search_returns_posts_and_stats() {
        let (app, state) = app();
        let (status, body) = send(&app, Method::POST, "/api/search", Some(search_body(5))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["posts"].as_array().unwrap().len(), 5);
        assert_eq!(body["stats"]["rawFetched"], 12);
        assert!(body["stats"]["tokenCostUSD"].is_number());

        let run_id: Uuid = body["runId"].as_str().unwrap().parse().unwrap();
        assert!(matches!(
            state.registry.get(run_id),
            Some(opportunity_common::RunStatus::Completed { post_count: 5, .. })
        ));
    }

    #[tokio::test]
    async fn invalid_request_is_bad_request() {
        let (app, state) = app();
        let (status, body) = send(&app, Method::POST, "/api/search", Some(search_body(0))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("maxPosts"));
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn async_search_can_be_polled() {
        let (app, _) = app();
        let (status, body) = send(&app, Method::POST, "/api/search?async=true", Some(search_body(3))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = body["runId"].as_str().unwrap().to_string();

        let mut last = Value::Null;
        for _ in 0..200 {
            let (status, body) = send(&app, Method::GET, &format!("/api/runs/{run_id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            last = body;
            if last["status"] == "completed" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(last["status"], "completed");
        assert_eq!(last["postCount"], 3);
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let (app, _) = app();
        let (status, _) = send(&app, Method::GET, &format!("/api/runs/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
