//! HTTP application
//!
//! Routes:
//! - `GET /healthcheck`
//! - `GET /version`
//! - `GET /pipeline-spec`
//! - `POST /invoke`
//! - `GET /metrics`

use crate::error::ApiError;
use crate::version::VersionInfo;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use textgen_common::{PipelineSpecFile, METRICS};
use textgen_pipeline::InvokeScheduler;
use tower_http::trace::TraceLayer;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

/// Shared state of every route
#[derive(Clone)]
pub struct AppState {
    /// Name reported by `/version`, captured at startup
    pub app_name: String,

    /// Pipeline definition the pipeline was built from
    pub spec: Arc<PipelineSpecFile>,

    /// Admission control in front of the pipeline
    pub scheduler: Arc<InvokeScheduler>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthcheckResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub response: String,
}

/// Build the application router
///
/// With a `root_path` the routes answer both at `/` and under the prefix.
pub fn create_app(state: AppState, root_path: Option<&str>) -> Router {
    let mut app = routes();
    if let Some(prefix) = root_path {
        app = app.nest(prefix, routes());
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/version", get(version))
        .route("/pipeline-spec", get(pipeline_spec))
        .route("/invoke", post(invoke))
        .route("/metrics", get(metrics))
}

async fn healthcheck() -> Json<HealthcheckResponse> {
    Json(HealthcheckResponse {
        status: "OK".to_string(),
    })
}

async fn version(State(state): State<AppState>) -> Result<Json<VersionInfo>, ApiError> {
    debug!("/version");
    Ok(Json(VersionInfo::from_env(&state.app_name)?))
}

async fn pipeline_spec(State(state): State<AppState>) -> Json<PipelineSpecFile> {
    Json(state.spec.as_ref().clone())
}

async fn invoke(
    State(state): State<AppState>,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<InvokeResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("invoke", %request_id);

    METRICS.invoke.requests_total.inc();
    let start = Instant::now();

    let result = async move {
        debug!("Query of {} bytes", request.query.len());
        state.scheduler.invoke(request.query).await
    }
    .instrument(span)
    .await;

    METRICS
        .invoke
        .request_duration
        .observe(start.elapsed().as_secs_f64());

    match result {
        Ok(response) => {
            METRICS.invoke.requests_success.inc();
            Ok(Json(InvokeResponse { response }))
        }
        Err(e) => {
            METRICS.invoke.requests_failed.inc();
            Err(e.into())
        }
    }
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.gather(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use textgen_common::Result;
    use textgen_pipeline::{SchedulerConfig, TextGenerator};
    use tower::ServiceExt;

    const PIPELINE_YAML: &str = r#"
pipeline:
  pipeline-type: text-generation
  model:
    name: HuggingFaceTB/SmolLM2-135M
    kwargs:
      revision: main
  tokenizer: HuggingFaceTB/SmolLM2-135M
  kwargs:
    max_new_tokens: 64
"#;

    /// Continues every query with a fixed answer
    struct Echo;

    impl TextGenerator for Echo {
        fn invoke(&self, query: &str) -> Result<String> {
            if query.trim().is_empty() {
                return Err(textgen_common::TextgenError::invalid_input(
                    "Query must not be empty",
                ));
            }
            Ok(format!("{} it is noon", query))
        }
    }

    fn app(root_path: Option<&str>) -> Router {
        let scheduler = InvokeScheduler::new(
            Arc::new(Echo),
            SchedulerConfig {
                max_pending: 4,
                queue_timeout: Duration::from_secs(5),
            },
        );
        let state = AppState {
            app_name: textgen_common::config::DEFAULT_APP_NAME.to_string(),
            spec: Arc::new(PipelineSpecFile::from_yaml_str(PIPELINE_YAML).unwrap()),
            scheduler: Arc::new(scheduler),
        };
        create_app(state, root_path)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let (status, body) = send(app(None), get("/healthcheck")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "OK"}));
    }

    // GITHASH and BUILD_TIME are process-wide; only this test sets them.
    #[tokio::test]
    async fn test_version() {
        let app = app(None);
        // APP_NAME is captured when the app is built, not per request.
        std::env::set_var("APP_NAME", "pytest-app-name");
        std::env::set_var("GITHASH", "abcd1234");
        std::env::set_var("BUILD_TIME", "2024-06-22T20:16:21+00:00");

        let (status, body) = send(app.clone(), get("/version")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "app_name": "self contained CPU model",
                "build_time": "2024-06-22T20:16:21Z",
                "githash": "abcd1234",
            })
        );

        std::env::remove_var("GITHASH");
        std::env::remove_var("BUILD_TIME");
        let (status, body) = send(app.clone(), get("/version")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "app_name": "self contained CPU model",
                "build_time": null,
                "githash": null,
            })
        );

        std::env::set_var("BUILD_TIME", "last tuesday");
        let (status, body) = send(app, get("/version")).await;
        std::env::remove_var("BUILD_TIME");

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("BUILD_TIME"));
    }

    #[tokio::test]
    async fn test_pipeline_spec() {
        let (status, body) = send(app(None), get("/pipeline-spec")).await;

        assert_eq!(status, StatusCode::OK);
        let top: Vec<&String> = body.as_object().unwrap().keys().collect();
        assert_eq!(top, vec!["pipeline"]);

        let mut keys: Vec<&String> = body["pipeline"].as_object().unwrap().keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["kwargs", "model", "pipeline-type", "tokenizer"]);
        assert_eq!(body["pipeline"]["pipeline-type"], "text-generation");
    }

    #[tokio::test]
    async fn test_invoke() {
        let (status, body) = send(
            app(None),
            post_json("/invoke", json!({"query": "what time is it"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["response"]
            .as_str()
            .unwrap()
            .starts_with("what time is it"));
    }

    #[tokio::test]
    async fn test_invoke_errors_render_detail() {
        let (status, body) = send(app(None), post_json("/invoke", json!({"query": "  "}))).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_invoke_rejects_malformed_body() {
        let (status, _) = send(app(None), post_json("/invoke", json!({"question": "hi"}))).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_root_path_prefix() {
        let (status, _) = send(app(Some("/llm")), get("/llm/healthcheck")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(app(Some("/llm")), get("/healthcheck")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(app(None), get("/llm/healthcheck")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics() {
        let app = app(None);
        send(
            app.clone(),
            post_json("/invoke", json!({"query": "what time is it"})),
        )
        .await;

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("invoke_requests_total"));
    }
}
