//! HTTP job intake.
//!
//! `POST /jobs` runs a job to completion and answers with its outcome. The
//! response itself is the delivery receipt. Jobs run on their own task, so a
//! client that hangs up does not interrupt a job mid-phase.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::error::JobError;
use crate::job::JobRequest;
use crate::pipeline::Pipeline;
use crate::transport::{ImmediateReceipt, JobOutcome, TransportError};

/// Job records are small flat objects.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Routes for the intake, with the pipeline as state.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/jobs", post(submit_job))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(pipeline: Arc<Pipeline>, addr: SocketAddr) -> Result<(), TransportError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(isolation = %pipeline.config().isolation, "Job intake listening on {}", addr);

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Job intake shutting down");
        })
        .await?;
    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn submit_job(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<JobRequest>,
) -> (StatusCode, Json<Value>) {
    let task_id = request.task_id_echo();
    let timestamp = request.timestamp_echo();

    let outcome = match pipeline.dispatch(request, Arc::new(ImmediateReceipt)).await {
        Ok(report) => report.outcome,
        Err(e) => {
            tracing::error!(task_id = %task_id, "Job task aborted: {}", e);
            let err = JobError::Internal(e.to_string());
            JobOutcome::from_error(&err, task_id, timestamp)
        }
    };

    let status =
        StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome.to_json()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverseerConfig;
    use crate::job::ZipArchiveValidator;
    use crate::sandbox::testing::ScriptedEngine;
    use crate::workspace::fs::tests::write_zip;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_config(dir: &TempDir) -> OverseerConfig {
        OverseerConfig {
            work_root: dir.path().join("work"),
            ..OverseerConfig::default()
        }
    }

    fn test_router(dir: &TempDir) -> Router {
        let pipeline = Pipeline::new(
            test_config(dir),
            Arc::new(ScriptedEngine::new()),
            Arc::new(ZipArchiveValidator),
        );
        router(Arc::new(pipeline))
    }

    fn post_job(job: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/jobs")
            .header("content-type", "application/json")
            .body(Body::from(job.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), MAX_BODY_BYTES)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let dir = TempDir::new().unwrap();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = test_router(&dir).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 16).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn missing_field_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let job = json!({
            "docker_image_name_tag": "gcc:14",
            "output_path": "/tmp/out",
            "assessment": "/tmp/a.zip",
            "timestamp": "t1",
            "task_id": 11
        });
        let req = post_job(&job);

        let resp = test_router(&dir).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(resp).await,
            json!({"error": "PARAM `submission` is required", "task_id": 11, "timestamp": "t1"})
        );
    }

    #[tokio::test]
    async fn non_integer_task_id_is_echoed_back() {
        let dir = TempDir::new().unwrap();
        let job = json!({
            "docker_image_name_tag": "gcc:14",
            "output_path": "/tmp/out",
            "submission": "/tmp/s",
            "assessment": "/tmp/a.zip",
            "timestamp": "t1",
            "task_id": "eleven"
        });
        let req = post_job(&job);

        let resp = test_router(&dir).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["task_id"], json!("eleven"));
    }

    #[tokio::test]
    async fn client_hangup_does_not_interrupt_job() {
        let dir = TempDir::new().unwrap();
        write_zip(&dir.path().join("submission.zip"), &[("main.c", "int main(){}")]);
        write_zip(
            &dir.path().join("assessment.zip"),
            &[("build.sh", "make"), ("run.sh", "./a.out")],
        );
        let config = test_config(&dir);
        let workspace = config.workspace_for(12);
        let output = dir.path().join("out");

        let engine = ScriptedEngine::new().with_delay(Duration::from_millis(200));
        let pipeline = Pipeline::new(config, Arc::new(engine), Arc::new(ZipArchiveValidator));
        let job = json!({
            "docker_image_name_tag": "gcc:14",
            "output_path": output.to_string_lossy(),
            "submission": dir.path().join("submission.zip").to_string_lossy(),
            "assessment": dir.path().join("assessment.zip").to_string_lossy(),
            "timestamp": "t1",
            "task_id": 12,
            "zip_file": 1
        });

        let call = router(Arc::new(pipeline)).oneshot(post_job(&job));
        assert!(tokio::time::timeout(Duration::from_millis(20), call).await.is_err());

        let finished = || {
            output.join("output.txt").exists()
                && std::fs::read_dir(&workspace).map_or(true, |mut e| e.next().is_none())
        };
        for _ in 0..200 {
            if finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let log = std::fs::read_to_string(output.join("output.txt")).unwrap();
        assert!(log.contains("exit code: 0"));
        assert!(finished());
    }
}
