//! Stream job routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/api/jobs` | List jobs, newest first |
//! | POST | `/api/jobs` | Start a job (202, returns the id) |
//! | GET | `/api/jobs/{id}` | Reconcile and return a job |
//! | POST | `/api/jobs/{id}/stop` | Request a stop |
//! | DELETE | `/api/jobs/{id}` | Delete a terminal job |
//! | GET | `/api/jobs/{id}/log` | Flagged encoder lines |

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use crate::api::error::ApiResult;
use crate::api::models::{JobLogResponse, StartJobResponse};
use crate::api::server::AppState;
use crate::domain::{StartJobRequest, StreamJob};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(start_job))
        .route("/{id}", get(get_job).delete(delete_job))
        .route("/{id}/stop", post(stop_job))
        .route("/{id}/log", get(get_job_log))
}

async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<StreamJob>>> {
    Ok(Json(state.orchestrator.list_jobs().await?))
}

async fn start_job(
    State(state): State<AppState>,
    Json(request): Json<StartJobRequest>,
) -> ApiResult<(StatusCode, Json<StartJobResponse>)> {
    let id = state.orchestrator.start_job(request).await?;
    Ok((StatusCode::ACCEPTED, Json(StartJobResponse { id })))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamJob>> {
    Ok(Json(state.orchestrator.reconcile_job(&id).await?))
}

async fn stop_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.orchestrator.stop_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.orchestrator.delete_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_job_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobLogResponse>> {
    let log_path = state.orchestrator.job_log_path(&id).await?;
    let lines = state.orchestrator.read_job_log(&id).await?;
    Ok(Json(JobLogResponse {
        id,
        log_path: log_path.map(|p| p.to_string_lossy().into_owned()),
        lines,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::database::repositories::SqlxStreamJobRepository;
    use crate::database::{init_pool, run_migrations};
    use crate::media::MediaLibrary;
    use crate::orchestrator::{
        JobOrchestrator, LaunchError, LaunchedProcess, Launcher, OrchestratorConfig,
    };

    struct MissingSourceLauncher;

    #[async_trait]
    impl Launcher for MissingSourceLauncher {
        async fn launch(
            &self,
            job: &StreamJob,
        ) -> std::result::Result<LaunchedProcess, LaunchError> {
            Err(LaunchError::SourceNotFound {
                reference: job.video_reference.clone(),
            })
        }
    }

    async fn app() -> (tempfile::TempDir, axum::Router, Arc<JobOrchestrator>) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("api.db").display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let orchestrator = JobOrchestrator::new(
            OrchestratorConfig {
                job_log_dir: dir.path().join("Log"),
                ..Default::default()
            },
            Arc::new(SqlxStreamJobRepository::new(pool)),
            Arc::new(MissingSourceLauncher),
        )
        .unwrap();
        let state = AppState::new(orchestrator.clone(), MediaLibrary::new(dir.path().join("Video")));
        (dir, create_router(state), orchestrator)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn start_body(duration: i64) -> Body {
        Body::from(
            serde_json::json!({
                "title": "Loop",
                "video_reference": "loop.mp4",
                "stream_key": "key",
                "destination_url": "rtmp://a.example/live2",
                "duration_secs": duration,
            })
            .to_string(),
        )
    }

    fn post_json(uri: &str, body: Body) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_duration() {
        let (_dir, app, _) = app().await;
        let response = app
            .oneshot(post_json("/api/jobs", start_body(0)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_start_then_failed_launch_is_visible() {
        let (_dir, app, orchestrator) = app().await;
        let mut events = orchestrator.subscribe();

        let response = app
            .clone()
            .oneshot(post_json("/api/jobs", start_body(60)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        // Wait for the background launch to record the failure.
        let event = events.recv().await.unwrap();
        assert_eq!(event.job_id(), id);

        let response = app
            .clone()
            .oneshot(Request::get(format!("/api/jobs/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job = body_json(response).await;
        assert_eq!(job["status"], "FAILED");
        assert!(job["failure_reason"].as_str().unwrap().contains("loop.mp4"));
        assert_eq!(job["remaining_secs"], 0);

        let response = app
            .oneshot(Request::get("/api/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let jobs = body_json(response).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let (_dir, app, _) = app().await;
        let response = app
            .clone()
            .oneshot(Request::get("/api/jobs/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(Request::delete("/api/jobs/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stop_unowned_job_is_noop() {
        let (_dir, app, _) = app().await;
        let response = app
            .oneshot(post_json("/api/jobs/nope/stop", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_health_reports_live_jobs() {
        let (_dir, app, _) = app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["live_jobs"], 0);
    }

    #[tokio::test]
    async fn test_media_listing_of_missing_root_is_empty() {
        let (_dir, app, _) = app().await;
        let response = app
            .oneshot(Request::get("/api/media").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_logging_filter_unavailable_without_logging() {
        let (_dir, app, _) = app().await;
        let response = app
            .oneshot(Request::get("/api/logging/filter").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
