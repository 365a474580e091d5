use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use super::common::*;
use crate::error::AppError;
use crate::workflows::cv_pipeline::{
    run_router, EventLog, ProgressObserver, RunBoard, RunHandle, RunLauncher, RunRequest,
};

struct HarnessLauncher {
    harness: Harness,
}

impl RunLauncher for HarnessLauncher {
    fn launch(&self, request: RunRequest, events: Arc<EventLog>) -> Result<RunHandle, AppError> {
        let observers: Vec<Arc<dyn ProgressObserver>> =
            vec![self.harness.observer.clone(), events];
        let orchestrator = self
            .harness
            .orchestrator(request.upload.unwrap_or(false))
            .with_observer(Arc::new(observers));
        Ok(RunHandle::spawn(Arc::new(orchestrator)))
    }
}

struct BrokenLauncher;

impl RunLauncher for BrokenLauncher {
    fn launch(&self, _: RunRequest, _: Arc<EventLog>) -> Result<RunHandle, AppError> {
        Err(AppError::Run("tracking credentials missing".to_string()))
    }
}

fn router() -> (Router, Arc<RunBoard<HarnessLauncher>>) {
    let harness = Harness::new(FakeTracking::with(vec![
        (candidate("1", 1), details_with_cv("1")),
        (candidate("2", 2), details_with_cv("2")),
    ]));
    let board = Arc::new(RunBoard::new(HarnessLauncher { harness }));
    (run_router(board.clone()), board)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(request.body(body).expect("request builds"))
        .await
        .expect("router responds");
    let status = response.status();
    (status, read_json_body(response).await)
}

async fn wait_for_status(router: &Router, ready: impl Fn(&Value) -> bool) -> Value {
    loop {
        let (status, body) = send(router, "GET", "/api/v1/runs/current", None).await;
        assert_eq!(status, StatusCode::OK);
        if ready(&body) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn status_is_not_found_before_any_run() {
    let (router, _) = router();

    let (status, body) = send(&router, "GET", "/api/v1/runs/current", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "no run has been started");

    let (status, _) = send(&router, "POST", "/api/v1/runs/current/approve", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn approve_route_releases_the_upload() {
    let (router, board) = router();

    let (status, _) = send(&router, "POST", "/api/v1/runs", Some(r#"{"upload":true}"#)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let waiting = wait_for_status(&router, |body| body["gate"] == "awaiting_decision").await;
    assert_eq!(waiting["state"], "awaiting_confirmation");
    assert!(waiting["report_path"].is_string());

    let (status, body) = send(&router, "POST", "/api/v1/runs", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "a run is already in progress");

    let (status, body) = send(&router, "POST", "/api/v1/runs/current/approve", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["gate"], "approved");

    let finished = wait_for_status(&router, |body| body["finished"] == true).await;
    assert_eq!(finished["state"], "completed");
    assert_eq!(finished["completion"]["success"], true);
    assert_eq!(board_tagged(&board), 2);

    let (status, _) = send(&router, "POST", "/api/v1/runs/current/approve", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

fn board_tagged(board: &RunBoard<HarnessLauncher>) -> usize {
    board.launcher().harness.tracking.tagged().len()
}

#[tokio::test(start_paused = true)]
async fn cancel_route_declines_the_upload() {
    let (router, board) = router();

    let (status, _) = send(&router, "POST", "/api/v1/runs", Some(r#"{"upload":true}"#)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_status(&router, |body| body["gate"] == "awaiting_decision").await;

    let (status, _) = send(&router, "POST", "/api/v1/runs/current/cancel", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let finished = wait_for_status(&router, |body| body["finished"] == true).await;
    assert_eq!(finished["state"], "cancelled");
    assert_eq!(finished["gate"], "rejected");
    assert_eq!(board_tagged(&board), 0);
}

#[tokio::test(start_paused = true)]
async fn approve_without_a_pending_decision_conflicts() {
    let (router, _) = router();

    let (status, _) = send(&router, "POST", "/api/v1/runs", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(&router, "POST", "/api/v1/runs/current/approve", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let finished = wait_for_status(&router, |body| body["finished"] == true).await;
    assert_eq!(finished["state"], "completed");
    assert_eq!(finished["gate"], "open");
}

#[tokio::test]
async fn launcher_errors_map_to_internal_error() {
    let router = run_router(Arc::new(RunBoard::new(BrokenLauncher)));

    let (status, body) = send(&router, "POST", "/api/v1/runs", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]
        .as_str()
        .expect("error message")
        .contains("tracking credentials missing"));
}
