use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::gate::GateState;
use super::handle::{EventLog, EventLogSnapshot, RunHandle};
use crate::error::AppError;

/// Per-run overrides accepted when starting a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RunRequest {
    pub limit: Option<usize>,
    pub upload: Option<bool>,
    pub delay_ms: Option<u64>,
}

/// Builds and spawns a run; the router never constructs pipeline components itself.
pub trait RunLauncher: Send + Sync {
    fn launch(&self, request: RunRequest, events: Arc<EventLog>) -> Result<RunHandle, AppError>;
}

struct ActiveRun {
    handle: RunHandle,
    events: Arc<EventLog>,
}

/// At most one run at a time, plus its event log.
pub struct RunBoard<L> {
    launcher: L,
    current: Mutex<Option<ActiveRun>>,
}

impl<L: RunLauncher> RunBoard<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            current: Mutex::new(None),
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStatusView {
    pub finished: bool,
    pub gate: GateState,
    #[serde(flatten)]
    pub log: EventLogSnapshot,
}

impl ActiveRun {
    fn view(&self) -> RunStatusView {
        RunStatusView {
            finished: self.handle.is_finished(),
            gate: self.handle.gate_state(),
            log: self.events.snapshot(),
        }
    }
}

/// Router exposing run start, status, and the confirm/reject/cancel signals.
pub fn run_router<L>(board: Arc<RunBoard<L>>) -> Router
where
    L: RunLauncher + 'static,
{
    Router::new()
        .route("/api/v1/runs", post(start_handler::<L>))
        .route("/api/v1/runs/current", get(status_handler::<L>))
        .route("/api/v1/runs/current/approve", post(approve_handler::<L>))
        .route("/api/v1/runs/current/reject", post(reject_handler::<L>))
        .route("/api/v1/runs/current/cancel", post(cancel_handler::<L>))
        .with_state(board)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let payload = json!({
        "error": message,
    });
    (status, axum::Json(payload)).into_response()
}

pub(crate) async fn start_handler<L>(
    State(board): State<Arc<RunBoard<L>>>,
    request: Option<axum::Json<RunRequest>>,
) -> Response
where
    L: RunLauncher + 'static,
{
    let request = request.map(|axum::Json(request)| request).unwrap_or_default();
    let mut current = board.current.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(active) = current.as_ref() {
        if !active.handle.is_finished() {
            return error_response(StatusCode::CONFLICT, "a run is already in progress");
        }
    }

    let events = Arc::new(EventLog::default());
    match board.launcher.launch(request, events.clone()) {
        Ok(handle) => {
            let active = ActiveRun { handle, events };
            let view = active.view();
            *current = Some(active);
            (StatusCode::ACCEPTED, axum::Json(view)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn status_handler<L>(State(board): State<Arc<RunBoard<L>>>) -> Response
where
    L: RunLauncher + 'static,
{
    let current = board.current.lock().unwrap_or_else(PoisonError::into_inner);
    match current.as_ref() {
        Some(active) => (StatusCode::OK, axum::Json(active.view())).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no run has been started"),
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Approve,
    Reject,
    Cancel,
}

fn signal<L>(board: &RunBoard<L>, kind: Signal) -> Response {
    let current = board.current.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(active) = current.as_ref() else {
        return error_response(StatusCode::NOT_FOUND, "no run has been started");
    };
    if active.handle.is_finished() {
        return error_response(StatusCode::CONFLICT, "the run has already finished");
    }

    let accepted = match kind {
        Signal::Approve => active.handle.approve(),
        Signal::Reject => active.handle.reject(),
        Signal::Cancel => {
            active.handle.cancel_upload();
            true
        }
    };

    if accepted {
        (StatusCode::ACCEPTED, axum::Json(active.view())).into_response()
    } else {
        error_response(
            StatusCode::CONFLICT,
            "the run is not waiting for an upload decision",
        )
    }
}

pub(crate) async fn approve_handler<L>(State(board): State<Arc<RunBoard<L>>>) -> Response
where
    L: RunLauncher + 'static,
{
    signal(&board, Signal::Approve)
}

pub(crate) async fn reject_handler<L>(State(board): State<Arc<RunBoard<L>>>) -> Response
where
    L: RunLauncher + 'static,
{
    signal(&board, Signal::Reject)
}

pub(crate) async fn cancel_handler<L>(State(board): State<Arc<RunBoard<L>>>) -> Response
where
    L: RunLauncher + 'static,
{
    signal(&board, Signal::Cancel)
}
