use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};

use super::domain::{PipelineRun, PipelineState};
use super::gate::GateState;
use super::orchestrator::{PipelineOrchestrator, RunControl};
use super::progress::{PipelineEvent, ProgressObserver, RunCompletion};

/// A run executing on its own background task.
///
/// The holder only observes and signals; all pipeline work happens on the spawned task.
#[derive(Debug)]
pub struct RunHandle {
    control: RunControl,
    task: JoinHandle<PipelineRun>,
}

impl RunHandle {
    pub fn spawn(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        let control = RunControl::new();
        let worker_control = control.clone();
        let task = tokio::spawn(async move { orchestrator.run(&worker_control).await });
        Self { control, task }
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn gate_state(&self) -> GateState {
        self.control.gate.state()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn approve(&self) -> bool {
        self.control.approve()
    }

    pub fn reject(&self) -> bool {
        self.control.reject()
    }

    pub fn cancel_upload(&self) {
        self.control.cancel_upload();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<PipelineRun, JoinError> {
        self.task.await
    }
}

const DEFAULT_CAPACITY: usize = 50;

/// Keeps the latest state and a bounded tail of events for polling clients.
#[derive(Debug)]
pub struct EventLog {
    inner: Mutex<EventLogInner>,
    capacity: usize,
}

#[derive(Debug)]
struct EventLogInner {
    state: PipelineState,
    message: String,
    completion: Option<RunCompletion>,
    report_path: Option<String>,
    recent: VecDeque<PipelineEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventLogSnapshot {
    pub state: PipelineState,
    pub message: String,
    pub completion: Option<RunCompletion>,
    pub report_path: Option<String>,
    pub events: Vec<PipelineEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(EventLogInner {
                state: PipelineState::Idle,
                message: String::new(),
                completion: None,
                report_path: None,
                recent: VecDeque::with_capacity(capacity),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn snapshot(&self) -> EventLogSnapshot {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        EventLogSnapshot {
            state: inner.state,
            message: inner.message.clone(),
            completion: inner.completion.clone(),
            report_path: inner.report_path.clone(),
            events: inner.recent.iter().cloned().collect(),
        }
    }
}

impl ProgressObserver for EventLog {
    fn notify(&self, event: &PipelineEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            PipelineEvent::StateChanged(progress) => {
                inner.state = progress.state;
                inner.message = progress.message.clone();
            }
            PipelineEvent::ReportReady { path, .. } => {
                inner.report_path = Some(path.display().to_string());
            }
            PipelineEvent::Finished(completion) => {
                inner.state = completion.state;
                inner.message = completion.message.clone();
                inner.completion = Some(completion.clone());
            }
            PipelineEvent::Item { .. } => {}
        }
        if inner.recent.len() == self.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back(event.clone());
    }
}
