use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::domain::{PipelineStage, PipelineState};

/// Emitted on every state transition and for notable progress inside a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub state: PipelineState,
    pub stage_name: String,
    pub stage_ordinal: u8,
    pub message: String,
}

impl ProgressEvent {
    pub fn for_state(state: PipelineState, message: impl Into<String>) -> Self {
        let (stage_name, stage_ordinal) = match state.stage() {
            Some(stage) => (stage.label().to_string(), stage.ordinal()),
            None => (state.label().to_string(), 0),
        };
        Self {
            state,
            stage_name,
            stage_ordinal,
            message: message.into(),
        }
    }
}

/// Terminal notification; exactly one per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunCompletion {
    pub success: bool,
    pub state: PipelineState,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    StateChanged(ProgressEvent),
    Item {
        stage: PipelineStage,
        index: usize,
        total: usize,
        item: String,
        succeeded: bool,
        message: String,
    },
    ReportReady {
        path: PathBuf,
        rows: usize,
    },
    Finished(RunCompletion),
}

/// The only contract between the pipeline and any presentation layer.
pub trait ProgressObserver: Send + Sync {
    fn notify(&self, event: &PipelineEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn notify(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StateChanged(progress) => info!(
                stage = %progress.stage_name,
                ordinal = progress.stage_ordinal,
                "{}",
                progress.message
            ),
            PipelineEvent::Item {
                stage,
                index,
                total,
                item,
                succeeded: true,
                message,
            } => info!(stage = stage.label(), index, total, item = %item, "{message}"),
            PipelineEvent::Item {
                stage,
                index,
                total,
                item,
                succeeded: false,
                message,
            } => warn!(stage = stage.label(), index, total, item = %item, "{message}"),
            PipelineEvent::ReportReady { path, rows } => {
                info!(path = %path.display(), rows, "report written")
            }
            PipelineEvent::Finished(completion) if completion.success => {
                info!(state = completion.state.label(), "{}", completion.message)
            }
            PipelineEvent::Finished(completion) => {
                warn!(state = completion.state.label(), "{}", completion.message)
            }
        }
    }
}

/// Forwards events to an async consumer. A dropped receiver silently discards events.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressObserver for ChannelObserver {
    fn notify(&self, event: &PipelineEvent) {
        let _ = self.sender.send(event.clone());
    }
}

impl ProgressObserver for Vec<Arc<dyn ProgressObserver>> {
    fn notify(&self, event: &PipelineEvent) {
        for observer in self {
            observer.notify(event);
        }
    }
}
