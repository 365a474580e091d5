use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::cancellation::CancellationToken;
use super::domain::{CandidateRecord, ExtractedText, FetchedDocument, PipelineStage};
use super::error::PipelineError;
use super::progress::{PipelineEvent, ProgressObserver};

/// Anything a stage iterates over; `describe` feeds progress messages and failure records.
pub trait StageItem {
    fn describe(&self) -> String;
}

impl StageItem for CandidateRecord {
    fn describe(&self) -> String {
        format!("{} ({})", self.display_name(), self.id)
    }
}

impl StageItem for FetchedDocument {
    fn describe(&self) -> String {
        self.file_name.clone()
    }
}

impl StageItem for ExtractedText {
    fn describe(&self) -> String {
        self.content_key.to_string()
    }
}

/// Items paired with their position in the run's candidate list.
impl<T: StageItem> StageItem for (usize, T) {
    fn describe(&self) -> String {
        self.1.describe()
    }
}

/// A skipped item and why.
#[derive(Debug)]
pub struct ItemFailure {
    pub index: usize,
    pub item: String,
    pub error: PipelineError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug)]
pub struct StageReport<O> {
    pub stage: PipelineStage,
    pub outputs: Vec<O>,
    pub failures: Vec<ItemFailure>,
    pub outcome: StageOutcome,
    /// Items that were started; fewer than the input length when cancelled.
    pub attempted: usize,
}

impl<O> StageReport<O> {
    pub fn is_cancelled(&self) -> bool {
        self.outcome == StageOutcome::Cancelled
    }

    pub fn has_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }
}

/// Runs one stage item by item, strictly in order.
#[derive(Clone)]
pub struct StageRunner {
    delay: Duration,
    token: CancellationToken,
    observer: Arc<dyn ProgressObserver>,
}

impl StageRunner {
    pub fn new(
        delay: Duration,
        token: CancellationToken,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            delay,
            token,
            observer,
        }
    }

    /// Processes `items` in order.
    ///
    /// The token is checked before each item and the configured delay separates consecutive
    /// items. A failed item is recorded and skipped.
    pub async fn run<I, O, F, Fut>(
        &self,
        stage: PipelineStage,
        items: Vec<I>,
        mut process: F,
    ) -> StageReport<O>
    where
        I: StageItem,
        F: FnMut(I) -> Fut,
        Fut: Future<Output = Result<O, PipelineError>>,
    {
        let total = items.len();
        let mut report = StageReport {
            stage,
            outputs: Vec::with_capacity(total),
            failures: Vec::new(),
            outcome: StageOutcome::Completed,
            attempted: 0,
        };

        for (index, item) in items.into_iter().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                debug!(
                    stage = stage.label(),
                    delay_ms = self.delay.as_millis() as u64,
                    "pausing between items"
                );
                self.token.sleep(self.delay).await;
            }

            if self.token.is_requested() {
                info!(
                    stage = stage.label(),
                    processed = index,
                    total,
                    "stage stopped by cancellation"
                );
                report.outcome = StageOutcome::Cancelled;
                break;
            }

            let label = item.describe();
            report.attempted += 1;

            match process(item).await {
                Ok(output) => {
                    report.outputs.push(output);
                    self.observer.notify(&PipelineEvent::Item {
                        stage,
                        index: index + 1,
                        total,
                        item: label,
                        succeeded: true,
                        message: format!(
                            "{} {}/{}",
                            stage.progress_verb(),
                            report.outputs.len(),
                            total
                        ),
                    });
                }
                Err(error) => {
                    self.observer.notify(&PipelineEvent::Item {
                        stage,
                        index: index + 1,
                        total,
                        item: label.clone(),
                        succeeded: false,
                        message: format!("skipped: {error}"),
                    });
                    report.failures.push(ItemFailure {
                        index,
                        item: label,
                        error,
                    });
                }
            }
        }

        report
    }
}
