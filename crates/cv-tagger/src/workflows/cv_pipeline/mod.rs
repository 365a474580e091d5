//! CV tagging pipeline.
//!
//! A run walks a fixed sequence of stages on one background task: retrieve candidates, download
//! their CVs, extract text (served from the extraction cache when possible), classify it into
//! the seven-field schema, export a report, and, when enabled and confirmed, write tags back to
//! the tracking service. Callers observe progress through [`ProgressObserver`] and steer the run
//! through [`RunControl`].

pub mod cache;
pub mod cancellation;
pub mod classification;
pub mod clients;
pub mod collaborators;
pub mod domain;
pub mod error;
pub mod export;
pub mod gate;
pub mod handle;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod router;
pub mod stage;

#[cfg(test)]
mod tests;

pub use cache::{ExtractionCache, FileCache};
pub use cancellation::CancellationToken;
pub use classification::{
    ClassificationField, ClassificationResult, ClassificationSchema, EducationLevel,
    ExperienceBand, FieldOfStudy, Gender, GraduationYear, InstructionSet, Language, School,
    SchemaError, Tag, NOT_AVAILABLE,
};
pub use collaborators::{
    document_file_name, resolve_document_url, Classifier, Collaborators, DocumentFetcher,
    SearchFilter, TextExtractor, TrackingService,
};
pub use domain::{
    Attachment, CandidateChain, CandidateDetails, CandidateId, CandidateRecord, ContentKey,
    ExtractedText, ExtractionSource, FetchedDocument, PipelineRun, PipelineStage, PipelineState,
    RunOutcome, UploadReceipt, TOTAL_STAGES,
};
pub use error::PipelineError;
pub use export::{
    CsvReportWriter, ExportError, PlainTextReportWriter, ReportRow, ReportSummary, ReportWriter,
};
pub use gate::{ConfirmationGate, GateDecision, GateState};
pub use handle::{EventLog, EventLogSnapshot, RunHandle};
pub use orchestrator::{PipelineOrchestrator, RunControl};
pub use progress::{
    ChannelObserver, PipelineEvent, ProgressEvent, ProgressObserver, RunCompletion,
    TracingObserver,
};
pub use retry::{RetryExecutor, RetryObserver, RetryPolicy, TracingRetryObserver};
pub use router::{run_router, RunBoard, RunLauncher, RunRequest, RunStatusView};
pub use stage::{ItemFailure, StageItem, StageOutcome, StageReport, StageRunner};
