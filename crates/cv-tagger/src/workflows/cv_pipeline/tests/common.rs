use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::response::Response;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tempfile::TempDir;

use crate::config::PipelineConfig;
use crate::workflows::cv_pipeline::{
    CancellationToken, CandidateDetails, CandidateId, CandidateRecord, ClassificationResult,
    ClassificationSchema, Classifier, Collaborators, CsvReportWriter, DocumentFetcher,
    ExportError, FileCache, InstructionSet, PipelineEvent, PipelineOrchestrator, PipelineState,
    PlainTextReportWriter, ProgressObserver, ReportRow, ReportSummary, ReportWriter,
    RetryExecutor, RetryPolicy, SearchFilter, TextExtractor, TrackingService,
};
use crate::workflows::cv_pipeline::error::PipelineError;

pub(super) const CLASSIFIER_OUTPUT: &str = r#"{
    "gender": "Male",
    "education_level": "Academic Bachelor",
    "graduation_year": "GY 2022",
    "experience": "1-1.5y exp",
    "mother_tong": "Dutch",
    "school": "N/A",
    "field_of_study": "N/A"
}"#;

pub(super) const EMPTY_CLASSIFIER_OUTPUT: &str = r#"{
    "gender": "N/A",
    "education_level": "N/A",
    "graduation_year": "N/A",
    "experience": "N/A",
    "mother_tong": "N/A",
    "school": "N/A",
    "field_of_study": "N/A"
}"#;

pub(super) fn candidate(id: &str, day: u32) -> CandidateRecord {
    CandidateRecord {
        id: CandidateId(id.to_string()),
        first_name: format!("First{id}"),
        last_name: format!("Last{id}"),
        email: Some(format!("candidate{id}@example.com")),
        created_at: Utc.with_ymd_and_hms(2025, 1, day, 9, 0, 0).single(),
    }
}

pub(super) fn details_with_cv(id: &str) -> CandidateDetails {
    CandidateDetails {
        id: CandidateId(id.to_string()),
        first_name: Some(format!("First{id}")),
        last_name: Some(format!("Last{id}")),
        cv_url: Some(cv_url(id)),
        ..CandidateDetails::default()
    }
}

pub(super) fn details_without_cv(id: &str) -> CandidateDetails {
    CandidateDetails {
        id: CandidateId(id.to_string()),
        first_name: Some(format!("First{id}")),
        last_name: Some(format!("Last{id}")),
        ..CandidateDetails::default()
    }
}

pub(super) fn cv_url(id: &str) -> String {
    format!("https://cdn.example.com/cv-{id}.pdf")
}

pub(super) fn file_stem(id: &str) -> String {
    format!("CV_{id}_First{id}_Last{id}")
}

#[derive(Default)]
pub(super) struct FakeTracking {
    pub candidates: Vec<CandidateRecord>,
    pub details: HashMap<CandidateId, CandidateDetails>,
    pub search_calls: AtomicUsize,
    pub tagged: Mutex<Vec<(CandidateId, Vec<String>)>>,
}

impl FakeTracking {
    pub(super) fn with(entries: Vec<(CandidateRecord, CandidateDetails)>) -> Self {
        let mut tracking = Self::default();
        for (record, details) in entries {
            tracking.details.insert(record.id.clone(), details);
            tracking.candidates.push(record);
        }
        tracking
    }

    pub(super) fn tagged(&self) -> Vec<(CandidateId, Vec<String>)> {
        self.tagged.lock().expect("tag log").clone()
    }
}

#[async_trait]
impl TrackingService for FakeTracking {
    async fn search(&self, _: &SearchFilter) -> Result<Vec<CandidateRecord>, PipelineError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.clone())
    }

    async fn fetch_details(&self, id: &CandidateId) -> Result<CandidateDetails, PipelineError> {
        self.details
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::Service(format!("candidate {id} not found")))
    }

    async fn apply_tags(&self, id: &CandidateId, tags: &[String]) -> Result<(), PipelineError> {
        self.tagged
            .lock()
            .expect("tag log")
            .push((id.clone(), tags.to_vec()));
        Ok(())
    }
}

/// Serves fake PDF bytes; listed URLs always time out. Optionally requests cancellation after
/// the n-th download.
#[derive(Default)]
pub(super) struct FakeFetcher {
    pub timing_out: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
    pub cancel_after: Option<(usize, CancellationToken)>,
}

impl FakeFetcher {
    pub(super) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("fetch log").clone()
    }
}

#[async_trait]
impl DocumentFetcher for FakeFetcher {
    async fn download(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        let count = {
            let mut calls = self.calls.lock().expect("fetch log");
            calls.push(url.to_string());
            calls.len()
        };
        if self.timing_out.contains(url) {
            return Err(PipelineError::TransientNetwork(format!("{url} timed out")));
        }
        if let Some((after, token)) = &self.cancel_after {
            if count == *after {
                token.request();
            }
        }
        Ok(format!("%PDF fake document from {url}").into_bytes())
    }
}

#[derive(Default)]
pub(super) struct FakeExtractor {
    pub calls: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub(super) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("extract log").clone()
    }
}

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(
        &self,
        _: &[u8],
        file_name: &str,
        retry: &RetryExecutor,
    ) -> Result<String, PipelineError> {
        let calls = &self.calls;
        retry
            .run("extract text", || async move {
                calls.lock().expect("extract log").push(file_name.to_string());
                Ok(format!("extracted text of {file_name}"))
            })
            .await
    }
}

/// Returns malformed output for texts containing any of `malformed`, and all-`N/A` output for
/// texts containing any of `empty`.
#[derive(Default)]
pub(super) struct FakeClassifier {
    pub schema: ClassificationSchema,
    pub malformed: Vec<String>,
    pub empty: Vec<String>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(
        &self,
        text: &str,
        _: &InstructionSet,
    ) -> Result<ClassificationResult, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.malformed.iter().any(|marker| text.contains(marker)) {
            return self
                .schema
                .parse_response("I could not find a CV in this text.");
        }
        if self.empty.iter().any(|marker| text.contains(marker)) {
            return self.schema.parse_response(EMPTY_CLASSIFIER_OUTPUT);
        }
        self.schema.parse_response(CLASSIFIER_OUTPUT)
    }
}

pub(super) struct FailingWriter;

impl ReportWriter for FailingWriter {
    fn format(&self) -> &'static str {
        "broken"
    }

    fn write(&self, _: &[ReportRow], _: &ReportSummary) -> Result<PathBuf, ExportError> {
        Err(ExportError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        )))
    }
}

#[derive(Default)]
pub(super) struct RecordingObserver {
    pub events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub(super) fn states(&self) -> Vec<PipelineState> {
        self.events
            .lock()
            .expect("event log")
            .iter()
            .filter_map(|event| match event {
                PipelineEvent::StateChanged(progress) => Some(progress.state),
                _ => None,
            })
            .collect()
    }

    pub(super) fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().expect("event log").clone()
    }
}

impl ProgressObserver for RecordingObserver {
    fn notify(&self, event: &PipelineEvent) {
        self.events.lock().expect("event log").push(event.clone());
    }
}

pub(super) fn fast_retry(max_attempts: u32) -> RetryExecutor {
    RetryExecutor::new(RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        multiplier: 2.0,
        jitter: Duration::ZERO,
    })
}

pub(super) struct Harness {
    pub workdir: TempDir,
    pub tracking: Arc<FakeTracking>,
    pub fetcher: Arc<FakeFetcher>,
    pub extractor: Arc<FakeExtractor>,
    pub classifier: Arc<FakeClassifier>,
    pub observer: Arc<RecordingObserver>,
    pub report: Arc<dyn ReportWriter>,
}

impl Harness {
    pub(super) fn new(tracking: FakeTracking) -> Self {
        let workdir = tempfile::tempdir().expect("temp dir");
        let report: Arc<dyn ReportWriter> =
            Arc::new(CsvReportWriter::new(workdir.path().join("output")));
        Self {
            workdir,
            tracking: Arc::new(tracking),
            fetcher: Arc::new(FakeFetcher::default()),
            extractor: Arc::new(FakeExtractor::default()),
            classifier: Arc::new(FakeClassifier::default()),
            observer: Arc::new(RecordingObserver::default()),
            report,
        }
    }

    pub(super) fn settings(&self, upload_enabled: bool) -> PipelineConfig {
        PipelineConfig {
            candidate_limit: 50,
            item_delay: Duration::from_millis(250),
            upload_enabled,
            work_dir: self.workdir.path().to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    pub(super) fn cache(&self) -> FileCache {
        FileCache::new(self.settings(false).ocr_dir())
    }

    pub(super) fn orchestrator(&self, upload_enabled: bool) -> PipelineOrchestrator {
        let collaborators = Collaborators {
            tracking: self.tracking.clone(),
            fetcher: self.fetcher.clone(),
            extractor: self.extractor.clone(),
            classifier: self.classifier.clone(),
            report: self.report.clone(),
            fallback_report: Arc::new(PlainTextReportWriter::new(
                self.workdir.path().join("output"),
            )),
        };
        PipelineOrchestrator::new(
            self.settings(upload_enabled),
            collaborators,
            Arc::new(self.cache()),
        )
        .with_retry(fast_retry(3))
        .with_observer(self.observer.clone())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("valid json")
}
