use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use cv_tagger::config::PipelineConfig;
use cv_tagger::workflows::cv_pipeline::{
    CandidateDetails, CandidateId, CandidateRecord, ClassificationResult, ClassificationSchema,
    Classifier, Collaborators, CsvReportWriter, DocumentFetcher, ExtractionSource, FileCache,
    GateState, InstructionSet, PipelineError, PipelineOrchestrator, PipelineRun, PipelineStage,
    PipelineState, PlainTextReportWriter, RetryExecutor, RetryPolicy, RunControl, RunHandle,
    SearchFilter, TextExtractor, TrackingService,
};
use tempfile::TempDir;

const ANALYSIS: &str = r#"{"gender":"Female","education_level":"Master","graduation_year":"GY 2019",
"experience":">4y exp","mother_tong":"French","school":"N/A","field_of_study":"N/A"}"#;

struct Tracking {
    candidates: Vec<CandidateRecord>,
    details: HashMap<CandidateId, CandidateDetails>,
    tag_calls: Mutex<Vec<CandidateId>>,
}

impl Tracking {
    /// Candidates `1..=count`; ids listed in `without_cv` have no downloadable document.
    fn new(count: u32, without_cv: &[&str]) -> Self {
        let mut candidates = Vec::new();
        let mut details = HashMap::new();
        for n in 1..=count {
            let id = CandidateId(n.to_string());
            candidates.push(CandidateRecord {
                id: id.clone(),
                first_name: "Jo".to_string(),
                last_name: format!("Doe{n}"),
                email: None,
                created_at: Utc.with_ymd_and_hms(2025, 3, n, 12, 0, 0).single(),
            });
            let cv_url = (!without_cv.contains(&id.0.as_str()))
                .then(|| format!("https://files.example.com/{n}.pdf"));
            details.insert(
                id.clone(),
                CandidateDetails {
                    id,
                    first_name: Some("Jo".to_string()),
                    last_name: Some(format!("Doe{n}")),
                    cv_url,
                    ..CandidateDetails::default()
                },
            );
        }
        Self {
            candidates,
            details,
            tag_calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TrackingService for Tracking {
    async fn search(&self, _: &SearchFilter) -> Result<Vec<CandidateRecord>, PipelineError> {
        Ok(self.candidates.clone())
    }

    async fn fetch_details(&self, id: &CandidateId) -> Result<CandidateDetails, PipelineError> {
        self.details
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::Service(format!("unknown candidate {id}")))
    }

    async fn apply_tags(&self, id: &CandidateId, _: &[String]) -> Result<(), PipelineError> {
        self.tag_calls.lock().expect("tag calls").push(id.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Fetcher {
    timing_out: Option<String>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl DocumentFetcher for Fetcher {
    async fn download(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        self.calls.lock().expect("fetch calls").push(url.to_string());
        if self.timing_out.as_deref() == Some(url) {
            return Err(PipelineError::TransientNetwork("read timed out".to_string()));
        }
        Ok(url.as_bytes().to_vec())
    }
}

#[derive(Default)]
struct Ocr {
    calls: AtomicUsize,
}

#[async_trait]
impl TextExtractor for Ocr {
    async fn extract(
        &self,
        document: &[u8],
        file_name: &str,
        retry: &RetryExecutor,
    ) -> Result<String, PipelineError> {
        let calls = &self.calls;
        retry
            .run("extract text", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!(
                    "# {file_name}\n\n{}",
                    String::from_utf8_lossy(document)
                ))
            })
            .await
    }
}

/// Answers with prose instead of JSON for texts mentioning `garbled`.
#[derive(Default)]
struct Analyst {
    schema: ClassificationSchema,
    garbled: Option<String>,
}

#[async_trait]
impl Classifier for Analyst {
    async fn classify(
        &self,
        text: &str,
        _: &InstructionSet,
    ) -> Result<ClassificationResult, PipelineError> {
        match &self.garbled {
            Some(marker) if text.contains(marker.as_str()) => {
                self.schema.parse_response("Sorry, I cannot help with that.")
            }
            _ => self.schema.parse_response(ANALYSIS),
        }
    }
}

struct Setup {
    workdir: TempDir,
    tracking: Arc<Tracking>,
    fetcher: Arc<Fetcher>,
    ocr: Arc<Ocr>,
    analyst: Arc<Analyst>,
    max_attempts: u32,
}

impl Setup {
    fn new(tracking: Tracking) -> Self {
        Self {
            workdir: tempfile::tempdir().expect("temp dir"),
            tracking: Arc::new(tracking),
            fetcher: Arc::new(Fetcher::default()),
            ocr: Arc::new(Ocr::default()),
            analyst: Arc::new(Analyst::default()),
            max_attempts: 3,
        }
    }

    fn orchestrator(&self, upload_enabled: bool) -> PipelineOrchestrator {
        let settings = PipelineConfig {
            item_delay: Duration::from_millis(100),
            upload_enabled,
            work_dir: self.workdir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let collaborators = Collaborators {
            tracking: self.tracking.clone(),
            fetcher: self.fetcher.clone(),
            extractor: self.ocr.clone(),
            classifier: self.analyst.clone(),
            report: Arc::new(CsvReportWriter::new(settings.output_dir())),
            fallback_report: Arc::new(PlainTextReportWriter::new(settings.output_dir())),
        };
        let cache = Arc::new(FileCache::new(settings.ocr_dir()));
        PipelineOrchestrator::new(settings, collaborators, cache).with_retry(RetryExecutor::new(
            RetryPolicy {
                max_attempts: self.max_attempts,
                initial_delay: Duration::from_millis(50),
                multiplier: 2.0,
                jitter: Duration::from_millis(10),
            },
        ))
    }

    async fn run(&self) -> PipelineRun {
        self.orchestrator(false).run(&RunControl::new()).await
    }
}

fn report_rows(run: &PipelineRun) -> usize {
    let path = run.report_path.as_ref().expect("report written");
    csv::Reader::from_path(path)
        .expect("report readable")
        .records()
        .count()
}

#[tokio::test(start_paused = true)]
async fn cached_and_missing_documents_still_complete() {
    let setup = Setup::new(Tracking::new(3, &["3"]));
    let seed = setup.run().await;
    assert_eq!(setup.ocr.calls.load(Ordering::SeqCst), 2);
    let first_texts: Vec<String> = seed
        .chains
        .iter()
        .filter_map(|chain| chain.text.as_ref().map(|text| text.text.clone()))
        .collect();

    // Drop one cache entry so the next run has one cached and one uncached document.
    let evicted = seed.chains[1].text.as_ref().expect("extracted").content_key.clone();
    let cache = FileCache::new(setup.workdir.path().join("ocr_texts"));
    std::fs::remove_file(cache.path_for(&evicted)).expect("cache entry removed");

    let run = setup.run().await;
    assert_eq!(run.state, PipelineState::Completed);
    assert_eq!(run.classified_count(), 2);
    assert_eq!(run.extractions_from(ExtractionSource::Cache), 1);
    assert_eq!(run.extractions_from(ExtractionSource::Network), 1);
    assert_eq!(setup.ocr.calls.load(Ordering::SeqCst), 3);
    assert_eq!(run.failure_count(PipelineStage::Download), 1);
    assert_eq!(report_rows(&run), 2);

    let second_texts: Vec<String> = run
        .chains
        .iter()
        .filter_map(|chain| chain.text.as_ref().map(|text| text.text.clone()))
        .collect();
    assert_eq!(first_texts, second_texts);
}

#[tokio::test(start_paused = true)]
async fn repeated_runs_reuse_cached_extractions() {
    let setup = Setup::new(Tracking::new(2, &[]));
    setup.run().await;
    let calls_after_first = setup.ocr.calls.load(Ordering::SeqCst);

    let run = setup.run().await;
    assert_eq!(setup.ocr.calls.load(Ordering::SeqCst), calls_after_first);
    assert_eq!(run.extractions_from(ExtractionSource::Cache), 2);
}

#[tokio::test(start_paused = true)]
async fn malformed_analysis_for_one_candidate_still_exports() {
    let mut setup = Setup::new(Tracking::new(3, &[]));
    setup.analyst = Arc::new(Analyst {
        garbled: Some("Doe2".to_string()),
        ..Analyst::default()
    });

    let run = setup.run().await;
    assert_eq!(run.state, PipelineState::Completed);
    assert_eq!(run.classified_count(), 2);
    assert_eq!(run.failure_count(PipelineStage::Classify), 1);
    assert_eq!(report_rows(&run), 2);
}

#[tokio::test(start_paused = true)]
async fn download_timeouts_exhaust_retries_without_stopping_the_stage() {
    let mut setup = Setup::new(Tracking::new(3, &[]));
    setup.max_attempts = 5;
    setup.fetcher = Arc::new(Fetcher {
        timing_out: Some("https://files.example.com/2.pdf".to_string()),
        ..Fetcher::default()
    });

    let run = setup.run().await;
    assert_eq!(run.state, PipelineState::Completed);
    assert_eq!(run.documents_downloaded(), 2);

    let calls = setup.fetcher.calls.lock().expect("fetch calls").clone();
    let timed_out = calls
        .iter()
        .filter(|url| url.as_str() == "https://files.example.com/2.pdf")
        .count();
    assert_eq!(timed_out, 5);
    assert_eq!(calls.len(), 7);

    let failures = &run.failures[&PipelineStage::Download];
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].error,
        PipelineError::RetryExhausted { attempts: 5, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn cancelling_while_awaiting_confirmation_never_uploads() {
    let setup = Setup::new(Tracking::new(2, &[]));
    let handle = RunHandle::spawn(Arc::new(setup.orchestrator(true)));

    let mut gate = handle.control().gate.subscribe();
    gate.wait_for(|state| *state == GateState::AwaitingDecision)
        .await
        .expect("gate awaited");
    handle.cancel();

    let run = handle.wait().await.expect("run joins");
    assert_eq!(run.state, PipelineState::Cancelled);
    assert!(run.uploads.is_empty());
    assert!(setup.tracking.tag_calls.lock().expect("tag calls").is_empty());
}

#[tokio::test(start_paused = true)]
async fn approval_uploads_tags() {
    let setup = Setup::new(Tracking::new(2, &[]));
    let handle = RunHandle::spawn(Arc::new(setup.orchestrator(true)));
    let control = handle.control().clone();

    let mut gate = control.gate.subscribe();
    gate.wait_for(|state| *state == GateState::AwaitingDecision)
        .await
        .expect("gate awaited");
    assert!(control.approve());

    let run = handle.wait().await.expect("run joins");
    assert_eq!(run.state, PipelineState::Completed);
    assert_eq!(control.gate.state(), GateState::Approved);
    assert_eq!(setup.tracking.tag_calls.lock().expect("tag calls").len(), 2);
}
