use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, warn};

use super::cache::ExtractionCache;
use super::cancellation::CancellationToken;
use super::classification::{ClassificationResult, ClassificationSchema, InstructionSet};
use super::collaborators::{
    document_file_name, resolve_document_url, Collaborators, SearchFilter,
};
use super::domain::{
    CandidateChain, CandidateId, CandidateRecord, ExtractedText, ExtractionSource,
    FetchedDocument, PipelineRun, PipelineStage, PipelineState, UploadReceipt,
};
use super::error::PipelineError;
use super::export::{ReportRow, ReportSummary, ReportWriter};
use super::gate::{ConfirmationGate, GateDecision};
use super::progress::{
    PipelineEvent, ProgressEvent, ProgressObserver, RunCompletion, TracingObserver,
};
use super::retry::{RetryExecutor, RetryPolicy};
use super::stage::{StageItem, StageOutcome, StageReport, StageRunner};
use crate::config::PipelineConfig;

/// Signals shared between a running pipeline and whoever supervises it.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub token: CancellationToken,
    pub gate: ConfirmationGate,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.request();
    }

    pub fn approve(&self) -> bool {
        self.gate.approve()
    }

    pub fn reject(&self) -> bool {
        self.gate.reject()
    }

    /// Declines the upload and stops the run.
    pub fn cancel_upload(&self) {
        self.gate.reject();
        self.token.request();
    }
}

/// Why a run stopped before completing.
enum Halt {
    Failed(String),
    Cancelled(String),
}

/// Tags ready to be written back for one candidate.
struct TagUpload {
    candidate_id: CandidateId,
    label: String,
    tags: Vec<String>,
}

impl StageItem for TagUpload {
    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Runs the fixed stage sequence for one invocation.
///
/// Retrieve, Download, Extract, Classify and Export always run in that order. AwaitConfirmation
/// and Upload follow only when upload is enabled.
pub struct PipelineOrchestrator {
    settings: PipelineConfig,
    collaborators: Collaborators,
    cache: Arc<dyn ExtractionCache>,
    retry: RetryExecutor,
    instructions: InstructionSet,
    observer: Arc<dyn ProgressObserver>,
}

impl PipelineOrchestrator {
    pub fn new(
        settings: PipelineConfig,
        collaborators: Collaborators,
        cache: Arc<dyn ExtractionCache>,
    ) -> Self {
        Self {
            settings,
            collaborators,
            cache,
            retry: RetryExecutor::new(RetryPolicy::default()),
            instructions: ClassificationSchema::default().instruction_set(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_instructions(mut self, instructions: InstructionSet) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Executes one full run. Never panics on collaborator failures; the outcome is in the
    /// returned [`PipelineRun`].
    pub async fn run(&self, control: &RunControl) -> PipelineRun {
        let mut run = PipelineRun::new(self.settings.upload_enabled);
        let (state, message) = match self.drive(&mut run, control).await {
            Ok(message) => (PipelineState::Completed, message),
            Err(Halt::Failed(message)) => (PipelineState::Failed, message),
            Err(Halt::Cancelled(message)) => (PipelineState::Cancelled, message),
        };

        self.transition(&mut run, state, message.clone());
        run.finish(state, message.clone());
        self.observer.notify(&PipelineEvent::Finished(RunCompletion {
            success: state == PipelineState::Completed,
            state,
            message,
        }));
        run
    }

    async fn drive(&self, run: &mut PipelineRun, control: &RunControl) -> Result<String, Halt> {
        let runner = StageRunner::new(
            self.settings.item_delay,
            control.token.clone(),
            self.observer.clone(),
        );

        self.checkpoint(run, control, PipelineStage::Retrieve, "Searching for candidates")?;
        let candidates = self
            .retrieve()
            .await
            .map_err(|error| Halt::Failed(format!("Candidate search failed: {error}")))?;
        if candidates.is_empty() {
            return Err(Halt::Failed("No candidates found".to_string()));
        }
        info!(count = candidates.len(), "candidates retrieved");
        run.chains = candidates.into_iter().map(CandidateChain::new).collect();

        self.checkpoint(
            run,
            control,
            PipelineStage::Download,
            format!("Downloading {} CVs", run.chains.len()),
        )?;
        let items: Vec<(usize, CandidateRecord)> = run
            .chains
            .iter()
            .enumerate()
            .map(|(index, chain)| (index, chain.candidate.clone()))
            .collect();
        let report = runner
            .run(PipelineStage::Download, items, |(index, candidate)| async move {
                self.download(&candidate).await.map(|document| (index, document))
            })
            .await;
        Self::settle(run, report, "No CVs could be downloaded", |run, (index, document)| {
            run.chains[index].document = Some(document);
        })?;

        let items: Vec<(usize, FetchedDocument)> = run
            .chains
            .iter()
            .enumerate()
            .filter_map(|(index, chain)| chain.document.clone().map(|document| (index, document)))
            .collect();
        self.checkpoint(
            run,
            control,
            PipelineStage::Extract,
            format!("Extracting text from {} CVs", items.len()),
        )?;
        let report = runner
            .run(PipelineStage::Extract, items, |(index, document)| async move {
                self.extract(&document).await.map(|text| (index, text))
            })
            .await;
        Self::settle(run, report, "No CVs could be processed with OCR", |run, (index, text)| {
            run.chains[index].text = Some(text);
        })?;

        let items: Vec<(usize, ExtractedText)> = run
            .chains
            .iter()
            .enumerate()
            .filter_map(|(index, chain)| chain.text.clone().map(|text| (index, text)))
            .collect();
        self.checkpoint(
            run,
            control,
            PipelineStage::Classify,
            format!("Analysing {} CVs", items.len()),
        )?;
        let report = runner
            .run(PipelineStage::Classify, items, |(index, text)| async move {
                self.classify(&text).await.map(|result| (index, result))
            })
            .await;
        Self::settle(run, report, "No CVs could be analysed", |run, (index, result)| {
            run.chains[index].classification = Some(result);
        })?;

        self.checkpoint(run, control, PipelineStage::Export, "Generating report")?;
        let report_path = self.export(run).await?;

        if !run.upload_enabled {
            return Ok(self.summary(run));
        }

        // Observers may decide as soon as they see the awaiting state.
        control.gate.request_decision();
        self.transition(
            run,
            PipelineState::AwaitingConfirmation,
            format!(
                "Report ready at {}; waiting for upload confirmation",
                report_path.display()
            ),
        );
        if control.gate.await_decision(&control.token).await == GateDecision::Rejected {
            return Err(Halt::Cancelled(format!(
                "Upload declined; report kept at {}",
                report_path.display()
            )));
        }

        let (items, skipped) = Self::tag_uploads(run);
        self.checkpoint(
            run,
            control,
            PipelineStage::Upload,
            format!("Uploading tags for {} candidates", items.len()),
        )?;
        if skipped > 0 {
            info!(skipped, "candidates without any classified value are not tagged");
        }
        if items.is_empty() {
            return Ok(format!("{}; no tags to upload", self.summary(run)));
        }
        let report = runner
            .run(PipelineStage::Upload, items, |upload| async move {
                self.upload(upload).await
            })
            .await;
        Self::settle(run, report, "No tags could be uploaded", |run, receipt| {
            run.uploads.push(receipt);
        })?;

        Ok(self.summary(run))
    }

    fn transition(&self, run: &mut PipelineRun, state: PipelineState, message: impl Into<String>) {
        run.state = state;
        self.observer
            .notify(&PipelineEvent::StateChanged(ProgressEvent::for_state(
                state,
                message,
            )));
    }

    /// Enters `stage` unless cancellation was requested first.
    fn checkpoint(
        &self,
        run: &mut PipelineRun,
        control: &RunControl,
        stage: PipelineStage,
        message: impl Into<String>,
    ) -> Result<(), Halt> {
        if control.token.is_requested() {
            return Err(Halt::Cancelled(format!(
                "Run cancelled before {}",
                stage.label()
            )));
        }
        self.transition(run, stage.state(), message);
        Ok(())
    }

    /// Folds a stage report into the run: applies outputs, records failures, and decides
    /// whether the run may continue.
    fn settle<O>(
        run: &mut PipelineRun,
        report: StageReport<O>,
        empty_message: &str,
        mut apply: impl FnMut(&mut PipelineRun, O),
    ) -> Result<usize, Halt> {
        let StageReport {
            stage,
            outputs,
            failures,
            outcome,
            attempted,
        } = report;
        let produced = outputs.len();
        for output in outputs {
            apply(run, output);
        }
        let failed = failures.len();
        run.record_failures(stage, failures);

        if outcome == StageOutcome::Cancelled {
            return Err(Halt::Cancelled(format!(
                "Cancelled during {} after {} of {} items",
                stage.label(),
                produced,
                attempted
            )));
        }
        if produced == 0 {
            return Err(Halt::Failed(format!("{empty_message} ({failed} failed)")));
        }
        Ok(produced)
    }

    async fn retrieve(&self) -> Result<Vec<CandidateRecord>, PipelineError> {
        let filter = SearchFilter::recent_untagged(self.settings.lookback_days);
        let tracking = &self.collaborators.tracking;
        let mut candidates = self
            .retry
            .run("search candidates", || tracking.search(&filter))
            .await?;

        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        candidates.truncate(self.settings.candidate_limit);
        Ok(candidates)
    }

    async fn download(
        &self,
        candidate: &CandidateRecord,
    ) -> Result<FetchedDocument, PipelineError> {
        let tracking = &self.collaborators.tracking;
        let details = self
            .retry
            .run("fetch candidate details", || tracking.fetch_details(&candidate.id))
            .await?;

        let url = resolve_document_url(&details)
            .ok_or_else(|| PipelineError::MissingDocument(candidate.id.to_string()))?
            .to_string();
        let fetcher = &self.collaborators.fetcher;
        let bytes = self
            .retry
            .run("download CV", || fetcher.download(&url))
            .await?;

        let file_name = document_file_name(&details, candidate);
        let directory = self.settings.download_dir();
        tokio::fs::create_dir_all(&directory).await?;
        let path = directory.join(&file_name);
        tokio::fs::write(&path, &bytes).await?;
        debug!(candidate = %candidate.id, path = %path.display(), "CV saved");

        Ok(FetchedDocument::new(candidate.id.clone(), file_name, path))
    }

    /// Cached text is returned without touching the network. An unreadable cache entry fails
    /// the item rather than falling back to a second extraction.
    async fn extract(&self, document: &FetchedDocument) -> Result<ExtractedText, PipelineError> {
        let key = &document.content_key;
        if self.cache.has(key).await {
            let text = self.cache.get(key).await?;
            debug!(key = %key, "extraction cache hit");
            return Ok(ExtractedText {
                content_key: key.clone(),
                text,
                source: ExtractionSource::Cache,
            });
        }

        let bytes = tokio::fs::read(&document.path).await?;
        let extractor = &self.collaborators.extractor;
        let text = extractor
            .extract(&bytes, &document.file_name, &self.retry)
            .await?;

        if let Err(error) = self.cache.put(key, &text).await {
            warn!(key = %key, error = %error, "could not cache extracted text");
        }

        Ok(ExtractedText {
            content_key: key.clone(),
            text,
            source: ExtractionSource::Network,
        })
    }

    async fn classify(&self, text: &ExtractedText) -> Result<ClassificationResult, PipelineError> {
        let classifier = &self.collaborators.classifier;
        self.retry
            .run("classify CV", || {
                classifier.classify(&text.text, &self.instructions)
            })
            .await
    }

    /// Report writers do blocking file I/O, so they run on the blocking pool.
    async fn export(&self, run: &mut PipelineRun) -> Result<PathBuf, Halt> {
        let rows: Vec<ReportRow> = run
            .classified()
            .map(|(chain, classification)| ReportRow::from_chain(chain, classification))
            .collect();
        let row_count = rows.len();
        let summary = ReportSummary {
            total_candidates: run.chains.len(),
            analysed: row_count,
            generated_at: Local::now(),
        };

        let primary = Arc::clone(&self.collaborators.report);
        let fallback = Arc::clone(&self.collaborators.fallback_report);
        let path = tokio::task::spawn_blocking(move || {
            write_report(primary.as_ref(), fallback.as_ref(), &rows, &summary)
        })
        .await
        .map_err(|error| Halt::Failed(format!("Report generation failed: {error}")))?
        .map_err(Halt::Failed)?;

        run.report_path = Some(path.clone());
        self.observer.notify(&PipelineEvent::ReportReady {
            path: path.clone(),
            rows: row_count,
        });
        Ok(path)
    }

    fn tag_uploads(run: &PipelineRun) -> (Vec<TagUpload>, usize) {
        let mut skipped = 0;
        let uploads = run
            .classified()
            .filter_map(|(chain, classification)| {
                let tags = classification.tags();
                if tags.is_empty() {
                    skipped += 1;
                    return None;
                }
                Some(TagUpload {
                    candidate_id: chain.candidate.id.clone(),
                    label: chain.candidate.describe(),
                    tags,
                })
            })
            .collect();
        (uploads, skipped)
    }

    async fn upload(&self, upload: TagUpload) -> Result<UploadReceipt, PipelineError> {
        let tracking = &self.collaborators.tracking;
        self.retry
            .run("apply tags", || {
                tracking.apply_tags(&upload.candidate_id, &upload.tags)
            })
            .await?;
        Ok(UploadReceipt {
            candidate_id: upload.candidate_id,
            tags: upload.tags,
        })
    }

    fn summary(&self, run: &PipelineRun) -> String {
        let mut summary = format!(
            "Processed {} candidates: {} CVs downloaded, {} extracted ({} from cache), {} analysed",
            run.chains.len(),
            run.documents_downloaded(),
            run.extractions_from(ExtractionSource::Network)
                + run.extractions_from(ExtractionSource::Cache),
            run.extractions_from(ExtractionSource::Cache),
            run.classified_count(),
        );
        if let Some(path) = &run.report_path {
            summary.push_str(&format!("; report at {}", path.display()));
        }
        if !run.uploads.is_empty() {
            summary.push_str(&format!("; tags uploaded for {} candidates", run.uploads.len()));
        }
        summary
    }
}

/// Writes with `primary`, falling back to `fallback` when it fails.
fn write_report(
    primary: &dyn ReportWriter,
    fallback: &dyn ReportWriter,
    rows: &[ReportRow],
    summary: &ReportSummary,
) -> Result<PathBuf, String> {
    match primary.write(rows, summary) {
        Ok(path) => Ok(path),
        Err(error) => {
            warn!(
                format = primary.format(),
                fallback = fallback.format(),
                error = %error,
                "report writer failed, using fallback"
            );
            fallback.write(rows, summary).map_err(|fallback_error| {
                format!("Report generation failed: {error}; fallback failed: {fallback_error}")
            })
        }
    }
}
