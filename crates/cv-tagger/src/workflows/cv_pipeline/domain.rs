use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::classification::ClassificationResult;
use super::stage::ItemFailure;

/// Identifier assigned by the tracking service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub String);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Search hit returned by the tracking service. Never mutated after retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: CandidateId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl CandidateRecord {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Attachment entry listed on a candidate profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: Option<String>,
}

/// Full candidate profile, fetched per candidate before downloading the CV.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDetails {
    pub id: CandidateId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub cv_url: Option<String>,
    pub cv_original_url: Option<String>,
    pub cv_original_file: Option<String>,
    pub files: Vec<Attachment>,
}

/// Stable identity of a document, derived from its file stem rather than its bytes.
///
/// Two downloads that land on the same stem share a cache entry even if their contents differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    pub fn new(raw: impl Into<String>) -> Self {
        let sanitized = raw
            .into()
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                other => other,
            })
            .collect();
        Self(sanitized)
    }

    pub fn from_file_name(file_name: &str) -> Self {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(file_name);
        Self::new(stem)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A CV persisted to the working directory by the download stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedDocument {
    /// Relation to the owning candidate; the record itself stays in the run's chain.
    pub candidate_id: CandidateId,
    pub content_key: ContentKey,
    pub file_name: String,
    pub path: PathBuf,
}

impl FetchedDocument {
    pub fn new(candidate_id: CandidateId, file_name: String, path: PathBuf) -> Self {
        Self {
            candidate_id,
            content_key: ContentKey::from_file_name(&file_name),
            file_name,
            path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedText {
    pub content_key: ContentKey,
    pub text: String,
    pub source: ExtractionSource,
}

/// Number of stages in the full sequence, upload included.
pub const TOTAL_STAGES: u8 = 7;

/// Stages of the fixed pipeline sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Retrieve,
    Download,
    Extract,
    Classify,
    Export,
    AwaitConfirmation,
    Upload,
}

impl PipelineStage {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Retrieve => "CV Retrieval",
            Self::Download => "CV Download",
            Self::Extract => "OCR Processing",
            Self::Classify => "AI Analysis",
            Self::Export => "Report Generation",
            Self::AwaitConfirmation => "Upload Confirmation",
            Self::Upload => "Tag Upload",
        }
    }

    /// Past-tense verb used in `verb k/n` progress messages.
    pub const fn progress_verb(self) -> &'static str {
        match self {
            Self::Retrieve => "retrieved",
            Self::Download => "downloaded",
            Self::Extract => "extracted",
            Self::Classify => "analysed",
            Self::Export => "exported",
            Self::AwaitConfirmation => "confirmed",
            Self::Upload => "uploaded",
        }
    }

    pub const fn ordinal(self) -> u8 {
        match self {
            Self::Retrieve => 1,
            Self::Download => 2,
            Self::Extract => 3,
            Self::Classify => 4,
            Self::Export => 5,
            Self::AwaitConfirmation => 6,
            Self::Upload => 7,
        }
    }

    pub const fn state(self) -> PipelineState {
        match self {
            Self::Retrieve => PipelineState::Retrieving,
            Self::Download => PipelineState::Downloading,
            Self::Extract => PipelineState::Extracting,
            Self::Classify => PipelineState::Classifying,
            Self::Export => PipelineState::Exporting,
            Self::AwaitConfirmation => PipelineState::AwaitingConfirmation,
            Self::Upload => PipelineState::Uploading,
        }
    }
}

/// Orchestrator state machine. `Completed`, `Failed`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Retrieving,
    Downloading,
    Extracting,
    Classifying,
    Exporting,
    AwaitingConfirmation,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Retrieving => "Retrieving",
            Self::Downloading => "Downloading",
            Self::Extracting => "Extracting",
            Self::Classifying => "Classifying",
            Self::Exporting => "Exporting",
            Self::AwaitingConfirmation => "Awaiting Confirmation",
            Self::Uploading => "Uploading",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub const fn stage(self) -> Option<PipelineStage> {
        match self {
            Self::Retrieving => Some(PipelineStage::Retrieve),
            Self::Downloading => Some(PipelineStage::Download),
            Self::Extracting => Some(PipelineStage::Extract),
            Self::Classifying => Some(PipelineStage::Classify),
            Self::Exporting => Some(PipelineStage::Export),
            Self::AwaitingConfirmation => Some(PipelineStage::AwaitConfirmation),
            Self::Uploading => Some(PipelineStage::Upload),
            Self::Idle | Self::Completed | Self::Failed | Self::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    /// Completed, but some items were skipped after per-item failures.
    Partial,
    Failure,
    Cancelled,
}

/// One candidate's progress through the stages. Later links stay empty when a stage skipped it.
#[derive(Debug, Clone)]
pub struct CandidateChain {
    pub candidate: CandidateRecord,
    pub document: Option<FetchedDocument>,
    pub text: Option<ExtractedText>,
    pub classification: Option<ClassificationResult>,
}

impl CandidateChain {
    pub fn new(candidate: CandidateRecord) -> Self {
        Self {
            candidate,
            document: None,
            text: None,
            classification: None,
        }
    }
}

/// Tag write-back result for a single candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub candidate_id: CandidateId,
    pub tags: Vec<String>,
}

/// Everything one invocation produced. Owned by the orchestrator until the run ends.
#[derive(Debug)]
pub struct PipelineRun {
    pub state: PipelineState,
    pub outcome: Option<RunOutcome>,
    pub upload_enabled: bool,
    pub chains: Vec<CandidateChain>,
    pub failures: BTreeMap<PipelineStage, Vec<ItemFailure>>,
    pub report_path: Option<PathBuf>,
    pub uploads: Vec<UploadReceipt>,
    pub message: String,
}

impl PipelineRun {
    pub fn new(upload_enabled: bool) -> Self {
        Self {
            state: PipelineState::Idle,
            outcome: None,
            upload_enabled,
            chains: Vec::new(),
            failures: BTreeMap::new(),
            report_path: None,
            uploads: Vec::new(),
            message: String::new(),
        }
    }

    pub fn classified(&self) -> impl Iterator<Item = (&CandidateChain, &ClassificationResult)> {
        self.chains.iter().filter_map(|chain| {
            chain
                .classification
                .as_ref()
                .map(|classification| (chain, classification))
        })
    }

    pub fn classified_count(&self) -> usize {
        self.classified().count()
    }

    pub fn documents_downloaded(&self) -> usize {
        self.chains
            .iter()
            .filter(|chain| chain.document.is_some())
            .count()
    }

    pub fn extractions_from(&self, source: ExtractionSource) -> usize {
        self.chains
            .iter()
            .filter_map(|chain| chain.text.as_ref())
            .filter(|text| text.source == source)
            .count()
    }

    pub fn failure_count(&self, stage: PipelineStage) -> usize {
        self.failures.get(&stage).map_or(0, Vec::len)
    }

    pub fn total_failures(&self) -> usize {
        self.failures.values().map(Vec::len).sum()
    }

    pub(crate) fn record_failures(&mut self, stage: PipelineStage, failures: Vec<ItemFailure>) {
        if !failures.is_empty() {
            self.failures.entry(stage).or_default().extend(failures);
        }
    }

    pub(crate) fn finish(&mut self, state: PipelineState, message: String) {
        self.state = state;
        self.outcome = Some(match state {
            PipelineState::Completed if self.total_failures() > 0 => RunOutcome::Partial,
            PipelineState::Completed => RunOutcome::Success,
            PipelineState::Cancelled => RunOutcome::Cancelled,
            _ => RunOutcome::Failure,
        });
        self.message = message;
    }
}
