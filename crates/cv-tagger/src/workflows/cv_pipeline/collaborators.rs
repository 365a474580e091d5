//! Contracts for the external systems the pipeline talks to.
//!
//! The orchestrator only sees these traits; concrete HTTP clients live in `clients`, and tests
//! substitute in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::classification::{ClassificationResult, InstructionSet};
use super::domain::{CandidateDetails, CandidateId, CandidateRecord};
use super::error::PipelineError;
use super::export::ReportWriter;
use super::retry::RetryExecutor;

/// Which candidates a run picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub created_after: DateTime<Utc>,
    pub untagged_only: bool,
}

impl SearchFilter {
    /// Untagged candidates created within the last `lookback_days`. How many of them a run
    /// processes is decided after sorting, not by the search.
    pub fn recent_untagged(lookback_days: i64) -> Self {
        Self {
            created_after: Utc::now() - ChronoDuration::days(lookback_days.max(0)),
            untagged_only: true,
        }
    }
}

#[async_trait]
pub trait TrackingService: Send + Sync {
    /// Candidates matching `filter`, newest first.
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<CandidateRecord>, PipelineError>;
    async fn fetch_details(&self, id: &CandidateId) -> Result<CandidateDetails, PipelineError>;
    async fn apply_tags(&self, id: &CandidateId, tags: &[String]) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>, PipelineError>;
}

/// Text extraction may take several external calls; each one goes through `retry` on its own
/// so a late transient failure does not repeat the calls that already succeeded.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(
        &self,
        document: &[u8],
        file_name: &str,
        retry: &RetryExecutor,
    ) -> Result<String, PipelineError>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        text: &str,
        instructions: &InstructionSet,
    ) -> Result<ClassificationResult, PipelineError>;
}

/// The full set of collaborators a run needs.
#[derive(Clone)]
pub struct Collaborators {
    pub tracking: Arc<dyn TrackingService>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub extractor: Arc<dyn TextExtractor>,
    pub classifier: Arc<dyn Classifier>,
    pub report: Arc<dyn ReportWriter>,
    /// Used when `report` fails.
    pub fallback_report: Arc<dyn ReportWriter>,
}

/// Picks the CV location: `cv_url`, then `cv_original_url`, then `cv_original_file`, then the
/// first attachment ending in `.pdf`. Empty values are skipped.
pub fn resolve_document_url(details: &CandidateDetails) -> Option<&str> {
    fn present(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|value| !value.trim().is_empty())
    }

    present(&details.cv_url)
        .or_else(|| present(&details.cv_original_url))
        .or_else(|| present(&details.cv_original_file))
        .or_else(|| {
            details
                .files
                .iter()
                .filter_map(|file| present(&file.url))
                .find(|url| url.to_ascii_lowercase().ends_with(".pdf"))
        })
}

/// `CV_{id}_{first}_{last}.pdf` with filesystem-hostile characters replaced.
pub fn document_file_name(details: &CandidateDetails, fallback: &CandidateRecord) -> String {
    fn name_part<'a>(preferred: &'a Option<String>, fallback: &'a str) -> &'a str {
        preferred
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or_else(|| Some(fallback.trim()).filter(|value| !value.is_empty()))
            .unwrap_or("Unknown")
    }

    let raw = format!(
        "CV_{}_{}_{}.pdf",
        fallback.id,
        name_part(&details.first_name, &fallback.first_name),
        name_part(&details.last_name, &fallback.last_name),
    );

    raw.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect()
}
