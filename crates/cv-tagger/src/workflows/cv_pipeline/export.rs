use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use super::classification::{ClassificationField, ClassificationResult};
use super::domain::{CandidateChain, CandidateId};

const RESULTS_PREFIX: &str = "cv_analysis_results";

/// One classified candidate as it appears in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub candidate_id: CandidateId,
    pub name: String,
    pub email: String,
    pub labels: [String; 7],
    pub cv_path: String,
}

impl ReportRow {
    pub fn from_chain(chain: &CandidateChain, classification: &ClassificationResult) -> Self {
        Self {
            candidate_id: chain.candidate.id.clone(),
            name: chain.candidate.display_name(),
            email: chain.candidate.email.clone().unwrap_or_default(),
            labels: classification.labels(),
            cv_path: chain
                .document
                .as_ref()
                .map(|document| document.path.display().to_string())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub total_candidates: usize,
    pub analysed: usize,
    pub generated_at: DateTime<Local>,
}

impl ReportSummary {
    pub fn failed(&self) -> usize {
        self.total_candidates.saturating_sub(self.analysed)
    }

    fn stamp(&self) -> String {
        self.generated_at.format("%Y%m%d_%H%M%S").to_string()
    }
}

#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Csv(csv::Error),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Io(err) => write!(f, "failed to write report: {}", err),
            ExportError::Csv(err) => write!(f, "failed to encode report rows: {}", err),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(err) => Some(err),
            ExportError::Csv(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Persists the classified rows and returns the path of the primary artifact.
pub trait ReportWriter: Send + Sync {
    fn format(&self) -> &'static str;
    fn write(&self, rows: &[ReportRow], summary: &ReportSummary) -> Result<PathBuf, ExportError>;
}

fn headers() -> Vec<&'static str> {
    let mut headers = vec!["Candidate ID", "Name", "Email"];
    headers.extend(ClassificationField::ALL.iter().map(|field| field.header()));
    headers.push("CV Path");
    headers
}

/// Results table plus a `_summary.csv` companion.
#[derive(Debug, Clone)]
pub struct CsvReportWriter {
    output_dir: PathBuf,
}

impl CsvReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn write_summary(&self, path: &Path, summary: &ReportSummary) -> Result<(), ExportError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["Metric", "Value"])?;
        let processed_at = summary.generated_at.format("%Y-%m-%d %H:%M:%S").to_string();
        let metrics = [
            ("Total Candidates", summary.total_candidates.to_string()),
            ("Successfully Analyzed", summary.analysed.to_string()),
            ("Failed Analysis", summary.failed().to_string()),
            ("Processing Date", processed_at),
        ];
        for (metric, value) in &metrics {
            writer.write_record([*metric, value.as_str()])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl ReportWriter for CsvReportWriter {
    fn format(&self) -> &'static str {
        "csv"
    }

    fn write(&self, rows: &[ReportRow], summary: &ReportSummary) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.output_dir)?;
        let stamp = summary.stamp();
        let path = self
            .output_dir
            .join(format!("{RESULTS_PREFIX}_{stamp}.csv"));

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(headers())?;
        for row in rows {
            let mut record = vec![
                row.candidate_id.0.as_str(),
                row.name.as_str(),
                row.email.as_str(),
            ];
            record.extend(row.labels.iter().map(String::as_str));
            record.push(row.cv_path.as_str());
            writer.write_record(record)?;
        }
        writer.flush()?;

        let summary_path = self
            .output_dir
            .join(format!("{RESULTS_PREFIX}_{stamp}_summary.csv"));
        self.write_summary(&summary_path, summary)?;

        Ok(path)
    }
}

/// Degraded fallback: one readable block per candidate.
#[derive(Debug, Clone)]
pub struct PlainTextReportWriter {
    output_dir: PathBuf,
}

impl PlainTextReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl ReportWriter for PlainTextReportWriter {
    fn format(&self) -> &'static str {
        "text"
    }

    fn write(&self, rows: &[ReportRow], summary: &ReportSummary) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("{RESULTS_PREFIX}_{}.txt", summary.stamp()));

        let mut body = String::from("CV Analysis Results\n===================\n\n");
        for row in rows {
            let _ = writeln!(body, "Candidate: {} ({})", row.name, row.candidate_id);
            let _ = writeln!(body, "Email: {}", row.email);
            for (field, label) in ClassificationField::ALL.iter().zip(row.labels.iter()) {
                let _ = writeln!(body, "{}: {}", field.header(), label);
            }
            let _ = writeln!(body, "CV Path: {}", row.cv_path);
            body.push_str("----------------------------------------\n");
        }
        let _ = writeln!(
            body,
            "\nTotal: {}, analysed: {}, failed: {}",
            summary.total_candidates,
            summary.analysed,
            summary.failed()
        );

        fs::write(&path, body)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(id: &str, name: &str) -> ReportRow {
        ReportRow {
            candidate_id: CandidateId(id.to_string()),
            name: name.to_string(),
            email: format!("{id}@example.com"),
            labels: [
                "Female",
                "Master",
                "GY 2021",
                "2-2.5y exp",
                "Dutch",
                "N/A",
                "Law",
            ]
            .map(String::from),
            cv_path: format!("data/downloaded_cvs/CV_{id}.pdf"),
        }
    }

    fn summary() -> ReportSummary {
        ReportSummary {
            total_candidates: 3,
            analysed: 2,
            generated_at: Local
                .with_ymd_and_hms(2025, 3, 14, 9, 30, 0)
                .single()
                .expect("valid local time"),
        }
    }

    #[test]
    fn csv_writer_emits_results_and_summary() {
        let dir = tempfile::tempdir().expect("temp dir");
        let writer = CsvReportWriter::new(dir.path().join("output"));

        let path = writer
            .write(&[row("1", "Ada Lovelace"), row("2", "Grace Hopper")], &summary())
            .expect("report written");

        assert!(path.ends_with("cv_analysis_results_20250314_093000.csv"));
        let mut reader = csv::Reader::from_path(&path).expect("readable");
        let header = reader.headers().expect("header row").clone();
        assert_eq!(header.len(), 11);
        assert_eq!(&header[3], "Gender");
        assert_eq!(&header[10], "CV Path");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.expect("row")).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][1], "Grace Hopper");

        let summary_csv = std::fs::read_to_string(
            dir.path()
                .join("output")
                .join("cv_analysis_results_20250314_093000_summary.csv"),
        )
        .expect("summary written");
        assert!(summary_csv.contains("Failed Analysis,1"));
    }

    #[test]
    fn text_writer_lists_each_candidate() {
        let dir = tempfile::tempdir().expect("temp dir");
        let writer = PlainTextReportWriter::new(dir.path());

        let path = writer
            .write(&[row("7", "Alan Turing")], &summary())
            .expect("fallback written");

        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("txt"));
        let body = std::fs::read_to_string(path).expect("readable");
        assert!(body.contains("Candidate: Alan Turing (7)"));
        assert!(body.contains("Mother Tongue: Dutch"));
    }

    #[test]
    fn csv_writer_reports_unwritable_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let blocker = dir.path().join("output");
        std::fs::write(&blocker, "not a directory").expect("seed file");

        let error = CsvReportWriter::new(&blocker)
            .write(&[row("1", "Ada Lovelace")], &summary())
            .expect_err("cannot create output dir");
        assert!(matches!(error, ExportError::Io(_)));
    }
}
