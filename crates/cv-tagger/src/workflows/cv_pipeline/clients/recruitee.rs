use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::http::{ensure_success, transport_error};
use crate::workflows::cv_pipeline::collaborators::{DocumentFetcher, SearchFilter, TrackingService};
use crate::workflows::cv_pipeline::domain::{
    Attachment, CandidateDetails, CandidateId, CandidateRecord,
};
use crate::workflows::cv_pipeline::error::PipelineError;

/// Applicant-tracking API client.
#[derive(Debug, Clone)]
pub struct RecruiteeClient {
    client: Client,
    base_url: String,
    api_key: String,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<RawCandidate>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    candidate: RawCandidate,
}

#[derive(Debug, Default, Deserialize)]
struct RawCandidate {
    id: Value,
    first_name: Option<String>,
    last_name: Option<String>,
    name: Option<String>,
    #[serde(default)]
    emails: Vec<String>,
    email: Option<String>,
    created_at: Option<String>,
    cv_url: Option<String>,
    cv_original_url: Option<String>,
    cv_original_file: Option<String>,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    url: Option<String>,
}

fn id_from_value(value: &Value) -> CandidateId {
    match value {
        Value::String(id) => CandidateId(id.clone()),
        other => CandidateId(other.to_string()),
    }
}

impl RawCandidate {
    fn email(&self) -> Option<String> {
        self.email
            .clone()
            .or_else(|| self.emails.first().cloned())
            .filter(|email| !email.is_empty())
    }

    /// Splits `name` when the explicit first/last fields are absent.
    fn names(&self) -> (String, String) {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => (first.clone(), last.clone()),
            _ => {
                let full = self.name.clone().unwrap_or_default();
                let mut parts = full.trim().splitn(2, ' ');
                let first = self
                    .first_name
                    .clone()
                    .unwrap_or_else(|| parts.next().unwrap_or_default().to_string());
                let last = self
                    .last_name
                    .clone()
                    .unwrap_or_else(|| parts.next().unwrap_or_default().to_string());
                (first, last)
            }
        }
    }

    fn into_record(self) -> CandidateRecord {
        let (first_name, last_name) = self.names();
        CandidateRecord {
            id: id_from_value(&self.id),
            email: self.email(),
            created_at: self
                .created_at
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|timestamp| timestamp.with_timezone(&Utc)),
            first_name,
            last_name,
        }
    }

    fn into_details(self) -> CandidateDetails {
        CandidateDetails {
            id: id_from_value(&self.id),
            email: self.email(),
            first_name: self.first_name,
            last_name: self.last_name,
            cv_url: self.cv_url,
            cv_original_url: self.cv_original_url,
            cv_original_file: self.cv_original_file,
            files: self
                .files
                .into_iter()
                .map(|file| Attachment { url: file.url })
                .collect(),
        }
    }
}

impl RecruiteeClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            page_size: 200,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    fn search_body(filter: &SearchFilter) -> Value {
        let mut body = json!({
            "query": format!("created_at:>{}", filter.created_after.format("%Y-%m-%d")),
        });
        if filter.untagged_only {
            body["filters_json"] = Value::String(
                json!([{ "field": "tags", "has_none": true }]).to_string(),
            );
        }
        body
    }
}

#[async_trait]
impl TrackingService for RecruiteeClient {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<CandidateRecord>, PipelineError> {
        let url = format!("{}/search/new/candidates", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .query(&[("limit", self.page_size)])
            .json(&Self::search_body(filter))
            .send()
            .await
            .map_err(|e| transport_error("candidate search", e))?;
        let response = ensure_success("candidate search", response).await?;
        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|e| transport_error("candidate search", e))?;

        let mut candidates: Vec<CandidateRecord> = payload
            .hits
            .into_iter()
            .map(RawCandidate::into_record)
            .collect();
        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!(count = candidates.len(), "candidate search returned");
        Ok(candidates)
    }

    async fn fetch_details(&self, id: &CandidateId) -> Result<CandidateDetails, PipelineError> {
        let url = format!("{}/candidates/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| transport_error("candidate details", e))?;
        let response = ensure_success("candidate details", response).await?;
        let payload: DetailsResponse = response
            .json()
            .await
            .map_err(|e| transport_error("candidate details", e))?;
        Ok(payload.candidate.into_details())
    }

    async fn apply_tags(&self, id: &CandidateId, tags: &[String]) -> Result<(), PipelineError> {
        let url = format!("{}/candidates/{}/tags", self.base_url, id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "tags": tags }))
            .send()
            .await
            .map_err(|e| transport_error("tag upload", e))?;
        ensure_success("tag upload", response).await?;
        Ok(())
    }
}

/// Downloads CV files from the pre-signed URLs the tracking service hands out.
#[derive(Debug, Clone)]
pub struct HttpDocumentFetcher {
    client: Client,
}

impl HttpDocumentFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn download(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error("CV download", e))?;
        let response = ensure_success("CV download", response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error("CV download", e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn search_body_filters_untagged_candidates() {
        let filter = SearchFilter {
            created_after: Utc
                .with_ymd_and_hms(2024, 5, 1, 0, 0, 0)
                .single()
                .expect("valid date"),
            untagged_only: true,
        };
        let body = RecruiteeClient::search_body(&filter);
        assert_eq!(body["query"], "created_at:>2024-05-01");
        let filters: Value =
            serde_json::from_str(body["filters_json"].as_str().expect("string filter"))
                .expect("json filter");
        assert_eq!(filters[0]["has_none"], true);
    }

    #[test]
    fn raw_candidates_map_to_records() {
        let raw: RawCandidate = serde_json::from_value(json!({
            "id": 4021,
            "name": "Grace Brewster Hopper",
            "emails": ["grace@example.com"],
            "created_at": "2025-02-10T08:15:00Z"
        }))
        .expect("raw candidate");

        let record = raw.into_record();
        assert_eq!(record.id, CandidateId("4021".to_string()));
        assert_eq!(record.first_name, "Grace");
        assert_eq!(record.last_name, "Brewster Hopper");
        assert_eq!(record.email.as_deref(), Some("grace@example.com"));
        assert!(record.created_at.is_some());
    }

    #[test]
    fn details_keep_attachment_urls() {
        let payload: DetailsResponse = serde_json::from_value(json!({
            "candidate": {
                "id": "77",
                "first_name": "Ada",
                "last_name": "Lovelace",
                "cv_url": null,
                "files": [{ "url": "https://cdn.example.com/ada.pdf" }]
            }
        }))
        .expect("details payload");

        let details = payload.candidate.into_details();
        assert_eq!(details.id, CandidateId("77".to_string()));
        assert_eq!(details.files.len(), 1);
        assert_eq!(
            details.files[0].url.as_deref(),
            Some("https://cdn.example.com/ada.pdf")
        );
    }
}
