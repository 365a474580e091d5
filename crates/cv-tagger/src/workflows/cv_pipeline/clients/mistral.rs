use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::http::{ensure_success, transport_error};
use crate::workflows::cv_pipeline::classification::{
    ClassificationResult, ClassificationSchema, InstructionSet,
};
use crate::workflows::cv_pipeline::collaborators::{Classifier, TextExtractor};
use crate::workflows::cv_pipeline::error::PipelineError;
use crate::workflows::cv_pipeline::retry::RetryExecutor;

const PAGE_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OcrPage {
    pub(crate) markdown: String,
    #[serde(default)]
    pub(crate) images: Vec<OcrImage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OcrImage {
    pub(crate) id: String,
}

/// Joins page markdown, dropping image placeholders.
pub(crate) fn combine_pages(pages: &[OcrPage]) -> String {
    pages
        .iter()
        .map(|page| {
            page.images.iter().fold(page.markdown.clone(), |text, image| {
                text.replace(&format!("![{0}]({0})", image.id), "")
            })
        })
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

/// Document OCR: upload, obtain a signed URL, then run the OCR model against it.
#[derive(Debug, Clone)]
pub struct MistralOcr {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl MistralOcr {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn upload(&self, document: &[u8], file_name: &str) -> Result<String, PipelineError> {
        let part = Part::bytes(document.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| transport_error("OCR upload", e))?;
        let form = Form::new().text("purpose", "ocr").part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("OCR upload", e))?;
        let uploaded: UploadedFile = ensure_success("OCR upload", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("OCR upload", e))?;
        Ok(uploaded.id)
    }

    async fn signed_url(&self, file_id: &str) -> Result<String, PipelineError> {
        let response = self
            .client
            .get(format!("{}/files/{}/url", self.base_url, file_id))
            .bearer_auth(&self.api_key)
            .query(&[("expiry", "5")])
            .send()
            .await
            .map_err(|e| transport_error("OCR signed URL", e))?;
        let signed: SignedUrl = ensure_success("OCR signed URL", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("OCR signed URL", e))?;
        Ok(signed.url)
    }

    async fn recognise(&self, document_url: &str) -> Result<Vec<OcrPage>, PipelineError> {
        let response = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "document": { "type": "document_url", "document_url": document_url },
                "include_image_base64": false,
            }))
            .send()
            .await
            .map_err(|e| transport_error("OCR", e))?;
        let ocr: OcrResponse = ensure_success("OCR", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("OCR", e))?;
        Ok(ocr.pages)
    }
}

#[async_trait]
impl TextExtractor for MistralOcr {
    async fn extract(
        &self,
        document: &[u8],
        file_name: &str,
        retry: &RetryExecutor,
    ) -> Result<String, PipelineError> {
        let file_id = retry
            .run("OCR upload", || self.upload(document, file_name))
            .await?;
        let document_url = retry
            .run("OCR signed URL", || self.signed_url(&file_id))
            .await?;
        let pages = retry
            .run("OCR", || self.recognise(&document_url))
            .await?;

        debug!(file_name, pages = pages.len(), "OCR completed");
        Ok(combine_pages(&pages))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Chat-completion classifier constrained to JSON output.
#[derive(Debug, Clone)]
pub struct MistralClassifier {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    schema: Arc<ClassificationSchema>,
}

impl MistralClassifier {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        schema: Arc<ClassificationSchema>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            schema,
        }
    }
}

#[async_trait]
impl Classifier for MistralClassifier {
    async fn classify(
        &self,
        text: &str,
        instructions: &InstructionSet,
    ) -> Result<ClassificationResult, PipelineError> {
        let prompt = format!("{}\n\n--- CV CONTENT ---\n{}", instructions.text, text);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
                "response_format": { "type": "json_object" },
            }))
            .send()
            .await
            .map_err(|e| transport_error("classification", e))?;
        let chat: ChatResponse = ensure_success("classification", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("classification", e))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                PipelineError::Validation("classification response has no choices".to_string())
            })?;
        self.schema.parse_response(&content)
    }
}
