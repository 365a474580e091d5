use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use cv_tagger::config::{AppConfig, ConfigError, PipelineConfig};
use cv_tagger::error::AppError;
use cv_tagger::workflows::cv_pipeline::clients::{
    build_client, HttpDocumentFetcher, MistralClassifier, MistralOcr, RecruiteeClient,
};
use cv_tagger::workflows::cv_pipeline::{
    ClassificationSchema, Collaborators, CsvReportWriter, EventLog, FileCache, InstructionSet,
    PipelineOrchestrator, PlainTextReportWriter, ProgressObserver, RetryExecutor, RetryPolicy,
    RunHandle, RunLauncher, RunRequest, TracingObserver,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Everything needed to start a run, resolved once from configuration.
#[derive(Clone)]
pub(crate) struct PipelineFactory {
    settings: PipelineConfig,
    retry: RetryPolicy,
    collaborators: Collaborators,
    instructions: InstructionSet,
}

impl PipelineFactory {
    pub(crate) fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let schema = Arc::new(load_schema(&config.pipeline)?);
        let instructions = schema.instruction_set();
        let collaborators = build_collaborators(config, schema)?;
        Ok(Self {
            settings: config.pipeline.clone(),
            retry: config.retry.clone(),
            collaborators,
            instructions,
        })
    }

    pub(crate) fn build(
        &self,
        request: &RunRequest,
        observer: Arc<dyn ProgressObserver>,
    ) -> PipelineOrchestrator {
        let settings = apply_overrides(self.settings.clone(), request);
        let cache = Arc::new(FileCache::new(settings.ocr_dir()));
        PipelineOrchestrator::new(settings, self.collaborators.clone(), cache)
            .with_retry(RetryExecutor::new(self.retry.clone()))
            .with_instructions(self.instructions.clone())
            .with_observer(observer)
    }
}

impl RunLauncher for PipelineFactory {
    fn launch(&self, request: RunRequest, events: Arc<EventLog>) -> Result<RunHandle, AppError> {
        let observers: Vec<Arc<dyn ProgressObserver>> = vec![Arc::new(TracingObserver), events];
        let orchestrator = self.build(&request, Arc::new(observers));
        Ok(RunHandle::spawn(Arc::new(orchestrator)))
    }
}

pub(crate) fn apply_overrides(mut settings: PipelineConfig, request: &RunRequest) -> PipelineConfig {
    if let Some(limit) = request.limit {
        settings.candidate_limit = limit;
    }
    if let Some(upload) = request.upload {
        settings.upload_enabled = upload;
    }
    if let Some(delay_ms) = request.delay_ms {
        settings.item_delay = Duration::from_millis(delay_ms);
    }
    settings
}

fn load_schema(settings: &PipelineConfig) -> Result<ClassificationSchema, AppError> {
    match &settings.schema_path {
        Some(path) => ClassificationSchema::from_path(path)
            .map_err(|err| AppError::Run(format!("{} ({})", err, path.display()))),
        None => Ok(ClassificationSchema::default()),
    }
}

fn build_collaborators(
    config: &AppConfig,
    schema: Arc<ClassificationSchema>,
) -> Result<Collaborators, AppError> {
    config.require_credentials()?;
    let tracking_url = config
        .tracking
        .resolved_base_url()
        .ok_or(ConfigError::MissingVar("RECRUITEE_COMPANY_ID"))?;
    let tracking_key = config
        .tracking
        .api_key
        .clone()
        .ok_or(ConfigError::MissingVar("RECRUITEE_API_KEY"))?;
    let mistral_key = config
        .mistral
        .api_key
        .clone()
        .ok_or(ConfigError::MissingVar("MISTRAL_API_KEY"))?;

    let client = build_client(config.pipeline.http_timeout)?;
    let output_dir = config.pipeline.output_dir();

    Ok(Collaborators {
        tracking: Arc::new(
            RecruiteeClient::new(client.clone(), tracking_url, tracking_key)
                .with_page_size(config.tracking.search_page_size),
        ),
        fetcher: Arc::new(HttpDocumentFetcher::new(client.clone())),
        extractor: Arc::new(MistralOcr::new(
            client.clone(),
            &config.mistral.base_url,
            mistral_key.clone(),
            &config.mistral.ocr_model,
        )),
        classifier: Arc::new(MistralClassifier::new(
            client,
            &config.mistral.base_url,
            mistral_key,
            &config.mistral.llm_model,
            schema,
        )),
        report: Arc::new(CsvReportWriter::new(output_dir.clone())),
        fallback_report: Arc::new(PlainTextReportWriter::new(output_dir)),
    })
}
