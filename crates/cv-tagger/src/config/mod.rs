use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::workflows::cv_pipeline::RetryPolicy;

const DEFAULT_RECRUITEE_HOST: &str = "https://api.recruitee.com/c";
const DEFAULT_MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
///
/// Loaded once at startup and handed to the orchestrator explicitly; nothing in the pipeline
/// reads the environment on its own.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub tracking: TrackingConfig,
    pub mistral: MistralConfig,
    pub pipeline: PipelineConfig,
    pub retry: RetryPolicy,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let tracking = TrackingConfig {
            company_id: optional_var("RECRUITEE_COMPANY_ID"),
            api_key: optional_var("RECRUITEE_API_KEY"),
            base_url: optional_var("RECRUITEE_BASE_URL"),
            lookback_days: parsed_var("CV_LOOKBACK_DAYS", 365)?,
            search_page_size: parsed_var("CV_SEARCH_PAGE_SIZE", 200)?,
        };

        let mistral = MistralConfig {
            api_key: optional_var("MISTRAL_API_KEY"),
            base_url: optional_var("MISTRAL_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MISTRAL_BASE_URL.to_string()),
            ocr_model: optional_var("MISTRAL_OCR_MODEL")
                .unwrap_or_else(|| "mistral-ocr-latest".to_string()),
            llm_model: optional_var("MISTRAL_LLM_MODEL")
                .unwrap_or_else(|| "mistral-large-latest".to_string()),
        };

        let pipeline = PipelineConfig {
            candidate_limit: parsed_var("CV_CANDIDATE_LIMIT", 50)?,
            item_delay: Duration::from_millis(parsed_var("CV_DELAY_MS", 1000)?),
            upload_enabled: parsed_var("CV_UPLOAD_ENABLED", false)?,
            work_dir: optional_var("CV_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            http_timeout: Duration::from_secs(parsed_var("CV_HTTP_TIMEOUT_SECS", 60)?),
            schema_path: optional_var("CV_SCHEMA_PATH").map(PathBuf::from),
            lookback_days: tracking.lookback_days,
        };

        let retry = RetryPolicy {
            max_attempts: parsed_var("CV_RETRY_MAX_ATTEMPTS", 6)?,
            initial_delay: Duration::from_millis(parsed_var("CV_RETRY_INITIAL_DELAY_MS", 1000)?),
            multiplier: retry_multiplier()?,
            jitter: Duration::from_millis(parsed_var("CV_RETRY_JITTER_MS", 100)?),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            tracking,
            mistral,
            pipeline,
            retry,
        })
    }

    /// Fails fast when the credentials needed to talk to the external services are missing.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.tracking.company_id.is_none() {
            return Err(ConfigError::MissingVar("RECRUITEE_COMPANY_ID"));
        }
        if self.tracking.api_key.is_none() {
            return Err(ConfigError::MissingVar("RECRUITEE_API_KEY"));
        }
        if self.mistral.api_key.is_none() {
            return Err(ConfigError::MissingVar("MISTRAL_API_KEY"));
        }
        Ok(())
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Backoff must not shrink between attempts; NaN and infinities are rejected too.
fn retry_multiplier() -> Result<f64, ConfigError> {
    let multiplier: f64 = parsed_var("CV_RETRY_MULTIPLIER", 2.0)?;
    if multiplier.is_finite() && multiplier >= 1.0 {
        Ok(multiplier)
    } else {
        Err(ConfigError::InvalidValue {
            var: "CV_RETRY_MULTIPLIER",
            value: multiplier.to_string(),
        })
    }
}

fn parsed_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { var: name, value: raw }),
        None => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Applicant-tracking service credentials and search window.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub company_id: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub lookback_days: i64,
    pub search_page_size: u32,
}

impl TrackingConfig {
    /// Explicit base URL, or the company-scoped default.
    pub fn resolved_base_url(&self) -> Option<String> {
        match (&self.base_url, &self.company_id) {
            (Some(base), _) => Some(base.trim_end_matches('/').to_string()),
            (None, Some(company)) => Some(format!("{DEFAULT_RECRUITEE_HOST}/{company}")),
            (None, None) => None,
        }
    }
}

/// OCR and language-model endpoints.
#[derive(Debug, Clone)]
pub struct MistralConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub ocr_model: String,
    pub llm_model: String,
}

/// Run-level knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub candidate_limit: usize,
    /// Courtesy pause between consecutive items of a stage.
    pub item_delay: Duration,
    pub upload_enabled: bool,
    pub work_dir: PathBuf,
    pub http_timeout: Duration,
    pub schema_path: Option<PathBuf>,
    pub lookback_days: i64,
}

impl PipelineConfig {
    pub fn download_dir(&self) -> PathBuf {
        self.work_dir.join("downloaded_cvs")
    }

    pub fn ocr_dir(&self) -> PathBuf {
        self.work_dir.join("ocr_texts")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("output")
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 50,
            item_delay: Duration::from_secs(1),
            upload_enabled: false,
            work_dir: PathBuf::from("data"),
            http_timeout: Duration::from_secs(60),
            schema_path: None,
            lookback_days: 365,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { var: &'static str, value: String },
    MissingVar(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { var, value } => {
                write!(f, "{var} has an invalid value '{value}'")
            }
            ConfigError::MissingVar(var) => write!(f, "{var} must be set"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidValue { .. }
            | ConfigError::MissingVar(_) => None,
        }
    }
}
