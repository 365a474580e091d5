use std::error::Error as _;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use crate::workflows::cv_pipeline::error::PipelineError;

const BODY_SNIPPET_LIMIT: usize = 300;

pub fn build_client(timeout: Duration) -> Result<Client, PipelineError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(concat!("cv-tagger/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PipelineError::Service(format!("failed to build HTTP client: {e}")))
}

/// Timeouts, connection failures, interrupted bodies and I/O errors while sending are worth
/// retrying. Errors raised while building the request never are.
pub(crate) fn transport_error(context: &str, error: reqwest::Error) -> PipelineError {
    if is_transient_transport(&error) {
        PipelineError::TransientNetwork(format!("{context}: {error}"))
    } else if error.is_decode() {
        PipelineError::Validation(format!("{context}: undecodable response: {error}"))
    } else {
        PipelineError::Service(format!("{context}: {error}"))
    }
}

fn is_transient_transport(error: &reqwest::Error) -> bool {
    if error.is_builder() {
        return false;
    }
    error.is_timeout()
        || error.is_connect()
        || error.is_body()
        || (error.is_request() && has_io_source(error))
}

fn has_io_source(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(cause) = source {
        if cause.is::<std::io::Error>() {
            return true;
        }
        source = cause.source();
    }
    false
}

pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Turns a non-2xx response into the matching error, keeping a short body excerpt.
pub(crate) async fn ensure_success(
    context: &str,
    response: Response,
) -> Result<Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(BODY_SNIPPET_LIMIT).collect();
    let message = format!("{context}: HTTP {status}: {excerpt}");
    if is_transient_status(status) {
        Err(PipelineError::TransientNetwork(message))
    } else {
        Err(PipelineError::Service(message))
    }
}
