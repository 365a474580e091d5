/// Failure taxonomy shared by every pipeline component and collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Timeouts, refused connections, and other failures worth retrying.
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    /// The external service answered, but refused or failed the request.
    #[error("service error: {0}")]
    Service(String),
    /// A collaborator returned output that does not fit the expected shape.
    #[error("invalid collaborator output: {0}")]
    Validation(String),
    #[error("no cached artifact for {0}")]
    NotFound(String),
    #[error("candidate {0} has no CV attachment")]
    MissingDocument(String),
    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<PipelineError>,
    },
    #[error("failed to write cache entry {key}: {source}")]
    CacheWrite {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("working directory error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }
}
