use thiserror::Error;

/// Failure of a single extraction strategy or of the OCR fallback for one page.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("{strategy} extraction failed: {details}")]
    Strategy {
        strategy: &'static str,
        details: String,
    },

    #[error("ocr unavailable: {0}")]
    OcrUnavailable(String),

    #[error("ocr failed: {0}")]
    OcrFailed(String),
}

impl From<lopdf::Error> for ExtractError {
    fn from(error: lopdf::Error) -> Self {
        Self::PdfParse(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding service credential is not configured")]
    MissingCredential,

    #[error("embedding service returned {status}: {details}")]
    Backend { status: u16, details: String },

    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("store request rejected: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generative service credential is not configured")]
    MissingCredential,

    #[error("generative service timed out")]
    Timeout,

    #[error("generative service rejected the credential: {0}")]
    Unauthorized(String),

    #[error("generative service rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("generative service returned {status}: {details}")]
    Backend { status: u16, details: String },

    #[error("generative service returned no text")]
    EmptyResponse,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited(_) => true,
            Self::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("question embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Store(#[from] StoreError),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(#[from] GenerationError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid setting {name}: {details}")]
    Invalid { name: &'static str, details: String },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
