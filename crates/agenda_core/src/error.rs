//! Error taxonomy for the acquisition pipeline.
//!
//! Configuration errors ([`RegistryError`], [`DateError`], [`ConfigError`]) are
//! fatal to the whole invocation. Everything else is scoped to one unit of
//! work (or one event) and is handled by the orchestrator.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown region '{name}'; supported regions: {}", known.join(", "))]
    UnknownRegion { name: String, known: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("invalid calendar date {year:04}-{month:02}-{day:02}")]
    InvalidComponents { year: i32, month: u32, day: u32 },

    #[error("invalid date '{0}': expected format yyyy-MM-dd")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("index backend '{0}' is not supported (expected elasticsearch, sqlite or none)")]
    UnknownBackend(String),

    #[error("missing index endpoint: set index.url, index.cloud_id, ELASTIC_URL or ELASTIC_CLOUD_ID")]
    MissingEndpoint,

    #[error("invalid index url '{0}'")]
    InvalidEndpoint(String),

    #[error("invalid cloud id: {0}")]
    InvalidCloudId(String),

    #[error("could not build HTTP client: {0}")]
    HttpClient(String),

    #[error("could not open {what} at {path}: {message}")]
    Store {
        what: &'static str,
        path: String,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    #[error("host of '{url}' is not in the allowed domains ({allowed})")]
    DisallowedDomain { url: String, allowed: String },

    #[error("request to {url} failed: {message}")]
    Network {
        url: String,
        message: String,
        retryable: bool,
    },

    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("response from {url} is not valid JSON: {message}")]
    NotJson { url: String, message: String },

    #[error("page cache error: {0}")]
    Cache(#[from] rusqlite::Error),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { retryable, .. } => *retryable,
            FetchError::Status { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected response envelope: {0}")]
    Envelope(String),

    #[error("invalid selector {0}")]
    Selector(String),
}

/// Failure to obtain a usable page: either the fetch or the parse failed.
#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index request to {url} failed: {message}")]
    Transport {
        url: String,
        message: String,
        retryable: bool,
    },

    #[error("document {id} rejected with HTTP {status}: {body}")]
    Rejected { id: String, status: u16, body: String },

    #[error("analyzer failed: {0}")]
    Analyzer(String),

    #[error("local index error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("could not serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl IndexError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexError::Transport { retryable, .. } => *retryable,
            IndexError::Rejected { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 502 | 503 | 504)
}
