// Error taxonomy shared by the transport, access, selection and booking layers

use std::fmt;

use thiserror::Error;

use crate::job_store::JobRecord;

// Longest response body kept on an error, in chars
pub const MAX_ERROR_BODY_CHARS: usize = 512;

// Status, body and endpoint of a non-2xx upstream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDetails {
    pub status: u16,
    pub body: String,
    pub endpoint: String,
}

impl ResponseDetails {
    pub fn new(status: u16, body: &str, endpoint: &str) -> Self {
        Self {
            status,
            body: truncate_body(body),
            endpoint: endpoint.to_string(),
        }
    }
}

impl fmt::Display for ResponseDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} returned {}: {}", self.endpoint, self.status, self.body)
    }
}

/// Truncates a response body on a char boundary.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Rate limited: {response} (retry after {retry_after:?}s)")]
    RateLimit {
        response: ResponseDetails,
        retry_after: Option<u64>,
    },

    #[error("Authentication rejected: {0}")]
    Auth(ResponseDetails),

    #[error("Transient upstream failure: {0}")]
    Transient(ResponseDetails),

    #[error("API error: {0}")]
    Http(ResponseDetails),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response shape from {endpoint}: {source}")]
    SchemaMismatch {
        endpoint: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No slots available")]
    NoSlots,

    #[error("No slot matches the requested time window and seating type")]
    NoAcceptableSlot,

    #[error("Slot already taken ({} failed attempt(s))", .failures.len())]
    SlotTaken { failures: Vec<ApiError> },

    #[error("Gave up after {attempts} attempt(s){}", .last.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    ExhaustedRetries {
        attempts: u32,
        last: Option<Box<ApiError>>,
    },

    #[error("Invalid reservation request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Maps a non-2xx status to its error category.
    pub fn from_status(response: ResponseDetails, retry_after: Option<u64>) -> Self {
        match response.status {
            429 => ApiError::RateLimit {
                response,
                retry_after,
            },
            401 | 403 => ApiError::Auth(response),
            500 | 502 => ApiError::Transient(response),
            _ => ApiError::Http(response),
        }
    }

    pub fn schema_mismatch(endpoint: &str, body: &str, source: serde_json::Error) -> Self {
        ApiError::SchemaMismatch {
            endpoint: endpoint.to_string(),
            body: truncate_body(body),
            source,
        }
    }

    pub fn slot_taken() -> Self {
        ApiError::SlotTaken { failures: vec![] }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ApiError::RateLimit { .. })
    }

    /// Server supplied retry-after hint in seconds.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    // Timeouts and connection failures, as opposed to HTTP status errors
    pub fn is_network(&self) -> bool {
        match self {
            ApiError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Status code for errors that came from an upstream response.
    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }

    pub fn response(&self) -> Option<&ResponseDetails> {
        match self {
            ApiError::RateLimit { response, .. }
            | ApiError::Auth(response)
            | ApiError::Transient(response)
            | ApiError::Http(response) => Some(response),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

impl From<figment::Error> for ClientError {
    fn from(e: figment::Error) -> Self {
        ClientError::ConfigError(e.to_string())
    }
}

// Failures of the external job record store
#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid job id: {0}")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt job record: {0}")]
    Serialization(#[from] serde_json::Error),

    // The run finished but its record could not be written back
    #[error("Job {} finished as {:?} but was not saved: {source}", .record.job_id, .record.status)]
    Unsaved {
        record: Box<JobRecord>,
        source: Box<JobStoreError>,
    },
}

pub type Result<T> = std::result::Result<T, ApiError>;
