//! Crate-wide error taxonomy.
//!
//! Every public operation returns `Result<T, Error>` instead of panicking or
//! collapsing failures into strings. Variants map directly onto the error
//! taxonomy table in the design notes; callers are expected to match on
//! `Error` rather than parse `Display` output.

use std::time::Duration;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("request scheme rejected: only https is allowed for {host}")]
    SchemeRejected { host: String },

    #[error("outbound request to {host} blocked by SSRF guard")]
    SsrfBlocked { host: String },

    #[error("instance {host} is blocked: {reason}")]
    InstanceBlocked { host: String, reason: String },

    #[error("local rate limit exceeded for caller {caller}")]
    LocalRateLimitExceeded { caller: String },

    #[error("instance {host} is rate limited, retry after {retry_after:?}")]
    InstanceRateLimited {
        host: String,
        retry_after: Duration,
    },

    #[error("request to {host} timed out")]
    Timeout { host: String },

    #[error("network error contacting {host}: {source}")]
    NetworkError {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("client error from {host}: HTTP {status}")]
    ClientError { host: String, status: u16 },

    #[error("server error from {host}: HTTP {status}")]
    ServerError { host: String, status: u16 },

    #[error("actor {identifier} not found")]
    ActorNotFound { identifier: String },

    #[error("actor {identifier} has no discoverable activity+json link")]
    ActorNotDiscoverable { identifier: String },

    #[error("actor {identifier} unavailable: HTTP {status}")]
    ActorUnavailable { identifier: String, status: u16 },

    #[error("actor {identifier} document is malformed: {message}")]
    ActorMalformed { identifier: String, message: String },

    #[error("actor {identifier} unreachable")]
    ActorUnreachable { identifier: String },

    #[error("webfinger identifier is invalid: {identifier}")]
    WebfingerWrongFormat { identifier: String },

    #[error("webfinger identifier domain {domain} does not match requested host {host}")]
    WebfingerWrongDomain { domain: String, host: String },

    #[error("write operations are not enabled: no account is configured")]
    WriteNotEnabled,

    #[error("account {account_id} has invalid credentials")]
    InvalidCredentials { account_id: String },

    #[error("failed to verify credentials for account {account_id}: {message}")]
    VerifyFailed { account_id: String, message: String },

    #[error("account {account_id} is not registered")]
    UnknownAccount { account_id: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation not supported by this adapter: {operation}")]
    NotSupported { operation: String },

    #[error("failed to parse URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("failed to decode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same request (without caller intervention) might
    /// succeed. Used by the operation layer's single-retry policy for
    /// idempotent reads (§7: one retry on `Timeout`/`NetworkError`/`ServerError`).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::NetworkError { .. } | Error::ServerError { .. }
        )
    }

    /// Construct a `NetworkError` from a `reqwest::Error`, classifying
    /// timeouts into the dedicated `Timeout` variant.
    pub fn from_reqwest(host: impl Into<String>, source: reqwest::Error) -> Self {
        let host = host.into();
        if source.is_timeout() {
            Error::Timeout { host }
        } else {
            Error::NetworkError { host, source }
        }
    }
}
