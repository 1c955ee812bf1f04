//! Error types for the tenant authorizer

use std::io;

use thiserror::Error;

/// Result type alias for the tenant authorizer
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of response-body bytes kept on a discovery failure.
const MAX_DIAGNOSTIC_BODY: usize = 512;

/// Tenant authorizer errors
#[derive(Error, Debug)]
pub enum Error {
    /// The issuer's well-known JWKS endpoint was unreachable or returned an
    /// error status. `body` holds the (truncated) response payload.
    #[error("JWKS discovery failed for issuer {issuer}: {reason}")]
    KeyDiscovery {
        /// User pool id the fetch was made for
        issuer: String,
        /// Short failure reason (status code, timeout, transport error)
        reason: String,
        /// HTTP status, when the endpoint answered at all
        status: Option<u16>,
        /// Response body captured for diagnostics
        body: Option<String>,
    },

    /// No signing key with this `kid` exists in any cached key set, even after
    /// a refresh.
    #[error("Unknown signing key: {kid}")]
    UnknownKey {
        /// Key id taken from the token header
        kid: String,
        /// Pool id the key was looked up in, unless every pool was scanned
        issuer: Option<String>,
    },

    /// Malformed token, bad signature, expired, or missing tenant claim.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The inbound event does not match either authorizer event shape.
    #[error("Malformed authorizer event: {0}")]
    MalformedEvent(String),

    /// Verification failed and the authorizer signals it as a blanket 401.
    ///
    /// API Gateway matches on this exact message.
    #[error("Unauthorized")]
    Unauthorized,

    /// The invocation ran out of time before a decision was reached.
    #[error("Invocation deadline exceeded")]
    DeadlineExceeded,

    /// Listing issuers from the directory failed
    #[error("Issuer directory error: {0}")]
    Directory(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Build a [`Error::KeyDiscovery`] for a non-2xx discovery response.
    pub fn discovery_status(issuer: impl Into<String>, status: u16, body: &str) -> Self {
        Self::KeyDiscovery {
            issuer: issuer.into(),
            reason: format!("HTTP {status}"),
            status: Some(status),
            body: Some(truncate(body, MAX_DIAGNOSTIC_BODY)),
        }
    }

    /// Build a [`Error::KeyDiscovery`] for a transport-level failure.
    pub fn discovery_failed(issuer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyDiscovery {
            issuer: issuer.into(),
            reason: reason.into(),
            status: None,
            body: None,
        }
    }

    /// Build an [`Error::InvalidToken`]
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken(reason.into())
    }

    /// Whether this failure means "the caller is not trusted" and should be
    /// turned into a deny decision, as opposed to a protocol or runtime fault.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::KeyDiscovery { .. }
                | Self::UnknownKey { .. }
                | Self::InvalidToken(_)
                | Self::DeadlineExceeded
        )
    }

    /// User pool id a key lookup or discovery failure concerns, if any.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        match self {
            Self::KeyDiscovery { issuer, .. } => Some(issuer),
            Self::UnknownKey { issuer, .. } => issuer.as_deref(),
            _ => None,
        }
    }

    /// Short, log-safe label for the failure kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyDiscovery { .. } => "key_discovery",
            Self::UnknownKey { .. } => "unknown_key",
            Self::InvalidToken(_) => "invalid_token",
            Self::MalformedEvent(_) => "malformed_event",
            Self::Unauthorized => "unauthorized",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Directory(_) => "directory",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Http(_) => "http",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Self::InvalidToken(e.to_string())
    }
}

/// Truncate on a char boundary so multi-byte bodies never split.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
