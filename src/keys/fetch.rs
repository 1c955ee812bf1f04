//! JWKS retrieval from an issuer's well-known endpoint.

use std::time::Duration;

use reqwest::header::ACCEPT;
use tracing::debug;

use super::{Issuer, KeySet};
use crate::{Error, Result};

/// Where key sets come from.
///
/// Implementations must be `Send + Sync` because one source is shared by
/// every concurrent invocation in the process.
#[async_trait::async_trait]
pub trait KeySource: Send + Sync + 'static {
    /// Fetch the complete current key set of `issuer`.
    async fn fetch(&self, issuer: &Issuer) -> Result<KeySet>;
}

/// Fetches `GET {issuer}/.well-known/jwks.json` with a bounded timeout.
pub struct HttpKeySource {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpKeySource {
    /// Create a source whose every request (connect + body) is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("tenant-authorizer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, timeout })
    }

    /// Configured per-request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait::async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self, issuer: &Issuer) -> Result<KeySet> {
        let url = issuer.jwks_url();
        debug!(issuer = %issuer, url = %url, "Fetching JWKS");

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::discovery_failed(issuer.pool_id(), describe(&e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::discovery_failed(issuer.pool_id(), describe(&e)))?;

        if !status.is_success() {
            return Err(Error::discovery_status(
                issuer.pool_id(),
                status.as_u16(),
                &String::from_utf8_lossy(&body),
            ));
        }

        KeySet::from_json(issuer.pool_id(), &body)
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}
