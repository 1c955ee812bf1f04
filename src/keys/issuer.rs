//! Issuer identity: one identity-provider user pool.
//!
//! A Cognito token's `iss` claim is `{base_url}/{pool_id}` and the pool's
//! published keys live at `{base_url}/{pool_id}/.well-known/jwks.json`.

use std::fmt;

use crate::{Error, Result};

/// Path appended to the issuer URL to reach its JWKS document.
pub const JWKS_PATH: &str = ".well-known/jwks.json";

/// One user pool that mints and signs tokens. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Issuer {
    pool_id: String,
    url: String,
}

impl Issuer {
    /// Build an issuer from the provider base URL and a pool id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pool id is empty or contains a path
    /// separator.
    pub fn new(base_url: &str, pool_id: &str) -> Result<Self> {
        let pool_id = pool_id.trim();
        if pool_id.is_empty() || pool_id.contains('/') {
            return Err(Error::Config(format!("invalid user pool id: {pool_id:?}")));
        }
        Ok(Self {
            pool_id: pool_id.to_string(),
            url: format!("{}/{pool_id}", base_url.trim_end_matches('/')),
        })
    }

    /// Derive the issuer from a token's (not yet verified) `iss` claim.
    ///
    /// The claim must sit directly under `base_url`; a token naming any
    /// other host is rejected so keys are never fetched from a location the
    /// caller chose.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] when the claim is not a pool URL under
    /// `base_url`.
    pub fn from_claim(base_url: &str, iss: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        let pool_id = iss
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .ok_or_else(|| Error::invalid_token(format!("untrusted issuer: {iss}")))?;
        Self::new(base, pool_id).map_err(|_| Error::invalid_token(format!("untrusted issuer: {iss}")))
    }

    /// User pool id (the cache key)
    #[must_use]
    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// Full issuer URL, as it appears in the `iss` claim
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Discovery endpoint for this issuer's signing keys
    #[must_use]
    pub fn jwks_url(&self) -> String {
        format!("{}/{JWKS_PATH}", self.url)
    }
}

impl fmt::Display for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pool_id)
    }
}
