//! `kid` -> signing key resolution on top of the [`KeyCache`].
//!
//! # Lookup strategy
//!
//! 1. Issuer known (derived from the token's `iss`): O(1) lookup in that
//!    issuer's set.
//! 2. Issuer unknown (token without `iss`): linear scan over every cached set.
//!    This path only exists for legacy tokens whose metadata does not name
//!    the pool; it trusts any pool the directory listed.
//!
//! On a miss the affected issuer(s) are refreshed exactly once and the lookup
//! is retried once. A discovery failure counts as "no keys for this issuer".

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::{Issuer, KeyCache, KeySet, SigningKey};
use crate::{Error, Result};

/// Resolves a token's `kid` to a usable RSA verification key.
#[derive(Clone)]
pub struct KeyResolver {
    cache: Arc<KeyCache>,
}

impl KeyResolver {
    /// Create a resolver over a shared cache
    #[must_use]
    pub fn new(cache: Arc<KeyCache>) -> Self {
        Self { cache }
    }

    /// The cache this resolver reads from
    #[must_use]
    pub fn cache(&self) -> &Arc<KeyCache> {
        &self.cache
    }

    /// Find the key with id `kid`, refreshing on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownKey`] when no (refreshed) key set contains a
    /// usable RSA key with that id.
    pub async fn resolve(&self, kid: &str, issuer: Option<&Issuer>) -> Result<SigningKey> {
        match issuer {
            Some(issuer) => self.resolve_in(kid, issuer).await,
            None => self.resolve_by_scan(kid).await,
        }
    }

    async fn resolve_in(&self, kid: &str, issuer: &Issuer) -> Result<SigningKey> {
        let seen = self.cache.get(issuer.pool_id());
        if let Some(key) = seen.as_deref().and_then(|set| set.usable(kid)) {
            self.cache.record_hit();
            return Ok(key.clone());
        }
        self.cache.record_miss();

        debug!(issuer = %issuer, kid = %kid, "Key not in cached JWKS, refreshing");
        match self.cache.refresh_after_miss(issuer, seen.as_ref()).await {
            Ok(set) => set.usable(kid).cloned().ok_or_else(|| {
                warn!(issuer = %issuer, kid = %kid, keys = set.len(), "Key still absent after refresh");
                unknown(kid, Some(issuer))
            }),
            Err(e) => {
                warn!(issuer = %issuer, kid = %kid, error = %e, "No keys available for issuer");
                Err(unknown(kid, Some(issuer)))
            }
        }
    }

    async fn resolve_by_scan(&self, kid: &str) -> Result<SigningKey> {
        let snapshot = self.cache.all();
        if let Some(key) = find_usable(&snapshot, kid) {
            self.cache.record_hit();
            return Ok(key);
        }
        self.cache.record_miss();

        debug!(kid = %kid, issuers = snapshot.len(), "Key not in any cached JWKS, refreshing all issuers");
        let refreshes = snapshot.iter().filter_map(|set| {
            match self.cache.issuer(set.issuer()) {
                Ok(issuer) => Some(async move {
                    self.cache.refresh_after_miss(&issuer, Some(set)).await
                }),
                Err(_) => None,
            }
        });
        let refreshed: Vec<Arc<KeySet>> = join_all(refreshes)
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect();

        find_usable(&refreshed, kid).ok_or_else(|| {
            warn!(kid = %kid, issuers = refreshed.len(), "Key absent from every refreshed JWKS");
            unknown(kid, None)
        })
    }
}

fn find_usable(sets: &[Arc<KeySet>], kid: &str) -> Option<SigningKey> {
    sets.iter().find_map(|set| set.usable(kid).cloned())
}

fn unknown(kid: &str, issuer: Option<&Issuer>) -> Error {
    Error::UnknownKey {
        kid: kid.to_string(),
        issuer: issuer.map(|issuer| issuer.pool_id().to_string()),
    }
}
