//! Bearer token verification.
//!
//! `verify` turns an `Authorization` header value into [`VerifiedClaims`]:
//!
//! 1. strip the `Bearer` scheme (case-insensitive, one or more spaces)
//! 2. read `kid` and `alg` from the JWS header; only RS256/384/512 pass
//! 3. read `iss` from the *unverified* payload, only to pick the issuer; an
//!    `iss` outside the configured base URL is rejected before any fetch
//! 4. resolve the key (one refresh on a miss) and verify the signature
//! 5. check expiry with a clock-skew allowance and require the tenant claim
//!
//! Claims are only ever read from the payload after step 4 succeeded.

use std::collections::HashMap;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation, dangerous, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::keys::{Issuer, KeyResolver};
use crate::{Error, Result};

/// Signature algorithms a token header may name.
pub const ACCEPTED_ALGORITHMS: [Algorithm; 3] =
    [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// Claim carrying the Cognito user name
const USERNAME_CLAIM: &str = "cognito:username";

/// Strip the `Bearer` scheme from an `Authorization` header value.
///
/// The scheme is matched case-insensitively and must be followed by at least
/// one space. A value without the scheme is taken as a bare token.
///
/// # Errors
///
/// Returns [`Error::InvalidToken`] if no token remains.
pub fn parse_bearer(header_value: &str) -> Result<&str> {
    let value = header_value.trim();
    let token = match value.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer") => {
            let rest = &value[6..];
            if rest.starts_with(' ') {
                rest.trim_start_matches(' ')
            } else if rest.is_empty() {
                ""
            } else {
                value
            }
        }
        _ => value,
    };
    if token.is_empty() {
        return Err(Error::invalid_token("empty bearer token"));
    }
    Ok(token)
}

/// Claims of a token whose signature, issuer and expiry have been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedClaims {
    /// `sub`
    pub subject: Option<String>,
    /// Pool id of the issuer whose key verified the token
    pub issuer: String,
    /// `exp`, seconds since the epoch
    pub expires_at: u64,
    /// Value of the tenant claim
    pub tenant_id: String,
    /// `cognito:username`
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnverifiedIssuer {
    #[serde(default)]
    iss: Option<String>,
}

/// Verifies bearer tokens against the keys of every trusted issuer.
#[derive(Clone)]
pub struct TokenVerifier {
    resolver: KeyResolver,
    tenant_claim: String,
    clock_skew: Duration,
}

impl TokenVerifier {
    /// Create a verifier.
    #[must_use]
    pub fn new(resolver: KeyResolver, tenant_claim: impl Into<String>, clock_skew: Duration) -> Self {
        Self {
            resolver,
            tenant_claim: tenant_claim.into(),
            clock_skew,
        }
    }

    /// Name of the mandatory tenant claim
    #[must_use]
    pub fn tenant_claim(&self) -> &str {
        &self.tenant_claim
    }

    /// Resolver used for key lookups
    #[must_use]
    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Verify a bearer header value at the current time.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidToken`] for malformed, badly signed or expired tokens
    /// and tokens without a tenant; [`Error::UnknownKey`] when no issuer
    /// publishes the token's `kid`.
    pub async fn verify(&self, bearer: &str) -> Result<VerifiedClaims> {
        self.verify_at(bearer, jsonwebtoken::get_current_timestamp())
            .await
    }

    /// Verify a bearer header value as of `now` (seconds since the epoch).
    ///
    /// # Errors
    ///
    /// See [`TokenVerifier::verify`].
    pub async fn verify_at(&self, bearer: &str, now: u64) -> Result<VerifiedClaims> {
        let token = parse_bearer(bearer)?;

        let header = decode_header(token)?;
        let kid = header
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| Error::invalid_token("token header has no kid"))?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(Error::invalid_token(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let unverified = dangerous::insecure_decode::<UnverifiedIssuer>(token)?.claims;
        let issuer = unverified
            .iss
            .as_deref()
            .map(|iss| Issuer::from_claim(self.resolver.cache().base_url(), iss))
            .transpose()?;

        let key = self.resolver.resolve(kid, issuer.as_ref()).await?;
        let decoding_key = key.decoding_key().ok_or_else(|| Error::UnknownKey {
            kid: kid.to_string(),
            issuer: Some(key.issuer().to_string()),
        })?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = vec![header.alg];
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        let claims = decode::<Map<String, Value>>(token, decoding_key, &validation)?.claims;

        let skew = self.clock_skew.as_secs();
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::invalid_token("exp is not a timestamp"))?;
        if now > expires_at.saturating_add(skew) {
            return Err(Error::invalid_token("token expired"));
        }
        if let Some(nbf) = claims.get("nbf").and_then(Value::as_u64)
            && nbf > now.saturating_add(skew)
        {
            return Err(Error::invalid_token("token not yet valid"));
        }

        let tenant_id = claims
            .get(&self.tenant_claim)
            .and_then(Value::as_str)
            .filter(|tenant| !tenant.is_empty())
            .ok_or_else(|| {
                Error::invalid_token(format!("missing tenant claim {}", self.tenant_claim))
            })?
            .to_string();

        debug!(issuer = %key.issuer(), kid = %kid, tenant_id = %tenant_id, "Token verified");
        Ok(VerifiedClaims {
            subject: string_claim(&claims, "sub"),
            issuer: key.issuer().to_string(),
            expires_at,
            tenant_id,
            username: string_claim(&claims, USERNAME_CLAIM),
        })
    }

    /// Verify the bearer token in a proxy request's headers and return its
    /// tenant id. The `Authorization` header name is matched
    /// case-insensitively.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidToken`] if the header is absent, otherwise as
    /// [`TokenVerifier::verify`].
    pub async fn tenant_id_from_headers(&self, headers: &HashMap<String, String>) -> Result<String> {
        let bearer = authorization_header(headers)
            .ok_or_else(|| Error::invalid_token("missing Authorization header"))?;
        Ok(self.verify(bearer).await?.tenant_id)
    }
}

/// Pool id named by an unverified token's `iss`, for diagnostics only.
///
/// Returns `None` unless the `iss` sits under `base_url`.
#[must_use]
pub fn unverified_issuer(bearer: &str, base_url: &str) -> Option<String> {
    let token = parse_bearer(bearer).ok()?;
    let iss = dangerous::insecure_decode::<UnverifiedIssuer>(token).ok()?.claims.iss?;
    Issuer::from_claim(base_url, &iss)
        .ok()
        .map(|issuer| issuer.pool_id().to_string())
}

/// Case-insensitive `Authorization` lookup.
pub fn authorization_header(headers: &HashMap<String, String>) -> Option<&str> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .map(|(_, value)| value.as_str())
}

fn string_claim(claims: &Map<String, Value>, name: &str) -> Option<String> {
    claims.get(name).and_then(Value::as_str).map(str::to_string)
}
