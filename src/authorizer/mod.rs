//! Lambda authorizer entry point.
//!
//! One [`Authorizer`] lives for the whole process and is shared by every
//! concurrent invocation. Per invocation:
//!
//! ```text
//! event ──► warm-up? ──yes──► {} (no cache access)
//!             │ no
//!             ▼
//!          bearer? ──no──► deny
//!             │
//!             ▼
//!   verify (bounded by deadline - slack) ──ok──► allow + TenantId
//!             │ InvalidToken / UnknownKey / timeout
//!             ▼
//!          deny policy  or  Err(Unauthorized)   (per DenyMode)
//! ```
//!
//! A malformed event fails the invocation in both modes.

mod event;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

pub use event::{AuthorizationRequest, AuthorizerEvent};

use crate::audit::{self, AuditEvent};
use crate::config::{Config, DenyMode};
use crate::keys::{HttpKeySource, KeyCache, KeyResolver};
use crate::policy::{self, AuthorizationDecision, Effect, MethodArn};
use crate::token::{TokenVerifier, VerifiedClaims};
use crate::{Error, Result};

/// Per-invocation metadata from the runtime.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Lambda request id
    pub request_id: String,
    /// Point in time by which a response must have been sent
    pub deadline: Option<Instant>,
}

impl Invocation {
    /// Build from a Lambda request id and its deadline in milliseconds since
    /// the Unix epoch.
    #[must_use]
    pub fn from_lambda(request_id: &str, deadline_ms: u64) -> Self {
        Self {
            request_id: request_id.to_string(),
            deadline: deadline_from_epoch_ms(deadline_ms),
        }
    }
}

/// Convert an epoch-milliseconds deadline to a monotonic [`Instant`].
///
/// Returns `None` for a zero deadline (no deadline known). A deadline in the
/// past maps to "now".
#[must_use]
pub fn deadline_from_epoch_ms(deadline_ms: u64) -> Option<Instant> {
    if deadline_ms == 0 {
        return None;
    }
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    let remaining = Duration::from_millis(deadline_ms.saturating_sub(now_ms));
    Some(Instant::now() + remaining)
}

/// What the function returns to API Gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AuthorizerResponse {
    /// An allow or deny policy
    Decision(AuthorizationDecision),
    /// Warm-up acknowledgement, serialized as `{}`
    Acknowledged {},
}

impl AuthorizerResponse {
    /// The decision, unless this was a warm-up
    #[must_use]
    pub fn decision(&self) -> Option<&AuthorizationDecision> {
        match self {
            Self::Decision(decision) => Some(decision),
            Self::Acknowledged {} => None,
        }
    }
}

/// Shared, process-lifetime authorizer.
pub struct Authorizer {
    verifier: TokenVerifier,
    deny_mode: DenyMode,
    warmup_source: String,
    region: String,
    deadline_slack: Duration,
}

impl Authorizer {
    /// Create an authorizer from a verifier and the loaded configuration.
    #[must_use]
    pub fn new(verifier: TokenVerifier, config: &Config) -> Self {
        Self {
            verifier,
            deny_mode: config.deny_mode,
            warmup_source: config.warmup_source.clone(),
            region: config.region.clone(),
            deadline_slack: config.deadline_slack,
        }
    }

    /// Wire up the production stack: HTTPS key source, empty key cache,
    /// resolver and verifier.
    ///
    /// The cache still has to be warmed with
    /// [`KeyCache::initialize`](crate::keys::KeyCache::initialize).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = HttpKeySource::new(config.fetch_timeout)?;
        let cache = Arc::new(
            KeyCache::new(config.resolved_issuer_base_url(), Arc::new(source))
                .with_directory_timeout(config.directory.timeout),
        );
        let verifier = TokenVerifier::new(
            KeyResolver::new(cache),
            config.tenant_claim.clone(),
            config.clock_skew,
        );
        Ok(Self::new(verifier, config))
    }

    /// The process-wide key cache
    #[must_use]
    pub fn cache(&self) -> &Arc<KeyCache> {
        self.verifier.resolver().cache()
    }

    /// The token verifier
    #[must_use]
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Handle one raw Lambda event.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedEvent`] when the event cannot be understood
    /// - [`Error::Unauthorized`] for verification failures in
    ///   [`DenyMode::Unauthorized`]
    pub async fn handle(&self, payload: &Value, invocation: &Invocation) -> Result<AuthorizerResponse> {
        let event = AuthorizerEvent::parse(payload, &self.warmup_source, &self.region)
            .inspect_err(|e| warn!(request_id = %invocation.request_id, error = %e, "Rejecting malformed event"))?;

        match event {
            AuthorizerEvent::Warmup => {
                info!(request_id = %invocation.request_id, "Warm-up ping");
                audit::emit(&AuditEvent::warmup().with_request_id(&invocation.request_id));
                Ok(AuthorizerResponse::Acknowledged {})
            }
            AuthorizerEvent::Authorize(request) => self.authorize(&request, invocation).await,
        }
    }

    /// Authorize a parsed request.
    ///
    /// # Errors
    ///
    /// See [`Authorizer::handle`].
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        invocation: &Invocation,
    ) -> Result<AuthorizerResponse> {
        let Some(bearer) = request.bearer.as_deref() else {
            return self.reject(
                Error::invalid_token("no bearer token"),
                &request.target,
                invocation,
                None,
            );
        };

        match self.verify_within_deadline(bearer, invocation).await {
            Ok(claims) => Ok(self.accept(&claims, &request.target, invocation)),
            Err(e) => self.reject(e, &request.target, invocation, Some(bearer)),
        }
    }

    async fn verify_within_deadline(&self, bearer: &str, invocation: &Invocation) -> Result<VerifiedClaims> {
        let Some(deadline) = invocation.deadline else {
            return self.verifier.verify(bearer).await;
        };
        let budget = deadline
            .saturating_duration_since(Instant::now())
            .saturating_sub(self.deadline_slack);
        if budget.is_zero() {
            return Err(Error::DeadlineExceeded);
        }
        tokio::time::timeout(budget, self.verifier.verify(bearer))
            .await
            .map_err(|_| Error::DeadlineExceeded)?
    }

    fn accept(&self, claims: &VerifiedClaims, target: &MethodArn, invocation: &Invocation) -> AuthorizerResponse {
        let decision = policy::allow(&target.account_id, &target.resource_pattern(), &claims.tenant_id);

        info!(
            request_id = %invocation.request_id,
            issuer = %claims.issuer,
            tenant_id = %claims.tenant_id,
            "Request authorized"
        );
        audit::emit(
            &AuditEvent::allowed(&claims.issuer, &claims.tenant_id, &target.account_id)
                .with_request_id(&invocation.request_id),
        );
        record_decision(Effect::Allow);

        AuthorizerResponse::Decision(decision)
    }

    fn reject(
        &self,
        error: Error,
        target: &MethodArn,
        invocation: &Invocation,
        bearer: Option<&str>,
    ) -> Result<AuthorizerResponse> {
        if !error.is_denial() {
            warn!(request_id = %invocation.request_id, error = %error, "Authorization failed with a runtime error");
            return Err(error);
        }

        let event = self.denial_event(&error, &invocation.request_id, bearer);
        warn!(
            request_id = %invocation.request_id,
            issuer = event.issuer.as_deref().unwrap_or("-"),
            kid = event.kid.as_deref().unwrap_or("-"),
            failure = error.kind(),
            reason = %error,
            "Request denied"
        );
        audit::emit(&event);
        record_decision(Effect::Deny);

        match self.deny_mode {
            DenyMode::Policy => Ok(AuthorizerResponse::Decision(policy::deny(
                &target.account_id,
                &target.resource_pattern(),
            ))),
            DenyMode::Unauthorized => Err(Error::Unauthorized),
        }
    }

    /// Audit record for a denial. The issuer comes from the failed lookup
    /// when there was one, otherwise from the token's unverified `iss`.
    fn denial_event(&self, error: &Error, request_id: &str, bearer: Option<&str>) -> AuditEvent {
        let issuer = error.issuer().map(str::to_string).or_else(|| {
            bearer.and_then(|bearer| crate::token::unverified_issuer(bearer, self.cache().base_url()))
        });
        AuditEvent::denied(error.kind(), error.to_string())
            .with_request_id(request_id)
            .with_kid(bearer.and_then(kid_of).as_deref())
            .with_issuer(issuer.as_deref())
    }
}

/// `kid` from an unverified token header, for diagnostics only.
fn kid_of(bearer: &str) -> Option<String> {
    let token = crate::token::parse_bearer(bearer).ok()?;
    jsonwebtoken::decode_header(token).ok()?.kid
}

fn record_decision(effect: Effect) {
    telemetry_metrics::counter!("authorizer_decisions_total", "effect" => effect.as_str()).increment(1);
}

impl From<Error> for lambda_runtime::Diagnostic {
    fn from(error: Error) -> Self {
        Self {
            error_type: error.kind().to_string(),
            error_message: error.to_string(),
        }
    }
}
