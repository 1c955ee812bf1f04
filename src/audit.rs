//! Audit logging for authorization decisions and key lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with a JSON `audit` field, so
//! the trail is queryable by any log aggregator (CloudWatch Logs Insights,
//! Loki, Datadog). Tokens and key material are never part of an event.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `authorizer.allow` | A token verified and an Allow policy was returned |
//! | `authorizer.deny` | Verification failed and a Deny decision (or 401) was returned |
//! | `authorizer.warmup` | A warm-up ping was acknowledged without verification |
//! | `keys.refreshed` | An issuer's key set was fetched and replaced |
//! | `keys.discovery_failed` | An issuer's JWKS endpoint failed or timed out |

use serde::Serialize;

/// Structured audit event.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuditEvent {
    /// Event type string (e.g., `"authorizer.allow"`).
    pub event: &'static str,
    /// Lambda request id, when the event belongs to an invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// User pool id involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Key id from the token header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Tenant the caller was authorized for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Principal returned to the gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    /// Number of keys in a refreshed set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_count: Option<usize>,
    /// Failure category (see [`crate::Error::kind`]).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<&'static str>,
    /// Human-readable reason for denial or error events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            request_id: None,
            issuer: None,
            kid: None,
            tenant_id: None,
            principal_id: None,
            key_count: None,
            failure: None,
            reason: None,
        }
    }

    /// Construct an `authorizer.allow` event.
    #[must_use]
    pub fn allowed(issuer: &str, tenant_id: &str, principal_id: &str) -> Self {
        Self {
            issuer: Some(issuer.to_string()),
            tenant_id: Some(tenant_id.to_string()),
            principal_id: Some(principal_id.to_string()),
            ..Self::new("authorizer.allow")
        }
    }

    /// Construct an `authorizer.deny` event.
    #[must_use]
    pub fn denied(failure: &'static str, reason: impl Into<String>) -> Self {
        Self {
            failure: Some(failure),
            reason: Some(reason.into()),
            ..Self::new("authorizer.deny")
        }
    }

    /// Construct an `authorizer.warmup` event.
    #[must_use]
    pub fn warmup() -> Self {
        Self::new("authorizer.warmup")
    }

    /// Construct a `keys.refreshed` event.
    #[must_use]
    pub fn keys_refreshed(issuer: &str, key_count: usize) -> Self {
        Self {
            issuer: Some(issuer.to_string()),
            key_count: Some(key_count),
            ..Self::new("keys.refreshed")
        }
    }

    /// Construct a `keys.discovery_failed` event.
    #[must_use]
    pub fn discovery_failed(issuer: &str, reason: impl Into<String>) -> Self {
        Self {
            issuer: Some(issuer.to_string()),
            failure: Some("key_discovery"),
            reason: Some(reason.into()),
            ..Self::new("keys.discovery_failed")
        }
    }

    /// Attach the Lambda request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: &str) -> Self {
        if !request_id.is_empty() {
            self.request_id = Some(request_id.to_string());
        }
        self
    }

    /// Attach the token's key id.
    #[must_use]
    pub fn with_kid(mut self, kid: Option<&str>) -> Self {
        self.kid = kid.map(str::to_string);
        self
    }

    /// Attach the issuer, when known.
    #[must_use]
    pub fn with_issuer(mut self, issuer: Option<&str>) -> Self {
        if let Some(issuer) = issuer {
            self.issuer = Some(issuer.to_string());
        }
        self
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
///
/// ```text
/// INFO tenant_authorizer::audit audit={"event":"authorizer.allow","tenant_id":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, event = event.event, "authorizer audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
