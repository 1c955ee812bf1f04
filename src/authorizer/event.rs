//! Inbound authorizer events.
//!
//! Three shapes reach the function:
//!
//! - warm-up pings: `{"source": "warmup"}` (marker configurable)
//! - TOKEN authorizer: `{"type": "TOKEN", "authorizationToken", "methodArn"}`
//! - REQUEST authorizer: a proxy-style request with `headers` and
//!   `requestContext { accountId, apiId, stage }` (and usually `methodArn`)

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::policy::MethodArn;
use crate::token::authorization_header;
use crate::{Error, Result};

/// A classified authorizer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizerEvent {
    /// Keep-warm ping; never verified
    Warmup,
    /// Token to verify for a method ARN
    Authorize(AuthorizationRequest),
}

/// What a non-warm-up invocation asks to authorize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Raw `Authorization` value (may still carry the `Bearer` scheme).
    /// `None` when the caller sent no token at all.
    pub bearer: Option<String>,
    /// Stage the decision applies to
    pub target: MethodArn,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    source: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    authorization_token: Option<String>,
    #[serde(default)]
    method_arn: Option<String>,
    #[serde(default)]
    headers: Option<HashMap<String, Value>>,
    #[serde(default)]
    request_context: Option<RawRequestContext>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequestContext {
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    api_id: Option<String>,
    #[serde(default)]
    stage: Option<String>,
}

impl AuthorizerEvent {
    /// Classify a raw Lambda payload.
    ///
    /// `region` fills the resource pattern of REQUEST events that carry no
    /// `methodArn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedEvent`] when the payload is not an object or
    /// does not identify the API stage being called.
    pub fn parse(payload: &Value, warmup_source: &str, region: &str) -> Result<Self> {
        if !payload.is_object() {
            return Err(Error::MalformedEvent("event is not a JSON object".to_string()));
        }
        let raw: RawEvent = serde_json::from_value(payload.clone())
            .map_err(|e| Error::MalformedEvent(e.to_string()))?;

        if raw.source.as_deref() == Some(warmup_source) {
            return Ok(Self::Warmup);
        }

        let is_request = match raw.kind.as_deref() {
            Some(kind) if kind.eq_ignore_ascii_case("REQUEST") => true,
            Some(kind) if kind.eq_ignore_ascii_case("TOKEN") => false,
            Some(other) => {
                return Err(Error::MalformedEvent(format!("unsupported authorizer type {other}")));
            }
            None => raw.authorization_token.is_none() && raw.headers.is_some(),
        };

        let request = if is_request {
            Self::request_authorizer(raw, region)?
        } else {
            Self::token_authorizer(raw)?
        };
        Ok(Self::Authorize(request))
    }

    fn token_authorizer(raw: RawEvent) -> Result<AuthorizationRequest> {
        let arn = raw
            .method_arn
            .ok_or_else(|| Error::MalformedEvent("missing methodArn".to_string()))?;
        Ok(AuthorizationRequest {
            bearer: raw.authorization_token.filter(|t| !t.trim().is_empty()),
            target: MethodArn::parse(&arn)?,
        })
    }

    fn request_authorizer(raw: RawEvent, region: &str) -> Result<AuthorizationRequest> {
        let headers: HashMap<String, String> = raw
            .headers
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::String(value) => Some((name, value)),
                _ => None,
            })
            .collect();
        let bearer = authorization_header(&headers)
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string);

        let target = match (raw.method_arn, raw.request_context) {
            (Some(arn), _) => MethodArn::parse(&arn)?,
            (None, Some(RawRequestContext {
                account_id: Some(account_id),
                api_id: Some(api_id),
                stage: Some(stage),
            })) if !region.is_empty() => MethodArn::new(region, &account_id, &api_id, &stage),
            _ => {
                return Err(Error::MalformedEvent(
                    "REQUEST event has neither methodArn nor a complete requestContext".to_string(),
                ));
            }
        };

        Ok(AuthorizationRequest { bearer, target })
    }
}
