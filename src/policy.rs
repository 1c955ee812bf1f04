//! API Gateway authorizer responses.
//!
//! Access is decided for a whole API stage: the resource pattern keeps the
//! region, account, API id and stage of the triggering method ARN and
//! wildcards the HTTP verb and path.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// IAM policy language version
pub const POLICY_VERSION: &str = "2012-10-17";

/// The only action an authorizer policy grants or denies
pub const INVOKE_ACTION: &str = "execute-api:Invoke";

/// Context key carrying the tenant id to downstream integrations
pub const TENANT_CONTEXT_KEY: &str = "TenantId";

/// Parts of an `execute-api` method ARN.
///
/// `arn:aws:execute-api:{region}:{account}:{api_id}/{stage}/{verb}/{path...}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodArn {
    /// AWS region
    pub region: String,
    /// AWS account id, used as the principal
    pub account_id: String,
    /// REST API id
    pub api_id: String,
    /// Deployment stage
    pub stage: String,
}

impl MethodArn {
    /// Parse a method ARN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedEvent`] when the ARN does not have the
    /// `execute-api` shape.
    pub fn parse(arn: &str) -> Result<Self> {
        let malformed = || Error::MalformedEvent(format!("invalid methodArn: {arn}"));

        let mut parts = arn.splitn(6, ':');
        let (Some("arn"), Some(_partition), Some("execute-api"), Some(region), Some(account_id), Some(path)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(malformed());
        };

        let mut segments = path.splitn(3, '/');
        let (Some(api_id), Some(stage)) = (segments.next(), segments.next()) else {
            return Err(malformed());
        };
        if [region, account_id, api_id, stage].iter().any(|s| s.is_empty()) {
            return Err(malformed());
        }

        Ok(Self::new(region, account_id, api_id, stage))
    }

    /// Build from already-known parts (REQUEST authorizer context).
    #[must_use]
    pub fn new(region: &str, account_id: &str, api_id: &str, stage: &str) -> Self {
        Self {
            region: region.to_string(),
            account_id: account_id.to_string(),
            api_id: api_id.to_string(),
            stage: stage.to_string(),
        }
    }

    /// Resource pattern covering every method and path of the stage
    #[must_use]
    pub fn resource_pattern(&self) -> String {
        format!(
            "arn:aws:execute-api:{}:{}:{}/{}/*/*",
            self.region, self.account_id, self.api_id, self.stage
        )
    }
}

impl fmt::Display for MethodArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_pattern())
    }
}

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Grant
    Allow,
    /// Refuse
    Deny,
}

impl Effect {
    /// Lowercase label for logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// One policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Always [`INVOKE_ACTION`]
    pub action: String,
    /// Allow or deny
    pub effect: Effect,
    /// Resource patterns the effect applies to
    pub resource: Vec<String>,
}

/// IAM policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Always [`POLICY_VERSION`]
    pub version: String,
    /// Exactly one statement
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    fn single(effect: Effect, resource: &str) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                action: INVOKE_ACTION.to_string(),
                effect,
                resource: vec![resource.to_string()],
            }],
        }
    }
}

/// The response API Gateway expects from a Lambda authorizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationDecision {
    /// Caller principal
    pub principal_id: String,
    /// Allow or deny policy for the stage
    pub policy_document: PolicyDocument,
    /// String context forwarded to integrations; empty on deny
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl AuthorizationDecision {
    /// Effect of the single statement
    #[must_use]
    pub fn effect(&self) -> Effect {
        self.policy_document
            .statement
            .first()
            .map_or(Effect::Deny, |statement| statement.effect)
    }

    /// Tenant id carried in the context, if any
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.context.get(TENANT_CONTEXT_KEY).map(String::as_str)
    }
}

/// Allow `principal` to invoke `resource`, forwarding the tenant id.
#[must_use]
pub fn allow(principal: &str, resource: &str, tenant_id: &str) -> AuthorizationDecision {
    AuthorizationDecision {
        principal_id: principal.to_string(),
        policy_document: PolicyDocument::single(Effect::Allow, resource),
        context: BTreeMap::from([(TENANT_CONTEXT_KEY.to_string(), tenant_id.to_string())]),
    }
}

/// Deny `principal` access to `resource`.
#[must_use]
pub fn deny(principal: &str, resource: &str) -> AuthorizationDecision {
    AuthorizationDecision {
        principal_id: principal.to_string(),
        policy_document: PolicyDocument::single(Effect::Deny, resource),
        context: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const ARN: &str = "arn:aws:execute-api:us-east-1:123456789012:abcdef1234/prod/GET/products/42";

    #[test]
    fn parses_method_arn() {
        let arn = MethodArn::parse(ARN).unwrap();
        assert_eq!(arn, MethodArn::new("us-east-1", "123456789012", "abcdef1234", "prod"));
        assert_eq!(
            arn.resource_pattern(),
            "arn:aws:execute-api:us-east-1:123456789012:abcdef1234/prod/*/*"
        );
    }

    #[test]
    fn stage_only_arn_is_accepted() {
        let arn = MethodArn::parse("arn:aws:execute-api:eu-west-1:1:api/dev").unwrap();
        assert_eq!(arn.stage, "dev");
    }

    #[test]
    fn rejects_malformed_arns() {
        for bad in [
            "",
            "not-an-arn",
            "arn:aws:lambda:us-east-1:1:function/x",
            "arn:aws:execute-api:us-east-1:1:api",
            "arn:aws:execute-api::1:api/prod",
            "arn:aws:execute-api:us-east-1:1:/prod",
        ] {
            assert!(
                matches!(MethodArn::parse(bad), Err(Error::MalformedEvent(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn allow_serializes_to_gateway_shape() {
        let resource = MethodArn::parse(ARN).unwrap().resource_pattern();
        let decision = allow("123456789012", &resource, "77b2be20-f30a-40c6-bfff-376112832f95");

        assert_eq!(
            serde_json::to_value(&decision).unwrap(),
            json!({
                "principalId": "123456789012",
                "policyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": "execute-api:Invoke",
                        "Effect": "Allow",
                        "Resource": ["arn:aws:execute-api:us-east-1:123456789012:abcdef1234/prod/*/*"]
                    }]
                },
                "context": {"TenantId": "77b2be20-f30a-40c6-bfff-376112832f95"}
            })
        );
    }

    #[test]
    fn deny_has_empty_context() {
        let decision = deny("123456789012", "arn:aws:execute-api:r:a:api/s/*/*");
        assert_eq!(decision.effect(), Effect::Deny);
        assert!(decision.context.is_empty());
        assert_eq!(decision.tenant_id(), None);
    }
}
