//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Placeholder substituted with the configured region in `issuer_base_url`.
const REGION_PLACEHOLDER: &str = "{region}";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AWS region the user pools live in. Falls back to `AWS_REGION`.
    pub region: String,
    /// Base URL of the identity provider; `{region}` is substituted.
    /// Token issuers are `{issuer_base_url}/{pool_id}`.
    pub issuer_base_url: String,
    /// Custom claim carrying the tenant identifier
    pub tenant_claim: String,
    /// Allowed clock skew when checking `exp`
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Timeout for a single JWKS fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Time kept in reserve before the invocation deadline so a failure
    /// response can still be sent
    #[serde(with = "humantime_serde")]
    pub deadline_slack: Duration,
    /// How verification failures are reported to the gateway
    pub deny_mode: DenyMode,
    /// Value of the `source` field that marks a warm-up ping
    pub warmup_source: String,
    /// Issuer directory used to pre-populate the key cache
    pub directory: DirectoryConfig,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format (text, json)
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: String::new(),
            issuer_base_url: format!("https://cognito-idp.{REGION_PLACEHOLDER}.amazonaws.com"),
            tenant_claim: "custom:tenant_id".to_string(),
            clock_skew: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(3),
            deadline_slack: Duration::from_secs(1),
            deny_mode: DenyMode::Policy,
            warmup_source: "warmup".to_string(),
            directory: DirectoryConfig::default(),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

/// How a failed verification is surfaced to API Gateway
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyMode {
    /// Return a policy document with `Effect: Deny` (gateway answers 403)
    #[default]
    Policy,
    /// Fail the invocation with the literal `Unauthorized` error (gateway answers 401)
    Unauthorized,
}

/// Source of the issuer list used at cold start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryKind {
    /// `ListUserPools` against Cognito
    #[default]
    Cognito,
    /// The fixed `issuers` list below
    Static,
}

/// Issuer directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Which directory implementation to use
    pub kind: DirectoryKind,
    /// User pool ids for the static directory
    pub issuers: Vec<String>,
    /// Page size for `ListUserPools` (Cognito caps this at 60)
    pub page_size: i32,
    /// Upper bound on listing every issuer at cold start
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            kind: DirectoryKind::Cognito,
            issuers: Vec::new(),
            page_size: 60,
            timeout: crate::keys::DEFAULT_DIRECTORY_TIMEOUT,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or the resulting configuration is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (TENANT_AUTHORIZER_ prefix)
        figment = figment.merge(Env::prefixed("TENANT_AUTHORIZER_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        if config.region.is_empty() {
            if let Ok(region) = env::var("AWS_REGION") {
                config.region = region;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(Error::Config(
                "region is not set (set TENANT_AUTHORIZER_REGION or AWS_REGION)".to_string(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(Error::Config("fetch_timeout must be non-zero".to_string()));
        }
        if self.directory.timeout.is_zero() {
            return Err(Error::Config("directory.timeout must be non-zero".to_string()));
        }
        if self.tenant_claim.trim().is_empty() {
            return Err(Error::Config("tenant_claim must not be empty".to_string()));
        }
        if self.directory.kind == DirectoryKind::Static && self.directory.issuers.is_empty() {
            tracing::warn!("Static issuer directory is empty; keys will be discovered lazily");
        }
        url::Url::parse(&self.resolved_issuer_base_url())
            .map_err(|e| Error::Config(format!("issuer_base_url is not a valid URL: {e}")))?;
        Ok(())
    }

    /// Issuer base URL with the region substituted and no trailing slash
    #[must_use]
    pub fn resolved_issuer_base_url(&self) -> String {
        self.issuer_base_url
            .replace(REGION_PLACEHOLDER, &self.region)
            .trim_end_matches('/')
            .to_string()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (e.g., "30s", "500ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.parse::<u64>().map_err(serde::de::Error::custom)?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| serde::de::Error::custom(format!("duration of {mins}m is out of range")))
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn with_region(region: &str) -> Config {
        Config {
            region: region.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_cognito_conventions() {
        let config = with_region("eu-west-1");
        assert_eq!(config.tenant_claim, "custom:tenant_id");
        assert_eq!(config.clock_skew, Duration::from_secs(5));
        assert_eq!(config.deny_mode, DenyMode::Policy);
        assert_eq!(
            config.resolved_issuer_base_url(),
            "https://cognito-idp.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = Config {
            issuer_base_url: "http://127.0.0.1:9000/".to_string(),
            ..with_region("us-east-1")
        };
        assert_eq!(config.resolved_issuer_base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn validate_rejects_missing_region() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn validate_rejects_empty_tenant_claim() {
        let config = Config {
            tenant_claim: "  ".to_string(),
            ..with_region("us-east-1")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_fetch_timeout() {
        let config = Config {
            fetch_timeout: Duration::ZERO,
            ..with_region("us-east-1")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_from_yaml() {
        let yaml = r#"
region: us-east-1
clock_skew: 10s
fetch_timeout: 750ms
deny_mode: unauthorized
directory:
  kind: static
  issuers:
    - us-east-1_AAAA
    - us-east-1_BBBB
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.clock_skew, Duration::from_secs(10));
        assert_eq!(config.fetch_timeout, Duration::from_millis(750));
        assert_eq!(config.deny_mode, DenyMode::Unauthorized);
        assert_eq!(config.directory.kind, DirectoryKind::Static);
        assert_eq!(config.directory.issuers.len(), 2);
        assert_eq!(config.directory.page_size, 60);
        assert_eq!(config.directory.timeout, Duration::from_secs(10));
    }

    #[test]
    fn huge_minute_durations_are_rejected() {
        let yaml = format!("fetch_timeout: {}m\n", u64::MAX);
        let err = serde_yaml::from_str::<Config>(&yaml).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn minute_durations_parse() {
        let config: Config = serde_yaml::from_str("directory:\n  timeout: 2m\n").unwrap();
        assert_eq!(config.directory.timeout, Duration::from_secs(120));
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorizer.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "region: ap-southeast-2").unwrap();
        writeln!(f, "tenant_claim: custom:org").unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.region, "ap-southeast-2");
        assert_eq!(config.tenant_claim, "custom:org");
    }

    #[test]
    fn load_fails_for_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/authorizer.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
