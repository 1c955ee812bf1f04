//! Issuer directory: the list of user pools known at cold start.
//!
//! The key cache asks the directory once per process for every registered
//! pool id and pre-fetches their key sets. Pools created later are picked up
//! lazily from the `iss` claim of the first token they sign.

#[cfg(feature = "cognito")]
use std::time::Duration;

use crate::config::{DirectoryConfig, DirectoryKind};
use crate::{Error, Result};

/// Lists every issuer (user pool id) the authorizer should trust.
#[async_trait::async_trait]
pub trait IssuerDirectory: Send + Sync {
    /// Return all currently registered user pool ids.
    async fn list_issuers(&self) -> Result<Vec<String>>;
}

/// A fixed list of user pool ids
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    issuers: Vec<String>,
}

impl StaticDirectory {
    /// Create from a list of pool ids
    #[must_use]
    pub fn new(issuers: Vec<String>) -> Self {
        Self { issuers }
    }
}

#[async_trait::async_trait]
impl IssuerDirectory for StaticDirectory {
    async fn list_issuers(&self) -> Result<Vec<String>> {
        Ok(self.issuers.clone())
    }
}

/// `ListUserPools` against the Cognito Identity Provider API, following
/// pagination until every pool has been listed.
#[cfg(feature = "cognito")]
pub struct CognitoDirectory {
    client: aws_sdk_cognitoidentityprovider::Client,
    page_size: i32,
}

#[cfg(feature = "cognito")]
impl CognitoDirectory {
    /// Build a client from the ambient AWS configuration (env, profile, IMDS).
    ///
    /// Every `ListUserPools` call, retries included, is bounded by `timeout`.
    pub async fn from_env(region: &str, page_size: i32, timeout: Duration) -> Self {
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .operation_timeout(timeout)
            .build();
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .timeout_config(timeouts)
            .load()
            .await;
        Self {
            client: aws_sdk_cognitoidentityprovider::Client::new(&shared),
            page_size: page_size.clamp(1, 60),
        }
    }
}

#[cfg(feature = "cognito")]
#[async_trait::async_trait]
impl IssuerDirectory for CognitoDirectory {
    async fn list_issuers(&self) -> Result<Vec<String>> {
        let mut pools = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_user_pools()
                .max_results(self.page_size)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| Error::Directory(format!("ListUserPools failed: {e}")))?;

            pools.extend(
                page.user_pools()
                    .iter()
                    .filter_map(|pool| pool.id().map(str::to_string)),
            );

            match page.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        tracing::debug!(count = pools.len(), "Listed user pools");
        Ok(pools)
    }
}

/// Build the directory selected by configuration.
///
/// # Errors
///
/// Returns [`Error::Config`] when the Cognito directory is requested but the
/// crate was built without the `cognito` feature.
pub async fn from_config(config: &DirectoryConfig, region: &str) -> Result<Box<dyn IssuerDirectory>> {
    match config.kind {
        DirectoryKind::Static => Ok(Box::new(StaticDirectory::new(config.issuers.clone()))),
        #[cfg(feature = "cognito")]
        DirectoryKind::Cognito => Ok(Box::new(
            CognitoDirectory::from_env(region, config.page_size, config.timeout).await,
        )),
        #[cfg(not(feature = "cognito"))]
        DirectoryKind::Cognito => {
            let _ = region;
            Err(Error::Config(
                "directory.kind = cognito requires the `cognito` feature".to_string(),
            ))
        }
    }
}
