//! Tenant Authorizer Library
//!
//! Multi-tenant JWT authorizer for API Gateway, running as an AWS Lambda.
//!
//! # Features
//!
//! - **Multi-issuer**: trusts every Cognito user pool the directory lists, and
//!   discovers new pools lazily from the token's `iss`
//! - **Key cache**: per-issuer JWKS cached for the process lifetime, refreshed
//!   once on an unknown `kid`
//! - **Tenant isolation**: the tenant claim is mandatory and forwarded to
//!   integrations as `context.TenantId`
//! - **Bounded latency**: every fetch has a timeout and verification is
//!   abandoned before the invocation deadline
//!
//! # Request path
//!
//! [`authorizer::Authorizer`] -> [`token::TokenVerifier`] ->
//! [`keys::KeyResolver`] -> [`keys::KeyCache`] -> [`policy`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod authorizer;
pub mod cli;
pub mod config;
pub mod directory;
pub mod error;
pub mod keys;
pub mod policy;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `json` writes one JSON object per line without ANSI colours or
/// timestamps (CloudWatch stamps ingestion time). Anything else selects the
/// human-readable format. `RUST_LOG` overrides `level`.
///
/// # Errors
///
/// Returns [`Error::Config`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .without_time()
                    .with_current_span(false),
            )
            .try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("tracing already initialized: {e}")))
}
