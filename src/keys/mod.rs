//! Signing-key discovery, caching and resolution.
//!
//! ```text
//! TokenVerifier
//!   -> KeyResolver::resolve(kid, issuer?)
//!        -> KeyCache::get(pool_id)                 -- DashMap read
//!        -> KeyCache::refresh(issuer) on a miss    -- one fetch per issuer
//!             -> KeySource::fetch                  -- GET {iss}/.well-known/jwks.json
//! ```

pub mod cache;
pub mod fetch;
pub mod issuer;
pub mod jwk;
pub mod resolver;

pub use cache::{CacheStatsSnapshot, DEFAULT_DIRECTORY_TIMEOUT, InitSummary, KeyCache};
pub use fetch::{HttpKeySource, KeySource};
pub use issuer::Issuer;
pub use jwk::{KeySet, SigningKey};
pub use resolver::KeyResolver;
