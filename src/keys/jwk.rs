//! JWKS documents, signing keys and key sets.
//!
//! An issuer's `/.well-known/jwks.json` is parsed leniently: every entry that
//! carries a `kid` becomes a [`SigningKey`], but only RSA entries get a usable
//! verification key. Entries of other key types stay in the set (so the `kid`
//! is known) and simply cannot verify anything until the issuer rotates an
//! RSA key in under that id.
//!
//! RSA moduli and exponents are base64url big-endian **unsigned** integers.
//! Some publishers prepend a `0x00` sign byte to the modulus; it is stripped
//! here because the verifier treats the bytes as a raw magnitude.

use std::fmt;
use std::time::{Duration, Instant};

use base64::{
    Engine as _, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{Error, Result};

/// base64url, with or without trailing `=` padding
const BASE64_URL_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The only key type this authorizer verifies with.
pub const RSA_KEY_TYPE: &str = "RSA";

/// One JWKS entry as published. Unknown members are ignored.
#[derive(Debug, Deserialize)]
struct RawJwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

/// One public key from an issuer's published key set. Immutable.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    kty: String,
    alg: Option<String>,
    issuer: String,
    decoding_key: Option<DecodingKey>,
}

impl SigningKey {
    /// Build an RSA signing key from base64url modulus and exponent.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if either component is not
    /// valid base64url or decodes to an empty integer.
    pub fn rsa(issuer: &str, kid: &str, n: &str, e: &str) -> std::result::Result<Self, String> {
        let modulus = decode_unsigned(n).map_err(|err| format!("modulus: {err}"))?;
        let exponent = decode_unsigned(e).map_err(|err| format!("exponent: {err}"))?;
        Ok(Self {
            kid: kid.to_string(),
            kty: RSA_KEY_TYPE.to_string(),
            alg: None,
            issuer: issuer.to_string(),
            decoding_key: Some(DecodingKey::from_rsa_raw_components(&modulus, &exponent)),
        })
    }

    fn unusable(issuer: &str, kid: &str, kty: &str) -> Self {
        Self {
            kid: kid.to_string(),
            kty: kty.to_string(),
            alg: None,
            issuer: issuer.to_string(),
            decoding_key: None,
        }
    }

    fn from_raw(issuer: &str, kid: &str, raw: &RawJwk) -> Self {
        let mut key = if raw.kty == RSA_KEY_TYPE {
            match (raw.n.as_deref(), raw.e.as_deref()) {
                (Some(n), Some(e)) => Self::rsa(issuer, kid, n, e).unwrap_or_else(|reason| {
                    warn!(issuer = %issuer, kid = %kid, reason = %reason, "Malformed RSA key in JWKS");
                    Self::unusable(issuer, kid, &raw.kty)
                }),
                _ => {
                    warn!(issuer = %issuer, kid = %kid, "RSA key in JWKS is missing n or e");
                    Self::unusable(issuer, kid, &raw.kty)
                }
            }
        } else {
            debug!(issuer = %issuer, kid = %kid, kty = %raw.kty, "Ignoring non-RSA key");
            Self::unusable(issuer, kid, &raw.kty)
        };
        key.alg.clone_from(&raw.alg);
        key
    }

    /// Key id (`kid`)
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Key type (`kty`) as published
    #[must_use]
    pub fn kty(&self) -> &str {
        &self.kty
    }

    /// Advertised algorithm (`alg`), when published
    #[must_use]
    pub fn alg(&self) -> Option<&str> {
        self.alg.as_deref()
    }

    /// Pool id of the issuer that published this key
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verification key, present only for well-formed RSA entries
    #[must_use]
    pub fn decoding_key(&self) -> Option<&DecodingKey> {
        self.decoding_key.as_ref()
    }

    /// Whether this entry can verify signatures
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.decoding_key.is_some()
    }
}

// Key material stays out of logs.
impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("kty", &self.kty)
            .field("alg", &self.alg)
            .field("issuer", &self.issuer)
            .field("usable", &self.is_usable())
            .finish()
    }
}

/// All keys one issuer currently publishes. Replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct KeySet {
    issuer: String,
    keys: Vec<SigningKey>,
    fetched_at: Instant,
}

impl KeySet {
    /// Build a key set from already-constructed keys.
    #[must_use]
    pub fn new(issuer: impl Into<String>, keys: Vec<SigningKey>) -> Self {
        Self {
            issuer: issuer.into(),
            keys,
            fetched_at: Instant::now(),
        }
    }

    /// Parse a JWKS document (`{"keys": [...]}`) published by `issuer`.
    ///
    /// Entries without a `kid` or without a `kty` are skipped. When two
    /// entries share a `kid`, the first one wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDiscovery`] if the body is not a JWKS document.
    pub fn from_json(issuer: &str, body: &[u8]) -> Result<Self> {
        let doc: JwksDocument = serde_json::from_slice(body)
            .map_err(|e| Error::discovery_failed(issuer, format!("invalid JWKS document: {e}")))?;

        let mut keys: Vec<SigningKey> = Vec::with_capacity(doc.keys.len());
        for entry in doc.keys {
            let raw: RawJwk = match serde_json::from_value(entry) {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(issuer = %issuer, error = %e, "Skipping unparseable JWKS entry");
                    continue;
                }
            };
            let Some(kid) = raw.kid.as_deref().filter(|k| !k.is_empty()) else {
                debug!(issuer = %issuer, kty = %raw.kty, "Skipping JWKS entry without kid");
                continue;
            };
            if keys.iter().any(|k| k.kid == kid) {
                warn!(issuer = %issuer, kid = %kid, "Duplicate kid in JWKS, keeping the first entry");
                continue;
            }
            keys.push(SigningKey::from_raw(issuer, kid, &raw));
        }

        Ok(Self::new(issuer, keys))
    }

    /// Pool id these keys belong to
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Look up a key by `kid`
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Look up a key by `kid`, only if it can verify signatures
    #[must_use]
    pub fn usable(&self, kid: &str) -> Option<&SigningKey> {
        self.get(kid).filter(|k| k.is_usable())
    }

    /// All key ids in publication order
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.kid.as_str())
    }

    /// All keys in publication order
    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// Number of keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Time since this set was fetched
    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Decode a base64url big-endian unsigned integer to its minimal magnitude.
///
/// Leading zero bytes are dropped; a value of zero decodes to a single
/// `0x00` byte.
///
/// # Errors
///
/// Returns a description if the input is not base64url or is empty.
pub fn decode_unsigned(value: &str) -> std::result::Result<Vec<u8>, String> {
    let bytes = BASE64_URL_LENIENT
        .decode(value.trim())
        .map_err(|e| e.to_string())?;
    if bytes.is_empty() {
        return Err("empty integer".to_string());
    }
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    Ok(bytes[first_nonzero..].to_vec())
}
