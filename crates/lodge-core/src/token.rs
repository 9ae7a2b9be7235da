//! Shared-secret access tokens.
//!
//! A token is two base64url segments joined by a dot: the JSON claims and an
//! HMAC-SHA-256 over the encoded claims segment, keyed with the secret shared
//! by the token issuer and every lodge service.

use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::{Identity, Timestamp};

type HmacSha256 = Hmac<Sha256>;

/// Token errors.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No shared secret configured
    #[error("Shared secret is empty")]
    EmptySecret,

    /// Token does not have the expected shape
    #[error("Malformed token: {0}")]
    Malformed(&'static str),

    /// Signature does not match the claims
    #[error("Invalid token signature")]
    BadSignature,

    /// Token is past its expiry
    #[error("Token expired at {0}")]
    Expired(Timestamp),

    /// Claims carry an empty principal id
    #[error("Token has an empty principal id")]
    EmptyPrincipal,

    /// Claims could not be encoded or decoded
    #[error("Claims encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Secret shared between the token issuer and the service.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Creates a secret from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns true if no secret material is present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.0).expect("HMAC can take key of any size")
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

impl From<&str> for SharedSecret {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for SharedSecret {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    pid: String,
    idp: String,
    display_name: String,
    /// Expiry in seconds since the epoch, 0 for tokens that never expire
    #[serde(default)]
    exp: u64,
}

/// Mints a token for `identity`.
///
/// A `ttl` of `None` produces a token without expiry.
pub fn issue_token(
    identity: &Identity,
    secret: &SharedSecret,
    ttl: Option<Duration>,
) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }
    if identity.pid.is_empty() {
        return Err(TokenError::EmptyPrincipal);
    }

    let claims = Claims {
        pid: identity.pid.clone(),
        idp: identity.idp.clone(),
        display_name: identity.display_name.clone(),
        exp: ttl.map_or(0, |ttl| {
            Timestamp::now()
                .as_secs()
                .saturating_add(ttl.as_secs().max(1))
        }),
    };

    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
    let mut mac = secret.mac();
    mac.update(payload.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", payload, signature))
}

/// Verifies `token` against `secret` and returns the identity it carries.
pub fn parse_token(token: &str, secret: &SharedSecret) -> Result<Identity, TokenError> {
    parse_token_at(token, secret, Timestamp::now())
}

fn parse_token_at(
    token: &str,
    secret: &SharedSecret,
    now: Timestamp,
) -> Result<Identity, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }

    let (payload, signature) = token
        .split_once('.')
        .ok_or(TokenError::Malformed("missing signature segment"))?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Malformed("signature is not base64url"))?;

    let mut mac = secret.mac();
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::BadSignature)?;

    let claims = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Malformed("claims are not base64url"))?;
    let claims: Claims = serde_json::from_slice(&claims)?;

    if claims.exp != 0 && claims.exp <= now.as_secs() {
        return Err(TokenError::Expired(Timestamp::new(claims.exp)));
    }
    if claims.pid.is_empty() {
        return Err(TokenError::EmptyPrincipal);
    }

    Ok(Identity {
        pid: claims.pid,
        idp: claims.idp,
        display_name: claims.display_name,
    })
}
