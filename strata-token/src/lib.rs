//! Signed auth tokens: issuing, verifying, and the key store that maps
//! profile ids to verification keys.
//!
//! Tokens are JWTs whose `kid` header names the issuing profile; the key
//! store is the registered-key lookup the push channel and the bridge verify
//! against. [`AmbientIdentity`] is the strategy object the dispatcher uses
//! to synthesize a short-TTL token from the node's own key when a call
//! context carries none.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Errors from token issue and verification.
#[derive(Debug)]
pub enum TokenError {
    /// The token is malformed (bad structure, bad signature, missing kid).
    InvalidToken(String),

    /// The token has expired.
    Expired,

    /// The key id from the token header has no registered key.
    UnknownKey(String),

    /// Claim validation failed (missing subject, disallowed algorithm).
    ValidationFailed(String),

    /// Signing a new token failed.
    Signing(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::InvalidToken(msg) => write!(f, "invalid token: {msg}"),
            TokenError::Expired => write!(f, "token expired"),
            TokenError::UnknownKey(kid) => write!(f, "unknown signing key: {kid}"),
            TokenError::ValidationFailed(msg) => write!(f, "token validation failed: {msg}"),
            TokenError::Signing(msg) => write!(f, "signing token: {msg}"),
        }
    }
}

impl std::error::Error for TokenError {}

/// A verification key registered for one profile.
#[derive(Clone)]
pub struct VerifyKey {
    key: DecodingKey,
    algorithm: Algorithm,
}

impl VerifyKey {
    /// Symmetric key. Used by tests and single-tenant deployments where the
    /// node holds the shared secret.
    pub fn hmac(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
        }
    }

    /// Ed25519 public key in PEM form, the key material profiles exchange
    /// over the network.
    pub fn ed25519_pem(pem: &[u8]) -> Result<Self, TokenError> {
        let key = DecodingKey::from_ed_pem(pem)
            .map_err(|e| TokenError::ValidationFailed(format!("bad ed25519 key: {e}")))?;
        Ok(Self {
            key,
            algorithm: Algorithm::EdDSA,
        })
    }
}

/// Registered public keys, addressed by profile id via the JWT `kid` header.
///
/// Writes are serialized internally; the store is shared freely across the
/// dispatcher, the bridge, and the push channel.
#[derive(Default)]
pub struct KeyStore {
    keys: DashMap<String, VerifyKey>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile_id: impl Into<String>, key: VerifyKey) {
        self.keys.insert(profile_id.into(), key);
    }

    pub fn remove(&self, profile_id: &str) {
        self.keys.remove(profile_id);
    }

    pub fn get(&self, profile_id: &str) -> Option<VerifyKey> {
        self.keys.get(profile_id).map(|k| k.clone())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// The outcome of verifying a token against the key store.
///
/// A verified token proves control of the private key registered under the
/// `kid` profile; the claim subject is taken verbatim as the profile id.
/// Proving *ownership* of that profile (key rotation, delegation) is
/// deferred to the identity layer.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    pub profile_id: String,
    pub claims: serde_json::Value,
}

/// Verify a token against the registered key store.
///
/// This performs:
/// 1. Header decoding to extract `kid` and algorithm
/// 2. Key retrieval from the store
/// 3. Signature validation
/// 4. Standard claims validation (exp) and subject extraction
pub fn verify(token: &str, store: &KeyStore) -> Result<VerifiedClaims, TokenError> {
    let header = decode_header(token)
        .map_err(|e| TokenError::InvalidToken(format!("failed to decode header: {e}")))?;

    let kid = header
        .kid
        .as_deref()
        .ok_or_else(|| TokenError::InvalidToken("token header missing 'kid'".into()))?;

    let verify_key = store
        .get(kid)
        .ok_or_else(|| TokenError::UnknownKey(kid.to_string()))?;

    if header.alg != verify_key.algorithm {
        return Err(TokenError::ValidationFailed(format!(
            "token algorithm {:?} does not match registered key",
            header.alg
        )));
    }

    let mut validation = Validation::new(verify_key.algorithm);
    validation.validate_exp = true;

    let token_data =
        decode::<serde_json::Value>(token, &verify_key.key, &validation).map_err(|e| {
            let err = match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::InvalidToken(e.to_string()),
            };
            warn!(error = %err, "token validation failed");
            err
        })?;

    let profile_id = token_data
        .claims
        .get("sub")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TokenError::ValidationFailed("token missing 'sub' claim".into()))?
        .to_string();

    debug!(profile_id = %profile_id, "token verified");
    Ok(VerifiedClaims {
        profile_id,
        claims: token_data.claims,
    })
}

/// Signing half of a profile's keypair, used to issue tokens on its behalf.
pub struct TokenSource {
    profile_id: String,
    key: EncodingKey,
    algorithm: Algorithm,
}

impl TokenSource {
    /// Symmetric signing key paired with [`VerifyKey::hmac`].
    pub fn hmac(profile_id: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            profile_id: profile_id.into(),
            key: EncodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
        }
    }

    /// Ed25519 private key in PEM form.
    pub fn ed25519_pem(profile_id: impl Into<String>, pem: &[u8]) -> Result<Self, TokenError> {
        let key = EncodingKey::from_ed_pem(pem)
            .map_err(|e| TokenError::Signing(format!("bad ed25519 key: {e}")))?;
        Ok(Self {
            profile_id: profile_id.into(),
            key,
            algorithm: Algorithm::EdDSA,
        })
    }

    /// Issue a token for this profile, expiring after `ttl`.
    pub fn issue(&self, ttl: Duration) -> Result<String, TokenError> {
        let subject = self.profile_id.clone();
        self.issue_for(&subject, ttl)
    }

    /// Issue a token naming another subject, signed with this profile's key.
    /// The `kid` header still names the signing profile so verifiers find
    /// the right key.
    pub fn issue_for(&self, subject: &str, ttl: Duration) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::minutes(5)))
                .timestamp(),
        };
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.profile_id.clone());
        encode(&header, &claims, &self.key).map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }
}

/// Strategy for synthesizing an auth token when a call context carries none.
///
/// The dispatcher's remote branch depends on this trait only; the default
/// implementation signs with the node's configured key. A stricter
/// deployment can install an implementation that refuses to mint.
pub trait AmbientIdentity: Send + Sync {
    fn mint(&self, ttl: Duration) -> Result<String, TokenError>;
    fn profile_id(&self) -> &str;
}

impl AmbientIdentity for TokenSource {
    fn mint(&self, ttl: Duration) -> Result<String, TokenError> {
        debug!(profile_id = %self.profile_id, "minting ambient token");
        self.issue(ttl)
    }

    fn profile_id(&self) -> &str {
        &self.profile_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(profile_id: &str, secret: &[u8]) -> KeyStore {
        let store = KeyStore::new();
        store.insert(profile_id, VerifyKey::hmac(secret));
        store
    }

    #[test]
    fn issue_and_verify_round_trip() {
        let source = TokenSource::hmac("profile-1", b"secret");
        let store = store_with("profile-1", b"secret");

        let token = source.issue(Duration::from_secs(60)).unwrap();
        let verified = verify(&token, &store).unwrap();
        assert_eq!(verified.profile_id, "profile-1");
        assert!(verified.claims.get("exp").is_some());
    }

    #[test]
    fn subject_taken_verbatim() {
        let source = TokenSource::hmac("signer", b"secret");
        let store = store_with("signer", b"secret");

        let token = source.issue_for("grantee", Duration::from_secs(60)).unwrap();
        let verified = verify(&token, &store).unwrap();
        assert_eq!(verified.profile_id, "grantee");
    }

    #[test]
    fn unknown_kid_rejected() {
        let source = TokenSource::hmac("stranger", b"secret");
        let store = store_with("profile-1", b"secret");

        let token = source.issue(Duration::from_secs(60)).unwrap();
        match verify(&token, &store) {
            Err(TokenError::UnknownKey(kid)) => assert_eq!(kid, "stranger"),
            other => panic!("expected UnknownKey, got {other:?}"),
        }
    }

    #[test]
    fn wrong_secret_rejected() {
        let source = TokenSource::hmac("profile-1", b"not-the-secret");
        let store = store_with("profile-1", b"secret");

        let token = source.issue(Duration::from_secs(60)).unwrap();
        assert!(matches!(
            verify(&token, &store),
            Err(TokenError::InvalidToken(_))
        ));
    }

    #[test]
    fn garbage_rejected_before_key_lookup() {
        let store = store_with("profile-1", b"secret");
        assert!(matches!(
            verify("not-a-jwt", &store),
            Err(TokenError::InvalidToken(_))
        ));
    }

    #[test]
    fn ambient_identity_mints_verifiable_tokens() {
        let source = TokenSource::hmac("node", b"secret");
        let store = store_with("node", b"secret");

        let ambient: &dyn AmbientIdentity = &source;
        let token = ambient.mint(Duration::from_secs(30)).unwrap();
        assert_eq!(verify(&token, &store).unwrap().profile_id, "node");
    }
}
