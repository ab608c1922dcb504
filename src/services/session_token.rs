//! Session Token Service
//!
//! Admin sessions are stateless signed tokens:
//!
//! ```text
//! base64url(claims_json) "." base64url(hmac_sha256(secret, first_segment))
//! ```
//!
//! with claims `{ sub, iat, exp }` in Unix seconds and no base64 padding.
//! A token is valid iff its signature verifies against the configured
//! secret and the current time is before `exp`. Nothing is stored: logout
//! only clears the cookie, and a token stays valid until it expires.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE64URL_NOPAD;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::models::{AdminIdentity, SessionClaims};

type HmacSha256 = Hmac<Sha256>;

/// Why a credential was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("No session credential presented")]
    MissingCredential,
    #[error("Session token signature is invalid")]
    InvalidSignature,
    #[error("Session token has expired")]
    Expired,
    #[error("Session token is malformed")]
    Malformed,
}

impl AuthError {
    /// Stable machine-readable reason, used in error responses
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::Expired => "expired",
            AuthError::Malformed => "malformed",
        }
    }
}

/// A freshly signed token and the claims inside it
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub claims: SessionClaims,
}

/// Issues and verifies admin session tokens
#[derive(Clone)]
pub struct SessionTokenService {
    mac: HmacSha256,
    ttl: Duration,
}

impl std::fmt::Debug for SessionTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionTokenService {
    /// Build from the signing secret and session lifetime.
    pub fn new(secret: &[u8], ttl: Duration) -> anyhow::Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("Session signing secret must not be empty");
        }
        if ttl <= Duration::zero() {
            anyhow::bail!("Session lifetime must be positive");
        }
        let mac = HmacSha256::new_from_slice(secret).context("Invalid session signing secret")?;
        Ok(Self { mac, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, subject: &str) -> anyhow::Result<IssuedToken> {
        self.issue_at(subject, Utc::now())
    }

    /// Issue a token as if at `issued_at`
    pub fn issue_at(&self, subject: &str, issued_at: DateTime<Utc>) -> anyhow::Result<IssuedToken> {
        let iat = issued_at.timestamp();
        let claims = SessionClaims {
            sub: subject.to_string(),
            iat,
            exp: iat + self.ttl.num_seconds(),
        };

        let payload = serde_json::to_vec(&claims).context("Failed to encode session claims")?;
        let payload = BASE64URL_NOPAD.encode(&payload);
        let signature = BASE64URL_NOPAD.encode(&self.sign(payload.as_bytes()));

        Ok(IssuedToken {
            token: format!("{}.{}", payload, signature),
            expires_at: claims.expires_at(),
            claims,
        })
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a token against the clock value `now`.
    ///
    /// Checks run in a fixed order: structure and base64, then signature,
    /// then the claims JSON, then expiry.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, AuthError> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::Malformed)?;
        if payload.is_empty() || signature.is_empty() || signature.contains('.') {
            return Err(AuthError::Malformed);
        }

        let claims_json = BASE64URL_NOPAD
            .decode(payload.as_bytes())
            .map_err(|_| AuthError::Malformed)?;
        let signature = BASE64URL_NOPAD
            .decode(signature.as_bytes())
            .map_err(|_| AuthError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidSignature)?;

        let claims: SessionClaims =
            serde_json::from_slice(&claims_json).map_err(|_| AuthError::Malformed)?;

        if claims.is_expired_at(now) {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }

    /// The gate check: decode the admin identity from an optional credential.
    pub fn authorize(&self, credential: Option<&str>) -> Result<AdminIdentity, AuthError> {
        self.authorize_at(credential, Utc::now())
    }

    pub fn authorize_at(
        &self,
        credential: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AdminIdentity, AuthError> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredential)?;
        let claims = self.verify_at(token, now)?;
        Ok(AdminIdentity::from(&claims))
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn service() -> SessionTokenService {
        SessionTokenService::new(SECRET, Duration::hours(24)).unwrap()
    }

    #[test]
    fn test_issue_then_verify() {
        let service = service();
        let issued = service.issue("admin").unwrap();

        let claims = service.verify(&issued.token).unwrap();
        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
        assert_eq!(issued.expires_at.timestamp(), claims.exp);
    }

    #[test]
    fn test_token_issued_25_hours_ago_is_expired() {
        let service = service();
        let now = Utc::now();
        let issued = service.issue_at("admin", now - Duration::hours(25)).unwrap();

        assert_eq!(service.verify_at(&issued.token, now), Err(AuthError::Expired));
    }

    #[test]
    fn test_expiry_boundary() {
        let service = service();
        let issued_at = Utc::now();
        let issued = service.issue_at("admin", issued_at).unwrap();

        let just_before = issued_at + Duration::hours(24) - Duration::seconds(1);
        assert!(service.verify_at(&issued.token, just_before).is_ok());
        let at_expiry = issued_at + Duration::hours(24);
        assert_eq!(service.verify_at(&issued.token, at_expiry), Err(AuthError::Expired));
    }

    #[test]
    fn test_wrong_secret_is_invalid_signature() {
        let issued = service().issue("admin").unwrap();
        let other = SessionTokenService::new(b"another-secret-another-secret-xx", Duration::hours(24)).unwrap();

        assert_eq!(other.verify(&issued.token), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_signature_checked_before_expiry() {
        let now = Utc::now();
        let issued = service().issue_at("admin", now - Duration::hours(48)).unwrap();
        let other = SessionTokenService::new(b"another-secret-another-secret-xx", Duration::hours(24)).unwrap();

        assert_eq!(other.verify_at(&issued.token, now), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_malformed_tokens() {
        let service = service();
        for token in ["", "abc", "abc.", ".abc", "a.b.c", "!!!.###"] {
            assert_eq!(service.verify(token), Err(AuthError::Malformed), "token {:?}", token);
        }
    }

    #[test]
    fn test_signed_garbage_payload_is_malformed() {
        let service = service();
        let payload = BASE64URL_NOPAD.encode(b"not json");
        let signature = BASE64URL_NOPAD.encode(&service.sign(payload.as_bytes()));

        assert_eq!(
            service.verify(&format!("{}.{}", payload, signature)),
            Err(AuthError::Malformed)
        );
    }

    #[test]
    fn test_authorize_missing_credential() {
        let service = service();
        assert_eq!(service.authorize(None), Err(AuthError::MissingCredential));
        assert_eq!(service.authorize(Some("   ")), Err(AuthError::MissingCredential));
    }

    #[test]
    fn test_authorize_is_idempotent() {
        let service = service();
        let issued = service.issue("editor").unwrap();

        let first = service.authorize(Some(&issued.token)).unwrap();
        let second = service.authorize(Some(&issued.token)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.username, "editor");
    }

    #[test]
    fn test_rejects_empty_secret_and_bad_ttl() {
        assert!(SessionTokenService::new(b"", Duration::hours(1)).is_err());
        assert!(SessionTokenService::new(SECRET, Duration::zero()).is_err());
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(AuthError::MissingCredential.reason(), "missing_credential");
        assert_eq!(AuthError::InvalidSignature.reason(), "invalid_signature");
        assert_eq!(AuthError::Expired.reason(), "expired");
        assert_eq!(AuthError::Malformed.reason(), "malformed");
    }
}
