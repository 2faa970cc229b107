use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::api::Document;

/// How long an issued token stays valid
pub const TOKEN_VALIDITY: Duration = Duration::from_secs(60 * 60);

const EXPIRY_CLAIM: &str = "exp";
const ISSUED_AT_CLAIM: &str = "iat";

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Token signature does not match")]
    BadSignature,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Identity already carries reserved claim {0}")]
    ReservedClaim(String),

    #[error("Claim {0} must be a non-negative integer")]
    InvalidClaim(String),

    #[error("Failed to sign token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityClaims {
    #[serde(flatten)]
    identity: Document,
    iat: u64,
    exp: u64,
}

/// Issues and verifies HS256 tokens carrying a caller supplied identity
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validity: Duration,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self::with_validity(secret, TOKEN_VALIDITY)
    }

    pub fn with_validity(secret: &str, validity: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validity,
        }
    }

    pub fn issue(&self, identity: Document) -> Result<String, TokenError> {
        self.issue_at(identity, now_epoch_seconds())
    }

    /// An `iat` carried by the identity replaces the issue time, `exp` is always computed here
    fn issue_at(&self, mut identity: Document, now: u64) -> Result<String, TokenError> {
        if identity.contains_key(EXPIRY_CLAIM) {
            return Err(TokenError::ReservedClaim(EXPIRY_CLAIM.to_string()));
        }
        let issued_at = match identity.remove(ISSUED_AT_CLAIM) {
            None => now,
            Some(iat) => iat
                .as_u64()
                .ok_or_else(|| TokenError::InvalidClaim(ISSUED_AT_CLAIM.to_string()))?,
        };

        let claims = IdentityClaims {
            identity,
            iat: issued_at,
            exp: issued_at + self.validity.as_secs(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)
    }

    /// Checks signature and expiry, returns the identity the token was issued for
    pub fn verify(&self, token: &str) -> Result<Document, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        // identity is opaque, an `aud` key in it is not an audience claim
        validation.validate_aud = false;

        let token_data =
            jsonwebtoken::decode::<IdentityClaims>(token, &self.decoding_key, &validation)?;
        Ok(token_data.claims.identity)
    }
}

fn now_epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
