use crate::auth::{AuthenticatedUser, Role};
use crate::error::{DowngateError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Claims carried by a downgate bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    /// Caller role.
    pub role: Role,
    /// Expiration (Unix seconds).
    pub exp: i64,
    /// Issued at (Unix seconds).
    pub iat: i64,
}

impl Claims {
    pub fn user(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            id: self.sub.clone(),
            role: self.role,
        }
    }
}

/// Verifies bearer tokens with a static HS256 secret.
///
/// This is the single verified-decode path in the crate; expiry is always
/// validated and the signature is always checked.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for any signature, format, or expiry failure.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| DowngateError::unauthorized(format!("Invalid token: {}", e)))?;
        Ok(data.claims)
    }
}

/// Issues HS256 bearer tokens.
///
/// Token issuance normally lives with the auth service; this issuer exists
/// for local deployments and tests.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
}

impl TokenIssuer {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
        }
    }

    /// Issue a token for a user, valid for `ttl`.
    pub fn issue(&self, user_id: &str, role: Role, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| DowngateError::internal(format!("Failed to sign token: {}", e)))
    }
}

/// Extract a bearer token from an `Authorization` header value.
pub(crate) fn bearer_token(header: Option<&str>) -> Result<&str> {
    let header =
        header.ok_or_else(|| DowngateError::unauthorized("Missing Authorization header"))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| DowngateError::unauthorized("Expected Bearer token"))
}
