//! HS256 token issuing and verification around [`Claims`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::claims::{validate_claims, Claims, TokenValidationError};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Signing(String),

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Validates bearer tokens into claims.
///
/// The API middleware depends on this seam rather than a concrete signer so
/// tests can substitute their own.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError>;
}

/// Symmetric HS256 signer/validator over a shared secret.
pub struct Hs256Tokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiration: Duration,
}

impl Hs256Tokens {
    pub fn new(secret: &[u8], expiration: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            expiration,
        }
    }

    /// Issue a token for the given subject, valid from `now` for the
    /// configured lifetime.
    pub fn issue(&self, subject: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + self.expiration.as_secs() as i64,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

impl TokenValidator for Hs256Tokens {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        // Signature check here; time-window checks are deterministic against
        // the caller's clock in validate_claims.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Hs256Tokens {
        Hs256Tokens::new(b"test-secret", Duration::from_secs(3600))
    }

    #[test]
    fn issued_token_validates() {
        let tokens = tokens();
        let now = Utc::now();

        let token = tokens.issue("admin", now).unwrap();
        let claims = tokens.validate(&token, now).unwrap();

        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = tokens().issue("admin", Utc::now()).unwrap();

        let other = Hs256Tokens::new(b"other-secret", Duration::from_secs(3600));
        assert!(matches!(
            other.validate(&token, Utc::now()),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = tokens();
        let issued = Utc::now() - chrono::Duration::hours(2);

        let token = tokens.issue("admin", issued).unwrap();
        assert!(matches!(
            tokens.validate(&token, Utc::now()),
            Err(TokenError::Claims(TokenValidationError::Expired))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            tokens().validate("not-a-jwt", Utc::now()),
            Err(TokenError::Invalid(_))
        ));
    }
}
