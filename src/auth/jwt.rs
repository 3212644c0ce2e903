//! JWT Token Handler
//! Mission: Issue and verify stateless bearer credentials

use crate::auth::{middleware::AuthError, models::Claims};
use crate::clock::Clock;
use anyhow::{Context, Result};
use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use tracing::debug;

/// Default credential lifetime
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 30;

/// JWT Handler for token operations
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtHandler {
    /// Create a new JWT handler with secret key
    pub fn new(secret: &str, token_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl,
            clock,
        }
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Issue a signed token for `username`, expiring `token_ttl` from now
    pub fn issue_token(&self, username: &str) -> Result<String> {
        let now = self.clock.now();
        let expiration = now
            .checked_add_signed(self.token_ttl)
            .context("Invalid timestamp")?;

        let claims = Claims {
            sub: username.to_string(),
            iat: now.timestamp() as usize,
            exp: expiration.timestamp() as usize,
        };

        debug!(
            "Issuing JWT for {}, expires in {}m",
            username,
            self.token_ttl.num_minutes()
        );

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("Failed to generate JWT")
    }

    /// Verify signature and expiry, returning the embedded claims
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        // Expiry is checked below against the injected clock, with no leeway
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let decoded = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| AuthError::InvalidToken)?;

        let now = self.clock.now().timestamp().max(0) as usize;
        if now >= decoded.claims.exp {
            debug!("Rejected expired JWT for {}", decoded.claims.sub);
            return Err(AuthError::InvalidToken);
        }

        debug!("Validated JWT for {}", decoded.claims.sub);

        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn handler_with_clock(secret: &str) -> (JwtHandler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let handler = JwtHandler::new(secret, Duration::minutes(30), clock.clone());
        (handler, clock)
    }

    #[test]
    fn test_jwt_issue_and_verify() {
        let (handler, clock) = handler_with_clock("test-secret-key-12345");

        let token = handler.issue_token("alice").unwrap();
        assert!(!token.is_empty());

        let claims = handler.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.iat, clock.now().timestamp() as usize);
        assert_eq!(claims.exp, claims.iat + 30 * 60);
    }

    #[test]
    fn test_valid_until_expiry_then_rejected() {
        let (handler, clock) = handler_with_clock("test-secret-key-12345");
        let token = handler.issue_token("alice").unwrap();

        clock.advance(Duration::minutes(29) + Duration::seconds(59));
        assert_eq!(handler.verify_token(&token).unwrap().sub, "alice");

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            handler.verify_token(&token),
            Err(AuthError::InvalidToken)
        ));

        clock.advance(Duration::days(365));
        assert!(handler.verify_token(&token).is_err());
    }

    #[test]
    fn test_invalid_token_rejected() {
        let (handler, _) = handler_with_clock("test-secret-key-12345");

        for garbage in ["", "invalid.token.here", "a.b", "....", "Bearer x"] {
            assert!(handler.verify_token(garbage).is_err(), "{garbage:?}");
        }
    }

    #[test]
    fn test_different_secrets_reject() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        let handler1 = JwtHandler::new("secret1", Duration::minutes(30), clock.clone());
        let handler2 = JwtHandler::new("secret2", Duration::minutes(30), clock);

        let token = handler1.issue_token("alice").unwrap();
        assert!(handler2.verify_token(&token).is_err());
    }

    #[test]
    fn test_tampering_any_byte_rejected() {
        let (handler, _) = handler_with_clock("test-secret-key-12345");
        let token = handler.issue_token("alice").unwrap();

        let bytes = token.as_bytes();
        for i in 0..bytes.len() {
            let mut tampered = bytes.to_vec();
            tampered[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(tampered).unwrap();

            assert!(
                handler.verify_token(&tampered).is_err(),
                "tampered byte {} accepted",
                i
            );
        }

        // Truncation and extension are tampering too
        assert!(handler.verify_token(&token[..token.len() - 1]).is_err());
        assert!(handler.verify_token(&format!("{token}A")).is_err());
    }
}
