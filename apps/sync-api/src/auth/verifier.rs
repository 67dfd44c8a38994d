//! Token verification behind a narrow interface.
//!
//! The hub never inspects credentials itself: it hands the opaque token to a
//! [`TokenVerifier`] and gets back a stable numeric user identity or a
//! rejection. The default implementation checks an HS256 JWT whose `sub`
//! claim carries the user id.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Resolves an opaque credential to a positive numeric user identity.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<i64, &'static str>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: i64,
}

/// HS256 JWT verifier. `sub` must parse to a positive `i64`.
pub struct JwtVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<i64, &'static str> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| "invalid or expired token")?;

        let user_id: i64 = data
            .claims
            .sub
            .parse()
            .map_err(|_| "subject is not a numeric user id")?;

        if user_id <= 0 {
            return Err("subject is not a positive user id");
        }

        Ok(user_id)
    }
}
