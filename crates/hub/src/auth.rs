// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Resolves a client token to the subject id it was issued for.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<i64, HubError>;
}

impl<F> TokenVerifier for F
where
    F: Fn(&str) -> Result<i64, HubError> + Send + Sync,
{
    fn verify(&self, token: &str) -> Result<i64, HubError> {
        self(token)
    }
}

/// Claims carried by websocket auth tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsClaims {
    #[serde(rename = "Uid")]
    pub uid: i64,
    pub exp: u64,
}

/// HS256 token verifier keyed by a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<i64, HubError> {
        jsonwebtoken::decode::<WsClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims.uid)
            .map_err(|e| HubError::Auth(e.to_string()))
    }
}

/// Mint a token for `uid` that expires after `ttl`.
pub fn issue_token(secret: &[u8], uid: i64, ttl: Duration) -> Result<String, HubError> {
    let exp = SystemTime::now()
        .checked_add(ttl)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .ok_or_else(|| HubError::Auth("token expiry out of range".to_owned()))?;
    let claims = WsClaims { uid, exp };
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret))
        .map_err(|e| HubError::Auth(format!("sign token: {e}")))
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
