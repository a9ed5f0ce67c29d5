//! Admin bearer tokens.
//!
//! # Purpose
//! Claims and HS256 sign/verify helpers for the tokens presented on
//! authenticated admin routes. Accounts and login live in the identity
//! service; it mints tokens with [`AdminTokenSigner`] using the shared secret.
//!
//! # Key invariants
//! - Only HS256 is accepted.
//! - `iss` must match the configured issuer and `exp` must be in the future
//!   (with a small leeway for clock skew).
//! - `role` is the role name, `tid` the tenant id; together they select the
//!   policy subject and domain.
use crate::config::JwtConfig;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const LEEWAY_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub role: String,
    pub tid: i64,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("signing secret is empty")]
    EmptySecret,
}

pub struct AdminTokenSigner {
    key: EncodingKey,
    issuer: String,
}

impl AdminTokenSigner {
    pub fn new(secret: &str, issuer: &str) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        Ok(Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
        })
    }

    pub fn from_config(config: &JwtConfig) -> Result<Self, TokenError> {
        Self::new(&config.secret, &config.issuer)
    }

    /// Mint a token for `subject` acting as `role` in tenant `tenant_id`.
    pub fn sign(
        &self,
        subject: &str,
        role: &str,
        tenant_id: i64,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = now_epoch_seconds();
        let claims = AdminClaims {
            sub: subject.to_string(),
            role: role.to_string(),
            tid: tenant_id,
            exp: now + ttl.as_secs() as i64,
            iat: now,
            iss: self.issuer.clone(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.key,
        )?)
    }
}

pub fn verify_admin_token(config: &JwtConfig, token: &str) -> Result<AdminClaims, TokenError> {
    if config.secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[config.issuer.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss"]);
    validation.leeway = LEEWAY_SECS;
    let data = jsonwebtoken::decode::<AdminClaims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}
