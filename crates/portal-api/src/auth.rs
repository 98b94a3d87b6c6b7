//! Password hashing and JWT session tokens
//!
//! Passwords are stored as PBKDF2-HMAC-SHA512 hashes next to a per-user
//! hex salt. Tokens are HS256 JWTs carrying the user id, email, and role.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use beyondfire_common::{Error, Result, Role, User};

use crate::handlers::{ApiError, AppState};

const PBKDF2_ROUNDS: u32 = 1000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 64;

const TOKEN_LIFETIME_HOURS: i64 = 24;

/// Hash a password with a fresh random salt, returning `(hash, salt)`
/// as hex strings
pub fn hash_password(password: &str) -> (String, String) {
    let salt = hex::encode(rand::random::<[u8; SALT_LEN]>());
    let hash = derive(password, &salt);
    (hash, salt)
}

/// The salt is fed in as its hex string, matching how stored credentials
/// were originally produced
fn derive(password: &str, salt: &str) -> String {
    let mut output = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha512>(
        password.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ROUNDS,
        &mut output,
    );
    hex::encode(output)
}

pub fn verify_password(password: &str, hash: &str, salt: &str) -> bool {
    derive(password, salt) == hash
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub exp: i64,
}

pub fn issue_token(user: &User, secret: &str) -> Result<String> {
    let expires = Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS);
    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        role: user.role,
        exp: expires.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Other(anyhow::anyhow!("could not sign token: {}", e)))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| Error::Unauthorized(format!("Invalid token: {}", e)))
}

/// The authenticated caller, extracted from the bearer token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners see their own resources, admins see everything
    pub fn can_access(&self, owner_id: &str) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        let claims = verify_token(token, &state.config.jwt_secret)
            .map_err(|_| ApiError::forbidden("Invalid or expired token"))?;

        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        })
    }
}
