use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::Role;

/// Who is calling: resolved from a bearer credential on every statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Ulid,
    pub business_id: Ulid,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub business_id: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingCredential,
    Expired,
    InvalidToken(String),
    InvalidClaims(&'static str),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingCredential => {
                write!(f, "credential missing: SET SESSION AUTHORIZATION '<token>' first")
            }
            AuthError::Expired => write!(f, "token expired, please log in again"),
            AuthError::InvalidToken(e) => write!(f, "invalid token: {e}"),
            AuthError::InvalidClaims(claim) => write!(f, "invalid token claim: {claim}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Resolves a bearer credential into an identity.
pub trait IdentityContext: Send + Sync {
    fn authenticate(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWTs signed with a shared secret.
pub struct JwtIdentity {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentity {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn mint(&self, identity: &Identity, ttl: Duration) -> Result<String, AuthError> {
        let now = now_epoch_seconds();
        let claims = Claims {
            user_id: identity.user_id.to_string(),
            business_id: identity.business_id.to_string(),
            role: identity.role.as_str().to_string(),
            exp: now + ttl.as_secs() as i64,
            iat: now,
        };
        self.encode_claims(&claims)
    }

    pub fn encode_claims(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

impl IdentityContext for JwtIdentity {
    fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
        let token = credential.trim();
        let token = token
            .strip_prefix("Bearer ")
            .or_else(|| token.strip_prefix("bearer "))
            .unwrap_or(token);
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;
        let claims = data.claims;

        Ok(Identity {
            user_id: Ulid::from_string(&claims.user_id)
                .map_err(|_| AuthError::InvalidClaims("user_id"))?,
            business_id: Ulid::from_string(&claims.business_id)
                .map_err(|_| AuthError::InvalidClaims("business_id"))?,
            role: Role::from_claim(&claims.role),
        })
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
