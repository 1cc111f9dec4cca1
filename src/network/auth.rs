//! Token Resolution
//!
//! Turns an opaque session token into a user identity. The server does NOT
//! issue tokens; it only validates JWTs from an external provider, or looks
//! tokens up in a fixed table for development and tests.

use std::collections::{HashMap, HashSet};

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::game::state::UserId;

/// JWT validation settings.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 secret.
    pub secret: Option<String>,
    /// Skip expiry validation (testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_ISSUER`, `AUTH_AUDIENCE`, `AUTH_PUBLIC_KEY_PEM`,
    /// `AUTH_SECRET` and `AUTH_SKIP_EXPIRY`.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Whether a key or secret is present.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims read from provider tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the provider's user id.
    pub sub: String,
    /// Expiry (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

/// A resolved user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable id derived from the subject.
    pub user_id: UserId,
    /// Provider subject.
    pub subject: String,
}

impl UserIdentity {
    /// Identity for a provider subject.
    pub fn from_subject(subject: impl Into<String>) -> Self {
        let subject = subject.into();
        Self {
            user_id: derive_user_id(&subject),
            subject,
        }
    }
}

/// Derive a deterministic [`UserId`] from a subject string. Subjects that are
/// already UUIDs map to that id unchanged.
pub fn derive_user_id(subject: &str) -> UserId {
    if let Some(id) = UserId::from_uuid_str(subject) {
        return id;
    }

    let mut hasher = Sha256::new();
    hasher.update(b"tickwire-user:");
    hasher.update(subject.as_bytes());
    let hash = hasher.finalize();

    let mut id = [0u8; 16];
    id.copy_from_slice(&hash[..16]);
    UserId::new(id)
}

/// Authentication errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No key or secret configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience mismatch.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Token is not known to the resolver.
    #[error("unknown token")]
    UnknownToken,
    /// Other JWT decoding error.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Resolves a session token to a user.
pub trait TokenResolver: Send + Sync {
    /// Resolve `token`.
    fn resolve(&self, token: &str) -> Result<UserIdentity, AuthError>;
}

/// Validates provider-issued JWTs.
#[derive(Debug, Clone)]
pub struct JwtTokenResolver {
    config: AuthConfig,
}

impl JwtTokenResolver {
    /// Create a resolver; fails when no key or secret is configured.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        if !config.is_configured() {
            return Err(AuthError::NotConfigured);
        }
        Ok(Self { config })
    }

    /// Validate a token and return its claims.
    pub fn validate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let config = &self.config;
        let algorithm = if config.public_key_pem.is_some() {
            Algorithm::RS256
        } else {
            Algorithm::HS256
        };

        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = HashSet::new();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }
        if config.skip_expiry {
            validation.validate_exp = false;
        }

        let token_data: TokenData<TokenClaims> = match (&config.public_key_pem, &config.secret) {
            (Some(pem), _) => {
                let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| AuthError::Decode(format!("invalid public key: {}", e)))?;
                decode(token, &key, &validation).map_err(map_jwt_error)?
            }
            (None, Some(secret)) => {
                decode(token, &DecodingKey::from_secret(secret.as_bytes()), &validation).map_err(map_jwt_error)?
            }
            (None, None) => return Err(AuthError::NotConfigured),
        };

        let claims = token_data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::MissingClaim("sub".into()));
        }

        // jsonwebtoken only checks exp when the claim is required
        if !config.skip_expiry && claims.exp > 0 {
            let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
            if now > claims.exp {
                return Err(AuthError::Expired);
            }
        }

        Ok(claims)
    }
}

impl TokenResolver for JwtTokenResolver {
    fn resolve(&self, token: &str) -> Result<UserIdentity, AuthError> {
        self.validate(token).map(|claims| UserIdentity::from_subject(claims.sub))
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::Decode(err.to_string()),
    }
}

/// Fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, String>,
}

impl StaticTokenResolver {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `token` to `subject`.
    pub fn with_token(mut self, token: impl Into<String>, subject: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), subject.into());
        self
    }
}

impl TokenResolver for StaticTokenResolver {
    fn resolve(&self, token: &str) -> Result<UserIdentity, AuthError> {
        self.tokens
            .get(token)
            .map(|subject| UserIdentity::from_subject(subject.clone()))
            .ok_or(AuthError::UnknownToken)
    }
}

// =============================================================================
// TESTS
// =============================================================================
