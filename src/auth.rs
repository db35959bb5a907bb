use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::config::{AuthConfig, MIN_JWT_SECRET_BYTES};

/// Authenticated identity carried inside a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    pub roles: BTreeSet<String>,
}

impl Principal {
    pub fn new<I, S>(subject: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject: subject.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // subject (username)
    pub roles: Vec<String>, // granted roles
    pub jti: String,        // JWT ID (unique per token)
    pub exp: i64,           // Expiration time
    pub iat: i64,           // Issued at
    pub iss: String,        // Issuer
}

/// A freshly signed token and its expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
    pub expires_in: i64,
}

/// Why a presented token was rejected
///
/// Routine on a public endpoint, so verification returns this instead of
/// logging or panicking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("signature mismatch")]
    BadSignature,
    #[error("unexpected issuer")]
    WrongIssuer,
    #[error("malformed token: {0}")]
    Malformed(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::InvalidIssuer => TokenError::WrongIssuer,
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}

/// Issues and verifies HS256 bearer tokens. Stateless, no I/O.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_token_ttl_secs: i64,
    issuer: String,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if config.jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            anyhow::bail!(
                "JWT secret must be at least {} bytes long",
                MIN_JWT_SECRET_BYTES
            );
        }
        if config.access_token_ttl_secs <= 0 {
            anyhow::bail!("Access token TTL must be positive");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[config.jwt_issuer.clone()]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);

        tracing::info!(
            issuer = %config.jwt_issuer,
            ttl_secs = config.access_token_ttl_secs,
            "Token service initialized (HS256)"
        );

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            access_token_ttl_secs: config.access_token_ttl_secs,
            issuer: config.jwt_issuer.clone(),
        })
    }

    /// Sign a token for `principal` valid for the configured TTL
    pub fn issue(&self, principal: &Principal) -> Result<IssuedToken> {
        self.issue_at(principal, Utc::now())
    }

    pub(crate) fn issue_at(&self, principal: &Principal, now: DateTime<Utc>) -> Result<IssuedToken> {
        let exp = now + Duration::seconds(self.access_token_ttl_secs);

        let claims = Claims {
            sub: principal.subject.clone(),
            roles: principal.roles.iter().cloned().collect(),
            jti: Uuid::new_v4().to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("Failed to encode JWT token")?;

        Ok(IssuedToken {
            token,
            expires_at: exp.timestamp(),
            expires_in: self.access_token_ttl_secs,
        })
    }

    /// Verify signature, expiry and issuer, then rebuild the principal
    pub fn verify(&self, token: &str) -> Result<Principal, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(TokenError::Malformed("empty subject".to_string()));
        }
        if claims.iat > claims.exp {
            return Err(TokenError::Malformed("issued after expiry".to_string()));
        }

        Ok(Principal {
            subject: claims.sub,
            roles: claims.roles.into_iter().collect(),
        })
    }
}
