use std::collections::HashSet;
use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;

use super::jwks::{KeyFetchError, KeyProvider};
use crate::config::OidcConfig;

/// The only signature algorithm accepted on bearer tokens.
const ALLOWED_ALGORITHM: Algorithm = Algorithm::RS256;

/// Verified caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Email when the token carries one, otherwise the subject. Never empty.
    pub user_id: String,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub issuer: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingToken,
    #[error("Invalid Authorization header format")]
    MalformedHeader,
    #[error("Invalid token signature")]
    SignatureInvalid,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token issuer mismatch")]
    IssuerMismatch,
    #[error("Token audience mismatch")]
    AudienceMismatch,
    #[error("Token has neither email nor subject")]
    ClaimsIncomplete,
    #[error("Signing key fetch failed: {0}")]
    KeyFetch(#[from] KeyFetchError),
}

impl AuthError {
    /// Machine-readable code returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedHeader => "malformed_header",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::TokenExpired => "token_expired",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::ClaimsIncomplete => "claims_incomplete",
            AuthError::KeyFetch(_) => "key_fetch_failed",
        }
    }

    /// Message safe to show to API clients.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::MissingToken | AuthError::MalformedHeader => {
                "Missing or invalid Authorization header"
            }
            AuthError::SignatureInvalid => "Invalid token: signature verification failed",
            AuthError::TokenExpired => "Token expired",
            AuthError::IssuerMismatch => "Invalid token: issuer mismatch",
            AuthError::AudienceMismatch => "Invalid token: audience mismatch",
            AuthError::ClaimsIncomplete => "Invalid token: missing user_id",
            AuthError::KeyFetch(_) => "Internal server error",
        }
    }

    /// True for failures caused by the caller's credentials rather than by us.
    pub fn is_unauthorized(&self) -> bool {
        !matches!(self, AuthError::KeyFetch(_))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|a| a == expected),
        }
    }
}

/// Claims read from a token whose signature has been verified.
///
/// Everything is optional here; presence is enforced by `TokenVerifier` so
/// each missing claim maps onto its own error.
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    aud: Option<Audience>,
    /// Cognito access tokens carry the app client here instead of in `aud`.
    #[serde(default)]
    client_id: Option<String>,
}

/// Extract the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.map(str::trim).unwrap_or_default();
    if value.is_empty() || value == "Bearer" {
        return Err(AuthError::MissingToken);
    }

    let token = value
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MalformedHeader)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    if token.contains(char::is_whitespace) {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

/// Validates bearer tokens against the identity provider's keys and derives
/// the caller's `Identity`. Shared by every authenticated route.
pub struct TokenVerifier {
    keys: Arc<dyn KeyProvider>,
    issuer: String,
    audience: Option<String>,
    leeway_secs: i64,
}

impl TokenVerifier {
    pub fn new(keys: Arc<dyn KeyProvider>, config: &OidcConfig) -> Self {
        let audience = if config.verify_audience {
            config.audience.clone()
        } else {
            None
        };

        Self {
            keys,
            issuer: config.issuer.clone(),
            audience,
            leeway_secs: i64::try_from(config.leeway_secs).unwrap_or(i64::MAX),
        }
    }

    /// Authenticate a request by validating its Bearer token.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let value = match headers.get(AUTHORIZATION) {
            None => None,
            Some(v) => Some(v.to_str().map_err(|_| AuthError::MalformedHeader)?),
        };
        self.verify(value).await
    }

    /// Verify an `Authorization` header value at the current time.
    pub async fn verify(&self, authorization: Option<&str>) -> Result<Identity, AuthError> {
        self.verify_at(authorization, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        authorization: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthError> {
        let token = bearer_token(authorization)?;
        self.verify_token_at(token, now).await
    }

    /// Verify a raw JWT. Checks run in a fixed order: structure, algorithm,
    /// signature, expiry, issuer, audience, identity claims.
    pub async fn verify_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!("Unparseable token header: {}", e);
            AuthError::SignatureInvalid
        })?;

        if header.alg != ALLOWED_ALGORITHM {
            tracing::debug!("Rejected token signed with {:?}", header.alg);
            return Err(AuthError::SignatureInvalid);
        }

        let kid = header.kid.ok_or_else(|| {
            tracing::debug!("Token header has no kid");
            AuthError::SignatureInvalid
        })?;

        let keys = self.keys.keys().await?;
        let key = keys.get(&kid).ok_or_else(|| {
            tracing::debug!("No signing key for kid {}", kid);
            AuthError::SignatureInvalid
        })?;

        // Only the signature is checked here; claims are checked below so
        // that each failure keeps its own error.
        let mut validation = Validation::new(ALLOWED_ALGORITHM);
        validation.algorithms = vec![ALLOWED_ALGORITHM];
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let claims = decode::<RawClaims>(token, key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::Json(_) => {
                    tracing::debug!("Signed token has malformed claims: {}", e);
                    AuthError::ClaimsIncomplete
                }
                _ => {
                    tracing::debug!("Token signature rejected: {}", e);
                    AuthError::SignatureInvalid
                }
            })?
            .claims;

        let exp = claims.exp.ok_or(AuthError::ClaimsIncomplete)?;
        if exp.saturating_add(self.leeway_secs) <= now.timestamp() {
            return Err(AuthError::TokenExpired);
        }

        let issuer = match claims.iss {
            Some(iss) if iss == self.issuer => iss,
            _ => return Err(AuthError::IssuerMismatch),
        };

        if let Some(expected) = &self.audience {
            let aud_ok = claims.aud.as_ref().is_some_and(|aud| aud.contains(expected));
            let client_ok = claims.client_id.as_deref() == Some(expected.as_str());
            if !aud_ok && !client_ok {
                return Err(AuthError::AudienceMismatch);
            }
        }

        let expires_at =
            DateTime::<Utc>::from_timestamp(exp, 0).ok_or(AuthError::ClaimsIncomplete)?;

        let email = claims.email.filter(|e| !e.is_empty());
        let subject = claims.sub.filter(|s| !s.is_empty());
        let user_id = email
            .clone()
            .or_else(|| subject.clone())
            .ok_or(AuthError::ClaimsIncomplete)?;

        Ok(Identity {
            user_id,
            subject,
            email,
            issuer,
            expires_at,
        })
    }
}
