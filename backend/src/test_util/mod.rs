//! Helpers shared by unit and integration tests.

pub mod keys;
pub mod mock_openai;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::{json, Map, Value};

use crate::auth::{KeyFetchError, KeyProvider, SigningKeySet};
use crate::config::{
    CompletionConfig, Config, CorsConfig, DatabaseConfig, LoggingConfig, OidcConfig, ServerConfig,
};
use crate::llm::OpenAiClient;
use crate::retry::RetryPolicy;
use crate::store::InMemoryConversationStore;
use crate::AppState;
use keys::{RSA_EXPONENT, TRUSTED_KID, TRUSTED_MODULUS, TRUSTED_PRIVATE_PEM};

pub const TEST_ISSUER: &str = "https://cognito-idp.us-west-2.amazonaws.com/us-west-2_test";
pub const TEST_AUDIENCE: &str = "test-client";

/// OIDC settings trusting `issuer` with audience checks on.
pub fn oidc_config(issuer: &str) -> OidcConfig {
    let mut config = OidcConfig::new(issuer);
    config.audience = Some(TEST_AUDIENCE.to_string());
    config
}

/// Full configuration pointing at a completion service under `completion_url`.
pub fn test_config(completion_url: &str) -> Config {
    Config {
        server: ServerConfig::default(),
        oidc: oidc_config(TEST_ISSUER),
        completion: CompletionConfig {
            base_url: completion_url.to_string(),
            api_key: "sk-test".to_string(),
            timeout_secs: 2,
            ..Default::default()
        },
        database: DatabaseConfig {
            url: "memory".to_string(),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            json: false,
        },
        cors: CorsConfig {
            origins: "*".to_string(),
        },
    }
}

/// Application state with an in-memory store, the given key source, and a
/// real completion client without retries.
pub fn create_test_state(config: Config, keys: Arc<dyn KeyProvider>) -> AppState {
    let completion = OpenAiClient::new(&config.completion)
        .expect("Failed to build completion client")
        .with_retry(RetryPolicy::none());
    AppState::new(
        config,
        keys,
        Arc::new(InMemoryConversationStore::new()),
        Arc::new(completion),
    )
}

/// JWKS document publishing RSA keys as `(kid, modulus)` pairs.
pub fn jwks_json(keys: &[(&str, &str)]) -> Value {
    let keys: Vec<Value> = keys
        .iter()
        .map(|(kid, n)| {
            json!({
                "kid": kid,
                "kty": "RSA",
                "alg": "RS256",
                "use": "sig",
                "n": n,
                "e": RSA_EXPONENT,
            })
        })
        .collect();
    json!({ "keys": keys })
}

/// Key provider serving a fixed key set without network access.
pub struct StaticKeyProvider {
    set: Arc<SigningKeySet>,
}

impl StaticKeyProvider {
    /// Publishes only the trusted test key under `TRUSTED_KID`.
    pub fn trusted() -> Self {
        let key = DecodingKey::from_rsa_components(TRUSTED_MODULUS, RSA_EXPONENT)
            .expect("Invalid test modulus");
        Self {
            set: Arc::new(SigningKeySet::from_keys([(TRUSTED_KID.to_string(), key)])),
        }
    }

    pub fn set(&self) -> Arc<SigningKeySet> {
        self.set.clone()
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn keys(&self) -> Result<Arc<SigningKeySet>, KeyFetchError> {
        Ok(self.set.clone())
    }
}

/// Key provider whose endpoint never answers.
pub struct FailingKeyProvider;

#[async_trait]
impl KeyProvider for FailingKeyProvider {
    async fn keys(&self) -> Result<Arc<SigningKeySet>, KeyFetchError> {
        Err(KeyFetchError::Timeout)
    }
}

/// Builder for signed test tokens.
///
/// Defaults to a token from `TEST_ISSUER` for `TEST_AUDIENCE`, valid for an
/// hour, signed with the trusted key.
pub struct TestToken {
    claims: Map<String, Value>,
    kid: Option<String>,
    signing_pem: String,
}

impl TestToken {
    pub fn new(sub: &str) -> Self {
        let mut token = Self::anonymous();
        token.claims.insert("sub".to_string(), json!(sub));
        token
    }

    /// A token with neither `sub` nor `email`.
    pub fn anonymous() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(TEST_ISSUER));
        claims.insert("aud".to_string(), json!(TEST_AUDIENCE));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert("exp".to_string(), json!((now + Duration::hours(1)).timestamp()));
        claims.insert("token_use".to_string(), json!("id"));
        Self {
            claims,
            kid: Some(TRUSTED_KID.to_string()),
            signing_pem: TRUSTED_PRIVATE_PEM.to_string(),
        }
    }

    pub fn email(mut self, email: &str) -> Self {
        self.claims.insert("email".to_string(), json!(email));
        self
    }

    pub fn expires_in(self, delta: Duration) -> Self {
        self.expires_at((Utc::now() + delta).timestamp())
    }

    pub fn expires_at(mut self, exp: i64) -> Self {
        self.claims.insert("exp".to_string(), json!(exp));
        self
    }

    pub fn without_exp(mut self) -> Self {
        self.claims.remove("exp");
        self
    }

    pub fn signing_pem(mut self, pem: &str) -> Self {
        self.signing_pem = pem.to_string();
        self
    }

    pub fn kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    pub fn no_kid(mut self) -> Self {
        self.kid = None;
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.claims.insert("iss".to_string(), json!(issuer));
        self
    }

    pub fn audience(mut self, audience: &str) -> Self {
        self.claims.insert("aud".to_string(), json!(audience));
        self
    }

    pub fn audiences(mut self, audiences: &[&str]) -> Self {
        self.claims.insert("aud".to_string(), json!(audiences));
        self
    }

    pub fn no_audience(mut self) -> Self {
        self.claims.remove("aud");
        self
    }

    /// Cognito access tokens carry the app client in `client_id`.
    pub fn client_id(mut self, client_id: &str) -> Self {
        self.claims.insert("client_id".to_string(), json!(client_id));
        self.claims.insert("token_use".to_string(), json!("access"));
        self
    }

    pub fn sign(self) -> String {
        let key = EncodingKey::from_rsa_pem(self.signing_pem.as_bytes())
            .expect("Invalid test signing key");
        let header = Header {
            alg: Algorithm::RS256,
            kid: self.kid.clone(),
            ..Default::default()
        };
        encode(&header, &self.claims, &key).expect("Failed to encode JWT")
    }

    /// Same claims, signed with a shared secret instead of the RSA key.
    pub fn sign_hs256(self, secret: &[u8]) -> String {
        let header = Header {
            alg: Algorithm::HS256,
            kid: self.kid.clone(),
            ..Default::default()
        };
        encode(&header, &self.claims, &EncodingKey::from_secret(secret))
            .expect("Failed to encode JWT")
    }
}
