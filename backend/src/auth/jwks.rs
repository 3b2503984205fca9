use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::OidcConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum KeyFetchError {
    #[error("JWKS request failed: {0}")]
    Request(String),
    #[error("JWKS request timed out")]
    Timeout,
    #[error("JWKS endpoint returned status {0}")]
    Status(u16),
    #[error("Malformed JWKS payload: {0}")]
    Malformed(String),
}

impl KeyFetchError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            KeyFetchError::Timeout
        } else {
            KeyFetchError::Request(e.to_string())
        }
    }

    /// Whether a second attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            KeyFetchError::Request(_) | KeyFetchError::Timeout => true,
            KeyFetchError::Status(status) => *status == 429 || *status >= 500,
            KeyFetchError::Malformed(_) => false,
        }
    }
}

/// Source of the identity provider's public signing keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Current key set, fetching it if nothing usable is cached.
    async fn keys(&self) -> Result<Arc<SigningKeySet>, KeyFetchError>;
}

/// RS256 verification keys indexed by key id.
#[derive(Clone, Default)]
pub struct SigningKeySet {
    keys: HashMap<String, DecodingKey>,
}

impl std::fmt::Debug for SigningKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeySet")
            .field("kids", &self.kids())
            .finish()
    }
}

/// JWKS key set response.
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default, rename = "use")]
    key_use: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

impl SigningKeySet {
    pub fn from_keys(keys: impl IntoIterator<Item = (String, DecodingKey)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Parse a JWKS document, keeping only RSA signing keys usable with RS256.
    ///
    /// Keys declaring another algorithm are skipped so that a key can never
    /// be used under an algorithm it was not published for.
    pub fn from_jwks_json(body: &[u8]) -> Result<Self, KeyFetchError> {
        let response: JwksResponse =
            serde_json::from_slice(body).map_err(|e| KeyFetchError::Malformed(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in response.keys {
            let Some(kid) = jwk.kid.clone() else {
                tracing::warn!("Skipping JWKS key without kid");
                continue;
            };
            if jwk.kty != "RSA" {
                tracing::debug!("Skipping non-RSA key {} ({})", kid, jwk.kty);
                continue;
            }
            if jwk.alg.as_deref().is_some_and(|alg| alg != "RS256") {
                tracing::warn!("Skipping key {} with unsupported alg {:?}", kid, jwk.alg);
                continue;
            }
            if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
                tracing::debug!("Skipping key {} not meant for signatures", kid);
                continue;
            }
            if let (Some(n), Some(e)) = (&jwk.n, &jwk.e) {
                match DecodingKey::from_rsa_components(n, e) {
                    Ok(key) => {
                        keys.insert(kid, key);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse RSA key {}: {}", kid, e);
                    }
                }
            }
        }

        if keys.is_empty() {
            return Err(KeyFetchError::Malformed(
                "no usable RSA signing keys".to_string(),
            ));
        }
        Ok(Self { keys })
    }

    pub fn get(&self, kid: &str) -> Option<&DecodingKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn kids(&self) -> Vec<&str> {
        let mut kids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        kids.sort_unstable();
        kids
    }
}

struct CachedKeys {
    keys: Arc<SigningKeySet>,
    fetched_at: Instant,
}

/// Client for fetching and caching JWKS keys.
///
/// Nothing is fetched until the first `keys()` call. The cached set is
/// served until `ttl` elapses; concurrent callers that find the cache empty
/// may each fetch, and the last writer wins.
pub struct JwksClient {
    http_client: Client,
    jwks_uri: String,
    ttl: Duration,
    retry: RetryPolicy,
    cache: RwLock<Option<CachedKeys>>,
}

impl JwksClient {
    pub fn new(config: &OidcConfig) -> Result<Self, KeyFetchError> {
        Self::with_uri(
            &config.jwks_url(),
            Duration::from_secs(config.fetch_timeout_secs),
            Duration::from_secs(config.key_cache_ttl_secs),
        )
    }

    pub fn with_uri(jwks_uri: &str, timeout: Duration, ttl: Duration) -> Result<Self, KeyFetchError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeyFetchError::Request(e.to_string()))?;

        Ok(Self {
            http_client,
            jwks_uri: jwks_uri.to_string(),
            ttl,
            retry: RetryPolicy::default(),
            cache: RwLock::new(None),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    async fn fetch(&self) -> Result<SigningKeySet, KeyFetchError> {
        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(KeyFetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyFetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(KeyFetchError::from_reqwest)?;
        SigningKeySet::from_jwks_json(&body)
    }

    async fn cached(&self) -> Option<Arc<SigningKeySet>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| c.keys.clone())
    }
}

#[async_trait]
impl KeyProvider for JwksClient {
    async fn keys(&self) -> Result<Arc<SigningKeySet>, KeyFetchError> {
        if let Some(keys) = self.cached().await {
            return Ok(keys);
        }

        tracing::info!("Fetching JWKS from {}", self.jwks_uri);
        let keys = self
            .retry
            .run("JWKS fetch", KeyFetchError::is_transient, move || self.fetch())
            .await
            .map_err(|e| {
                tracing::error!("JWKS fetch from {} failed: {}", self.jwks_uri, e);
                e
            })?;

        let keys = Arc::new(keys);
        tracing::info!("Loaded {} JWKS keys", keys.len());

        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeys {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::keys::{RSA_EXPONENT, TRUSTED_KID, TRUSTED_MODULUS};
    use crate::test_util::jwks_json;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, ttl: Duration) -> JwksClient {
        JwksClient::with_uri(
            &format!("{}/.well-known/jwks.json", server.uri()),
            Duration::from_secs(2),
            ttl,
        )
        .unwrap()
        .with_retry(RetryPolicy {
            base_ms: 1,
            jitter: 0.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_parse_rsa_key() {
        let body = serde_json::to_vec(&jwks_json(&[(TRUSTED_KID, TRUSTED_MODULUS)])).unwrap();
        let set = SigningKeySet::from_jwks_json(&body).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get(TRUSTED_KID).is_some());
    }

    #[test]
    fn test_parse_skips_foreign_algorithms_and_types() {
        let body = serde_json::to_vec(&json!({
            "keys": [
                {"kid": "hs", "kty": "oct", "k": "c2VjcmV0"},
                {"kid": "ps", "kty": "RSA", "alg": "PS256", "n": TRUSTED_MODULUS, "e": RSA_EXPONENT},
                {"kid": "enc", "kty": "RSA", "use": "enc", "n": TRUSTED_MODULUS, "e": RSA_EXPONENT},
                {"kid": "good", "kty": "RSA", "alg": "RS256", "use": "sig", "n": TRUSTED_MODULUS, "e": RSA_EXPONENT}
            ]
        }))
        .unwrap();
        let set = SigningKeySet::from_jwks_json(&body).unwrap();
        assert_eq!(set.kids(), vec!["good"]);
    }

    #[test]
    fn test_parse_rejects_missing_keys_field() {
        let err = SigningKeySet::from_jwks_json(br#"{"issuer": "x"}"#).unwrap_err();
        assert!(matches!(err, KeyFetchError::Malformed(_)));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = SigningKeySet::from_jwks_json(b"<html>").unwrap_err();
        assert!(matches!(err, KeyFetchError::Malformed(_)));
    }

    #[test]
    fn test_parse_rejects_empty_key_list() {
        let err = SigningKeySet::from_jwks_json(br#"{"keys": []}"#).unwrap_err();
        assert!(err.to_string().contains("no usable RSA signing keys"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(KeyFetchError::Timeout.is_transient());
        assert!(KeyFetchError::Status(503).is_transient());
        assert!(KeyFetchError::Status(429).is_transient());
        assert!(!KeyFetchError::Status(404).is_transient());
        assert!(!KeyFetchError::Malformed("x".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_keys_are_fetched_once_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_json(&[(TRUSTED_KID, TRUSTED_MODULUS)])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(3600));
        let first = client.keys().await.unwrap();
        let second = client.keys().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_expired_cache_triggers_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_json(&[(TRUSTED_KID, TRUSTED_MODULUS)])),
            )
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::ZERO);
        client.keys().await.unwrap();
        client.keys().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(3600));
        let err = client.keys().await.unwrap_err();
        assert!(matches!(err, KeyFetchError::Status(503)));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(3600));
        let err = client.keys().await.unwrap_err();
        assert!(matches!(err, KeyFetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_json(&[(TRUSTED_KID, TRUSTED_MODULUS)])),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(3600));
        assert!(client.keys().await.is_err());
        assert_eq!(client.keys().await.unwrap().len(), 1);
    }
}
