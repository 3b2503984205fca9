//! Configuration for the chatlog backend.

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub oidc: OidcConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

/// How the router is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    /// Plain TCP listener.
    #[default]
    Http,
    /// AWS Lambda behind API Gateway.
    Lambda,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub runtime: Runtime,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            runtime: Runtime::default(),
        }
    }
}

/// Identity provider settings used for bearer token verification.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    /// Trusted issuer; the `iss` claim must match it exactly. Derived from
    /// `region` and `user_pool_id` when left empty.
    #[serde(default)]
    pub issuer: String,
    /// AWS region of the Cognito user pool.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub user_pool_id: Option<String>,
    /// JWKS endpoint. Derived from the issuer when unset.
    #[serde(default)]
    pub jwks_url: Option<String>,
    /// Expected audience (`aud`, or `client_id` for Cognito access tokens).
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_true")]
    pub verify_audience: bool,
    /// Clock skew tolerated on `exp`, in seconds.
    #[serde(default)]
    pub leeway_secs: u64,
    #[serde(default = "default_key_cache_ttl")]
    pub key_cache_ttl_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl OidcConfig {
    pub fn new(issuer: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            region: None,
            user_pool_id: None,
            jwks_url: None,
            audience: None,
            verify_audience: default_true(),
            leeway_secs: 0,
            key_cache_ttl_secs: default_key_cache_ttl(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }

    /// Fill an empty `issuer` from the Cognito pool settings, if both are set.
    pub fn resolve_issuer(&mut self) {
        if !self.issuer.trim().is_empty() {
            return;
        }
        if let (Some(region), Some(pool)) = (&self.region, &self.user_pool_id) {
            self.issuer = cognito_issuer(region, pool);
        }
    }

    /// JWKS endpoint, either configured or `{issuer}/.well-known/jwks.json`.
    pub fn jwks_url(&self) -> String {
        match &self.jwks_url {
            Some(url) => url.clone(),
            None => format!("{}/.well-known/jwks.json", self.issuer.trim_end_matches('/')),
        }
    }
}

/// Issuer URL of a Cognito user pool.
pub fn cognito_issuer(region: &str, user_pool_id: &str) -> String {
    format!("https://cognito-idp.{region}.amazonaws.com/{user_pool_id}")
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-attempt timeout. Failed attempts are retried once, so keep twice
    /// this below API Gateway's 29 s integration limit under Lambda.
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_url(),
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite:<path>`, a bare path, `:memory:`, or `memory` for the in-process store.
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines (for CloudWatch and similar collectors).
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// `*` or a comma-separated list of origins.
    #[serde(default = "default_cors_origins")]
    pub origins: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_cors_origins(),
        }
    }
}

impl CorsConfig {
    pub fn allows_any(&self) -> bool {
        self.origins.trim() == "*"
    }

    pub fn origin_list(&self) -> Vec<String> {
        self.origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}
fn default_key_cache_ttl() -> u64 {
    3600
}
fn default_fetch_timeout() -> u64 {
    5
}
fn default_completion_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    50
}
fn default_completion_timeout() -> u64 {
    12
}
fn default_database_url() -> String {
    "sqlite:./data/chatlog.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cors_origins() -> String {
    "*".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (CHATLOG__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("CHATLOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;
        config.oidc.resolve_issuer();
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would silently weaken token verification.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oidc.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid("oidc.issuer must not be empty".to_string()));
        }
        if self.oidc.verify_audience
            && self.oidc.audience.as_deref().map_or(true, |a| a.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "oidc.audience is required while oidc.verify_audience is enabled".to_string(),
            ));
        }
        if self.completion.max_tokens == 0 {
            return Err(ConfigError::Invalid(
                "completion.max_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
