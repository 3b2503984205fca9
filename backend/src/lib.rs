pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod logging;
pub mod retry;
pub mod routes;
pub mod store;
pub mod test_util;

pub use auth::{Identity, JwksClient, TokenVerifier};
pub use config::Config;
pub use error::ApiError;
pub use llm::{CompletionClient, OpenAiClient};
pub use store::ConversationStore;

use std::sync::Arc;

use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::http::HeaderValue;
use axum::{middleware, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::auth::KeyProvider;
use crate::clock::MonotonicClock;
use crate::config::CorsConfig;
use crate::context::ContextAssembler;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub verifier: TokenVerifier,
    pub store: Arc<dyn ConversationStore>,
    pub completion: Arc<dyn CompletionClient>,
    pub assembler: ContextAssembler,
    /// Source of message timestamps; strictly increasing per process.
    pub clock: MonotonicClock,
}

impl AppState {
    pub fn new(
        config: Config,
        keys: Arc<dyn KeyProvider>,
        store: Arc<dyn ConversationStore>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        let verifier = TokenVerifier::new(keys, &config.oidc);
        Self {
            config,
            verifier,
            store,
            completion,
            assembler: ContextAssembler::new(),
            clock: MonotonicClock::new(),
        }
    }

    /// Wire up the production components described by `config`.
    ///
    /// Nothing here touches the network; signing keys are fetched on the
    /// first authenticated request.
    pub fn from_config(config: Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let jwks_client = JwksClient::new(&config.oidc)?;
        tracing::info!("Signing keys will be loaded from {}", jwks_client.jwks_uri());

        let completion = OpenAiClient::new(&config.completion)?;
        tracing::info!(
            "Completion service at {} using model {}",
            config.completion.base_url,
            config.completion.model
        );

        let store: Arc<dyn ConversationStore> = Arc::from(store::open(&config.database.url)?);

        Ok(Self::new(
            config,
            Arc::new(jwks_client),
            store,
            Arc::new(completion),
        ))
    }
}

/// Build the complete HTTP application: routes, CORS and request logging.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = &state.config.cors;
    let router = Router::new()
        .merge(routes::health::router())
        .merge(routes::chat::router(state.clone()))
        .layer(cors_layer(cors));

    let router = if cors.allows_any() {
        // Error responses carry the header too, not only preflights.
        router.layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
    } else {
        router
    };

    router.layer(middleware::from_fn(logging::request_logger))
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allows_any() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .origin_list()
        .into_iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
