use std::sync::Arc;

use chatlog_backend::config::Runtime;
use chatlog_backend::{logging, AppState, Config};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let config = Config::load()?;

    logging::init(&config.logging);

    tracing::info!("Starting chatlog backend");

    let runtime = config.server.runtime;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState::from_config(config)?);
    let app = chatlog_backend::app(state);

    match runtime {
        Runtime::Lambda => {
            tracing::info!("Serving requests through the Lambda runtime");
            lambda_http::run(app).await?;
        }
        Runtime::Http => {
            tracing::info!("Listening on {}", addr);
            let listener = TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
