use anyhow::Result;
use growthd::ai::CompletionClient;
use growthd::api::oauth::state_manager::{run_state_cleanup, StateManager};
use growthd::api::{create_router, AppState};
use growthd::config::{load_config, GrowthConfig, Secrets};
use growthd::crypto::TokenCipher;
use growthd::payments::PaymentGatewayClient;
use growthd::platform::PlatformRegistry;
use growthd::refresh::run_token_refresh;
use growthd::store::{ConnectionStore, WalletStore};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "growthd=info".into()),
        )
        .init();

    let config_path =
        std::env::var("GROWTHD_CONFIG").unwrap_or_else(|_| "growthd.toml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!(path = %config_path, "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(path = %config_path, error = %e, "Config not loaded, using defaults");
            GrowthConfig::default()
        }
    };

    let secrets = Secrets::from_env()?;
    let cipher = TokenCipher::new(&secrets.encryption_secret)?;

    let connections = Arc::new(ConnectionStore::new(&config.database.path, cipher)?);
    let wallet = Arc::new(WalletStore::new(&config.database.path)?);

    let platforms = Arc::new(PlatformRegistry::from_env());
    let oauth_states = StateManager::new(config.oauth.state_expiry_seconds);

    tokio::spawn(run_state_cleanup(
        oauth_states.clone(),
        config.oauth.state_cleanup_interval_seconds,
    ));
    tokio::spawn(run_token_refresh(
        connections.clone(),
        platforms.clone(),
        config.refresh.interval_seconds,
    ));

    let state = Arc::new(AppState {
        connections,
        wallet,
        platforms,
        oauth_states,
        payments: Arc::new(PaymentGatewayClient::new(secrets.payment_secret_key)),
        ai: Arc::new(CompletionClient::new(secrets.ai_api_key)),
        callback_base_url: config.server.public_url.trim_end_matches('/').to_string(),
    });

    let app = create_router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "growthd listening");
    axum::serve(listener, app).await?;

    Ok(())
}
