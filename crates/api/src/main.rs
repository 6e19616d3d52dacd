//! PropDesk API Server
//!
//! Binary entry point: configuration, database pool, migrations, and
//! the axum server itself.

use propdesk_api::{create_router, AppState, Config};
use propdesk_billing::{BillingService, WebhookConfig};
use propdesk_shared::create_pool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,propdesk_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PropDesk API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    sqlx::migrate!("../billing/migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let webhook_config = WebhookConfig::new(config.stripe_webhook_secret.clone());
    let billing = BillingService::from_pool(pool, webhook_config);
    let state = AppState::new(billing, config.clone());

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %config.bind_address, "API server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
