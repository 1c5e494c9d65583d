use anyhow::Result;
use tracing::info;

use mentorlink_api::{app, config, middleware};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Load configuration
    let config = config::Config::load()?;

    // Initialize logging and metrics
    middleware::logging::init_logging(&config.logging)?;
    middleware::init_metrics()?;

    info!("Starting MentorLink API v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::connect(&(&config.database).into()).await?;
    persistence::db::migrate(&pool).await?;

    // Build application
    let services = app::AppServices::postgres(pool, &config)?;
    let addr = config.socket_addr()?;
    info!(%addr, delivery_mode = ?config.email.delivery_mode, "Accepting requests");
    let app = app::create_app(config, services);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
