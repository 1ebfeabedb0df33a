use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use bizconf_api::{app, config, middleware};
use persistence::PgConfigurationRepository;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::Config::load()?;

    middleware::logging::init_logging(&config.logging)?;
    middleware::init_metrics()?;

    info!("Starting bizconf v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::create_pool(&config.database.pool_config()).await?;

    info!("Running database migrations...");
    sqlx::migrate!("../persistence/src/migrations")
        .run(&pool)
        .await?;
    info!("Migrations completed");

    let repository = Arc::new(PgConfigurationRepository::new(pool));
    let addr = config.socket_addr()?;
    let app = app::create_app(config, repository);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
