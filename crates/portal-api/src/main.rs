//! BeyondFire Cloud portal API server

use std::sync::Arc;

use anyhow::{Context, Result};
use portal_api::{
    create_router, AppState, BookingStore, CloudflareClient, Config, DeploymentService,
    DirectDeployer, PortainerClient, ServiceCatalog, UserStore,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portal_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .ensure_directories()
        .context("Failed to create data directory")?;

    info!("Starting BeyondFire Cloud portal API");
    info!("Data directory: {}", config.data_dir.display());
    info!("Portainer URL: {}", config.portainer_url);
    info!("DNS automation enabled: {}", config.cloudflare_enabled);

    // Stores
    let bookings =
        Arc::new(BookingStore::new(&config.data_dir).context("Failed to open booking store")?);
    let users = Arc::new(UserStore::new(&config.data_dir).context("Failed to open user store")?);
    let catalog =
        Arc::new(ServiceCatalog::new(&config.data_dir).context("Failed to open service catalog")?);

    users
        .ensure_default_admin(&config.admin_email, &config.admin_password)
        .await
        .context("Failed to seed the default admin")?;

    // External collaborators
    let platform = Arc::new(PortainerClient::new(
        &config.portainer_url,
        &config.portainer_username,
        &config.portainer_password,
    ));
    let dns = Arc::new(CloudflareClient::new(
        config.cloudflare_enabled,
        config.cloudflare_api_token.clone(),
        config.cloudflare_zone_id.clone(),
    ));
    let runner = Arc::new(DirectDeployer::new(&config.data_dir));

    let deployer = Arc::new(DeploymentService::new(
        bookings.clone(),
        users.clone(),
        catalog.clone(),
        platform.clone(),
        dns,
        runner,
        config.data_dir.clone(),
        config.server_ip.clone(),
    ));

    // Application state and router
    let state = AppState {
        config: config.clone(),
        bookings,
        users,
        catalog,
        platform,
        deployer,
    };
    let app = create_router(state);

    // Bind and serve
    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Portal API running on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
