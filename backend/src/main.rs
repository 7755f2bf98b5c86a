//! Produce ledger server

use std::net::SocketAddr;

use produce_ledger::{create_app, init_state, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledger_server=debug,produce_ledger=debug,tower_http=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting produce ledger server");
    tracing::info!("Environment: {}", config.environment);

    tracing::info!("Opening database {}", config.database.url);
    let state = init_state(config.clone()).await?;
    tracing::info!("Database ready, migrations applied");

    if let Some(admin) = state
        .auth
        .ensure_bootstrap_admin(
            &config.bootstrap.admin_username,
            &config.bootstrap.admin_password,
        )
        .await?
    {
        tracing::warn!(
            "Created bootstrap admin '{}'; change its password before production use",
            admin.username
        );
    }

    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
