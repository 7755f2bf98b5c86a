//! Produce ledger backend
//!
//! Records shipments bought from suppliers and split across farmers, direct
//! sales, transfers and returns, and reconciles stock from those events.

use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult, ErrorCategory};
pub use services::{AuthService, LedgerService, LedgerStore, ReportingService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub ledger: LedgerService,
    pub auth: AuthService,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Config) -> Self {
        let store = LedgerStore::new(db.clone());
        let auth = AuthService::new(store.clone(), &config);
        Self {
            db,
            config: Arc::new(config),
            ledger: LedgerService::new(store),
            auth,
        }
    }

    /// Override the password hashing cost
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.auth = self.auth.with_bcrypt_cost(cost);
        self
    }
}

/// Connect to the configured database, apply migrations and build the state
pub async fn init_state(config: Config) -> AppResult<AppState> {
    let db = db::connect(&config.database).await?;
    db::migrate(&db).await?;
    Ok(AppState::new(db, config))
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Produce Ledger API v1"
}
