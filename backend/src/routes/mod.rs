//! Route definitions for the produce ledger API

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/users", post(handlers::create_user))
        .nest("/products", product_routes())
        .nest("/farmers", farmer_routes())
        .nest("/shipments", shipment_routes())
        .route("/sales", get(handlers::list_sales).post(handlers::create_sale))
        .route(
            "/transfers",
            get(handlers::list_transfers).post(handlers::create_transfer),
        )
        .route(
            "/returns",
            get(handlers::list_returns).post(handlers::create_return),
        )
        .nest("/reports", report_routes())
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        // Public routes
        .route("/health", get(handlers::health_check))
        .route("/auth/login", post(handlers::login))
        .merge(protected)
}

/// Product routes (protected)
fn product_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_products).post(handlers::create_product),
        )
        .route("/:product_id/stock", get(handlers::get_product_stock))
}

/// Farmer routes (protected)
fn farmer_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_farmers).post(handlers::create_farmer))
        .route("/:farmer_id/holdings", get(handlers::get_farmer_holdings))
}

/// Shipment routes (protected)
fn shipment_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_shipments).post(handlers::create_shipment),
        )
        .route("/validate", post(handlers::validate_shipment))
        .route("/:shipment_id", get(handlers::get_shipment))
}

/// Report routes (protected)
fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/stock", get(handlers::get_stock_report))
        .route("/farmers", get(handlers::get_farmer_report))
        .route("/valuation", get(handlers::get_valuation_report))
}
