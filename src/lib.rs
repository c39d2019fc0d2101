//! Farmadis API Library
//!
//! Multi-tenant pharmaceutical distribution core: the inventory balance
//! ledger, the stock movement engine, FEFO reservations, sales order
//! fulfillment and inter-branch movement requests.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod openapi;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use sea_orm::DatabaseConnection;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDoc::openapi())
}

/// Builds the full application router with middleware layers applied.
pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/stock", handlers::stock::stock_router())
        .nest(
            "/sales-orders",
            handlers::sales_orders::sales_orders_router(),
        )
        .nest(
            "/movement-requests",
            handlers::movement_requests::movement_requests_router(),
        )
        .nest("/batches", handlers::batches::batches_router())
        .route("/openapi.json", get(openapi_json));

    Router::new()
        .merge(handlers::health::health_router())
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .with_state(state)
}
