//! HTTP boundary for the order saga system.
//!
//! Exposes the saga entry point, the inventory step operations guarded by
//! an idempotency key, operator views of the outbox and failed
//! compensations, health, and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::ApiError;
pub use state::{AppState, Orchestrator, create_state, create_state_with_ledgers};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/sagas/orders", post(routes::sagas::start))
        .route(
            "/sagas/compensation-failures",
            get(routes::sagas::compensation_failures),
        )
        .route("/sagas/{id}", get(routes::sagas::get))
        .route("/sagas/{id}/order", get(routes::sagas::order))
        .route(
            "/sagas/{id}/order/complete",
            post(routes::sagas::complete_order),
        )
        .route("/sagas/{id}/payment", get(routes::sagas::payment))
        .route("/inventory/products", post(routes::inventory::register))
        .route("/inventory/{id}", get(routes::inventory::get))
        .route("/inventory/{id}/stock", post(routes::inventory::add_stock))
        .route("/inventory/{id}/reserve", post(routes::inventory::reserve))
        .route("/inventory/{id}/confirm", post(routes::inventory::confirm))
        .route("/inventory/{id}/cancel", post(routes::inventory::cancel))
        .route(
            "/inventory/{id}/holds/{saga_id}",
            delete(routes::inventory::release_hold),
        )
        .route("/outbox/stats", get(routes::outbox::stats))
        .route("/outbox/dead-letters", get(routes::outbox::dead_letters))
        .route(
            "/outbox/dead-letters/{id}/resolve",
            post(routes::outbox::resolve),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
