//! HTTP surface of the order pipeline.
//!
//! Commands go through [`domain::OrderService`] and land in the write store
//! and outbox; queries are served from the projected read model. The same
//! process runs the outbox publisher and the projection consumer, see
//! [`Pipeline`].

pub mod config;
pub mod error;
pub mod pipeline;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use error::{ApiError, StartupError};
pub use pipeline::{AppState, OrderPublisher, Pipeline, RunningPipeline};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::health::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create).get(routes::orders::list))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/items", post(routes::orders::add_item))
        .route(
            "/orders/{id}/items/{product_id}",
            delete(routes::orders::remove_item),
        )
        .route("/orders/{id}/confirm", post(routes::orders::confirm))
        .route("/orders/{id}/ship", post(routes::orders::ship))
        .route("/orders/{id}/deliver", post(routes::orders::deliver))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/orders/{id}/events", get(routes::orders::events))
        .route("/analytics", get(routes::analytics::get))
        .route("/admin/outbox/drain", post(routes::admin::drain_outbox))
        .route(
            "/admin/read-model/rebuild",
            post(routes::admin::rebuild_read_model),
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
