//! HTTP - axum の router と handler
//!
//! # ルート
//! - `POST /order`
//! - `GET | PATCH | DELETE /order/{id}`
//! - `GET /test-rabbit`（診断用）
//! - `GET /health`

pub mod handlers;
pub mod problem;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::app::OrderCoordinator;

use self::handlers::{
    create_order, delete_order, get_order, healthcheck, test_rabbit, update_order,
};

pub use self::problem::{ApiProblem, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: OrderCoordinator,
}

impl AppState {
    pub fn new(coordinator: OrderCoordinator) -> Self {
        Self { coordinator }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/order", post(create_order))
        .route(
            "/order/{id}",
            get(get_order).patch(update_order).delete(delete_order),
        )
        .route("/test-rabbit", get(test_rabbit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
