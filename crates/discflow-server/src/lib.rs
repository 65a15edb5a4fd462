//! HTTP surface of the discflow engine.

pub mod errors;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use discflow::JobGateway;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<JobGateway>,
}

impl AppState {
    pub fn new(gateway: JobGateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }
}

/// Builds the application router with request tracing.
pub fn app(state: AppState) -> Router {
    routes::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
