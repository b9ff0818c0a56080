use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::serve_report;
use crate::state::AppState;

/// Every method and path lands on the report handler.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .fallback(serve_report)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
