use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::report::read_report;
use crate::state::AppState;

pub const NOT_FOUND_MESSAGE: &str = "Whoops! File not found!";

pub async fn serve_report(State(state): State<AppState>) -> Response {
    match read_report(&state.report_path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(err) => {
            // Any read failure is reported the same way.
            tracing::debug!(error = %err, "report unavailable");
            (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE).into_response()
        }
    }
}
