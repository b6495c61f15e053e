use axum::{extract::State, http::StatusCode, http::header, response::IntoResponse};

use crate::state::AppState;

/// Liveness probe that also tells peers (and humans) who answered.
pub async fn ping(State(state): State<AppState>) -> String {
	format!("hello from {}", state.instance)
}

/// DB health endpoint: returns 200 OK when the store can run a simple
/// query, otherwise returns 503 Service Unavailable.
pub async fn db_health(State(state): State<AppState>) -> impl IntoResponse {
	match state.store.ping().await {
		Ok(()) => (StatusCode::OK, "OK").into_response(),
		Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("db error: {}", e)).into_response(),
	}
}

/// Prometheus metrics endpoint: returns metrics in Prometheus text format
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
	let metrics_text = state.metrics.encode();
	(
		StatusCode::OK,
		[(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
		metrics_text,
	)
		.into_response()
}
