pub mod credentials;
pub mod error;
pub mod sync_stream;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::sync::SYNC_STREAM_PATH;

pub use credentials::{CreateCredentialRequest, CreateCredentialResponse, create_credential};
pub use error::ApiError;
pub use sync_stream::sync_stream;

/// All HTTP routes a node serves.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/ping", get(crate::health::ping))
		.route("/health", get(crate::health::db_health))
		.route("/metrics", get(crate::health::metrics_handler))
		.route("/cred", post(create_credential))
		.route(SYNC_STREAM_PATH, get(sync_stream))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}
