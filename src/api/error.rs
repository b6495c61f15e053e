use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Request handling failures. They only ever affect the request at hand.
#[derive(Debug, Error)]
pub enum ApiError {
	#[error("missing required query parameter: {0}")]
	MissingParameter(&'static str),

	#[error("invalid value {value:?} for query parameter {name}: expected an integer")]
	InvalidParameter { name: &'static str, value: String },

	#[error("failed to create credential in store: {0}")]
	CreateCredential(#[source] StoreError),
}

impl ApiError {
	pub fn status(&self) -> StatusCode {
		match self {
			ApiError::MissingParameter(_) | ApiError::InvalidParameter { .. } => {
				StatusCode::BAD_REQUEST
			}
			ApiError::CreateCredential(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			error!(error = %self, "request failed");
		}
		(status, self.to_string()).into_response()
	}
}
