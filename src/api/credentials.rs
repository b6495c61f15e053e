use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::ApiError;
use crate::id::Id;
use crate::state::AppState;
use crate::store::{Credential, Metadata};

/// Body of `POST /cred`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCredentialRequest {
	pub username: String,
	pub password: String,
	#[serde(default)]
	pub hosts: Vec<String>,
	#[serde(default)]
	pub extra: BTreeMap<String, String>,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub namespace: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCredentialResponse {
	pub id: Id,
}

/// `POST /cred`: store a credential created on this node.
pub async fn create_credential(
	State(state): State<AppState>,
	Json(req): Json<CreateCredentialRequest>,
) -> Result<Json<CreateCredentialResponse>, ApiError> {
	let now = Utc::now().timestamp();
	let credential = Credential {
		id: None,
		username: req.username,
		password: req.password,
		hosts: req.hosts,
		extra: req.extra,
		tags: req.tags,
		namespace: req.namespace,
		metadata: Metadata {
			created_by: state.instance.to_string(),
			created_at: now,
			updated_at: now,
			deleted_at: None,
		},
	};

	let id = state
		.store
		.create(credential)
		.await
		.map_err(ApiError::CreateCredential)?;

	state.metrics.credentials_created_total.inc();
	info!(credential.id = %id, "credential created");
	Ok(Json(CreateCredentialResponse { id }))
}
