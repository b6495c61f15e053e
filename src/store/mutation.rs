use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::store::StoreError;
use crate::store::models::Credential;

pub(crate) const CREDENTIAL_INSERT: &str = r#"
INSERT INTO credstore(
	id, username, password, hosts, extras, tags, namespace,
	created_by, created_at, updated_at, deleted_at
)
VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#;

/// Structured description of a single write against the credential store.
///
/// This is what the activity log records and what peers replay. Applying a
/// mutation always goes through bound parameters, so the record can cross
/// the network without ever being interpreted as SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
	InsertCredential { credential: Credential },
}

impl Mutation {
	/// Table the mutation writes to.
	pub fn table(&self) -> &'static str {
		match self {
			Mutation::InsertCredential { .. } => "credstore",
		}
	}

	/// Execute the mutation on `conn`, which is expected to be inside the
	/// transaction that also appends the matching activity log entry.
	pub(crate) async fn apply(&self, conn: &mut SqliteConnection) -> Result<(), StoreError> {
		match self {
			Mutation::InsertCredential { credential } => insert_credential(conn, credential).await,
		}
	}
}

async fn insert_credential(
	conn: &mut SqliteConnection,
	credential: &Credential,
) -> Result<(), StoreError> {
	let id = credential.id.as_ref().ok_or(StoreError::MissingId)?;

	let hosts = serde_json::to_string(&credential.hosts)
		.map_err(|source| StoreError::Encode { what: "hosts", source })?;
	let extras = serde_json::to_string(&credential.extra)
		.map_err(|source| StoreError::Encode { what: "extras", source })?;
	let tags = serde_json::to_string(&credential.tags)
		.map_err(|source| StoreError::Encode { what: "tags", source })?;

	sqlx::query(CREDENTIAL_INSERT)
		.bind(id.as_str())
		.bind(&credential.username)
		.bind(&credential.password)
		.bind(hosts)
		.bind(extras)
		.bind(tags)
		.bind(&credential.namespace)
		.bind(&credential.metadata.created_by)
		.bind(credential.metadata.created_at)
		.bind(credential.metadata.updated_at)
		.bind(credential.metadata.deleted_at)
		.execute(&mut *conn)
		.await
		.map_err(|source| StoreError::Query {
			what: "credential insert",
			source,
		})?;

	Ok(())
}
