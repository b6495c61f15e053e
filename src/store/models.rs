use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::store::mutation::Mutation;

/// Bookkeeping attached to every credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
	/// Instance name of the node that created the record.
	pub created_by: String,
	pub created_at: i64,
	pub updated_at: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub deleted_at: Option<i64>,
}

/// A stored secret.
///
/// `extra` is a `BTreeMap` so a credential always serializes to the same
/// bytes, which keeps replicated mutation records stable across nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<Id>,
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
	#[serde(flatten)]
	pub metadata: Metadata,
}

/// One replication unit of the activity log.
///
/// `timestamp` is the time of the original write (the credential's
/// `createdAt`), never the time a peer replayed it. `id` is assigned by the
/// originating node and travels unchanged, which is what lets a replica
/// recognise an entry it has already applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
	pub id: Id,
	pub timestamp: i64,
	pub mutation: Mutation,
}
