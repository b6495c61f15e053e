pub mod models;
pub mod mutation;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::id::Id;

pub use models::{ActivityLogEntry, Credential, Metadata};
pub use mutation::Mutation;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("failed to open db: {0}")]
	Connect(#[source] sqlx::Error),

	#[error("failed to create {table} table: {source}")]
	Schema {
		table: &'static str,
		#[source]
		source: sqlx::Error,
	},

	#[error("failed to {stage} transaction: {source}")]
	Transaction {
		stage: &'static str,
		#[source]
		source: sqlx::Error,
	},

	#[error("failed to execute {what} query: {source}")]
	Query {
		what: &'static str,
		#[source]
		source: sqlx::Error,
	},

	#[error("failed to encode {what}: {source}")]
	Encode {
		what: &'static str,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to decode stored {what}: {reason}")]
	Decode { what: &'static str, reason: String },

	#[error("credential has no id")]
	MissingId,

	#[error("change stream consumer went away")]
	SinkClosed,

	#[error("{0} is not implemented")]
	NotImplemented(&'static str),
}

/// Outcome of replaying a peer's activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
	/// The mutation ran and the entry was appended to the local log.
	Applied,
	/// The entry id was already in the local log; nothing changed.
	Duplicate,
}

/// Receiver of change-stream entries.
///
/// The store hands entries over one at a time, straight from the database
/// cursor, and does not read the next row until `send` returns.
#[async_trait]
pub trait ChangeSink: Send {
	async fn send(&mut self, entry: ActivityLogEntry) -> Result<(), StoreError>;
}

#[async_trait]
impl ChangeSink for Vec<ActivityLogEntry> {
	async fn send(&mut self, entry: ActivityLogEntry) -> Result<(), StoreError> {
		self.push(entry);
		Ok(())
	}
}

/// Persistence contract for credentials and the activity log.
///
/// Every successful mutation is committed together with exactly one
/// activity log entry; implementations must never expose one without the
/// other.
#[async_trait]
pub trait Store: Send + Sync + 'static {
	/// Insert a credential, assigning an id when it has none.
	async fn create(&self, credential: Credential) -> Result<Id, StoreError>;

	async fn get(&self, id: &Id) -> Result<Option<Credential>, StoreError>;

	async fn list(&self, namespace: &str) -> Result<Vec<Credential>, StoreError>;

	async fn delete(&self, id: &Id) -> Result<(), StoreError>;

	/// Highest timestamp in the activity log, `0` when the log is empty.
	async fn last_checkpoint_at(&self) -> Result<i64, StoreError>;

	/// Send every entry with `timestamp > since` to `sink` in ascending
	/// timestamp order. Returns how many entries were sent. Output already
	/// delivered before an error is not retracted.
	async fn change_stream(&self, since: i64, sink: &mut dyn ChangeSink) -> Result<u64, StoreError>;

	/// Apply a peer's entry and append it, with its original id and
	/// timestamp, to the local log in one transaction.
	async fn sync_record(&self, entry: &ActivityLogEntry) -> Result<Replay, StoreError>;

	/// Lightweight query to verify the database is reachable.
	async fn ping(&self) -> Result<(), StoreError>;
}
