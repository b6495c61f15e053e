use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::id::Id;
use crate::store::models::{ActivityLogEntry, Credential, Metadata};
use crate::store::mutation::Mutation;
use crate::store::{ChangeSink, Replay, Store, StoreError};

/// Prefix for ids the store assigns to credentials.
pub const CREDENTIAL_ID_PREFIX: &str = "cred";
/// Prefix for ids of locally originated activity log entries.
pub const LOG_ID_PREFIX: &str = "log";

const CREDSTORE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS credstore (
	id         TEXT    PRIMARY KEY,
	username   TEXT    NOT NULL,
	password   TEXT    NOT NULL,
	-- json array of strings
	hosts      TEXT    NOT NULL DEFAULT '[]',
	-- json object {"k1": "v1"}
	extras     TEXT    NOT NULL DEFAULT '{}',
	-- json array of strings
	tags       TEXT    NOT NULL DEFAULT '[]',
	namespace  TEXT    NOT NULL DEFAULT '',
	created_by TEXT    NOT NULL,
	created_at INTEGER NOT NULL,
	updated_at INTEGER NOT NULL,
	deleted_at INTEGER
);
"#;

const ACTIVITY_LOG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS activity_log (
	id        TEXT    PRIMARY KEY,
	timestamp INTEGER NOT NULL,
	mutation  TEXT    NOT NULL
);
"#;

const ACTIVITY_LOG_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS activity_log_timestamp ON activity_log(timestamp);
"#;

const ACTIVITY_LOG_APPEND: &str = r#"
INSERT INTO activity_log(id, timestamp, mutation)
VALUES(?, ?, ?);
"#;

// A peer may send an entry this node already holds; the id conflict turns
// the replay into a no-op instead of a failure.
const ACTIVITY_LOG_REPLAY: &str = r#"
INSERT INTO activity_log(id, timestamp, mutation)
VALUES(?, ?, ?)
ON CONFLICT(id) DO NOTHING;
"#;

const LAST_CHECKPOINT: &str = r#"
SELECT COALESCE(MAX(timestamp), 0) FROM activity_log;
"#;

const ACTIVITY_LOG_SINCE: &str = r#"
SELECT id, timestamp, mutation FROM activity_log
WHERE timestamp > ?
ORDER BY timestamp ASC, id ASC;
"#;

const CREDENTIAL_BY_ID: &str = r#"
SELECT id, username, password, hosts, extras, tags, namespace,
	created_by, created_at, updated_at, deleted_at
FROM credstore
WHERE id = ?;
"#;

/// SQLite-backed [`Store`].
///
/// Both tables live in one database so a credential write and its activity
/// log entry share a transaction.
#[derive(Clone)]
pub struct SqliteStore {
	pool: SqlitePool,
}

impl SqliteStore {
	/// Open (creating if needed) the database file at `path` and make sure
	/// the schema exists.
	pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let options = SqliteConnectOptions::new()
			.filename(path)
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.busy_timeout(Duration::from_secs(5));

		let pool = SqlitePoolOptions::new()
			.max_connections(8)
			.connect_with(options)
			.await
			.map_err(StoreError::Connect)?;

		Self::from_pool(pool).await
	}

	/// Private in-memory database, mostly useful for tests. The pool keeps a
	/// single connection alive forever since the data dies with it.
	pub async fn in_memory() -> Result<Self, StoreError> {
		let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(StoreError::Connect)?;

		let pool = SqlitePoolOptions::new()
			.min_connections(1)
			.max_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect_with(options)
			.await
			.map_err(StoreError::Connect)?;

		Self::from_pool(pool).await
	}

	/// Wrap an existing pool, creating the tables if they are missing.
	pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
		for (table, ddl) in [
			("credstore", CREDSTORE_TABLE),
			("activity_log", ACTIVITY_LOG_TABLE),
			("activity_log index", ACTIVITY_LOG_INDEX),
		] {
			sqlx::query(ddl)
				.execute(&pool)
				.await
				.map_err(|source| StoreError::Schema { table, source })?;
		}

		Ok(Self { pool })
	}
}

#[async_trait]
impl Store for SqliteStore {
	async fn create(&self, mut credential: Credential) -> Result<Id, StoreError> {
		let id = credential
			.id
			.get_or_insert_with(|| Id::with_prefix(CREDENTIAL_ID_PREFIX))
			.clone();

		let entry = ActivityLogEntry {
			id: Id::with_prefix(LOG_ID_PREFIX),
			timestamp: credential.metadata.created_at,
			mutation: Mutation::InsertCredential { credential },
		};
		let encoded = encode_mutation(&entry.mutation)?;

		// Dropping `tx` on any early return rolls both writes back.
		let mut tx = self
			.pool
			.begin()
			.await
			.map_err(|source| StoreError::Transaction { stage: "begin", source })?;

		entry.mutation.apply(&mut *tx).await?;
		append(&mut *tx, ACTIVITY_LOG_APPEND, &entry, &encoded).await?;

		tx.commit()
			.await
			.map_err(|source| StoreError::Transaction { stage: "commit", source })?;

		debug!(credential.id = %id, log.id = %entry.id, timestamp = entry.timestamp, "store.create");
		Ok(id)
	}

	async fn get(&self, id: &Id) -> Result<Option<Credential>, StoreError> {
		let row = sqlx::query_as::<_, CredentialRow>(CREDENTIAL_BY_ID)
			.bind(id.as_str())
			.fetch_optional(&self.pool)
			.await
			.map_err(|source| StoreError::Query {
				what: "credential lookup",
				source,
			})?;

		row.map(Credential::try_from).transpose()
	}

	async fn list(&self, _namespace: &str) -> Result<Vec<Credential>, StoreError> {
		Err(StoreError::NotImplemented("list"))
	}

	async fn delete(&self, _id: &Id) -> Result<(), StoreError> {
		Err(StoreError::NotImplemented("delete"))
	}

	async fn last_checkpoint_at(&self) -> Result<i64, StoreError> {
		let timestamp: i64 = sqlx::query_scalar(LAST_CHECKPOINT)
			.fetch_one(&self.pool)
			.await
			.map_err(|source| StoreError::Query {
				what: "last checkpoint",
				source,
			})?;

		debug!(timestamp, "store.last_checkpoint_at");
		Ok(timestamp)
	}

	async fn change_stream(&self, since: i64, sink: &mut dyn ChangeSink) -> Result<u64, StoreError> {
		let start = Instant::now();
		debug!(since, "store.change_stream started");

		let mut rows = sqlx::query_as::<_, LogRow>(ACTIVITY_LOG_SINCE)
			.bind(since)
			.fetch(&self.pool);

		let mut sent = 0u64;
		while let Some(row) = rows.try_next().await.map_err(|source| StoreError::Query {
			what: "activity log read",
			source,
		})? {
			let entry = ActivityLogEntry::try_from(row)?;
			debug!(log.id = %entry.id, timestamp = entry.timestamp, "change stream");
			sink.send(entry).await?;
			sent += 1;
		}

		debug!(
			since,
			sent,
			took_secs = start.elapsed().as_secs_f64(),
			"store.change_stream finished"
		);
		Ok(sent)
	}

	async fn sync_record(&self, entry: &ActivityLogEntry) -> Result<Replay, StoreError> {
		let encoded = encode_mutation(&entry.mutation)?;

		let mut tx = self
			.pool
			.begin()
			.await
			.map_err(|source| StoreError::Transaction { stage: "begin", source })?;

		// Claim the entry id first so the transaction takes the write lock
		// up front; a conflict means this entry was applied before.
		let inserted = append(&mut *tx, ACTIVITY_LOG_REPLAY, entry, &encoded).await?;
		if !inserted {
			debug!(log.id = %entry.id, "store.sync_record: already applied");
			return Ok(Replay::Duplicate);
		}

		entry.mutation.apply(&mut *tx).await?;

		tx.commit()
			.await
			.map_err(|source| StoreError::Transaction { stage: "commit", source })?;

		debug!(log.id = %entry.id, timestamp = entry.timestamp, table = entry.mutation.table(), "store.sync_record");
		Ok(Replay::Applied)
	}

	async fn ping(&self) -> Result<(), StoreError> {
		sqlx::query("SELECT 1")
			.fetch_one(&self.pool)
			.await
			.map_err(|source| StoreError::Query { what: "ping", source })?;
		Ok(())
	}
}

fn encode_mutation(mutation: &Mutation) -> Result<String, StoreError> {
	serde_json::to_string(mutation).map_err(|source| StoreError::Encode {
		what: "mutation",
		source,
	})
}

/// Append `entry` using `statement`; returns whether a row was written.
async fn append(
	conn: &mut SqliteConnection,
	statement: &str,
	entry: &ActivityLogEntry,
	encoded_mutation: &str,
) -> Result<bool, StoreError> {
	let result = sqlx::query(statement)
		.bind(entry.id.as_str())
		.bind(entry.timestamp)
		.bind(encoded_mutation)
		.execute(&mut *conn)
		.await
		.map_err(|source| StoreError::Query {
			what: "activity_log insert",
			source,
		})?;

	Ok(result.rows_affected() > 0)
}

#[derive(sqlx::FromRow)]
struct LogRow {
	id: String,
	timestamp: i64,
	mutation: String,
}

impl TryFrom<LogRow> for ActivityLogEntry {
	type Error = StoreError;

	fn try_from(row: LogRow) -> Result<Self, Self::Error> {
		let id = Id::parse(&row.id).map_err(|e| StoreError::Decode {
			what: "activity log id",
			reason: e.to_string(),
		})?;
		let mutation = serde_json::from_str(&row.mutation).map_err(|e| StoreError::Decode {
			what: "mutation",
			reason: e.to_string(),
		})?;

		Ok(Self {
			id,
			timestamp: row.timestamp,
			mutation,
		})
	}
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
	id: String,
	username: String,
	password: String,
	hosts: String,
	extras: String,
	tags: String,
	namespace: String,
	created_by: String,
	created_at: i64,
	updated_at: i64,
	deleted_at: Option<i64>,
}

impl TryFrom<CredentialRow> for Credential {
	type Error = StoreError;

	fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
		fn json<T: serde::de::DeserializeOwned>(what: &'static str, raw: &str) -> Result<T, StoreError> {
			serde_json::from_str(raw).map_err(|e| StoreError::Decode {
				what,
				reason: e.to_string(),
			})
		}

		let id = Id::parse(&row.id).map_err(|e| StoreError::Decode {
			what: "credential id",
			reason: e.to_string(),
		})?;

		Ok(Self {
			id: Some(id),
			username: row.username,
			password: row.password,
			hosts: json("hosts", &row.hosts)?,
			extra: json("extras", &row.extras)?,
			tags: json("tags", &row.tags)?,
			namespace: row.namespace,
			metadata: Metadata {
				created_by: row.created_by,
				created_at: row.created_at,
				updated_at: row.updated_at,
				deleted_at: row.deleted_at,
			},
		})
	}
}
