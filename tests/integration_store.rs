mod common;

use credmesh::id::Id;
use credmesh::store::{ActivityLogEntry, Mutation, Replay, SqliteStore, Store};

use common::{credential, file_store, raw_pool};

async fn log_of(store: &dyn Store) -> Vec<ActivityLogEntry> {
	let mut entries = Vec::new();
	store.change_stream(0, &mut entries).await.expect("change stream");
	entries
}

/// Test that a create stores the credential and exactly one log entry
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_create_writes_credential_and_log_entry() -> Result<(), Box<dyn std::error::Error>> {
	let store = SqliteStore::in_memory().await?;

	let id = store.create(credential("alice", "node-a", 100)).await?;
	assert!(id.as_str().starts_with("cred-"));

	let stored = store.get(&id).await?.expect("credential stored");
	assert_eq!(stored.id.as_ref(), Some(&id));
	assert_eq!(stored.username, "alice");
	assert_eq!(stored.hosts, vec!["db.internal".to_string()]);
	assert_eq!(stored.extra.get("port").map(String::as_str), Some("5432"));
	assert_eq!(stored.metadata.created_at, 100);

	let log = log_of(&store).await;
	assert_eq!(log.len(), 1);
	assert_eq!(log[0].timestamp, 100);
	let Mutation::InsertCredential { credential } = &log[0].mutation;
	assert_eq!(credential.id.as_ref(), Some(&id));

	Ok(())
}

/// Test that a failed create leaves neither a credential nor a log entry
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_failed_create_rolls_back_log() -> Result<(), Box<dyn std::error::Error>> {
	let store = SqliteStore::in_memory().await?;

	let mut first = credential("alice", "node-a", 100);
	let id = Id::with_prefix("cred");
	first.id = Some(id.clone());
	store.create(first.clone()).await?;

	let mut second = credential("mallory", "node-a", 200);
	second.id = Some(id.clone());
	assert!(store.create(second).await.is_err());

	let log = log_of(&store).await;
	assert_eq!(log.len(), 1);
	assert_eq!(store.last_checkpoint_at().await?, 100);
	assert_eq!(store.get(&id).await?.map(|c| c.username), Some("alice".to_string()));

	Ok(())
}

/// Test that a create whose log append fails leaves no credential behind
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_failed_log_append_rolls_back_credential() -> Result<(), Box<dyn std::error::Error>> {
	let (store, dir) = file_store().await;
	let raw = raw_pool(&dir).await;
	sqlx::query(
		"CREATE TRIGGER refuse_log_append BEFORE INSERT ON activity_log \
		 BEGIN SELECT RAISE(ABORT, 'log append refused'); END;",
	)
	.execute(&raw)
	.await?;

	let mut refused = credential("alice", "node-a", 100);
	let id = Id::with_prefix("cred");
	refused.id = Some(id.clone());
	assert!(store.create(refused).await.is_err());

	assert!(store.get(&id).await?.is_none());
	let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credstore")
		.fetch_one(&raw)
		.await?;
	assert_eq!(rows, 0);
	assert_eq!(store.last_checkpoint_at().await?, 0);

	Ok(())
}

/// Test the checkpoint is the highest timestamp, not the latest write
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_checkpoint_is_max_timestamp() -> Result<(), Box<dyn std::error::Error>> {
	let store = SqliteStore::in_memory().await?;
	assert_eq!(store.last_checkpoint_at().await?, 0);

	for (name, ts) in [("a", 5), ("b", 9), ("c", 3)] {
		store.create(credential(name, "node-a", ts)).await?;
	}

	assert_eq!(store.last_checkpoint_at().await?, 9);
	Ok(())
}

/// Test the change stream is strictly after `since` and in timestamp order
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_change_stream_since_is_exclusive_and_ordered() -> Result<(), Box<dyn std::error::Error>> {
	let store = SqliteStore::in_memory().await?;
	for (name, ts) in [("d", 12), ("a", 3), ("c", 9), ("b", 5)] {
		store.create(credential(name, "node-a", ts)).await?;
	}

	let mut entries = Vec::new();
	let sent = store.change_stream(5, &mut entries).await?;
	assert_eq!(sent, 2);
	let timestamps: Vec<i64> = entries.iter().map(|e| e.timestamp).collect();
	assert_eq!(timestamps, vec![9, 12]);

	let mut none = Vec::new();
	assert_eq!(store.change_stream(12, &mut none).await?, 0);
	assert!(none.is_empty());

	Ok(())
}

/// Test that replaying a peer entry keeps its id and timestamp, and that a
/// second replay of the same entry changes nothing
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_sync_record_preserves_entry_and_deduplicates() -> Result<(), Box<dyn std::error::Error>> {
	let origin = SqliteStore::in_memory().await?;
	let replica = SqliteStore::in_memory().await?;

	let id = origin.create(credential("alice", "node-a", 42)).await?;
	let entry = log_of(&origin).await.remove(0);

	assert_eq!(replica.sync_record(&entry).await?, Replay::Applied);
	assert_eq!(replica.sync_record(&entry).await?, Replay::Duplicate);

	let replicated = log_of(&replica).await;
	assert_eq!(replicated, vec![entry]);
	assert_eq!(replica.last_checkpoint_at().await?, 42);

	let stored = replica.get(&id).await?.expect("replicated credential");
	assert_eq!(stored.metadata.created_by, "node-a");
	assert_eq!(stored, origin.get(&id).await?.expect("origin credential"));

	Ok(())
}

/// Test that an entry whose mutation cannot be applied is not logged
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_sync_record_failure_leaves_no_log_entry() -> Result<(), Box<dyn std::error::Error>> {
	let replica = SqliteStore::in_memory().await?;

	let entry = ActivityLogEntry {
		id: Id::with_prefix("log"),
		timestamp: 7,
		mutation: Mutation::InsertCredential {
			credential: credential("no-id", "node-a", 7),
		},
	};

	assert!(replica.sync_record(&entry).await.is_err());
	assert!(log_of(&replica).await.is_empty());
	assert_eq!(replica.last_checkpoint_at().await?, 0);

	Ok(())
}
