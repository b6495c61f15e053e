mod common;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use credmesh::api::{CreateCredentialResponse, router};
use credmesh::id::Id;
use credmesh::store::{
	ActivityLogEntry, ChangeSink, Credential, Replay, SqliteStore, Store, StoreError,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::{app_state, credential, file_store, raw_pool};

async fn body_string(body: Body) -> String {
	let bytes = body.collect().await.expect("read body").to_bytes();
	String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// Store whose writes always fail.
struct RejectingStore;

#[async_trait]
impl Store for RejectingStore {
	async fn create(&self, _credential: Credential) -> Result<Id, StoreError> {
		Err(StoreError::NotImplemented("create"))
	}

	async fn get(&self, _id: &Id) -> Result<Option<Credential>, StoreError> {
		Ok(None)
	}

	async fn list(&self, _namespace: &str) -> Result<Vec<Credential>, StoreError> {
		Ok(Vec::new())
	}

	async fn delete(&self, _id: &Id) -> Result<(), StoreError> {
		Ok(())
	}

	async fn last_checkpoint_at(&self) -> Result<i64, StoreError> {
		Ok(0)
	}

	async fn change_stream(&self, _since: i64, _sink: &mut dyn ChangeSink) -> Result<u64, StoreError> {
		Ok(0)
	}

	async fn sync_record(&self, _entry: &ActivityLogEntry) -> Result<Replay, StoreError> {
		Ok(Replay::Applied)
	}

	async fn ping(&self) -> Result<(), StoreError> {
		Ok(())
	}
}

async fn memory_store() -> Arc<dyn Store> {
	Arc::new(SqliteStore::in_memory().await.expect("in-memory store"))
}

/// Test that the change stream requires an integer `since`
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_sync_stream_rejects_missing_or_bad_since() {
	let app = router(app_state("node-a", memory_store().await));

	for uri in ["/sync-stream", "/sync-stream?since=", "/sync-stream?since=yesterday"] {
		let response = app
			.clone()
			.oneshot(Request::get(uri).body(Body::empty()).unwrap())
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {uri}");
		let body = body_string(response.into_body()).await;
		assert!(body.contains("since"), "body {body:?}");
	}
}

/// Test that the change stream is NDJSON, one entry per line, after `since`
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_sync_stream_serves_ndjson() {
	let store = memory_store().await;
	for (name, ts) in [("a", 3), ("b", 5), ("c", 9), ("d", 12)] {
		store.create(credential(name, "node-a", ts)).await.unwrap();
	}
	let app = router(app_state("node-a", Arc::clone(&store)));

	let response = app
		.oneshot(Request::get("/sync-stream?since=5").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(
		response.headers().get(header::CONTENT_TYPE).unwrap(),
		"application/x-ndjson"
	);

	let body = body_string(response.into_body()).await;
	let entries: Vec<ActivityLogEntry> = body
		.lines()
		.map(|line| serde_json::from_str(line).expect("one entry per line"))
		.collect();
	let timestamps: Vec<i64> = entries.iter().map(|e| e.timestamp).collect();
	assert_eq!(timestamps, vec![9, 12]);
	assert!(body.ends_with('\n'));
}

/// Test that an empty log yields an empty, successful stream
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_sync_stream_empty_log() {
	let app = router(app_state("node-a", memory_store().await));

	let response = app
		.oneshot(Request::get("/sync-stream?since=0").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert!(body_string(response.into_body()).await.is_empty());
}

/// Test that POST /cred stores the credential stamped with this node
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_create_credential_endpoint() {
	let store = memory_store().await;
	let app = router(app_state("node-a", Arc::clone(&store)));

	let payload = serde_json::json!({
		"username": "alice",
		"password": "hunter2",
		"hosts": ["db.internal"],
		"tags": ["prod"],
	});
	let response = app
		.oneshot(
			Request::post("/cred")
				.header(header::CONTENT_TYPE, "application/json")
				.body(Body::from(payload.to_string()))
				.unwrap(),
		)
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let created: CreateCredentialResponse =
		serde_json::from_str(&body_string(response.into_body()).await).unwrap();
	assert!(Id::parse(created.id.as_str()).is_ok());

	let stored = store.get(&created.id).await.unwrap().expect("stored");
	assert_eq!(stored.username, "alice");
	assert_eq!(stored.metadata.created_by, "node-a");
	assert_eq!(stored.metadata.created_at, stored.metadata.updated_at);
	assert_eq!(store.last_checkpoint_at().await.unwrap(), stored.metadata.created_at);
}

/// Test that a store failure on POST /cred is a 500 carrying the cause
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_create_credential_store_failure() {
	let app = router(app_state("node-a", Arc::new(RejectingStore)));

	let payload = serde_json::json!({ "username": "alice", "password": "hunter2" });
	let response = app
		.oneshot(
			Request::post("/cred")
				.header(header::CONTENT_TYPE, "application/json")
				.body(Body::from(payload.to_string()))
				.unwrap(),
		)
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
	assert_eq!(
		body_string(response.into_body()).await,
		"failed to create credential in store: create is not implemented"
	);
}

/// Test that a log row that cannot be decoded ends the body with an error
/// after the entries before it, instead of a clean end of stream
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_sync_stream_read_error_truncates_body() {
	let (store, dir) = file_store().await;
	store.create(credential("a", "node-a", 10)).await.unwrap();
	store.create(credential("c", "node-a", 30)).await.unwrap();

	let raw = raw_pool(&dir).await;
	sqlx::query("INSERT INTO activity_log(id, timestamp, mutation) VALUES(?, ?, ?)")
		.bind(Id::with_prefix("log").as_str())
		.bind(20i64)
		.bind("garbage")
		.execute(&raw)
		.await
		.unwrap();

	let app = router(app_state("node-a", store));
	let response = app
		.oneshot(Request::get("/sync-stream?since=0").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let mut body = response.into_body();
	let first = body
		.frame()
		.await
		.expect("first frame")
		.expect("first frame is data")
		.into_data()
		.expect("data frame");
	let entry: ActivityLogEntry = serde_json::from_slice(&first).unwrap();
	assert_eq!(entry.timestamp, 10);

	let next = body.frame().await;
	assert!(matches!(next, Some(Err(_))), "expected a body error, got {next:?}");
}

/// Test the ping and health endpoints
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_ping_and_health() {
	let app = router(app_state("node-a", memory_store().await));

	let response = app
		.clone()
		.oneshot(Request::get("/ping").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(body_string(response.into_body()).await, "hello from node-a");

	let response = app
		.oneshot(Request::get("/health").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
}

/// Test that metrics are exposed after a change stream request
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_metrics_endpoint_counts_requests() {
	let app = router(app_state("node-a", memory_store().await));

	let response = app
		.clone()
		.oneshot(Request::get("/sync-stream?since=0").body(Body::empty()).unwrap())
		.await
		.unwrap();
	body_string(response.into_body()).await;

	let response = app
		.oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let text = body_string(response.into_body()).await;
	assert!(text.contains("credmesh_change_stream_requests_total 1"));
}
