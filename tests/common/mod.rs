/// Common test utilities and helpers for integration tests.
use std::net::SocketAddr;
use std::sync::Arc;

use credmesh::api::router;
use credmesh::observability::MetricsRegistry;
use credmesh::state::AppState;
use credmesh::store::{Credential, Metadata, SqliteStore, Store};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// A credential as a node named `created_by` would write it at `created_at`.
pub fn credential(username: &str, created_by: &str, created_at: i64) -> Credential {
	Credential {
		id: None,
		username: username.to_string(),
		password: format!("{username}-secret"),
		hosts: vec!["db.internal".to_string()],
		extra: [("port".to_string(), "5432".to_string())].into_iter().collect(),
		tags: vec!["test".to_string()],
		namespace: "default".to_string(),
		metadata: Metadata {
			created_by: created_by.to_string(),
			created_at,
			updated_at: created_at,
			deleted_at: None,
		},
	}
}

#[allow(dead_code)]
pub fn app_state(instance: &str, store: Arc<dyn Store>) -> AppState {
	AppState {
		instance: Arc::from(instance),
		store,
		metrics: Arc::new(MetricsRegistry::new().expect("metrics registry")),
		cancel: CancellationToken::new(),
		stream_buffer: 16,
	}
}

/// A node serving its API on a loopback port, backed by a file database in
/// a temporary directory.
#[allow(dead_code)]
pub struct Node {
	pub instance: String,
	pub store: Arc<dyn Store>,
	pub addr: SocketAddr,
	pub cancel: CancellationToken,
	_dir: TempDir,
}

#[allow(dead_code)]
pub async fn spawn_node(instance: &str) -> Node {
	let dir = tempfile::tempdir().expect("tempdir");
	let store: Arc<dyn Store> = Arc::new(
		SqliteStore::connect(dir.path().join("credmesh.db"))
			.await
			.expect("open store"),
	);

	let state = app_state(instance, Arc::clone(&store));
	let cancel = state.cancel.clone();

	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
	let addr = listener.local_addr().expect("local addr");
	let shutdown = cancel.clone();
	tokio::spawn(async move {
		axum::serve(listener, router(state))
			.with_graceful_shutdown(shutdown.cancelled_owned())
			.await
	});

	Node {
		instance: instance.to_string(),
		store,
		addr,
		cancel,
		_dir: dir,
	}
}

/// A store that is not served over HTTP, for the pulling side of a session.
#[allow(dead_code)]
pub async fn file_store() -> (Arc<dyn Store>, TempDir) {
	let dir = tempfile::tempdir().expect("tempdir");
	let store = SqliteStore::connect(dir.path().join("credmesh.db"))
		.await
		.expect("open store");
	(Arc::new(store), dir)
}

/// Direct connection to the database file of a [`file_store`], for seeding
/// rows and triggers the store API never writes.
#[allow(dead_code)]
pub async fn raw_pool(dir: &TempDir) -> sqlx::SqlitePool {
	let options = sqlx::sqlite::SqliteConnectOptions::new().filename(dir.path().join("credmesh.db"));
	sqlx::sqlite::SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.expect("open raw pool")
}
