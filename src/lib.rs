pub mod api;
pub mod config;
pub mod discovery;
pub mod health;
pub mod id;
pub mod observability;
pub mod state;
pub mod store;
pub mod sync;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::discovery::DiscoveryConfig;
use crate::state::AppState;
use crate::store::{SqliteStore, Store};
use crate::sync::SyncOrchestrator;

const PEER_CHANNEL_CAPACITY: usize = 64;

/// Run a node until `cancel` fires: serve the HTTP API, advertise and browse
/// over mDNS and pull from every peer that shows up.
pub async fn run(settings: Settings, cancel: CancellationToken) -> anyhow::Result<()> {
	settings.validate()?;

	let listener = TcpListener::bind((settings.host.as_str(), settings.port))
		.await
		.with_context(|| format!("failed to bind {}:{}", settings.host, settings.port))?;
	let local_addr = listener.local_addr()?;

	let store: Arc<dyn Store> = Arc::new(
		SqliteStore::connect(&settings.database)
			.await
			.with_context(|| format!("failed to open store at {}", settings.database.display()))?,
	);
	let metrics = observability::init_metrics()?;

	let state = AppState {
		instance: Arc::from(settings.instance.as_str()),
		store: Arc::clone(&store),
		metrics: Arc::clone(&metrics),
		cancel: cancel.clone(),
		stream_buffer: settings.stream_buffer,
	};

	let orchestrator = Arc::new(SyncOrchestrator::new(
		settings.instance.clone(),
		Arc::clone(&store),
		Arc::clone(&metrics),
		settings.session_setup_timeout(),
		cancel.clone(),
	)?);

	let (peers_tx, peers_rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
	let discovery = tokio::spawn(discovery::run(
		DiscoveryConfig {
			instance: settings.instance.clone(),
			service_type: settings.service_type.clone(),
			port: local_addr.port(),
			browse_interval: settings.discovery_interval(),
		},
		Arc::clone(&metrics),
		peers_tx,
		cancel.clone(),
	));
	let sync = tokio::spawn(orchestrator.run(peers_rx));

	info!(instance = %settings.instance, addr = %local_addr, "credmesh node listening");

	let served = axum::serve(listener, api::router(state))
		.with_graceful_shutdown(cancel.clone().cancelled_owned())
		.await
		.context("http server failed");

	cancel.cancel();
	if let Err(e) = discovery.await {
		warn!(error = %e, "discovery task panicked");
	}
	if let Err(e) = sync.await {
		warn!(error = %e, "sync orchestrator task panicked");
	}

	info!(instance = %settings.instance, "Shutting down.");
	served
}
