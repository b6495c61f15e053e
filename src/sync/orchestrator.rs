use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::discovery::DiscoveredPeer;
use crate::observability::MetricsRegistry;
use crate::store::Store;
use crate::sync::session::{self, SessionReport, SyncError};
use crate::sync::sessions::{Peer, PeerSessions, SessionGuard};

/// Turns peer discoveries into pull sessions, one per peer at a time.
pub struct SyncOrchestrator {
	/// This node's instance name; announcements for it are ignored.
	instance: String,
	store: Arc<dyn Store>,
	client: reqwest::Client,
	sessions: PeerSessions,
	setup_timeout: Duration,
	metrics: Arc<MetricsRegistry>,
	cancel: CancellationToken,
}

impl SyncOrchestrator {
	pub fn new(
		instance: impl Into<String>,
		store: Arc<dyn Store>,
		metrics: Arc<MetricsRegistry>,
		setup_timeout: Duration,
		cancel: CancellationToken,
	) -> Result<Self, SyncError> {
		let client = reqwest::Client::builder()
			.connect_timeout(setup_timeout)
			.build()
			.map_err(SyncError::Request)?;

		Ok(Self {
			instance: instance.into(),
			store,
			client,
			sessions: PeerSessions::new(),
			setup_timeout,
			metrics,
			cancel,
		})
	}

	pub fn sessions(&self) -> &PeerSessions {
		&self.sessions
	}

	/// Start a session for `peer` unless it is this node or already syncing.
	///
	/// Returns the session task when one was started. Repeated announcements
	/// for a peer that is still syncing are no-ops.
	pub fn on_peer_discovered(
		self: &Arc<Self>,
		peer: DiscoveredPeer,
	) -> Option<JoinHandle<Result<SessionReport, SyncError>>> {
		if peer.instance == self.instance {
			trace!(instance = %peer.instance, "ignoring own announcement");
			return None;
		}

		let candidate = Peer {
			address: peer.address(),
			instance: peer.instance.clone(),
			last_synced_at: Utc::now(),
		};

		let Some(guard) = self.sessions.try_acquire(candidate) else {
			self.metrics.sync_sessions_skipped_total.inc();
			debug!(instance = %peer.instance, "sync already in flight");
			return None;
		};

		let this = Arc::clone(self);
		Some(tokio::spawn(async move { this.run_session(guard).await }))
	}

	/// Consume discoveries until the channel closes or the node shuts down.
	pub async fn run(self: Arc<Self>, mut peers: mpsc::Receiver<DiscoveredPeer>) {
		info!(instance = %self.instance, "sync orchestrator started");
		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => break,
				peer = peers.recv() => match peer {
					Some(peer) => {
						self.on_peer_discovered(peer);
					}
					None => break,
				},
			}
		}
		info!(active = self.sessions.len(), "sync orchestrator stopped");
	}

	async fn run_session(&self, guard: SessionGuard) -> Result<SessionReport, SyncError> {
		let peer = guard.peer();
		info!(peer.instance = %peer.instance, peer.address = %peer.address, "starting sync session");

		self.metrics.sync_sessions_started_total.inc();
		self.metrics.sync_active_sessions.inc();
		let timer = self.metrics.sync_session_duration_seconds.start_timer();

		let result = session::pull(
			self.store.as_ref(),
			&self.client,
			&peer.address,
			self.setup_timeout,
			&self.cancel,
		)
		.await;

		timer.observe_duration();
		self.metrics.sync_active_sessions.dec();

		match &result {
			Ok(report) => {
				self.metrics.sync_sessions_succeeded_total.inc();
				self.metrics.sync_records_applied_total.inc_by(report.applied);
				self.metrics.sync_records_duplicate_total.inc_by(report.duplicates);
				info!(
					peer.instance = %peer.instance,
					since = report.since,
					applied = report.applied,
					duplicates = report.duplicates,
					"sync session finished"
				);
			}
			Err(e) => {
				self.metrics.sync_sessions_failed_total.inc();
				error!(peer.instance = %peer.instance, error = %e, "sync session failed");
			}
		}

		drop(guard);
		result
	}
}
