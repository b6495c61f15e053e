use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

const NAMESPACE: &str = "credmesh";

/// Central registry for all Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Local writes
	pub credentials_created_total: IntCounter,

	// Change-stream server
	pub change_stream_requests_total: IntCounter,
	pub change_stream_entries_total: IntCounter,
	pub change_stream_errors_total: IntCounter,

	// Sync orchestrator
	pub sync_sessions_started_total: IntCounter,
	pub sync_sessions_succeeded_total: IntCounter,
	pub sync_sessions_failed_total: IntCounter,
	pub sync_sessions_skipped_total: IntCounter,
	pub sync_records_applied_total: IntCounter,
	pub sync_records_duplicate_total: IntCounter,
	pub sync_active_sessions: IntGauge,
	pub sync_session_duration_seconds: Histogram,

	// Discovery
	pub discovery_peers_seen_total: IntCounter,
	pub discovery_errors_total: IntCounter,
}

impl MetricsRegistry {
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
			let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
			registry.register(Box::new(c.clone()))?;
			Ok(c)
		};

		let credentials_created_total = counter(
			"credentials_created_total",
			"Credentials written through the local API",
		)?;

		let change_stream_requests_total = counter(
			"change_stream_requests_total",
			"Change stream requests served to peers",
		)?;
		let change_stream_entries_total = counter(
			"change_stream_entries_total",
			"Activity log entries sent over change streams",
		)?;
		let change_stream_errors_total = counter(
			"change_stream_errors_total",
			"Change streams that ended with a read error",
		)?;

		let sync_sessions_started_total =
			counter("sync_sessions_started_total", "Sync sessions started")?;
		let sync_sessions_succeeded_total = counter(
			"sync_sessions_succeeded_total",
			"Sync sessions that reached the end of the peer's stream",
		)?;
		let sync_sessions_failed_total =
			counter("sync_sessions_failed_total", "Sync sessions aborted by an error")?;
		let sync_sessions_skipped_total = counter(
			"sync_sessions_skipped_total",
			"Discoveries ignored because a session with the peer was already running",
		)?;
		let sync_records_applied_total = counter(
			"sync_records_applied_total",
			"Peer activity log entries replayed locally",
		)?;
		let sync_records_duplicate_total = counter(
			"sync_records_duplicate_total",
			"Peer activity log entries skipped as already applied",
		)?;

		let sync_active_sessions = IntGauge::with_opts(
			Opts::new("sync_active_sessions", "Sync sessions currently running").namespace(NAMESPACE),
		)?;
		registry.register(Box::new(sync_active_sessions.clone()))?;

		let sync_session_duration_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"sync_session_duration_seconds",
				"Duration of sync sessions in seconds",
			)
			.namespace(NAMESPACE)
			.buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]),
		)?;
		registry.register(Box::new(sync_session_duration_seconds.clone()))?;

		let discovery_peers_seen_total = counter(
			"discovery_peers_seen_total",
			"Resolved peer announcements received from the network",
		)?;
		let discovery_errors_total = counter(
			"discovery_errors_total",
			"Discovery daemon, registration or browse failures",
		)?;

		Ok(Self {
			registry,
			credentials_created_total,
			change_stream_requests_total,
			change_stream_entries_total,
			change_stream_errors_total,
			sync_sessions_started_total,
			sync_sessions_succeeded_total,
			sync_sessions_failed_total,
			sync_sessions_skipped_total,
			sync_records_applied_total,
			sync_records_duplicate_total,
			sync_active_sessions,
			sync_session_duration_seconds,
			discovery_peers_seen_total,
			discovery_errors_total,
		})
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				tracing::error!(error = %e, "failed to encode metrics");
				String::new()
			}
		}
	}
}

/// Initialize the metrics registry shared by the server and sync tasks
pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::new()?))
}
