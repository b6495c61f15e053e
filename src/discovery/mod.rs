//! Local network discovery over multicast DNS.
//!
//! Each node advertises its instance name under a shared service type and
//! keeps browsing for the others. Every resolved announcement is forwarded
//! to the sync orchestrator, which decides whether to start a session; the
//! browse is restarted on a fixed interval so peers that are still around get
//! announced again and failed sessions are retried.

mod backoff;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::observability::MetricsRegistry;

pub use backoff::Backoff;

/// TXT record key marking an advertisement as one of ours.
pub const TXT_KEY: &str = "credmesh";

#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("mdns daemon error: {0}")]
	Daemon(#[from] mdns_sd::Error),

	#[error("browse channel closed")]
	BrowseClosed,
}

/// A sibling instance seen on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
	pub instance: String,
	pub host: String,
	pub port: u16,
}

impl DiscoveredPeer {
	/// `host:port`, bracketing IPv6 literals.
	pub fn address(&self) -> String {
		if self.host.contains(':') {
			format!("[{}]:{}", self.host, self.port)
		} else {
			format!("{}:{}", self.host, self.port)
		}
	}
}

/// Everything discovery needs to know about this node.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
	pub instance: String,
	/// mDNS service type, e.g. `_credmesh._tcp.local.`
	pub service_type: String,
	/// Port the HTTP server actually listens on.
	pub port: u16,
	pub browse_interval: Duration,
}

/// Advertise this node and watch for peers until `cancel` fires or the
/// receiving side of `peers` goes away.
///
/// Daemon, registration and browse failures do not stop discovery: they are
/// logged and the whole advertise/watch cycle is retried with backoff.
pub async fn run(
	config: DiscoveryConfig,
	metrics: Arc<MetricsRegistry>,
	peers: mpsc::Sender<DiscoveredPeer>,
	cancel: CancellationToken,
) {
	let mut backoff = Backoff::default();

	loop {
		match advertise_and_watch(&config, &metrics, &peers, &cancel, &mut backoff).await {
			Ok(()) => break,
			Err(e) => {
				metrics.discovery_errors_total.inc();
				let delay = backoff.next_delay();
				warn!(error = %e, retry_in = ?delay, "discovery failed, retrying");
				tokio::select! {
					_ = cancel.cancelled() => break,
					_ = tokio::time::sleep(delay) => {}
				}
			}
		}
	}

	info!(instance = %config.instance, "discovery stopped");
}

async fn advertise_and_watch(
	config: &DiscoveryConfig,
	metrics: &MetricsRegistry,
	peers: &mpsc::Sender<DiscoveredPeer>,
	cancel: &CancellationToken,
	backoff: &mut Backoff,
) -> Result<(), DiscoveryError> {
	let daemon = ServiceDaemon::new()?;

	let info = service_info(config)?;
	let fullname = info.get_fullname().to_string();
	daemon.register(info)?;
	info!(
		instance = %config.instance,
		service = %config.service_type,
		port = config.port,
		"registered mdns service"
	);

	let result = watch(&daemon, config, metrics, peers, cancel, backoff).await;

	// Best effort: tell the network we are leaving before dropping the daemon.
	match daemon.unregister(&fullname) {
		Ok(status) => {
			let _ = status.recv_async().await;
		}
		Err(e) => debug!(error = %e, "mdns unregister failed"),
	}
	if let Err(e) = daemon.shutdown() {
		debug!(error = %e, "mdns daemon shutdown failed");
	}

	result
}

async fn watch(
	daemon: &ServiceDaemon,
	config: &DiscoveryConfig,
	metrics: &MetricsRegistry,
	peers: &mpsc::Sender<DiscoveredPeer>,
	cancel: &CancellationToken,
	backoff: &mut Backoff,
) -> Result<(), DiscoveryError> {
	loop {
		let events = daemon.browse(&config.service_type)?;
		backoff.reset();
		debug!(service = %config.service_type, "browse cycle started");

		let cycle = tokio::time::sleep(config.browse_interval);
		tokio::pin!(cycle);

		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					let _ = daemon.stop_browse(&config.service_type);
					return Ok(());
				}
				_ = &mut cycle => break,
				event = events.recv_async() => {
					let event = event.map_err(|_| DiscoveryError::BrowseClosed)?;
					if let Some(peer) = resolve_peer(&config.service_type, event) {
						metrics.discovery_peers_seen_total.inc();
						if peers.send(peer).await.is_err() {
							return Ok(());
						}
					}
				}
			}
		}

		if let Err(e) = daemon.stop_browse(&config.service_type) {
			debug!(error = %e, "stop browse failed");
		}
	}
}

fn service_info(config: &DiscoveryConfig) -> Result<ServiceInfo, DiscoveryError> {
	let host_name = format!("{}.local.", sanitize_host_label(&config.instance));
	let properties = [(TXT_KEY, "true")];

	let info = ServiceInfo::new(
		&config.service_type,
		&config.instance,
		&host_name,
		"",
		config.port,
		&properties[..],
	)?
	.enable_addr_auto();

	Ok(info)
}

/// Map a browse event to a peer, if it is a resolved instance of
/// `service_type`.
pub fn resolve_peer(service_type: &str, event: ServiceEvent) -> Option<DiscoveredPeer> {
	let ServiceEvent::ServiceResolved(info) = event else {
		return None;
	};

	let suffix = format!(".{}", service_type.trim_start_matches('.'));
	let instance = info.get_fullname().strip_suffix(&suffix)?.to_string();
	if instance.is_empty() {
		return None;
	}

	let host = match preferred_address(info.get_addresses().iter().copied()) {
		Some(addr) => addr.to_string(),
		None => info.get_hostname().trim_end_matches('.').to_string(),
	};

	Some(DiscoveredPeer {
		instance,
		host,
		port: info.get_port(),
	})
}

/// Pick the address most likely to be dialable without a zone id.
///
/// Routable IPv4 first, then routable IPv6, then loopback. IPv6 link-local
/// addresses are never chosen. Ties break on address order so the choice is
/// stable across announcements.
fn preferred_address(addrs: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
	fn rank(addr: &IpAddr) -> Option<u8> {
		match addr {
			IpAddr::V4(v4) if v4.is_loopback() => Some(3),
			IpAddr::V4(v4) if v4.is_link_local() => Some(2),
			IpAddr::V4(_) => Some(0),
			IpAddr::V6(v6) if v6.is_loopback() => Some(3),
			IpAddr::V6(v6) if (v6.segments()[0] & 0xffc0) == 0xfe80 => None,
			IpAddr::V6(_) => Some(1),
		}
	}

	addrs
		.into_iter()
		.filter_map(|addr| rank(&addr).map(|r| (r, addr)))
		.min()
		.map(|(_, addr)| addr)
}

/// Instance names may contain anything; host labels may not.
fn sanitize_host_label(instance: &str) -> String {
	let out: String = instance
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
		.collect();
	let out = out.trim_matches('-');
	if out.is_empty() {
		"credmesh".to_string()
	} else {
		out.to_string()
	}
}
