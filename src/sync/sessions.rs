use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

/// A peer with a sync session in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
	/// Discovery instance name; the key of the active set.
	pub instance: String,
	/// `host:port` of the peer's HTTP endpoint.
	pub address: String,
	pub last_synced_at: DateTime<Utc>,
}

/// Set of peers that currently have a running sync session.
///
/// Membership means "a session is in flight", not "this peer is known".
/// The only ways in and out are [`PeerSessions::try_acquire`] and dropping
/// the returned [`SessionGuard`], which keeps the set to at most one
/// session per instance.
#[derive(Clone, Default)]
pub struct PeerSessions {
	active: Arc<Mutex<HashMap<String, Peer>>>,
}

impl PeerSessions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Mark `peer` as syncing unless a session for the same instance is
	/// already running.
	pub fn try_acquire(&self, peer: Peer) -> Option<SessionGuard> {
		let mut active = self.lock();
		if active.contains_key(&peer.instance) {
			return None;
		}
		active.insert(peer.instance.clone(), peer.clone());
		drop(active);

		Some(SessionGuard {
			sessions: self.clone(),
			peer,
		})
	}

	pub fn is_active(&self, instance: &str) -> bool {
		self.lock().contains_key(instance)
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}

	fn release(&self, instance: &str) {
		self.lock().remove(instance);
	}

	// A panic while holding the lock cannot leave the map half-updated, so a
	// poisoned lock is still usable.
	fn lock(&self) -> MutexGuard<'_, HashMap<String, Peer>> {
		self.active.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Proof of an acquired session; releases the peer when dropped, whether
/// the session finished, failed or panicked.
pub struct SessionGuard {
	sessions: PeerSessions,
	peer: Peer,
}

impl SessionGuard {
	pub fn peer(&self) -> &Peer {
		&self.peer
	}
}

impl Drop for SessionGuard {
	fn drop(&mut self) {
		self.sessions.release(&self.peer.instance);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn peer(instance: &str) -> Peer {
		Peer {
			instance: instance.to_string(),
			address: "127.0.0.1:9000".to_string(),
			last_synced_at: Utc::now(),
		}
	}

	#[test]
	fn second_acquire_for_same_instance_is_refused() {
		let sessions = PeerSessions::new();
		let guard = sessions.try_acquire(peer("node-a")).expect("first acquire");
		assert!(sessions.try_acquire(peer("node-a")).is_none());
		assert!(sessions.is_active("node-a"));
		assert_eq!(guard.peer().instance, "node-a");

		// A different instance is independent.
		let other = sessions.try_acquire(peer("node-b"));
		assert!(other.is_some());
		assert_eq!(sessions.len(), 2);
	}

	#[test]
	fn dropping_the_guard_makes_the_peer_eligible_again() {
		let sessions = PeerSessions::new();
		let guard = sessions.try_acquire(peer("node-a")).unwrap();
		drop(guard);
		assert!(!sessions.is_active("node-a"));
		assert!(sessions.is_empty());
		assert!(sessions.try_acquire(peer("node-a")).is_some());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_discoveries_start_one_session() {
		let sessions = PeerSessions::new();
		let barrier = Arc::new(tokio::sync::Barrier::new(32));

		let mut handles = Vec::new();
		for _ in 0..32 {
			let sessions = sessions.clone();
			let barrier = Arc::clone(&barrier);
			handles.push(tokio::spawn(async move {
				barrier.wait().await;
				sessions.try_acquire(peer("node-a"))
			}));
		}

		let mut guards = Vec::new();
		for handle in handles {
			if let Some(guard) = handle.await.unwrap() {
				guards.push(guard);
			}
		}

		assert_eq!(guards.len(), 1);
		assert_eq!(sessions.len(), 1);
		drop(guards);
		assert!(sessions.is_empty());
	}
}
