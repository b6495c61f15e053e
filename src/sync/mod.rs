pub mod orchestrator;
pub mod session;
pub mod sessions;

pub use orchestrator::SyncOrchestrator;
pub use session::{SYNC_STREAM_PATH, SessionReport, SyncError, pull};
pub use sessions::{Peer, PeerSessions, SessionGuard};
