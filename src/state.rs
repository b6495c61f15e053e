use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::observability::MetricsRegistry;
use crate::store::Store;

/// Application state passed to handlers via Axum's `State` extractor.
///
/// Holds the shared store plus the node identity stamped onto local writes.
/// `cancel` is the root shutdown token, so long-running change streams end
/// when the node stops.
#[derive(Clone)]
pub struct AppState {
	pub instance: Arc<str>,
	pub store: Arc<dyn Store>,
	pub metrics: Arc<MetricsRegistry>,
	pub cancel: CancellationToken,
	/// Entries buffered between the database read and the response body.
	pub stream_buffer: usize,
}
