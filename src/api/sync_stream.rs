use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::api::ApiError;
use crate::observability::MetricsRegistry;
use crate::state::AppState;
use crate::store::{ActivityLogEntry, ChangeSink, StoreError};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

type Frame = Result<Bytes, io::Error>;

#[derive(Debug, Deserialize)]
pub struct SyncStreamParams {
	since: Option<String>,
}

/// `GET /sync-stream?since=<i64>`: the activity log after `since`, one JSON
/// object per line.
///
/// The database read runs in its own task and every entry goes out as a
/// separate body frame as soon as it is read. A read error aborts the body,
/// so the peer sees a broken stream rather than a clean end. A peer that
/// hangs up stops the read.
pub async fn sync_stream(
	State(state): State<AppState>,
	Query(params): Query<SyncStreamParams>,
) -> Result<Response, ApiError> {
	let raw = params.since.ok_or(ApiError::MissingParameter("since"))?;
	let since: i64 = raw.trim().parse().map_err(|_| ApiError::InvalidParameter {
		name: "since",
		value: raw.clone(),
	})?;

	state.metrics.change_stream_requests_total.inc();
	debug!(since, "serving change stream");

	let (tx, rx) = mpsc::channel::<Frame>(state.stream_buffer.max(1));
	let store = Arc::clone(&state.store);
	let metrics = Arc::clone(&state.metrics);
	let cancel = state.cancel.clone();

	tokio::spawn(async move {
		let mut sink = NdjsonSink {
			tx: tx.clone(),
			metrics: Arc::clone(&metrics),
		};

		let result = tokio::select! {
			_ = cancel.cancelled() => {
				let _ = tx.send(Err(io::Error::other("node shutting down"))).await;
				return;
			}
			res = store.change_stream(since, &mut sink) => res,
		};

		match result {
			Ok(sent) => debug!(since, sent, "change stream complete"),
			Err(StoreError::SinkClosed) => debug!(since, "peer closed change stream"),
			Err(e) => {
				metrics.change_stream_errors_total.inc();
				error!(since, error = %e, "failed calling store.change_stream");
				let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
			}
		}
	});

	let body = Body::from_stream(ReceiverStream::new(rx));
	Ok(([(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)], body).into_response())
}

/// Serializes entries as NDJSON lines onto the response body channel.
struct NdjsonSink {
	tx: mpsc::Sender<Frame>,
	metrics: Arc<MetricsRegistry>,
}

#[async_trait]
impl ChangeSink for NdjsonSink {
	async fn send(&mut self, entry: ActivityLogEntry) -> Result<(), StoreError> {
		let mut line = serde_json::to_vec(&entry).map_err(|source| StoreError::Encode {
			what: "activity log entry",
			source,
		})?;
		line.push(b'\n');

		self.tx
			.send(Ok(Bytes::from(line)))
			.await
			.map_err(|_| StoreError::SinkClosed)?;
		self.metrics.change_stream_entries_total.inc();
		Ok(())
	}
}
