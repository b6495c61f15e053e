use std::io;
use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::id::Id;
use crate::store::{ActivityLogEntry, Replay, Store, StoreError};

/// Path of the change-stream endpoint every node serves.
pub const SYNC_STREAM_PATH: &str = "/sync-stream";

/// Errors that end a single sync session. None of them outlive the session.
#[derive(Debug, Error)]
pub enum SyncError {
	#[error("failed to read local checkpoint: {0}")]
	Checkpoint(#[source] StoreError),

	#[error("peer did not answer within {0:?}")]
	SetupTimeout(Duration),

	#[error("change stream request failed: {0}")]
	Request(#[source] reqwest::Error),

	#[error("peer answered change stream request with {0}")]
	Status(StatusCode),

	#[error("failed reading change stream: {0}")]
	Read(#[source] io::Error),

	#[error("malformed change stream record: {0}")]
	MalformedRecord(#[source] serde_json::Error),

	#[error("failed to replay record {id}: {source}")]
	Replay {
		id: Id,
		#[source]
		source: StoreError,
	},

	#[error("sync session cancelled")]
	Cancelled,
}

/// What one completed session did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
	/// Local checkpoint the stream was requested from.
	pub since: i64,
	pub applied: u64,
	pub duplicates: u64,
}

/// Pull everything `address` has logged after our checkpoint and replay it
/// into `store`.
///
/// Reading the checkpoint and getting the response headers must finish
/// within `setup_timeout`; the body is then read for as long as the peer
/// keeps sending. The first bad line or failed replay ends the session, and
/// entries replayed before that stay committed.
pub async fn pull(
	store: &dyn Store,
	client: &reqwest::Client,
	address: &str,
	setup_timeout: Duration,
	cancel: &CancellationToken,
) -> Result<SessionReport, SyncError> {
	let setup = async {
		let since = store
			.last_checkpoint_at()
			.await
			.map_err(SyncError::Checkpoint)?;
		debug!(peer.address = address, checkpoint = since, "requesting change stream");

		let response = client
			.get(format!("http://{address}{SYNC_STREAM_PATH}"))
			.query(&[("since", since)])
			.send()
			.await
			.map_err(SyncError::Request)?;

		let status = response.status();
		if !status.is_success() {
			return Err(SyncError::Status(status));
		}

		Ok((since, response))
	};

	let (since, response) = tokio::select! {
		_ = cancel.cancelled() => return Err(SyncError::Cancelled),
		res = tokio::time::timeout(setup_timeout, setup) => {
			res.map_err(|_| SyncError::SetupTimeout(setup_timeout))??
		}
	};

	let body = response.bytes_stream().map_err(io::Error::other);
	let mut lines = StreamReader::new(Box::pin(body)).lines();
	let mut report = SessionReport {
		since,
		..Default::default()
	};

	loop {
		let line = tokio::select! {
			_ = cancel.cancelled() => return Err(SyncError::Cancelled),
			line = lines.next_line() => line.map_err(SyncError::Read)?,
		};
		let Some(line) = line else {
			break;
		};
		if line.trim().is_empty() {
			continue;
		}

		debug!(peer.address = address, bytes = line.len(), "received change record");
		let entry: ActivityLogEntry =
			serde_json::from_str(&line).map_err(SyncError::MalformedRecord)?;

		match store.sync_record(&entry).await {
			Ok(Replay::Applied) => report.applied += 1,
			Ok(Replay::Duplicate) => report.duplicates += 1,
			Err(source) => {
				return Err(SyncError::Replay {
					id: entry.id,
					source,
				});
			}
		}
	}

	Ok(report)
}
