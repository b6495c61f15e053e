use log::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging to stdout.
///
/// `RUST_LOG` takes precedence when set; otherwise `level` from the settings
/// applies. With `json` the output is one JSON object per event with span
/// context, otherwise a compact human readable line.
pub fn init_logging(level: Level, json: bool) -> anyhow::Result<()> {
	let env_filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(level.as_str().to_lowercase()))
		.unwrap_or_else(|_| EnvFilter::new("info"));

	let registry = tracing_subscriber::registry().with(env_filter);

	let result = if json {
		let json_layer = tracing_subscriber::fmt::layer()
			.json()
			.with_current_span(true)
			.with_span_list(true)
			.with_target(true)
			.with_level(true)
			.with_thread_ids(true)
			.with_file(true)
			.with_line_number(true);
		registry.with(json_layer).try_init()
	} else {
		let text_layer = tracing_subscriber::fmt::layer()
			.compact()
			.with_target(true)
			.with_level(true);
		registry.with(text_layer).try_init()
	};

	result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}
