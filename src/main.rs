use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use credmesh::config::{self, Settings};
use credmesh::observability;
use credmesh::run;
use credmesh::store::{SqliteStore, Store};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "credmesh", about = "credmesh - peer-to-peer credential store")]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Serve the API, advertise this node and replicate with peers (default)
	Run(RunArgs),
	/// Print the local activity log checkpoint
	Checkpoint {
		/// SQLite database file
		#[arg(long)]
		database: Option<PathBuf>,
	},
}

#[derive(Args, Default)]
struct RunArgs {
	/// Unique node name among peers
	#[arg(long)]
	instance: Option<String>,
	/// Port to listen on (0 picks a free one)
	#[arg(long)]
	port: Option<u16>,
	/// SQLite database file
	#[arg(long)]
	database: Option<PathBuf>,
}

impl RunArgs {
	fn apply(self, settings: &mut Settings) {
		if let Some(instance) = self.instance {
			settings.instance = instance;
		}
		if let Some(port) = self.port {
			settings.port = port;
		}
		if let Some(database) = self.database {
			settings.database = database;
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let mut settings = config::load().context("failed to load configuration")?;

	match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
		Commands::Run(args) => {
			args.apply(&mut settings);
			settings.validate()?;
			observability::init_logging(settings.log_level, settings.log_json)?;

			let cancel = CancellationToken::new();
			tokio::spawn(cancel_on_signal(cancel.clone()));
			run(settings, cancel).await
		}
		Commands::Checkpoint { database } => {
			if let Some(database) = database {
				settings.database = database;
			}
			let store = SqliteStore::connect(&settings.database)
				.await
				.with_context(|| format!("failed to open store at {}", settings.database.display()))?;
			println!("{}", store.last_checkpoint_at().await?);
			Ok(())
		}
	}
}

async fn cancel_on_signal(cancel: CancellationToken) {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};

		match signal(SignalKind::terminate()) {
			Ok(mut term) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => {}
					_ = term.recv() => {}
				}
			}
			Err(_) => {
				let _ = tokio::signal::ctrl_c().await;
			}
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}

	info!("shutdown signal received");
	cancel.cancel();
}
