use std::path::PathBuf;
use std::time::Duration;

use log::Level;
use serde::Deserialize;
use thiserror::Error;

pub const ENV_PREFIX: &str = "CREDMESH";

/// Runtime configuration for a credmesh node.
///
/// Values are loaded from (in order): `/etc/credmesh/credmesh.json`, the
/// user config folder (optional), and environment variables prefixed with
/// `CREDMESH_` (e.g. `CREDMESH_PORT`). Command line flags are applied on top
/// by the binary.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	/// Unique name of this node among its peers. Required.
	pub instance: String,
	pub host: String,
	/// 0 lets the OS pick; the bound port is what gets advertised.
	pub port: u16,
	pub database: PathBuf,
	pub log_level: Level,
	pub log_json: bool,
	pub service_type: String,
	pub discovery_interval_secs: u64,
	pub session_setup_timeout_secs: u64,
	pub stream_buffer: usize,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			instance: String::new(),
			host: "0.0.0.0".to_string(),
			port: 0,
			database: PathBuf::from("credmesh.db"),
			log_level: Level::Info,
			log_json: true,
			service_type: "_credmesh._tcp.local.".to_string(),
			discovery_interval_secs: 5,
			session_setup_timeout_secs: 5,
			stream_buffer: 64,
		}
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),

	#[error("instance name is required (set CREDMESH_INSTANCE or pass --instance)")]
	MissingInstance,

	#[error("invalid setting {field}: {reason}")]
	Invalid {
		field: &'static str,
		reason: &'static str,
	},
}

impl Settings {
	/// Reject settings a node cannot start with.
	pub fn validate(&self) -> Result<(), SettingsError> {
		if self.instance.trim().is_empty() {
			return Err(SettingsError::MissingInstance);
		}
		if self.discovery_interval_secs == 0 {
			return Err(SettingsError::Invalid {
				field: "discovery_interval_secs",
				reason: "must be greater than zero",
			});
		}
		if self.session_setup_timeout_secs == 0 {
			return Err(SettingsError::Invalid {
				field: "session_setup_timeout_secs",
				reason: "must be greater than zero",
			});
		}
		if self.stream_buffer == 0 {
			return Err(SettingsError::Invalid {
				field: "stream_buffer",
				reason: "must be greater than zero",
			});
		}
		Ok(())
	}

	pub fn discovery_interval(&self) -> Duration {
		Duration::from_secs(self.discovery_interval_secs)
	}

	pub fn session_setup_timeout(&self) -> Duration {
		Duration::from_secs(self.session_setup_timeout_secs)
	}
}

pub fn load() -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/credmesh/credmesh.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("credmesh").join("credmesh.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}

	builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Direct environment variables win for the keys operators set most.
	if let Ok(i) = std::env::var("CREDMESH_INSTANCE") {
		if !i.is_empty() {
			s.instance = i;
		}
	}
	if let Ok(h) = std::env::var("CREDMESH_HOST") {
		if !h.is_empty() {
			s.host = h;
		}
	}
	if let Ok(p) = std::env::var("CREDMESH_PORT") {
		if let Ok(pn) = p.parse::<u16>() {
			s.port = pn;
		}
	}
	if let Ok(db) = std::env::var("CREDMESH_DATABASE") {
		if !db.is_empty() {
			s.database = PathBuf::from(db);
		}
	}
	if let Ok(l) = std::env::var("CREDMESH_LOG_LEVEL") {
		if let Ok(parsed) = l.parse::<Level>() {
			s.log_level = parsed;
		}
	}
	if let Ok(j) = std::env::var("CREDMESH_LOG_JSON") {
		if let Ok(parsed) = j.parse::<bool>() {
			s.log_json = parsed;
		}
	}

	Ok(s)
}
