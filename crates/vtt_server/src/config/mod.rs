#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;
use vtt_util::secret::SecretString;

pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 8192;

/// Default config path: `~/.vtt/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".vtt").join("config.toml"))
}

/// Load the server config from TOML, then apply env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// PEM-encoded certificate path for QUIC/TLS.
	pub tls_cert_path: Option<PathBuf>,
	/// PEM-encoded private key path for QUIC/TLS.
	pub tls_key_path: Option<PathBuf>,
	/// Prometheus exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// HMAC secret used to verify access tokens. Required at startup.
	pub auth_hmac_secret: Option<SecretString>,
	/// Per-connection outbound queue; broadcasts are dropped for a full queue.
	pub outbound_queue_capacity: usize,
	/// Capacity of the domain event bus before slow dispatchers lag.
	pub event_bus_capacity: usize,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			tls_cert_path: None,
			tls_key_path: None,
			metrics_bind: None,
			health_bind: None,
			auth_hmac_secret: None,
			outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
			event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
		}
	}
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let s = file.server;
		Self {
			server: ServerSettings {
				tls_cert_path: non_empty(s.tls_cert_path).map(PathBuf::from),
				tls_key_path: non_empty(s.tls_key_path).map(PathBuf::from),
				metrics_bind: non_empty(s.metrics_bind),
				health_bind: non_empty(s.health_bind),
				auth_hmac_secret: non_empty(s.auth_hmac_secret).map(SecretString::new),
				outbound_queue_capacity: s
					.outbound_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAPACITY),
				event_bus_capacity: s
					.event_bus_capacity
					.filter(|v| *v > 0)
					.unwrap_or(DEFAULT_EVENT_BUS_CAPACITY),
			},
		}
	}

	/// The HMAC secret, or an error naming both ways to set it.
	pub fn require_hmac_secret(&self) -> anyhow::Result<SecretString> {
		self.server.auth_hmac_secret.clone().ok_or_else(|| {
			anyhow!("auth_hmac_secret is not configured (set [server].auth_hmac_secret or VTT_SERVER_AUTH_HMAC_SECRET)")
		})
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	tls_cert_path: Option<String>,
	tls_key_path: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	auth_hmac_secret: Option<String>,
	outbound_queue_capacity: Option<usize>,
	event_bus_capacity: Option<usize>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	let var = |key: &str| non_empty(env(key));

	if let Some(v) = var("VTT_SERVER_TLS_CERT") {
		cfg.server.tls_cert_path = Some(PathBuf::from(v));
		info!("server config: tls_cert_path overridden by env");
	}

	if let Some(v) = var("VTT_SERVER_TLS_KEY") {
		cfg.server.tls_key_path = Some(PathBuf::from(v));
		info!("server config: tls_key_path overridden by env");
	}

	if let Some(v) = var("VTT_SERVER_AUTH_HMAC_SECRET") {
		cfg.server.auth_hmac_secret = Some(SecretString::new(v));
		info!("server auth: auth_hmac_secret overridden by env");
	}

	if let Some(v) = var("VTT_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = var("VTT_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = var("VTT_OUTBOUND_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.parse::<usize>()
		&& capacity > 0
	{
		cfg.server.outbound_queue_capacity = capacity;
		info!(capacity, "server config: outbound_queue_capacity overridden by env");
	}

	if let Some(v) = var("VTT_EVENT_BUS_CAPACITY")
		&& let Ok(capacity) = v.parse::<usize>()
		&& capacity > 0
	{
		cfg.server.event_bus_capacity = capacity;
		info!(capacity, "server config: event_bus_capacity overridden by env");
	}
}
