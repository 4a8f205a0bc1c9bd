#![forbid(unsafe_code)]

mod config;
mod quic;
mod server;
mod store;
mod util;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vtt_util::endpoint::{DEFAULT_GATEWAY_ENDPOINT, QuicEndpoint};

use crate::config::parse_env_bool;
use crate::quic::config::QuicServerConfig;
use crate::server::auth::HmacIdentityResolver;
use crate::server::connection::{ConnectionSettings, Gateways, handle_connection};
use crate::server::events::EventBus;
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::services::Services;
use crate::store::MemoryStore;

/// Dev-only demo data flag (ignored in release builds).
const VTT_ENABLE_DEMO_SEED_ENV: &str = "VTT_ENABLE_DEMO_SEED";

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: vtt_server [--bind quic://host:port]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: {DEFAULT_GATEWAY_ENDPOINT})\n\
\t         Format: quic://host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_endpoint = DEFAULT_GATEWAY_ENDPOINT.to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected quic://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = QuicEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	bind.socket_addr().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	})
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn otlp_tracer(endpoint: &str) -> anyhow::Result<opentelemetry_sdk::trace::SdkTracer> {
	use opentelemetry::trace::TracerProvider as _;
	use opentelemetry_otlp::WithExportConfig;

	let exporter = opentelemetry_otlp::SpanExporter::builder()
		.with_tonic()
		.with_endpoint(endpoint)
		.build()
		.context("build otlp span exporter")?;
	let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
		.with_batch_exporter(exporter)
		.build();
	let tracer = provider.tracer("vtt_server");
	opentelemetry::global::set_tracer_provider(provider);
	Ok(tracer)
}

/// fmt logs always; OTLP spans too when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,vtt_server=debug".to_string());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	let Some(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
	else {
		base.init();
		return;
	};

	match otlp_tracer(&endpoint) {
		Ok(tracer) => {
			base.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();
			info!(%endpoint, "otlp tracing enabled");
		}
		Err(e) => {
			base.init();
			warn!(error = %e, "failed to initialize otlp tracing");
		}
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn demo_seed_enabled() -> bool {
	cfg!(debug_assertions)
		&& std::env::var(VTT_ENABLE_DEMO_SEED_ENV)
			.ok()
			.and_then(|v| parse_env_bool(&v))
			.unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let bind_addr = parse_args();

	let config_path = crate::config::default_config_path()?;
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	let hmac_secret = server_cfg.require_hmac_secret()?;

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let bus = EventBus::new(server_cfg.server.event_bus_capacity);
	let store = Arc::new(MemoryStore::new(bus.clone()));

	let gateways = Gateways::new(
		Arc::new(HmacIdentityResolver::new(hmac_secret)),
		Services::from_backend(store.clone()),
	);
	let _dispatchers = gateways.spawn_dispatchers(&bus);

	if demo_seed_enabled() {
		store.seed_demo()?;
	}

	let quic_cfg = QuicServerConfig::dev(bind_addr);
	let endpoint = if let (Some(cert_path), Some(key_path)) = (
		server_cfg.server.tls_cert_path.as_deref(),
		server_cfg.server.tls_key_path.as_deref(),
	) {
		info!(cert = %cert_path.display(), key = %key_path.display(), "loading TLS cert/key");
		quic_cfg.bind_endpoint_with_tls(cert_path, key_path)?
	} else {
		let (endpoint, server_cert_der) = quic_cfg.bind_dev_endpoint()?;
		info!(
			bind = %bind_addr,
			cert_der_len = server_cert_der.len(),
			"vtt_server: QUIC endpoint ready (dev self-signed cert)"
		);
		endpoint
	};

	let conn_settings = ConnectionSettings {
		outbound_queue_capacity: server_cfg.server.outbound_queue_capacity,
		..ConnectionSettings::default()
	};

	health_state.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let Some(incoming) = endpoint.accept().await else {
			break;
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;

		let gateways = gateways.clone();
		let conn_settings = conn_settings.clone();
		tokio::spawn(async move {
			match incoming.await {
				Ok(connection) => {
					info!(conn_id, remote = %connection.remote_address(), "accepted connection");
					if let Err(e) = handle_connection(conn_id, connection, gateways, conn_settings).await {
						warn!(conn_id, error = %e, "connection ended with error");
					}
				}
				Err(e) => {
					warn!(conn_id, error = %e, "incoming connection failed");
				}
			}
		});
	}

	info!("endpoint closed; shutting down");
	Ok(())
}
