#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use bytes::BytesMut;
use quinn::{ClientConfig, ConnectionError, Endpoint, VarInt};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::debug;
use vtt_protocol::version::ALPN;
use vtt_protocol::{
	CLOSE_PROTOCOL_ERROR, CLOSE_UNAUTHENTICATED, DEFAULT_MAX_FRAME_SIZE, Handshake, Namespace, encode_json_frame_default,
	try_decode_frame_from_buffer,
};

use crate::quic::config::QuicServerConfig;
use crate::server::auth::issue_user_token;
use crate::server::connection::{ConnectionSettings, Gateways, handle_connection};
use crate::server::test_support::{SECRET, Table};

static LOG_INIT: OnceLock<()> = OnceLock::new();

fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("VTT_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider());
}

/// Accept connections forever, one task each, the way the binary does.
fn spawn_server(gateways: Gateways) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
	let bind_addr: SocketAddr = "127.0.0.1:0".parse().context("parse bind addr")?;
	let (endpoint, _cert_der) = QuicServerConfig::dev(bind_addr).bind_dev_endpoint()?;
	let addr = endpoint.local_addr().context("server local_addr")?;

	let task = tokio::spawn(async move {
		let mut next_conn_id = 1u64;
		while let Some(incoming) = endpoint.accept().await {
			let conn_id = next_conn_id;
			next_conn_id += 1;
			let gateways = gateways.clone();
			tokio::spawn(async move {
				let Ok(connection) = incoming.await else {
					return;
				};
				if let Err(e) = handle_connection(conn_id, connection, gateways, ConnectionSettings::default()).await {
					debug!(conn_id, error = %e, "test connection ended with error");
				}
			});
		}
	});

	Ok((addr, task))
}

/// Dev-only TLS config that skips server cert validation.
fn insecure_client_config() -> anyhow::Result<ClientConfig> {
	#[derive(Debug)]
	struct NoVerifier;

	impl rustls::client::danger::ServerCertVerifier for NoVerifier {
		fn verify_server_cert(
			&self,
			_end_entity: &rustls::pki_types::CertificateDer<'_>,
			_intermediates: &[rustls::pki_types::CertificateDer<'_>],
			_server_name: &rustls::pki_types::ServerName<'_>,
			_ocsp_response: &[u8],
			_now: rustls::pki_types::UnixTime,
		) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
			Ok(rustls::client::danger::ServerCertVerified::assertion())
		}

		fn verify_tls12_signature(
			&self,
			_message: &[u8],
			_cert: &rustls::pki_types::CertificateDer<'_>,
			_dss: &rustls::DigitallySignedStruct,
		) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
			Err(rustls::Error::General("TLS1.2 not supported".into()))
		}

		fn verify_tls13_signature(
			&self,
			_message: &[u8],
			_cert: &rustls::pki_types::CertificateDer<'_>,
			_dss: &rustls::DigitallySignedStruct,
		) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
			Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
		}

		fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
			vec![
				rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
				rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
				rustls::SignatureScheme::RSA_PSS_SHA256,
				rustls::SignatureScheme::RSA_PSS_SHA384,
				rustls::SignatureScheme::RSA_PSS_SHA512,
				rustls::SignatureScheme::ED25519,
			]
		}
	}

	let mut tls = rustls::ClientConfig::builder()
		.with_root_certificates(rustls::RootCertStore::empty())
		.with_no_client_auth();
	tls.dangerous().set_certificate_verifier(Arc::new(NoVerifier));
	tls.alpn_protocols = vec![ALPN.to_vec()];

	let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls)?;
	Ok(ClientConfig::new(Arc::new(quic_tls)))
}

struct Client {
	_endpoint: Endpoint,
	connection: quinn::Connection,
	send: quinn::SendStream,
	recv: quinn::RecvStream,
	buf: BytesMut,
}

impl Client {
	async fn connect(addr: SocketAddr, handshake: &Handshake) -> anyhow::Result<Self> {
		let mut endpoint = Endpoint::client("127.0.0.1:0".parse()?).context("create client endpoint")?;
		endpoint.set_default_client_config(insecure_client_config()?);

		let connection = endpoint
			.connect(addr, "localhost")
			.context("start connect")?
			.await
			.context("quic handshake")?;
		let (mut send, recv) = connection.open_bi().await.context("open control stream")?;
		send.write_all(&encode_json_frame_default(handshake)?)
			.await
			.context("write handshake")?;

		Ok(Self {
			_endpoint: endpoint,
			connection,
			send,
			recv,
			buf: BytesMut::new(),
		})
	}

	async fn send(&mut self, event: &str, data: Value) -> anyhow::Result<()> {
		let frame = encode_json_frame_default(&json!({"event": event, "data": data}))?;
		self.send.write_all(&frame).await.context("write command")?;
		Ok(())
	}

	async fn read_frame(&mut self) -> anyhow::Result<Value> {
		let mut tmp = [0u8; 8192];
		loop {
			if let Some(frame) = try_decode_frame_from_buffer(&mut self.buf, DEFAULT_MAX_FRAME_SIZE)? {
				return Ok(serde_json::from_slice(&frame)?);
			}
			match self.recv.read(&mut tmp).await? {
				Some(n) => self.buf.extend_from_slice(&tmp[..n]),
				None => return Err(anyhow!("control stream finished")),
			}
		}
	}

	async fn next(&mut self) -> anyhow::Result<Value> {
		tokio::time::timeout(Duration::from_secs(5), self.read_frame())
			.await
			.context("timed out waiting for server event")?
	}

	async fn request(&mut self, event: &str, data: Value) -> anyhow::Result<Value> {
		self.send(event, data).await?;
		self.next().await
	}
}

fn close_code(err: &ConnectionError) -> Option<VarInt> {
	match err {
		ConnectionError::ApplicationClosed(close) => Some(close.error_code),
		_ => None,
	}
}

/// Poll until `check` holds, for at most two seconds.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
	for _ in 0..100 {
		if check() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	check()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bearer_header_only_handshake_connects() -> anyhow::Result<()> {
	init_test_logging();
	init_rustls_crypto_provider();

	let table = Table::new();
	let (addr, server) = spawn_server(table.gateways.clone())?;

	let token = issue_user_token(table.player.as_str(), SECRET);
	let hs = Handshake::new(Namespace::Vtt).with_header("Authorization", format!("Bearer {token}"));
	let mut client = Client::connect(addr, &hs).await?;

	let connected = client.next().await?;
	assert_eq!(connected["event"], "connected");
	assert_eq!(connected["data"]["userId"], table.player.as_str());
	assert!(connected["data"]["connectionId"].as_u64().is_some());

	let reply = client.request("joinRoom", json!({"roomId": table.room_id})).await?;
	assert_eq!(reply["event"], "joinedRoom");

	server.abort();
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abrupt_disconnect_clears_all_memberships() -> anyhow::Result<()> {
	init_test_logging();
	init_rustls_crypto_provider();

	let table = Table::new();
	let (addr, server) = spawn_server(table.gateways.clone())?;
	let hub = table.gateways.vtt.hub().clone();

	let hs = Handshake::new(Namespace::Vtt).with_auth_token(issue_user_token(table.player.as_str(), SECRET));
	let mut client = Client::connect(addr, &hs).await?;
	assert_eq!(client.next().await?["event"], "connected");
	assert_eq!(client.request("joinRoom", json!({"roomId": table.room_id})).await?["event"], "joinedRoom");
	assert_eq!(client.request("joinMap", json!({"mapId": table.map_id})).await?["event"], "joinedMap");
	assert!(hub.presence.is_map_member(&table.map_id, &table.player));

	client.connection.close(VarInt::from_u32(0), b"gone");

	let player = table.player.clone();
	assert!(
		eventually(|| !hub.presence.inspect(|reg| reg.tracks_user(&player)) && hub.sessions.is_empty()).await,
		"registry still tracks the disconnected user"
	);
	assert!(!hub.presence.inspect(|reg| reg.has_room_entry(&table.room_id)));
	assert!(!hub.presence.inspect(|reg| reg.has_map_entry(&table.map_id)));

	server.abort();
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn token_move_is_broadcast_over_quic() -> anyhow::Result<()> {
	init_test_logging();
	init_rustls_crypto_provider();

	let table = Table::new();
	let (addr, server) = spawn_server(table.gateways.clone())?;

	let gm_hs = Handshake::new(Namespace::Vtt).with_auth_token(issue_user_token(table.gm.as_str(), SECRET));
	let player_hs = Handshake::new(Namespace::Vtt).with_query("token", issue_user_token(table.player.as_str(), SECRET));

	let mut gm = Client::connect(addr, &gm_hs).await?;
	let mut player = Client::connect(addr, &player_hs).await?;
	for c in [&mut gm, &mut player] {
		assert_eq!(c.next().await?["event"], "connected");
		assert_eq!(c.request("joinRoom", json!({"roomId": table.room_id})).await?["event"], "joinedRoom");
		assert_eq!(c.request("joinMap", json!({"mapId": table.map_id})).await?["event"], "joinedMap");
	}

	player
		.send("moveToken", json!({"tokenId": table.hero, "x": 42, "y": 24}))
		.await?;

	for c in [&mut gm, &mut player] {
		let ev = c.next().await?;
		assert_eq!(ev["event"], "token:updated");
		assert_eq!(ev["data"]["id"], table.hero.as_str());
		assert_eq!(ev["data"]["x"], 42.0);
	}

	server.abort();
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_token_gets_error_then_close_4401() -> anyhow::Result<()> {
	init_test_logging();
	init_rustls_crypto_provider();

	let table = Table::new();
	let (addr, server) = spawn_server(table.gateways.clone())?;

	let hs = Handshake::new(Namespace::Chat).with_auth_token(issue_user_token("mallory", "wrong-secret"));
	let mut client = Client::connect(addr, &hs).await?;

	let ev = client.next().await?;
	assert_eq!(ev["event"], "error");
	assert_eq!(ev["data"]["code"], "UNAUTHENTICATED");

	let err = tokio::time::timeout(Duration::from_secs(5), client.connection.closed()).await?;
	assert_eq!(close_code(&err), Some(VarInt::from_u32(CLOSE_UNAUTHENTICATED)));
	assert!(table.gateways.chat.hub().sessions.is_empty());

	server.abort();
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversize_frame_closes_connection_and_reaps() -> anyhow::Result<()> {
	init_test_logging();
	init_rustls_crypto_provider();

	let table = Table::new();
	let (addr, server) = spawn_server(table.gateways.clone())?;
	let hub = table.gateways.vtt.hub().clone();

	let hs = Handshake::new(Namespace::Vtt).with_auth_token(issue_user_token(table.player.as_str(), SECRET));
	let mut client = Client::connect(addr, &hs).await?;
	assert_eq!(client.next().await?["event"], "connected");
	assert_eq!(client.request("joinRoom", json!({"roomId": table.room_id})).await?["event"], "joinedRoom");

	let declared = (DEFAULT_MAX_FRAME_SIZE as u32) + 1;
	client.send.write_all(&declared.to_be_bytes()).await?;

	let err = tokio::time::timeout(Duration::from_secs(5), client.connection.closed()).await?;
	assert_eq!(close_code(&err), Some(VarInt::from_u32(CLOSE_PROTOCOL_ERROR)));

	let player = table.player.clone();
	assert!(eventually(|| !hub.presence.inspect(|reg| reg.tracks_user(&player))).await);

	server.abort();
	Ok(())
}
