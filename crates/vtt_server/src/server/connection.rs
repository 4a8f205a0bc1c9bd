#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vtt_domain::EntityKind;
use vtt_protocol::{
	CLOSE_PROTOCOL_ERROR, CLOSE_UNAUTHENTICATED, DEFAULT_MAX_FRAME_SIZE, FramingError, Handshake, Namespace, ServerEvent,
	try_decode_frame_from_buffer,
};

use crate::config::DEFAULT_OUTBOUND_QUEUE_CAPACITY;
use crate::server::auth::{IdentityResolver, authenticate};
use crate::server::dispatcher::BroadcastDispatcher;
use crate::server::events::EventBus;
use crate::server::gateway::{ConnectionContext, Gateway, GatewayError, encode_event, send_direct};
use crate::server::hub::NamespaceHub;
use crate::server::reaper::DisconnectReaper;
use crate::server::services::Services;

/// How long a rejected client gets to read its `error` frame before the close.
const REJECT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

const VTT_ENTITIES: [EntityKind; 3] = [EntityKind::Token, EntityKind::MapAsset, EntityKind::Map];
const CHAT_ENTITIES: [EntityKind; 1] = [EntityKind::Message];

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: usize,
	pub outbound_queue_capacity: usize,
	pub handshake_timeout: Duration,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
			handshake_timeout: Duration::from_secs(10),
		}
	}
}

/// What every connection task needs: the token resolver and one gateway per namespace.
#[derive(Clone)]
pub struct Gateways {
	pub resolver: Arc<dyn IdentityResolver>,
	pub vtt: Gateway,
	pub chat: Gateway,
}

impl Gateways {
	/// Fresh hubs for both namespaces over the same collaborators.
	pub fn new(resolver: Arc<dyn IdentityResolver>, services: Services) -> Self {
		Self {
			resolver,
			vtt: Gateway::new(NamespaceHub::new(Namespace::Vtt), services.clone()),
			chat: Gateway::new(NamespaceHub::new(Namespace::Chat), services),
		}
	}

	/// One dispatcher per namespace: table entities go to `/vtt`, messages to `/chat`.
	pub fn spawn_dispatchers(&self, bus: &EventBus) -> Vec<JoinHandle<()>> {
		vec![
			BroadcastDispatcher::new(bus, self.vtt.hub().clone(), &VTT_ENTITIES).spawn(),
			BroadcastDispatcher::new(bus, self.chat.hub().clone(), &CHAT_ENTITIES).spawn(),
		]
	}

	pub fn for_namespace(&self, namespace: Namespace) -> &Gateway {
		match namespace {
			Namespace::Vtt => &self.vtt,
			Namespace::Chat => &self.chat,
		}
	}
}

#[derive(Debug, Error)]
enum ControlReadError {
	#[error("control stream read failed: {0}")]
	Transport(#[from] quinn::ReadError),

	#[error("failed to decode control frame: {0}")]
	Framing(#[from] FramingError),
}

pub async fn handle_connection(
	conn_id: u64,
	connection: quinn::Connection,
	gateways: Gateways,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("vtt_server_active_connections").decrement(1.0);
		}
	}

	metrics::counter!("vtt_server_connections_total").increment(1);
	metrics::gauge!("vtt_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let (control_send, control_recv) = connection.accept_bi().await.context("accept control bidirectional stream")?;

	let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Bytes>();
	let reader_task = tokio::spawn(read_frames(control_recv, frames_tx, settings.max_frame_bytes));

	let first = match tokio::time::timeout(settings.handshake_timeout, frames_rx.recv()).await {
		Ok(Some(frame)) => frame,
		Ok(None) => {
			debug!(conn_id, "connection closed before handshake");
			return finish_reader(conn_id, &connection, reader_task).await;
		}
		Err(_) => {
			warn!(conn_id, "handshake timed out");
			connection.close(CLOSE_PROTOCOL_ERROR.into(), b"handshake timeout");
			reader_task.abort();
			return Ok(());
		}
	};

	let handshake: Handshake = match serde_json::from_slice(&first) {
		Ok(hs) => hs,
		Err(e) => {
			debug!(conn_id, error = %e, "malformed handshake");
			reject(
				conn_id,
				&connection,
				control_send,
				GatewayError::Unauthenticated("invalid handshake".to_string()),
			)
			.await;
			reader_task.abort();
			return Ok(());
		}
	};

	let namespace = handshake.namespace;
	let identity = match authenticate(&handshake, gateways.resolver.as_ref()).await {
		Ok(identity) => identity,
		Err(e) => {
			reject(conn_id, &connection, control_send, GatewayError::from(e)).await;
			reader_task.abort();
			return Ok(());
		}
	};
	let user_id = identity.user_id.clone();
	info!(conn_id, user_id = %user_id, %namespace, remote = %connection.remote_address(), "connection authenticated");

	let gateway = gateways.for_namespace(namespace).clone();
	let (out_tx, out_rx) = mpsc::channel::<Bytes>(settings.outbound_queue_capacity.max(1));
	gateway.hub().sessions.register(conn_id, user_id.clone(), out_tx.clone());
	let reaper = DisconnectReaper::arm(conn_id, user_id.clone(), gateway.hub().clone());

	let writer_task = tokio::spawn(write_frames(conn_id, control_send, out_rx));

	let ctx = ConnectionContext {
		conn_id,
		identity,
		outbound: out_tx,
	};
	send_direct(
		&ctx,
		&ServerEvent::Connected {
			connection_id: conn_id,
			user_id: user_id.clone(),
		},
	)
	.await;

	while let Some(frame) = frames_rx.recv().await {
		gateway.handle_frame(&ctx, &frame).await;
	}

	// Drops the directory's sender; the writer drains what is queued and exits.
	drop(reaper);
	drop(ctx);

	let result = finish_reader(conn_id, &connection, reader_task).await;
	let _ = writer_task.await;

	info!(conn_id, user_id = %user_id, %namespace, "connection closed");
	result
}

/// Join the reader. A lost frame boundary closes the connection.
async fn finish_reader(
	conn_id: u64,
	connection: &quinn::Connection,
	reader_task: JoinHandle<Result<(), ControlReadError>>,
) -> anyhow::Result<()> {
	match reader_task.await {
		Ok(Ok(())) => Ok(()),
		Ok(Err(ControlReadError::Transport(e))) => {
			debug!(conn_id, error = %e, "control stream ended");
			Ok(())
		}
		Ok(Err(e @ ControlReadError::Framing(_))) => {
			warn!(conn_id, error = %e, "protocol error; closing connection");
			connection.close(CLOSE_PROTOCOL_ERROR.into(), b"protocol error");
			Err(anyhow!(e))
		}
		Err(e) => Err(anyhow!(e).context("control reader task failed")),
	}
}

async fn read_frames(
	mut control_recv: quinn::RecvStream,
	frames_tx: mpsc::UnboundedSender<Bytes>,
	max_frame_bytes: usize,
) -> Result<(), ControlReadError> {
	let mut buf = BytesMut::with_capacity(16 * 1024);
	let mut tmp = [0u8; 8192];

	loop {
		let n = match control_recv.read(&mut tmp).await? {
			Some(n) => n,
			None => return Ok(()),
		};

		metrics::counter!("vtt_server_control_bytes_in_total").increment(n as u64);
		buf.extend_from_slice(&tmp[..n]);

		while let Some(frame) = try_decode_frame_from_buffer(&mut buf, max_frame_bytes)? {
			metrics::counter!("vtt_server_frames_in_total").increment(1);
			if frames_tx.send(frame).is_err() {
				return Ok(());
			}
		}
	}
}

async fn write_frames(conn_id: u64, mut send: quinn::SendStream, mut rx: mpsc::Receiver<Bytes>) {
	while let Some(frame) = rx.recv().await {
		if let Err(e) = send.write_all(&frame).await {
			debug!(conn_id, error = %e, "control stream write failed; stopping writer");
			return;
		}
		metrics::counter!("vtt_server_frames_out_total").increment(1);
		metrics::counter!("vtt_server_control_bytes_out_total").increment(frame.len() as u64);
	}
	let _ = send.finish();
}

/// Send one `UNAUTHENTICATED` error, give it a moment to land, then close.
async fn reject(conn_id: u64, connection: &quinn::Connection, mut send: quinn::SendStream, err: GatewayError) {
	metrics::counter!("vtt_server_auth_failures_total").increment(1);
	warn!(conn_id, reason = %err, "handshake rejected");

	let event = err.to_event();
	match encode_event(&event) {
		Ok(frame) => {
			if send.write_all(&frame).await.is_ok() && send.finish().is_ok() {
				let _ = tokio::time::timeout(REJECT_FLUSH_TIMEOUT, send.stopped()).await;
			}
		}
		Err(e) => warn!(conn_id, error = %e, "failed to encode rejection"),
	}

	connection.close(CLOSE_UNAUTHENTICATED.into(), b"unauthenticated");
}
