#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vtt_domain::{AssetId, Identity, MapId, RoomId, TokenId, UserId};
use vtt_protocol::{DEFAULT_MAX_FRAME_SIZE, decode_frame};
use vtt_util::secret::SecretString;

use crate::server::auth::HmacIdentityResolver;
use crate::server::connection::Gateways;
use crate::server::events::EventBus;
use crate::server::gateway::{ConnectionContext, Gateway};
use crate::server::services::Services;
use crate::store::MemoryStore;

pub(crate) const SECRET: &str = "vtt-test-secret";

pub(crate) fn user(id: &str) -> UserId {
	UserId::new(id).expect("valid UserId")
}

/// A seeded table with both gateways and their dispatchers running.
///
/// Everything is created before the dispatchers subscribe, so setup events
/// never reach a test connection.
pub(crate) struct Table {
	pub store: Arc<MemoryStore>,
	pub gateways: Gateways,
	pub dispatchers: Vec<JoinHandle<()>>,
	pub gm: UserId,
	pub player: UserId,
	pub scout: UserId,
	pub outsider: UserId,
	pub room_id: RoomId,
	pub map_id: MapId,
	pub other_map_id: MapId,
	/// Controlled by `player`.
	pub hero: TokenId,
	/// GM-only.
	pub goblin: TokenId,
	pub asset_id: AssetId,
}

impl Table {
	pub fn new() -> Self {
		Self::with_services(|store| Services::from_backend(store))
	}

	/// Seed a table, letting the caller wrap the store's collaborators.
	pub fn with_services(make: impl FnOnce(Arc<MemoryStore>) -> Services) -> Self {
		let bus = EventBus::new(256);
		let store = Arc::new(MemoryStore::new(bus.clone()));
		let seed = store.seed_demo().expect("demo seed");

		let scout = user("scout");
		store.add_participant(&seed.room_id, scout.clone()).expect("add scout");
		let other_map = store
			.create_map(&seed.gm, &seed.room_id, Some("Cellar".to_string()))
			.expect("second map");

		let resolver = Arc::new(HmacIdentityResolver::new(SecretString::new(SECRET)));
		let gateways = Gateways::new(resolver, make(store.clone()));
		let dispatchers = gateways.spawn_dispatchers(&bus);

		Self {
			store,
			gateways,
			dispatchers,
			gm: seed.gm,
			player: seed.player,
			scout,
			outsider: user("outsider"),
			room_id: seed.room_id,
			map_id: seed.map_id,
			other_map_id: other_map.id,
			hero: seed.token_ids[0].clone(),
			goblin: seed.token_ids[1].clone(),
			asset_id: seed.asset_id,
		}
	}
}

impl Drop for Table {
	fn drop(&mut self) {
		for d in &self.dispatchers {
			d.abort();
		}
	}
}

/// An in-process connection: registered in the gateway's hub like a real one.
pub(crate) struct TestConn {
	pub ctx: ConnectionContext,
	pub rx: mpsc::Receiver<Bytes>,
}

pub(crate) fn connect(gateway: &Gateway, conn_id: u64, user_id: &UserId) -> TestConn {
	let (tx, rx) = mpsc::channel(64);
	gateway.hub().sessions.register(conn_id, user_id.clone(), tx.clone());
	TestConn {
		ctx: ConnectionContext {
			conn_id,
			identity: Identity::new(user_id.clone()),
			outbound: tx,
		},
		rx,
	}
}

pub(crate) fn decode(frame: &[u8]) -> Value {
	let (payload, used) = decode_frame(frame, DEFAULT_MAX_FRAME_SIZE).expect("decode frame");
	assert_eq!(used, frame.len(), "exactly one frame per queue entry");
	serde_json::from_slice(payload).expect("json payload")
}

/// Next queued message, failing the test after a short wait.
pub(crate) async fn next_event(rx: &mut mpsc::Receiver<Bytes>) -> Value {
	let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("timed out waiting for server event")
		.expect("outbound queue closed");
	decode(&frame)
}

/// Assert nothing arrives within a short window.
pub(crate) async fn assert_silent(rx: &mut mpsc::Receiver<Bytes>) {
	if let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
		panic!("unexpected server event: {}", decode(&frame));
	}
}

impl TestConn {
	pub async fn send(&self, gateway: &Gateway, event: &str, data: Value) {
		let frame = serde_json::to_vec(&serde_json::json!({"event": event, "data": data})).expect("encode command");
		gateway.handle_frame(&self.ctx, &frame).await;
	}

	pub async fn next(&mut self) -> Value {
		next_event(&mut self.rx).await
	}

	pub async fn silent(&mut self) {
		assert_silent(&mut self.rx).await;
	}

	/// Send a command and return its one direct reply.
	pub async fn request(&mut self, gateway: &Gateway, event: &str, data: Value) -> Value {
		self.send(gateway, event, data).await;
		self.next().await
	}
}
