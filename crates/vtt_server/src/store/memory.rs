#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info};
use vtt_domain::{
	AssetId, ChatMessage, DomainEvent, GridType, MapAsset, MapId, MessageId, RoomId, Token, TokenId, UserId, VttMap,
};
use vtt_protocol::AssetTransform;

use crate::server::events::EventBus;
use crate::server::services::{
	ChatService, MapAssetService, MapService, RoomAccess, ServiceError, ServiceResult, TokenService,
};
use crate::util::time::unix_ms_now;

/// A game room: one GM plus the users allowed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
	pub id: RoomId,
	pub gm: UserId,
	pub participants: HashSet<UserId>,
}

impl Room {
	fn admits(&self, user: &UserId) -> bool {
		&self.gm == user || self.participants.contains(user)
	}
}

#[derive(Debug)]
struct StoredMap {
	map: VttMap,
	deleted: bool,
}

#[derive(Debug)]
struct StoredToken {
	token: Token,
	controller: Option<UserId>,
	deleted: bool,
}

#[derive(Debug, Default)]
struct StoreState {
	rooms: HashMap<RoomId, Room>,
	maps: HashMap<MapId, StoredMap>,
	tokens: HashMap<TokenId, StoredToken>,
	assets: HashMap<AssetId, MapAsset>,
	messages: Vec<ChatMessage>,
}

impl StoreState {
	fn room_for(&self, actor: &UserId, room: &RoomId) -> ServiceResult<&Room> {
		let r = self
			.rooms
			.get(room)
			.ok_or_else(|| ServiceError::NotFound("Room not found".to_string()))?;
		if !r.admits(actor) {
			return Err(ServiceError::Forbidden("You do not have access to this room".to_string()));
		}
		Ok(r)
	}

	fn live_map(&self, map: &MapId) -> ServiceResult<&VttMap> {
		match self.maps.get(map) {
			Some(m) if !m.deleted => Ok(&m.map),
			_ => Err(ServiceError::NotFound("Map not found".to_string())),
		}
	}

	/// The map plus its room, with the actor's room access checked.
	fn map_for(&self, actor: &UserId, map: &MapId) -> ServiceResult<(&VttMap, &Room)> {
		let m = self.live_map(map)?;
		let room = self.room_for(actor, &m.room_id)?;
		Ok((m, room))
	}

	fn require_gm(&self, actor: &UserId, room: &RoomId) -> ServiceResult<()> {
		let r = self.room_for(actor, room)?;
		if &r.gm != actor {
			return Err(ServiceError::Forbidden("Only the GM can do this".to_string()));
		}
		Ok(())
	}

	fn live_token(&self, token: &TokenId) -> ServiceResult<&StoredToken> {
		match self.tokens.get(token) {
			Some(t) if !t.deleted => Ok(t),
			_ => Err(ServiceError::NotFound("Token not found".to_string())),
		}
	}

	fn check_move(&self, token: &TokenId, actor: &UserId) -> ServiceResult<Token> {
		let stored = self.live_token(token)?;
		let (_, room) = self.map_for(actor, &stored.token.map_id)?;
		if &room.gm == actor || stored.controller.as_ref() == Some(actor) {
			Ok(stored.token.clone())
		} else {
			Err(ServiceError::Forbidden("You cannot move this token".to_string()))
		}
	}
}

/// Ids created by [`MemoryStore::seed_demo`].
#[derive(Debug, Clone)]
pub struct DemoSeed {
	pub gm: UserId,
	pub player: UserId,
	pub room_id: RoomId,
	pub map_id: MapId,
	pub token_ids: Vec<TokenId>,
	pub asset_id: AssetId,
}

/// In-process reference backend for every collaborator.
///
/// Each mutation commits under the write lock, releases it, then publishes
/// exactly one domain event. Failed mutations publish nothing.
#[derive(Debug)]
pub struct MemoryStore {
	state: RwLock<StoreState>,
	bus: EventBus,
}

impl MemoryStore {
	pub fn new(bus: EventBus) -> Self {
		Self {
			state: RwLock::new(StoreState::default()),
			bus,
		}
	}

	pub fn create_room(&self, id: RoomId, gm: UserId) -> Room {
		let room = Room {
			id: id.clone(),
			gm,
			participants: HashSet::new(),
		};
		self.state.write().rooms.insert(id, room.clone());
		room
	}

	pub fn add_participant(&self, room: &RoomId, user: UserId) -> ServiceResult<()> {
		let mut state = self.state.write();
		let r = state
			.rooms
			.get_mut(room)
			.ok_or_else(|| ServiceError::NotFound("Room not found".to_string()))?;
		r.participants.insert(user);
		Ok(())
	}

	/// GM only.
	pub fn create_map(&self, actor: &UserId, room: &RoomId, name: Option<String>) -> ServiceResult<VttMap> {
		let map = {
			let mut state = self.state.write();
			state.require_gm(actor, room)?;
			let map = VttMap::new(MapId::generate(), room.clone(), name, unix_ms_now());
			state.maps.insert(
				map.id.clone(),
				StoredMap {
					map: map.clone(),
					deleted: false,
				},
			);
			map
		};

		self.bus.publish(DomainEvent::MapCreated {
			room_id: room.clone(),
			map: map.clone(),
		});
		Ok(map)
	}

	/// Soft delete (GM only). Assets on the map are detached, not removed.
	#[allow(dead_code)]
	pub fn delete_map(&self, actor: &UserId, map: &MapId) -> ServiceResult<()> {
		let room_id = {
			let mut state = self.state.write();
			let room_id = state.live_map(map)?.room_id.clone();
			state.require_gm(actor, &room_id)?;

			if let Some(m) = state.maps.get_mut(map) {
				m.deleted = true;
			}
			let mut detached = 0usize;
			for asset in state.assets.values_mut() {
				if asset.map_id.as_ref() == Some(map) {
					asset.map_id = None;
					detached += 1;
				}
			}
			debug!(map_id = %map, detached, "map deleted");
			room_id
		};

		self.bus.publish(DomainEvent::MapDeleted {
			room_id,
			map_id: map.clone(),
		});
		Ok(())
	}

	/// GM only. `controller` is the player allowed to move the token.
	pub fn create_token(
		&self,
		actor: &UserId,
		map: &MapId,
		name: &str,
		x: f64,
		y: f64,
		controller: Option<UserId>,
	) -> ServiceResult<Token> {
		let token = {
			let mut state = self.state.write();
			let room_id = state.live_map(map)?.room_id.clone();
			state.require_gm(actor, &room_id)?;

			let token = Token::new(TokenId::generate(), map.clone(), name, x, y);
			state.tokens.insert(
				token.id.clone(),
				StoredToken {
					token: token.clone(),
					controller,
					deleted: false,
				},
			);
			token
		};

		self.bus.publish(DomainEvent::TokenCreated {
			map_id: map.clone(),
			token: token.clone(),
		});
		Ok(token)
	}

	/// Soft delete (GM only).
	#[allow(dead_code)]
	pub fn delete_token(&self, actor: &UserId, token: &TokenId) -> ServiceResult<()> {
		let map_id = {
			let mut state = self.state.write();
			let map_id = state.live_token(token)?.token.map_id.clone();
			let room_id = state.live_map(&map_id)?.room_id.clone();
			state.require_gm(actor, &room_id)?;
			if let Some(t) = state.tokens.get_mut(token) {
				t.deleted = true;
			}
			map_id
		};

		self.bus.publish(DomainEvent::TokenDeleted {
			map_id,
			token_id: token.clone(),
		});
		Ok(())
	}

	pub fn create_asset(&self, map: &MapId, url: &str, x: f64, y: f64) -> ServiceResult<MapAsset> {
		let asset = {
			let mut state = self.state.write();
			state.live_map(map)?;
			let asset = MapAsset::new(AssetId::generate(), map.clone(), url, x, y);
			state.assets.insert(asset.id.clone(), asset.clone());
			asset
		};

		self.bus.publish(DomainEvent::MapAssetCreated { asset: asset.clone() });
		Ok(asset)
	}

	#[allow(dead_code)]
	pub fn token(&self, id: &TokenId) -> Option<Token> {
		self.state.read().live_token(id).ok().map(|t| t.token.clone())
	}

	#[allow(dead_code)]
	pub fn map(&self, id: &MapId) -> Option<VttMap> {
		self.state.read().live_map(id).ok().cloned()
	}

	#[allow(dead_code)]
	pub fn asset(&self, id: &AssetId) -> Option<MapAsset> {
		self.state.read().assets.get(id).cloned()
	}

	/// Messages of a room, oldest first.
	#[allow(dead_code)]
	pub fn messages(&self, room: &RoomId) -> Vec<ChatMessage> {
		self.state
			.read()
			.messages
			.iter()
			.filter(|m| &m.room_id == room)
			.cloned()
			.collect()
	}

	/// Populate a small playable table for local development.
	pub fn seed_demo(&self) -> ServiceResult<DemoSeed> {
		let gm = UserId::new("demo-gm").map_err(|e| ServiceError::Internal(e.to_string()))?;
		let player = UserId::new("demo-player").map_err(|e| ServiceError::Internal(e.to_string()))?;
		let room_id = RoomId::new("demo-room").map_err(|e| ServiceError::Internal(e.to_string()))?;

		self.create_room(room_id.clone(), gm.clone());
		self.add_participant(&room_id, player.clone())?;

		let map = self.create_map(&gm, &room_id, Some("Demo Map".to_string()))?;
		let hero = self.create_token(&gm, &map.id, "Hero", 100.0, 100.0, Some(player.clone()))?;
		let goblin = self.create_token(&gm, &map.id, "Goblin", 300.0, 200.0, None)?;
		let asset = self.create_asset(&map.id, "/assets/demo/tree.png", 500.0, 400.0)?;

		let seed = DemoSeed {
			gm,
			player,
			room_id,
			map_id: map.id,
			token_ids: vec![hero.id, goblin.id],
			asset_id: asset.id,
		};
		info!(
			room_id = %seed.room_id,
			map_id = %seed.map_id,
			gm = %seed.gm,
			player = %seed.player,
			"demo seed loaded"
		);
		Ok(seed)
	}
}

#[async_trait]
impl RoomAccess for MemoryStore {
	async fn check_access(&self, actor: &UserId, room: &RoomId) -> ServiceResult<()> {
		self.state.read().room_for(actor, room).map(|_| ())
	}
}

#[async_trait]
impl MapService for MemoryStore {
	async fn get_map_for_user(&self, map: &MapId, actor: &UserId) -> ServiceResult<VttMap> {
		self.state.read().map_for(actor, map).map(|(m, _)| m.clone())
	}

	async fn update_map(&self, map: &MapId, updates: Map<String, Value>, actor: &UserId) -> ServiceResult<VttMap> {
		let updated = {
			let mut state = self.state.write();
			let current = state.live_map(map)?;
			let room_id = current.room_id.clone();
			let mut next = current.clone();
			state.require_gm(actor, &room_id)?;

			for (key, value) in &updates {
				apply_map_field(&mut next, key, value)?;
			}
			next.updated_at = unix_ms_now();

			if let Some(m) = state.maps.get_mut(map) {
				m.map = next.clone();
			}
			next
		};

		self.bus.publish(DomainEvent::MapUpdated {
			map_id: map.clone(),
			changes: updates,
		});
		Ok(updated)
	}
}

#[async_trait]
impl TokenService for MemoryStore {
	async fn validate_move_access(&self, token: &TokenId, actor: &UserId) -> ServiceResult<Token> {
		self.state.read().check_move(token, actor)
	}

	async fn move_token(&self, token: &TokenId, x: f64, y: f64, actor: &UserId) -> ServiceResult<Token> {
		let moved = {
			let mut state = self.state.write();
			state.check_move(token, actor)?;
			let stored = state
				.tokens
				.get_mut(token)
				.ok_or_else(|| ServiceError::NotFound("Token not found".to_string()))?;
			stored.token.x = x;
			stored.token.y = y;
			stored.token.clone()
		};

		self.bus.publish(DomainEvent::TokenUpdated {
			map_id: moved.map_id.clone(),
			token: moved.clone(),
		});
		Ok(moved)
	}

	async fn tokens_for_map(&self, map: &MapId, actor: &UserId) -> ServiceResult<Vec<Token>> {
		let state = self.state.read();
		state.map_for(actor, map)?;
		let mut tokens: Vec<Token> = state
			.tokens
			.values()
			.filter(|t| !t.deleted && &t.token.map_id == map)
			.map(|t| t.token.clone())
			.collect();
		tokens.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
		Ok(tokens)
	}
}

#[async_trait]
impl MapAssetService for MemoryStore {
	async fn assets_for_map(&self, map: &MapId) -> ServiceResult<Vec<MapAsset>> {
		let state = self.state.read();
		state.live_map(map)?;
		let mut assets: Vec<MapAsset> = state
			.assets
			.values()
			.filter(|a| a.map_id.as_ref() == Some(map))
			.cloned()
			.collect();
		assets.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
		Ok(assets)
	}

	async fn update_asset(&self, asset: &AssetId, transform: AssetTransform) -> ServiceResult<MapAsset> {
		let updated = {
			let mut state = self.state.write();
			let a = state
				.assets
				.get_mut(asset)
				.ok_or_else(|| ServiceError::NotFound("Map asset not found".to_string()))?;
			a.x = transform.x;
			a.y = transform.y;
			a.width = transform.width;
			a.height = transform.height;
			a.clone()
		};

		self.bus.publish(DomainEvent::MapAssetUpdated { asset: updated.clone() });
		Ok(updated)
	}

	async fn remove_asset(&self, asset: &AssetId) -> ServiceResult<()> {
		let removed = self
			.state
			.write()
			.assets
			.remove(asset)
			.ok_or_else(|| ServiceError::NotFound("Map asset not found".to_string()))?;

		self.bus.publish(DomainEvent::MapAssetDeleted {
			map_id: removed.map_id,
			asset_id: removed.id,
		});
		Ok(())
	}
}

#[async_trait]
impl ChatService for MemoryStore {
	async fn check_access(&self, actor: &UserId, room: &RoomId) -> ServiceResult<()> {
		self.state.read().room_for(actor, room).map(|_| ())
	}

	async fn create_message(&self, actor: &UserId, room: &RoomId, content: &str) -> ServiceResult<ChatMessage> {
		let content = content.trim();
		if content.is_empty() {
			return Err(ServiceError::Validation("Message content must not be empty".to_string()));
		}

		let message = {
			let mut state = self.state.write();
			state.room_for(actor, room)?;
			let message = ChatMessage {
				id: MessageId::generate(),
				room_id: room.clone(),
				sender_id: actor.clone(),
				content: content.to_string(),
				created_at: unix_ms_now(),
			};
			state.messages.push(message.clone());
			message
		};

		self.bus.publish(DomainEvent::MessageCreated {
			room_id: room.clone(),
			message: message.clone(),
		});
		Ok(message)
	}
}

fn invalid_field(key: &str) -> ServiceError {
	ServiceError::Validation(format!("Invalid value for {key}"))
}

fn optional_string(key: &str, value: &Value) -> ServiceResult<Option<String>> {
	match value {
		Value::Null => Ok(None),
		Value::String(s) => Ok(Some(s.clone())),
		_ => Err(invalid_field(key)),
	}
}

fn positive_i32(key: &str, value: &Value) -> ServiceResult<i32> {
	value
		.as_i64()
		.filter(|v| *v > 0)
		.and_then(|v| i32::try_from(v).ok())
		.ok_or_else(|| invalid_field(key))
}

fn finite(key: &str, value: &Value) -> ServiceResult<f64> {
	value.as_f64().filter(|v| v.is_finite()).ok_or_else(|| invalid_field(key))
}

fn apply_map_field(map: &mut VttMap, key: &str, value: &Value) -> ServiceResult<()> {
	match key {
		"name" => map.name = optional_string(key, value)?,
		"imageUrl" => map.image_url = optional_string(key, value)?,
		"gridType" => {
			map.grid_type = serde_json::from_value::<GridType>(value.clone()).map_err(|_| invalid_field(key))?;
		}
		"gridSize" => map.grid_size = positive_i32(key, value)?,
		"showGrid" => map.show_grid = value.as_bool().ok_or_else(|| invalid_field(key))?,
		"width" => map.width = positive_i32(key, value)?,
		"height" => map.height = positive_i32(key, value)?,
		"imageScale" => {
			map.image_scale = finite(key, value).and_then(|v| if v > 0.0 { Ok(v) } else { Err(invalid_field(key)) })?;
		}
		"imageX" => map.image_x = finite(key, value)?,
		"imageY" => map.image_y = finite(key, value)?,
		other => return Err(ServiceError::Validation(format!("Unknown map field: {other}"))),
	}
	Ok(())
}
