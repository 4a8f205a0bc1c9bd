#![forbid(unsafe_code)]

use serde::Serialize;
use serde_json::{Map, Value};
use vtt_domain::{AssetId, ChatMessage, MapAsset, MapId, RoomId, Token, TokenId, UserId, VttMap};

/// Stable error codes carried in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	Unauthenticated,
	NotInRoom,
	NotInMap,
	Forbidden,
	NotFound,
	ValidationFailed,
	Internal,
}

impl ErrorCode {
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorCode::Unauthenticated => "UNAUTHENTICATED",
			ErrorCode::NotInRoom => "NOT_IN_ROOM",
			ErrorCode::NotInMap => "NOT_IN_MAP",
			ErrorCode::Forbidden => "FORBIDDEN",
			ErrorCode::NotFound => "NOT_FOUND",
			ErrorCode::ValidationFailed => "VALIDATION_FAILED",
			ErrorCode::Internal => "INTERNAL",
		}
	}
}

/// Map record as sent in `joinedMap`, with the legacy `backgroundUrl` alias.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapView {
	#[serde(flatten)]
	pub map: VttMap,
	pub background_url: Option<String>,
}

impl From<VttMap> for MapView {
	fn from(map: VttMap) -> Self {
		let background_url = map.image_url.clone();
		Self { map, background_url }
	}
}

/// Server to client message, serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
	#[serde(rename = "connected")]
	Connected { connection_id: u64, user_id: UserId },

	#[serde(rename = "joinedRoom")]
	JoinedRoom { room_id: RoomId },
	#[serde(rename = "leftRoom")]
	LeftRoom { room_id: RoomId },
	#[serde(rename = "joinedMap")]
	JoinedMap {
		map: MapView,
		tokens: Vec<Token>,
		map_assets: Vec<MapAsset>,
	},
	#[serde(rename = "leftMap")]
	LeftMap { map_id: MapId },

	#[serde(rename = "token:created")]
	TokenCreated(Token),
	#[serde(rename = "token:updated")]
	TokenUpdated(Token),
	#[serde(rename = "token:deleted")]
	TokenDeleted { id: TokenId },

	#[serde(rename = "map_asset_created")]
	MapAssetCreated(MapAsset),
	#[serde(rename = "map_asset_updated")]
	MapAssetUpdated(MapAsset),
	#[serde(rename = "map_asset_deleted")]
	MapAssetDeleted { id: AssetId },

	#[serde(rename = "mapCreated")]
	MapCreated(VttMap),
	/// `{"id": ..., ...changes}`; build with [`ServerEvent::map_updated`].
	#[serde(rename = "mapUpdated")]
	MapUpdated(Map<String, Value>),
	#[serde(rename = "mapDeleted")]
	MapDeleted { id: MapId },

	#[serde(rename = "newMessage")]
	NewMessage(ChatMessage),

	#[serde(rename = "error")]
	Error { code: ErrorCode, message: String },
}

impl ServerEvent {
	pub fn map_updated(id: &MapId, changes: &Map<String, Value>) -> Self {
		let mut data = Map::with_capacity(changes.len() + 1);
		data.insert("id".to_string(), Value::String(id.to_string()));
		for (k, v) in changes {
			if k != "id" {
				data.insert(k.clone(), v.clone());
			}
		}
		ServerEvent::MapUpdated(data)
	}

	pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
		ServerEvent::Error {
			code,
			message: message.into(),
		}
	}

	/// Wire event name.
	pub fn name(&self) -> &'static str {
		match self {
			ServerEvent::Connected { .. } => "connected",
			ServerEvent::JoinedRoom { .. } => "joinedRoom",
			ServerEvent::LeftRoom { .. } => "leftRoom",
			ServerEvent::JoinedMap { .. } => "joinedMap",
			ServerEvent::LeftMap { .. } => "leftMap",
			ServerEvent::TokenCreated(_) => "token:created",
			ServerEvent::TokenUpdated(_) => "token:updated",
			ServerEvent::TokenDeleted { .. } => "token:deleted",
			ServerEvent::MapAssetCreated(_) => "map_asset_created",
			ServerEvent::MapAssetUpdated(_) => "map_asset_updated",
			ServerEvent::MapAssetDeleted { .. } => "map_asset_deleted",
			ServerEvent::MapCreated(_) => "mapCreated",
			ServerEvent::MapUpdated(_) => "mapUpdated",
			ServerEvent::MapDeleted { .. } => "mapDeleted",
			ServerEvent::NewMessage(_) => "newMessage",
			ServerEvent::Error { .. } => "error",
		}
	}
}
