#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{AssetId, MapId, MessageId, RoomId, TokenId, UserId};

/// Grid overlay drawn on a map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GridType {
	#[default]
	Square,
	Hex,
	None,
}

/// A playable surface inside a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VttMap {
	pub id: MapId,
	pub room_id: RoomId,
	pub name: Option<String>,
	pub image_url: Option<String>,
	pub grid_type: GridType,
	pub grid_size: i32,
	pub show_grid: bool,
	pub width: i32,
	pub height: i32,
	pub image_scale: f64,
	pub image_x: f64,
	pub image_y: f64,
	pub created_at: i64,
	pub updated_at: i64,
}

impl VttMap {
	/// New map with the stock defaults (1000x800, square grid of 50).
	pub fn new(id: MapId, room_id: RoomId, name: Option<String>, now_ms: i64) -> Self {
		Self {
			id,
			room_id,
			name,
			image_url: None,
			grid_type: GridType::Square,
			grid_size: 50,
			show_grid: true,
			width: 1000,
			height: 800,
			image_scale: 1.0,
			image_x: 0.0,
			image_y: 0.0,
			created_at: now_ms,
			updated_at: now_ms,
		}
	}
}

/// A movable game piece placed on a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
	pub id: TokenId,
	pub map_id: MapId,
	pub name: String,
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
	pub scale: f64,
	pub image_url: Option<String>,
	pub character_sheet_id: Option<i64>,
	pub npc_id: Option<i64>,
}

impl Token {
	pub fn new(id: TokenId, map_id: MapId, name: impl Into<String>, x: f64, y: f64) -> Self {
		Self {
			id,
			map_id,
			name: name.into(),
			x,
			y,
			width: 50.0,
			height: 50.0,
			scale: 1.0,
			image_url: None,
			character_sheet_id: None,
			npc_id: None,
		}
	}
}

/// A non-token visual element (prop, background piece) on a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapAsset {
	pub id: AssetId,
	/// `None` once the owning map has been deleted.
	pub map_id: Option<MapId>,
	pub url: String,
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
}

impl MapAsset {
	pub fn new(id: AssetId, map_id: MapId, url: impl Into<String>, x: f64, y: f64) -> Self {
		Self {
			id,
			map_id: Some(map_id),
			url: url.into(),
			x,
			y,
			width: 100.0,
			height: 100.0,
		}
	}
}

/// A persisted chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
	pub id: MessageId,
	pub room_id: RoomId,
	pub sender_id: UserId,
	pub content: String,
	pub created_at: i64,
}
