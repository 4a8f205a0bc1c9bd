#![forbid(unsafe_code)]

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use vtt_domain::{AssetId, MapId, RoomId, TokenId};

use crate::handshake::Namespace;

/// Inbound event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
	JoinRoom,
	LeaveRoom,
	JoinMap,
	LeaveMap,
	MoveToken,
	UpdateMapAsset,
	DeleteMapAsset,
	UpdateMap,
	SendMessage,
}

impl CommandName {
	pub fn from_wire(name: &str) -> Option<Self> {
		Some(match name {
			"joinRoom" => CommandName::JoinRoom,
			"leaveRoom" => CommandName::LeaveRoom,
			"joinMap" => CommandName::JoinMap,
			"leaveMap" => CommandName::LeaveMap,
			"moveToken" => CommandName::MoveToken,
			"updateMapAsset" => CommandName::UpdateMapAsset,
			"deleteMapAsset" => CommandName::DeleteMapAsset,
			"updateMap" => CommandName::UpdateMap,
			"sendMessage" => CommandName::SendMessage,
			_ => return None,
		})
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			CommandName::JoinRoom => "joinRoom",
			CommandName::LeaveRoom => "leaveRoom",
			CommandName::JoinMap => "joinMap",
			CommandName::LeaveMap => "leaveMap",
			CommandName::MoveToken => "moveToken",
			CommandName::UpdateMapAsset => "updateMapAsset",
			CommandName::DeleteMapAsset => "deleteMapAsset",
			CommandName::UpdateMap => "updateMap",
			CommandName::SendMessage => "sendMessage",
		}
	}
}

impl fmt::Display for CommandName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// `{"event": ..., "data": ...}` as sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
	pub event: String,
	#[serde(default)]
	pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetTransform {
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
}

/// A shape-validated client command.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
	JoinRoom { room_id: RoomId },
	LeaveRoom { room_id: RoomId },
	JoinMap { map_id: MapId },
	LeaveMap { map_id: MapId },
	MoveToken { token_id: TokenId, x: f64, y: f64 },
	UpdateMapAsset { asset_id: AssetId, transform: AssetTransform },
	DeleteMapAsset { asset_id: AssetId },
	UpdateMap { map_id: MapId, updates: Map<String, Value> },
	SendMessage { room_id: RoomId, content: String },
}

impl ClientCommand {
	pub fn name(&self) -> CommandName {
		match self {
			ClientCommand::JoinRoom { .. } => CommandName::JoinRoom,
			ClientCommand::LeaveRoom { .. } => CommandName::LeaveRoom,
			ClientCommand::JoinMap { .. } => CommandName::JoinMap,
			ClientCommand::LeaveMap { .. } => CommandName::LeaveMap,
			ClientCommand::MoveToken { .. } => CommandName::MoveToken,
			ClientCommand::UpdateMapAsset { .. } => CommandName::UpdateMapAsset,
			ClientCommand::DeleteMapAsset { .. } => CommandName::DeleteMapAsset,
			ClientCommand::UpdateMap { .. } => CommandName::UpdateMap,
			ClientCommand::SendMessage { .. } => CommandName::SendMessage,
		}
	}
}

/// Every variant is reported to the client as a validation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
	#[error("malformed command frame: {0}")]
	Malformed(String),

	#[error("unknown event: {0}")]
	UnknownEvent(String),

	#[error("event {event} is not available on {namespace}")]
	NotAllowed {
		event: CommandName,
		namespace: Namespace,
	},

	#[error("{0}")]
	Invalid(&'static str),
}

/// Decode a command frame and validate its payload shape for `namespace`.
pub fn parse_command(namespace: Namespace, payload: &[u8]) -> Result<ClientCommand, CommandError> {
	let envelope: CommandEnvelope =
		serde_json::from_slice(payload).map_err(|e| CommandError::Malformed(e.to_string()))?;

	let name = CommandName::from_wire(&envelope.event).ok_or_else(|| CommandError::UnknownEvent(envelope.event.clone()))?;
	if !namespace.allows(name) {
		return Err(CommandError::NotAllowed { event: name, namespace });
	}

	let empty = Map::new();
	let data = envelope.data.as_object().unwrap_or(&empty);

	let cmd = match name {
		CommandName::JoinRoom => ClientCommand::JoinRoom {
			room_id: room_id_field(data)?,
		},
		CommandName::LeaveRoom => ClientCommand::LeaveRoom {
			room_id: room_id_field(data)?,
		},
		CommandName::JoinMap => ClientCommand::JoinMap {
			map_id: id_field(data, "mapId", "Invalid mapId")?,
		},
		CommandName::LeaveMap => ClientCommand::LeaveMap {
			map_id: id_field(data, "mapId", "Invalid mapId")?,
		},
		CommandName::MoveToken => {
			let token_id = id_field(data, "tokenId", "Invalid tokenId")?;
			let (Some(x), Some(y)) = (finite(data, "x"), finite(data, "y")) else {
				return Err(CommandError::Invalid("Invalid token position"));
			};
			ClientCommand::MoveToken { token_id, x, y }
		}
		CommandName::UpdateMapAsset => {
			let asset_id = id_field(data, "assetId", "Invalid assetId")?;
			let transform = match (finite(data, "x"), finite(data, "y"), finite(data, "width"), finite(data, "height")) {
				(Some(x), Some(y), Some(width), Some(height)) => AssetTransform { x, y, width, height },
				_ => return Err(CommandError::Invalid("Invalid asset transform data")),
			};
			ClientCommand::UpdateMapAsset { asset_id, transform }
		}
		CommandName::DeleteMapAsset => ClientCommand::DeleteMapAsset {
			asset_id: id_field(data, "assetId", "Invalid assetId")?,
		},
		CommandName::UpdateMap => {
			let map_id = id_field(data, "mapId", "Invalid mapId")?;
			let Some(updates) = data.get("updates").and_then(Value::as_object) else {
				return Err(CommandError::Invalid("Invalid updates"));
			};
			ClientCommand::UpdateMap {
				map_id,
				updates: updates.clone(),
			}
		}
		CommandName::SendMessage => {
			let room_id = room_id_field(data)?;
			let content = data
				.get("content")
				.and_then(Value::as_str)
				.map(str::trim)
				.filter(|s| !s.is_empty())
				.ok_or(CommandError::Invalid("Message content must not be empty"))?;
			ClientCommand::SendMessage {
				room_id,
				content: content.to_string(),
			}
		}
	};

	Ok(cmd)
}

fn id_field<T>(data: &Map<String, Value>, key: &str, msg: &'static str) -> Result<T, CommandError>
where
	T: TryFrom<String>,
{
	data.get(key)
		.and_then(Value::as_str)
		.and_then(|s| T::try_from(s.to_string()).ok())
		.ok_or(CommandError::Invalid(msg))
}

/// Room ids arrive as strings, or as integers from older chat clients.
fn room_id_field(data: &Map<String, Value>) -> Result<RoomId, CommandError> {
	let raw = match data.get("roomId") {
		Some(Value::String(s)) => s.clone(),
		Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
		_ => return Err(CommandError::Invalid("Invalid roomId")),
	};
	RoomId::new(raw).map_err(|_| CommandError::Invalid("Invalid roomId"))
}

fn finite(data: &Map<String, Value>, key: &str) -> Option<f64> {
	data.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}
