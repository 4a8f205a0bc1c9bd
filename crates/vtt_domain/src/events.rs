#![forbid(unsafe_code)]

use core::fmt;

use serde_json::{Map, Value};

use crate::{AssetId, ChatMessage, MapAsset, MapId, RoomId, Token, TokenId, VttMap};

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
	Created,
	Updated,
	Deleted,
}

/// Which kind of entity a domain event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
	Token,
	MapAsset,
	Map,
	Message,
}

impl EntityKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			EntityKind::Token => "token",
			EntityKind::MapAsset => "map_asset",
			EntityKind::Map => "map",
			EntityKind::Message => "message",
		}
	}
}

impl fmt::Display for EntityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Multicast group a domain event is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
	Room(RoomId),
	Map(MapId),
}

impl fmt::Display for Scope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Scope::Room(id) => write!(f, "room-{id}"),
			Scope::Map(id) => write!(f, "map-{id}"),
		}
	}
}

/// Immutable record of one committed mutation.
///
/// Published exactly once by the owning service after its write commits.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
	TokenCreated { map_id: MapId, token: Token },
	TokenUpdated { map_id: MapId, token: Token },
	TokenDeleted { map_id: MapId, token_id: TokenId },

	MapAssetCreated { asset: MapAsset },
	MapAssetUpdated { asset: MapAsset },
	MapAssetDeleted { map_id: Option<MapId>, asset_id: AssetId },

	MapCreated { room_id: RoomId, map: VttMap },
	/// `changes` holds only the fields the map service actually changed.
	MapUpdated { map_id: MapId, changes: Map<String, Value> },
	MapDeleted { room_id: RoomId, map_id: MapId },

	MessageCreated { room_id: RoomId, message: ChatMessage },
}

impl DomainEvent {
	pub fn change(&self) -> ChangeKind {
		match self {
			DomainEvent::TokenCreated { .. }
			| DomainEvent::MapAssetCreated { .. }
			| DomainEvent::MapCreated { .. }
			| DomainEvent::MessageCreated { .. } => ChangeKind::Created,
			DomainEvent::TokenUpdated { .. } | DomainEvent::MapAssetUpdated { .. } | DomainEvent::MapUpdated { .. } => {
				ChangeKind::Updated
			}
			DomainEvent::TokenDeleted { .. } | DomainEvent::MapAssetDeleted { .. } | DomainEvent::MapDeleted { .. } => {
				ChangeKind::Deleted
			}
		}
	}

	pub fn entity(&self) -> EntityKind {
		match self {
			DomainEvent::TokenCreated { .. } | DomainEvent::TokenUpdated { .. } | DomainEvent::TokenDeleted { .. } => {
				EntityKind::Token
			}
			DomainEvent::MapAssetCreated { .. }
			| DomainEvent::MapAssetUpdated { .. }
			| DomainEvent::MapAssetDeleted { .. } => EntityKind::MapAsset,
			DomainEvent::MapCreated { .. } | DomainEvent::MapUpdated { .. } | DomainEvent::MapDeleted { .. } => {
				EntityKind::Map
			}
			DomainEvent::MessageCreated { .. } => EntityKind::Message,
		}
	}

	/// Target group for fan-out.
	///
	/// Map creation/deletion changes the room's map list, so it goes to the
	/// room; in-place map updates go to the map. `None` for an asset that is
	/// no longer attached to any map.
	pub fn scope(&self) -> Option<Scope> {
		match self {
			DomainEvent::TokenCreated { map_id, .. }
			| DomainEvent::TokenUpdated { map_id, .. }
			| DomainEvent::TokenDeleted { map_id, .. }
			| DomainEvent::MapUpdated { map_id, .. } => Some(Scope::Map(map_id.clone())),
			DomainEvent::MapAssetCreated { asset } | DomainEvent::MapAssetUpdated { asset } => {
				asset.map_id.clone().map(Scope::Map)
			}
			DomainEvent::MapAssetDeleted { map_id, .. } => map_id.clone().map(Scope::Map),
			DomainEvent::MapCreated { room_id, .. }
			| DomainEvent::MapDeleted { room_id, .. }
			| DomainEvent::MessageCreated { room_id, .. } => Some(Scope::Room(room_id.clone())),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn map_id(s: &str) -> MapId {
		MapId::new(s).unwrap()
	}

	fn room_id(s: &str) -> RoomId {
		RoomId::new(s).unwrap()
	}

	#[test]
	fn map_lifecycle_scopes_follow_the_room_list() {
		let map = VttMap::new(map_id("m1"), room_id("r1"), None, 0);
		let created = DomainEvent::MapCreated {
			room_id: room_id("r1"),
			map,
		};
		assert_eq!(created.scope(), Some(Scope::Room(room_id("r1"))));
		assert_eq!(created.change(), ChangeKind::Created);

		let updated = DomainEvent::MapUpdated {
			map_id: map_id("m1"),
			changes: Map::new(),
		};
		assert_eq!(updated.scope(), Some(Scope::Map(map_id("m1"))));
		assert_eq!(updated.entity(), EntityKind::Map);

		let deleted = DomainEvent::MapDeleted {
			room_id: room_id("r1"),
			map_id: map_id("m1"),
		};
		assert_eq!(deleted.scope(), Some(Scope::Room(room_id("r1"))));
	}

	#[test]
	fn detached_asset_has_no_scope() {
		let mut asset = MapAsset::new(AssetId::new("a1").unwrap(), map_id("m1"), "u", 0.0, 0.0);
		asset.map_id = None;
		let ev = DomainEvent::MapAssetUpdated { asset };
		assert_eq!(ev.scope(), None);
		assert_eq!(ev.entity(), EntityKind::MapAsset);
	}

	#[test]
	fn scope_display_matches_group_names() {
		assert_eq!(Scope::Room(room_id("7")).to_string(), "room-7");
		assert_eq!(Scope::Map(map_id("abc")).to_string(), "map-abc");
	}
}
