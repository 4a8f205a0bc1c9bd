#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use vtt_domain::{MapId, RoomId, Scope, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PresenceError {
	#[error("user {user} has not joined room {room}")]
	NotInRoom {
		user: UserId,
		room: RoomId,
	},
}

/// Outcome of a successful map join.
///
/// `ticket` identifies this particular join of (map, user); a later join of
/// the same pair supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapJoin {
	pub fresh: bool,
	pub ticket: u64,
}

/// Room and map membership sets. Pure bookkeeping, no I/O.
///
/// Empty sets are removed eagerly, so a key exists only while it has members.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
	rooms: HashMap<RoomId, HashSet<UserId>>,
	maps: HashMap<MapId, HashSet<UserId>>,
	/// Latest join ticket per map membership. Present iff the membership is.
	map_tickets: HashMap<(MapId, UserId), u64>,
	next_ticket: u64,
}

impl PresenceRegistry {
	/// Returns `true` if the user was not already a member.
	pub fn join_room(&mut self, room: &RoomId, user: &UserId) -> bool {
		self.rooms.entry(room.clone()).or_default().insert(user.clone())
	}

	pub fn leave_room(&mut self, room: &RoomId, user: &UserId) -> bool {
		remove_member(&mut self.rooms, room, user)
	}

	/// Requires membership of `room_of_map`, the room that owns `map`.
	pub fn join_map(&mut self, map: &MapId, room_of_map: &RoomId, user: &UserId) -> Result<MapJoin, PresenceError> {
		if !self.is_room_member(room_of_map, user) {
			return Err(PresenceError::NotInRoom {
				user: user.clone(),
				room: room_of_map.clone(),
			});
		}
		let fresh = self.maps.entry(map.clone()).or_default().insert(user.clone());
		self.next_ticket += 1;
		let ticket = self.next_ticket;
		self.map_tickets.insert((map.clone(), user.clone()), ticket);
		Ok(MapJoin { fresh, ticket })
	}

	pub fn leave_map(&mut self, map: &MapId, user: &UserId) -> bool {
		self.map_tickets.remove(&(map.clone(), user.clone()));
		remove_member(&mut self.maps, map, user)
	}

	/// Roll back `join`, but only if it created the membership and no later
	/// join of the same (map, user) happened since.
	pub fn undo_map_join(&mut self, map: &MapId, user: &UserId, join: MapJoin) -> bool {
		let key = (map.clone(), user.clone());
		if !join.fresh || self.map_tickets.get(&key) != Some(&join.ticket) {
			return false;
		}
		self.map_tickets.remove(&key);
		remove_member(&mut self.maps, map, user)
	}

	pub fn is_room_member(&self, room: &RoomId, user: &UserId) -> bool {
		self.rooms.get(room).is_some_and(|m| m.contains(user))
	}

	pub fn is_map_member(&self, map: &MapId, user: &UserId) -> bool {
		self.maps.get(map).is_some_and(|m| m.contains(user))
	}

	/// Drop `user` from every room and map, pruning emptied entries.
	///
	/// Returns how many memberships were removed.
	pub fn remove_all_memberships(&mut self, user: &UserId) -> usize {
		self.map_tickets.retain(|(_, u), _| u != user);
		remove_everywhere(&mut self.rooms, user) + remove_everywhere(&mut self.maps, user)
	}

	pub fn members(&self, scope: &Scope) -> Vec<UserId> {
		let set = match scope {
			Scope::Room(id) => self.rooms.get(id),
			Scope::Map(id) => self.maps.get(id),
		};
		set.map(|s| s.iter().cloned().collect()).unwrap_or_default()
	}

	pub fn room_count(&self) -> usize {
		self.rooms.len()
	}

	pub fn map_count(&self) -> usize {
		self.maps.len()
	}

	pub fn has_room_entry(&self, room: &RoomId) -> bool {
		self.rooms.contains_key(room)
	}

	pub fn has_map_entry(&self, map: &MapId) -> bool {
		self.maps.contains_key(map)
	}

	/// Whether `user` appears anywhere in the registry.
	pub fn tracks_user(&self, user: &UserId) -> bool {
		self.rooms.values().chain(self.maps.values()).any(|s| s.contains(user))
	}
}

fn remove_member<K>(sets: &mut HashMap<K, HashSet<UserId>>, key: &K, user: &UserId) -> bool
where
	K: std::hash::Hash + Eq,
{
	let Some(set) = sets.get_mut(key) else {
		return false;
	};
	let removed = set.remove(user);
	if set.is_empty() {
		sets.remove(key);
	}
	removed
}

fn remove_everywhere<K>(sets: &mut HashMap<K, HashSet<UserId>>, user: &UserId) -> usize
where
	K: std::hash::Hash + Eq,
{
	let mut removed = 0;
	sets.retain(|_, set| {
		if set.remove(user) {
			removed += 1;
		}
		!set.is_empty()
	});
	removed
}

/// Shared handle to one namespace's registry.
///
/// Every call takes the lock for the duration of one synchronous operation;
/// the guard never escapes, so it cannot be held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SharedPresence {
	inner: Arc<Mutex<PresenceRegistry>>,
}

impl SharedPresence {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn join_room(&self, room: &RoomId, user: &UserId) -> bool {
		self.inner.lock().join_room(room, user)
	}

	pub fn leave_room(&self, room: &RoomId, user: &UserId) -> bool {
		self.inner.lock().leave_room(room, user)
	}

	pub fn join_map(&self, map: &MapId, room_of_map: &RoomId, user: &UserId) -> Result<MapJoin, PresenceError> {
		self.inner.lock().join_map(map, room_of_map, user)
	}

	pub fn undo_map_join(&self, map: &MapId, user: &UserId, join: MapJoin) -> bool {
		self.inner.lock().undo_map_join(map, user, join)
	}

	pub fn leave_map(&self, map: &MapId, user: &UserId) -> bool {
		self.inner.lock().leave_map(map, user)
	}

	pub fn is_room_member(&self, room: &RoomId, user: &UserId) -> bool {
		self.inner.lock().is_room_member(room, user)
	}

	pub fn is_map_member(&self, map: &MapId, user: &UserId) -> bool {
		self.inner.lock().is_map_member(map, user)
	}

	pub fn remove_all_memberships(&self, user: &UserId) -> usize {
		self.inner.lock().remove_all_memberships(user)
	}

	/// Current members of a group, read at call time.
	pub fn members(&self, scope: &Scope) -> Vec<UserId> {
		self.inner.lock().members(scope)
	}

	/// Run a read-only closure against the registry.
	pub fn inspect<R>(&self, f: impl FnOnce(&PresenceRegistry) -> R) -> R {
		f(&self.inner.lock())
	}
}
