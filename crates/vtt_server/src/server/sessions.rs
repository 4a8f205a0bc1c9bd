#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use vtt_domain::{Scope, UserId};

/// Encoded frame queued for a connection's writer task.
pub type OutboundFrame = Bytes;
pub type OutboundTx = mpsc::Sender<OutboundFrame>;

#[derive(Debug)]
struct SessionEntry {
	user_id: UserId,
	tx: OutboundTx,
	/// Groups this connection itself has joined.
	scopes: HashSet<Scope>,
}

/// Live connections of one namespace: connection id to user, outbound queue
/// and the groups the connection joined.
#[derive(Debug, Clone, Default)]
pub struct SessionDirectory {
	inner: Arc<RwLock<HashMap<u64, SessionEntry>>>,
}

impl SessionDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, conn_id: u64, user_id: UserId, tx: OutboundTx) {
		self.inner.write().insert(
			conn_id,
			SessionEntry {
				user_id,
				tx,
				scopes: HashSet::new(),
			},
		);
	}

	/// Subscribe a connection to a group. Returns `true` if it was not
	/// subscribed yet; unknown connections are ignored.
	pub fn enter(&self, conn_id: u64, scope: Scope) -> bool {
		self.inner
			.write()
			.get_mut(&conn_id)
			.is_some_and(|entry| entry.scopes.insert(scope))
	}

	pub fn exit(&self, conn_id: u64, scope: &Scope) -> bool {
		self.inner
			.write()
			.get_mut(&conn_id)
			.is_some_and(|entry| entry.scopes.remove(scope))
	}

	#[cfg(test)]
	pub fn has_entered(&self, conn_id: u64, scope: &Scope) -> bool {
		self.inner
			.read()
			.get(&conn_id)
			.is_some_and(|entry| entry.scopes.contains(scope))
	}

	pub fn remove(&self, conn_id: u64) -> Option<UserId> {
		self.inner.write().remove(&conn_id).map(|e| e.user_id)
	}

	pub fn len(&self) -> usize {
		self.inner.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.read().is_empty()
	}

	pub fn connections_for(&self, user: &UserId) -> usize {
		self.inner.read().values().filter(|e| &e.user_id == user).count()
	}

	/// Queue `frame` on every connection that joined `scope` and whose user is
	/// one of `users`.
	///
	/// Never blocks: a closed queue is skipped and a full queue drops the frame
	/// for that connection only. Returns the number of connections reached.
	pub fn deliver(&self, scope: &Scope, users: &[UserId], frame: &OutboundFrame) -> usize {
		if users.is_empty() {
			return 0;
		}
		let wanted: HashSet<&UserId> = users.iter().collect();

		let mut delivered = 0usize;
		let mut dropped = 0u64;

		let sessions = self.inner.read();
		for (conn_id, entry) in sessions.iter() {
			if !entry.scopes.contains(scope) || !wanted.contains(&entry.user_id) {
				continue;
			}
			match entry.tx.try_send(frame.clone()) {
				Ok(()) => delivered += 1,
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped += 1;
					debug!(conn_id, user_id = %entry.user_id, "outbound queue full; dropping broadcast");
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}
		drop(sessions);

		if delivered > 0 {
			metrics::counter!("vtt_server_broadcast_deliveries_total").increment(delivered as u64);
		}
		if dropped > 0 {
			metrics::counter!("vtt_server_outbound_dropped_total").increment(dropped);
		}

		delivered
	}
}
