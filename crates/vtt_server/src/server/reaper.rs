#![forbid(unsafe_code)]

use tracing::debug;
use vtt_domain::UserId;

use crate::server::hub::NamespaceHub;

/// Cleans up after a connection when dropped.
///
/// Owned by the connection task, so it runs on graceful close, transport
/// errors, protocol errors, panics and task cancellation alike. Removal is
/// keyed by user id: the user's memberships in this namespace are cleared.
#[derive(Debug)]
pub struct DisconnectReaper {
	conn_id: u64,
	user_id: UserId,
	hub: NamespaceHub,
}

impl DisconnectReaper {
	/// Arm the reaper for an already registered session.
	pub fn arm(conn_id: u64, user_id: UserId, hub: NamespaceHub) -> Self {
		Self { conn_id, user_id, hub }
	}
}

impl Drop for DisconnectReaper {
	fn drop(&mut self) {
		self.hub.sessions.remove(self.conn_id);
		let removed = self.hub.presence.remove_all_memberships(&self.user_id);
		metrics::counter!("vtt_server_reaped_memberships_total").increment(removed as u64);
		debug!(
			conn_id = self.conn_id,
			user_id = %self.user_id,
			namespace = %self.hub.namespace,
			removed,
			"reaped connection memberships"
		);
	}
}
