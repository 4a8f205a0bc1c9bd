#![forbid(unsafe_code)]

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vtt_domain::{DomainEvent, EntityKind};
use vtt_protocol::ServerEvent;

use crate::server::events::{DomainEventRx, EventBus};
use crate::server::gateway::encode_event;
use crate::server::hub::NamespaceHub;

/// Wire message for a domain event.
pub fn to_server_event(event: &DomainEvent) -> ServerEvent {
	match event {
		DomainEvent::TokenCreated { token, .. } => ServerEvent::TokenCreated(token.clone()),
		DomainEvent::TokenUpdated { token, .. } => ServerEvent::TokenUpdated(token.clone()),
		DomainEvent::TokenDeleted { token_id, .. } => ServerEvent::TokenDeleted { id: token_id.clone() },
		DomainEvent::MapAssetCreated { asset } => ServerEvent::MapAssetCreated(asset.clone()),
		DomainEvent::MapAssetUpdated { asset } => ServerEvent::MapAssetUpdated(asset.clone()),
		DomainEvent::MapAssetDeleted { asset_id, .. } => ServerEvent::MapAssetDeleted { id: asset_id.clone() },
		DomainEvent::MapCreated { map, .. } => ServerEvent::MapCreated(map.clone()),
		DomainEvent::MapUpdated { map_id, changes } => ServerEvent::map_updated(map_id, changes),
		DomainEvent::MapDeleted { map_id, .. } => ServerEvent::MapDeleted { id: map_id.clone() },
		DomainEvent::MessageCreated { message, .. } => ServerEvent::NewMessage(message.clone()),
	}
}

/// Fan one event out to the connections currently joined to its scope.
///
/// Membership is read at delivery time. A connection receives the event only
/// if it joined the group itself and its user is still a registry member. Returns the number of connections
/// the frame was queued on.
pub fn dispatch_one(hub: &NamespaceHub, event: &DomainEvent) -> usize {
	let Some(scope) = event.scope() else {
		debug!(entity = %event.entity(), "domain event has no target group; skipping");
		return 0;
	};

	let members = hub.presence.members(&scope);
	if members.is_empty() {
		return 0;
	}

	let wire = to_server_event(event);
	let frame = match encode_event(&wire) {
		Ok(f) => f,
		Err(e) => {
			warn!(error = %e, group = %scope, "failed to encode broadcast");
			return 0;
		}
	};

	let delivered = hub.sessions.deliver(&scope, &members, &frame);
	debug!(event = wire.name(), group = %scope, members = members.len(), delivered, "broadcast");
	delivered
}

/// Single consumer of the event bus for one namespace.
pub struct BroadcastDispatcher {
	hub: NamespaceHub,
	kinds: Vec<EntityKind>,
	rx: DomainEventRx,
}

impl BroadcastDispatcher {
	/// Dispatch only events whose entity is in `kinds`.
	pub fn new(bus: &EventBus, hub: NamespaceHub, kinds: &[EntityKind]) -> Self {
		Self {
			hub,
			kinds: kinds.to_vec(),
			rx: bus.subscribe(),
		}
	}

	/// Run until the bus closes. Lag is logged and counted, never retried.
	pub async fn run(mut self) {
		info!(namespace = %self.hub.namespace, kinds = ?self.kinds, "broadcast dispatcher started");

		loop {
			let event = match self.rx.recv().await {
				Ok(ev) => ev,
				Err(broadcast::error::RecvError::Lagged(n)) => {
					metrics::counter!("vtt_server_event_bus_lagged_total").increment(n);
					warn!(
						namespace = %self.hub.namespace,
						lagged = n,
						"broadcast dispatcher lagged; events dropped"
					);
					continue;
				}
				Err(broadcast::error::RecvError::Closed) => {
					info!(namespace = %self.hub.namespace, "broadcast dispatcher exiting (event bus closed)");
					break;
				}
			};

			if self.kinds.contains(&event.entity()) {
				dispatch_one(&self.hub, &event);
			}
		}
	}

	pub fn spawn(self) -> JoinHandle<()> {
		tokio::spawn(self.run())
	}
}
