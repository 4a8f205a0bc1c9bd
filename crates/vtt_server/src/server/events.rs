#![forbid(unsafe_code)]

use tokio::sync::broadcast;
use tracing::debug;
use vtt_domain::DomainEvent;

pub type DomainEventRx = broadcast::Receiver<DomainEvent>;

/// Process-wide pub/sub channel for committed mutations.
///
/// Events are not retained: a subscriber only sees what is published after it
/// subscribed.
#[derive(Debug, Clone)]
pub struct EventBus {
	tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self { tx }
	}

	/// Publish one committed mutation.
	pub fn publish(&self, event: DomainEvent) {
		metrics::counter!("vtt_server_domain_events_total", "entity" => event.entity().as_str()).increment(1);

		let entity = event.entity();
		if let Err(broadcast::error::SendError(_)) = self.tx.send(event) {
			debug!(%entity, "domain event published with no subscribers");
		}
	}

	pub fn subscribe(&self) -> DomainEventRx {
		self.tx.subscribe()
	}

	#[cfg(test)]
	pub fn subscriber_count(&self) -> usize {
		self.tx.receiver_count()
	}
}
