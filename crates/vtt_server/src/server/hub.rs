#![forbid(unsafe_code)]

use vtt_protocol::Namespace;

use crate::server::presence::SharedPresence;
use crate::server::sessions::SessionDirectory;

/// Per-namespace shared state: who is connected and who has joined what.
///
/// Namespaces never share a hub, so table presence and chat presence are
/// tracked independently.
#[derive(Debug, Clone)]
pub struct NamespaceHub {
	pub namespace: Namespace,
	pub presence: SharedPresence,
	pub sessions: SessionDirectory,
}

impl NamespaceHub {
	pub fn new(namespace: Namespace) -> Self {
		Self {
			namespace,
			presence: SharedPresence::new(),
			sessions: SessionDirectory::new(),
		}
	}
}
