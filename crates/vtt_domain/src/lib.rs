#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod events;
pub mod records;

pub use events::{ChangeKind, DomainEvent, EntityKind, Scope};
pub use records::{ChatMessage, GridType, MapAsset, Token, VttMap};

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! string_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);

		impl $name {
			/// Create a non-empty identifier.
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				if id.trim().is_empty() {
					return Err(ParseIdError::Empty);
				}
				Ok(Self(id))
			}

			/// Fresh random identifier (UUID v4).
			pub fn generate() -> Self {
				Self(uuid::Uuid::new_v4().to_string())
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				$name::new(s.to_string())
			}
		}

		impl TryFrom<String> for $name {
			type Error = ParseIdError;

			fn try_from(s: String) -> Result<Self, Self::Error> {
				$name::new(s)
			}
		}

		impl From<$name> for String {
			fn from(id: $name) -> String {
				id.0
			}
		}
	};
}

string_id!(
	/// Authenticated user identifier (the `sub` claim).
	UserId
);
string_id!(
	/// Room (session container) identifier.
	RoomId
);
string_id!(
	/// Map identifier; every map belongs to exactly one room.
	MapId
);
string_id!(TokenId);
string_id!(AssetId);
string_id!(MessageId);

/// Validated identity attached to a connection at handshake time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
	pub user_id: UserId,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,

	/// Remaining token claims, kept verbatim.
	#[serde(default, flatten)]
	pub claims: serde_json::Map<String, serde_json::Value>,
}

impl Identity {
	pub fn new(user_id: UserId) -> Self {
		Self {
			user_id,
			email: None,
			claims: serde_json::Map::new(),
		}
	}

	pub fn with_email(mut self, email: impl Into<String>) -> Self {
		self.email = Some(email.into());
		self
	}
}
