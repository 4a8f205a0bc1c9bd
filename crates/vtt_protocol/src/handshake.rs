#![forbid(unsafe_code)]

use core::fmt;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::CommandName;

/// Logical surface a connection attaches to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
	#[default]
	#[serde(rename = "/vtt")]
	Vtt,
	#[serde(rename = "/chat")]
	Chat,
}

impl Namespace {
	pub const fn as_str(self) -> &'static str {
		match self {
			Namespace::Vtt => "/vtt",
			Namespace::Chat => "/chat",
		}
	}

	/// Whether `cmd` may be sent on this namespace.
	pub fn allows(self, cmd: CommandName) -> bool {
		use CommandName::*;
		match self {
			Namespace::Vtt => matches!(
				cmd,
				JoinRoom | LeaveRoom | JoinMap | LeaveMap | MoveToken | UpdateMapAsset | DeleteMapAsset | UpdateMap
			),
			Namespace::Chat => matches!(cmd, JoinRoom | LeaveRoom | SendMessage),
		}
	}
}

impl fmt::Display for Namespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// First frame sent by a client on the control stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
	#[serde(default)]
	pub namespace: Namespace,

	/// Auth payload (`{"token": "..."}`).
	#[serde(default)]
	pub auth: Map<String, Value>,

	#[serde(default)]
	pub query: HashMap<String, String>,

	#[serde(default)]
	pub headers: HashMap<String, String>,
}

impl Handshake {
	pub fn new(namespace: Namespace) -> Self {
		Self {
			namespace,
			..Self::default()
		}
	}

	pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
		self.auth.insert("token".to_string(), Value::String(token.into()));
		self
	}

	pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.insert(key.into(), value.into());
		self
	}

	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());
		self
	}

	/// String field from the auth payload.
	pub fn auth_str(&self, key: &str) -> Option<&str> {
		self.auth.get(key).and_then(Value::as_str)
	}

	pub fn query_param(&self, key: &str) -> Option<&str> {
		self.query.get(key).map(String::as_str)
	}

	/// Header lookup, case-insensitive on the name.
	///
	/// An exact-case match wins. Among names differing only in case, the
	/// lexicographically smallest one is used, so the result never depends on
	/// map iteration order.
	pub fn header(&self, name: &str) -> Option<&str> {
		if let Some(v) = self.headers.get(name) {
			return Some(v.as_str());
		}
		self.headers
			.iter()
			.filter(|(k, _)| k.eq_ignore_ascii_case(name))
			.min_by(|(a, _), (b, _)| a.cmp(b))
			.map(|(_, v)| v.as_str())
	}
}
