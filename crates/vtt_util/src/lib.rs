#![forbid(unsafe_code)]

pub mod secret {
	use core::fmt;

	/// String wrapper that never prints its contents.
	#[derive(Clone, PartialEq, Eq)]
	pub struct SecretString(String);

	impl SecretString {
		pub fn new(s: impl Into<String>) -> Self {
			Self(s.into())
		}

		pub fn expose(&self) -> &str {
			&self.0
		}
	}

	impl fmt::Debug for SecretString {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			f.write_str("SecretString(<redacted>)")
		}
	}

	impl fmt::Display for SecretString {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			f.write_str("<redacted>")
		}
	}

}

pub mod endpoint {
	use std::net::SocketAddr;

	use thiserror::Error;

	/// Default listen address of the gateway.
	pub const DEFAULT_GATEWAY_ENDPOINT: &str = "quic://127.0.0.1:18210";

	#[derive(Debug, Error, Clone, PartialEq, Eq)]
	pub enum EndpointError {
		#[error("endpoint must be non-empty (expected quic://host:port)")]
		Empty,
		#[error("invalid endpoint (expected quic://host:port): {0}")]
		Scheme(String),
		#[error("invalid endpoint (path/query/fragment not allowed): {0}")]
		Trailing(String),
		#[error("invalid endpoint host: {0}")]
		Host(String),
		#[error("invalid endpoint host (IPv6 must be bracketed like quic://[::1]:18210): {0}")]
		UnbracketedIpv6(String),
		#[error("invalid endpoint port (expected 1..=65535): {0}")]
		Port(String),
		#[error("host must be an IP literal: {0}")]
		NotIpLiteral(String),
	}

	/// Parsed `quic://host:port` endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct QuicEndpoint {
		pub host: String,
		pub port: u16,
	}

	impl QuicEndpoint {
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Bindable address; the host has to be an IP literal.
		pub fn socket_addr(&self) -> Result<SocketAddr, EndpointError> {
			self.hostport()
				.parse()
				.map_err(|_| EndpointError::NotIpLiteral(self.host.clone()))
		}

		pub fn parse(s: &str) -> Result<Self, EndpointError> {
			let s = s.trim();
			if s.is_empty() {
				return Err(EndpointError::Empty);
			}

			let rest = s
				.strip_prefix("quic://")
				.ok_or_else(|| EndpointError::Scheme(s.to_string()))?;

			if rest.contains(['/', '?', '#']) {
				return Err(EndpointError::Trailing(s.to_string()));
			}

			let (host, port) = rest
				.rsplit_once(':')
				.ok_or_else(|| EndpointError::Port(s.to_string()))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(EndpointError::Host(s.to_string()));
			}
			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(EndpointError::UnbracketedIpv6(s.to_string()));
			}

			let port = match port.trim().parse::<u16>() {
				Ok(0) | Err(_) => return Err(EndpointError::Port(s.to_string())),
				Ok(p) => p,
			};

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}
	}

	impl std::str::FromStr for QuicEndpoint {
		type Err = EndpointError;

		fn from_str(s: &str) -> Result<Self, Self::Err> {
			QuicEndpoint::parse(s)
		}
	}

}
