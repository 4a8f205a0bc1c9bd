#![forbid(unsafe_code)]

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::Sha256;
use thiserror::Error;
use vtt_domain::{Identity, UserId};
use vtt_protocol::Handshake;
use vtt_util::secret::SecretString;

use crate::util::time::unix_secs_now;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
	#[error("invalid token format")]
	Malformed,
	#[error("invalid token signature")]
	BadSignature,
	#[error("token expired")]
	Expired,
	#[error("invalid token claims: {0}")]
	Claims(String),
}

/// Turns an access token into a validated identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
	async fn resolve(&self, token: &str) -> Result<Identity, ResolveError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
	#[error("no token provided")]
	NoToken,
	#[error(transparent)]
	Rejected(#[from] ResolveError),
}

/// Where a token may be carried in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
	/// `auth.token`
	AuthPayload,
	/// `?token=`
	Query,
	/// `Authorization: Bearer <token>`
	BearerHeader,
}

/// Lookup order shared by every namespace. First non-empty value wins.
pub const TOKEN_SOURCES: [TokenSource; 3] = [TokenSource::AuthPayload, TokenSource::Query, TokenSource::BearerHeader];

impl TokenSource {
	pub fn extract<'a>(&self, hs: &'a Handshake) -> Option<&'a str> {
		let raw = match self {
			TokenSource::AuthPayload => hs.auth_str("token"),
			TokenSource::Query => hs.query_param("token"),
			TokenSource::BearerHeader => hs
				.header("authorization")
				.and_then(|v| v.trim().split_once(' '))
				.map(|(_, token)| token),
		};
		raw.map(str::trim).filter(|t| !t.is_empty())
	}
}

pub fn extract_token(hs: &Handshake) -> Option<&str> {
	TOKEN_SOURCES.iter().find_map(|src| src.extract(hs))
}

/// Connection gate: runs once per connection, before any command.
pub async fn authenticate(hs: &Handshake, resolver: &dyn IdentityResolver) -> Result<Identity, AuthError> {
	let token = extract_token(hs).ok_or(AuthError::NoToken)?;
	Ok(resolver.resolve(token).await?)
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
	sub: String,
	exp: u64,
	#[serde(default)]
	email: Option<String>,
	#[serde(flatten)]
	extra: Map<String, Value>,
}

/// Verifies `v1.<b64url(claims)>.<b64url(hmac_sha256(claims_b64))>` tokens.
#[derive(Debug, Clone)]
pub struct HmacIdentityResolver {
	secret: SecretString,
}

impl HmacIdentityResolver {
	pub fn new(secret: SecretString) -> Self {
		Self { secret }
	}

	fn verify(&self, token: &str) -> Result<Identity, ResolveError> {
		let mut parts = token.split('.');
		let (Some("v1"), Some(payload_b64), Some(sig_b64), None) = (parts.next(), parts.next(), parts.next(), parts.next())
		else {
			return Err(ResolveError::Malformed);
		};

		let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| ResolveError::Malformed)?;
		let expected_sig = sign(payload_b64.as_bytes(), self.secret.expose().as_bytes())?;
		if !constant_time_eq(&expected_sig, &provided_sig) {
			return Err(ResolveError::BadSignature);
		}

		let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| ResolveError::Malformed)?;
		let claims: AccessClaims = serde_json::from_slice(&payload).map_err(|e| ResolveError::Claims(e.to_string()))?;
		if claims.exp <= unix_secs_now() {
			return Err(ResolveError::Expired);
		}

		let user_id = UserId::new(claims.sub).map_err(|e| ResolveError::Claims(format!("sub: {e}")))?;
		Ok(Identity {
			user_id,
			email: claims.email,
			claims: claims.extra,
		})
	}
}

#[async_trait]
impl IdentityResolver for HmacIdentityResolver {
	async fn resolve(&self, token: &str) -> Result<Identity, ResolveError> {
		self.verify(token)
	}
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Result<Vec<u8>, ResolveError> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|_| ResolveError::BadSignature)?;
	mac.update(payload_b64);
	Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

/// Mint a token the way the issuing service does.
#[cfg(test)]
pub(crate) fn issue_token(claims: &Value, secret: &str) -> String {
	let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
	let sig = sign(payload_b64.as_bytes(), secret.as_bytes()).unwrap();
	format!("v1.{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig))
}

/// Valid-for-an-hour token for `user`.
#[cfg(test)]
pub(crate) fn issue_user_token(user: &str, secret: &str) -> String {
	issue_token(&serde_json::json!({"sub": user, "exp": unix_secs_now() + 3600}), secret)
}
