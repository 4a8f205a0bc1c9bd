#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use vtt_domain::{AssetId, ChatMessage, MapAsset, MapId, RoomId, Token, TokenId, UserId, VttMap};
use vtt_protocol::AssetTransform;

/// Failure reported by a persistence/authorization collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
	#[error("{0}")]
	NotFound(String),

	#[error("{0}")]
	Forbidden(String),

	#[error("{0}")]
	Validation(String),

	#[error("{0}")]
	Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// "May this user access this room?"
#[async_trait]
pub trait RoomAccess: Send + Sync {
	async fn check_access(&self, actor: &UserId, room: &RoomId) -> ServiceResult<()>;
}

#[async_trait]
pub trait MapService: Send + Sync {
	/// Map record, access-checked against the map's room.
	async fn get_map_for_user(&self, map: &MapId, actor: &UserId) -> ServiceResult<VttMap>;

	/// Apply `updates` (GM only). Publishes `MapUpdated` after commit.
	async fn update_map(&self, map: &MapId, updates: Map<String, Value>, actor: &UserId) -> ServiceResult<VttMap>;
}

#[async_trait]
pub trait TokenService: Send + Sync {
	/// Ownership/role check; returns the token so callers learn its map.
	async fn validate_move_access(&self, token: &TokenId, actor: &UserId) -> ServiceResult<Token>;

	/// Publishes `TokenUpdated` after commit.
	async fn move_token(&self, token: &TokenId, x: f64, y: f64, actor: &UserId) -> ServiceResult<Token>;

	async fn tokens_for_map(&self, map: &MapId, actor: &UserId) -> ServiceResult<Vec<Token>>;
}

/// Map assets carry no ownership model.
#[async_trait]
pub trait MapAssetService: Send + Sync {
	async fn assets_for_map(&self, map: &MapId) -> ServiceResult<Vec<MapAsset>>;

	/// Publishes `MapAssetUpdated` after commit.
	async fn update_asset(&self, asset: &AssetId, transform: AssetTransform) -> ServiceResult<MapAsset>;

	/// Publishes `MapAssetDeleted` after commit.
	async fn remove_asset(&self, asset: &AssetId) -> ServiceResult<()>;
}

#[async_trait]
pub trait ChatService: Send + Sync {
	async fn check_access(&self, actor: &UserId, room: &RoomId) -> ServiceResult<()>;

	/// Publishes `MessageCreated` after commit.
	async fn create_message(&self, actor: &UserId, room: &RoomId, content: &str) -> ServiceResult<ChatMessage>;
}

/// Collaborators the gateways call into.
#[derive(Clone)]
pub struct Services {
	pub rooms: Arc<dyn RoomAccess>,
	pub maps: Arc<dyn MapService>,
	pub tokens: Arc<dyn TokenService>,
	pub assets: Arc<dyn MapAssetService>,
	pub chat: Arc<dyn ChatService>,
}

impl Services {
	/// Use one backend for every collaborator.
	pub fn from_backend<B>(backend: Arc<B>) -> Self
	where
		B: RoomAccess + MapService + TokenService + MapAssetService + ChatService + 'static,
	{
		Self {
			rooms: backend.clone(),
			maps: backend.clone(),
			tokens: backend.clone(),
			assets: backend.clone(),
			chat: backend,
		}
	}
}
