#![forbid(unsafe_code)]

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};
use vtt_domain::{AssetId, Identity, MapId, RoomId, Scope, TokenId, UserId};
use vtt_protocol::{
	AssetTransform, ClientCommand, CommandError, DEFAULT_MAX_FRAME_SIZE, ErrorCode, Namespace, ServerEvent,
	encode_json_frame, parse_command,
};

use crate::server::auth::AuthError;
use crate::server::hub::NamespaceHub;
use crate::server::presence::PresenceError;
use crate::server::services::{ServiceError, Services};
use crate::server::sessions::OutboundTx;

/// Everything a command can fail with. Each maps to one wire error code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
	#[error("{0}")]
	Unauthenticated(String),
	#[error("{0}")]
	NotInRoom(String),
	#[error("{0}")]
	NotInMap(String),
	#[error("{0}")]
	Forbidden(String),
	#[error("{0}")]
	NotFound(String),
	#[error("{0}")]
	ValidationFailed(String),
	#[error("internal: {0}")]
	Internal(String),
}

impl GatewayError {
	pub fn code(&self) -> ErrorCode {
		match self {
			GatewayError::Unauthenticated(_) => ErrorCode::Unauthenticated,
			GatewayError::NotInRoom(_) => ErrorCode::NotInRoom,
			GatewayError::NotInMap(_) => ErrorCode::NotInMap,
			GatewayError::Forbidden(_) => ErrorCode::Forbidden,
			GatewayError::NotFound(_) => ErrorCode::NotFound,
			GatewayError::ValidationFailed(_) => ErrorCode::ValidationFailed,
			GatewayError::Internal(_) => ErrorCode::Internal,
		}
	}

	/// Text shown to the client. Internal details stay in the logs.
	pub fn client_message(&self) -> String {
		match self {
			GatewayError::Internal(_) => "internal error".to_string(),
			other => other.to_string(),
		}
	}

	pub fn to_event(&self) -> ServerEvent {
		ServerEvent::error(self.code(), self.client_message())
	}

	fn prefixed(self, prefix: &str) -> Self {
		match self {
			GatewayError::NotFound(m) => GatewayError::NotFound(format!("{prefix}{m}")),
			GatewayError::Forbidden(m) => GatewayError::Forbidden(format!("{prefix}{m}")),
			GatewayError::ValidationFailed(m) => GatewayError::ValidationFailed(format!("{prefix}{m}")),
			other => other,
		}
	}
}

impl From<ServiceError> for GatewayError {
	fn from(e: ServiceError) -> Self {
		match e {
			ServiceError::NotFound(m) => GatewayError::NotFound(m),
			ServiceError::Forbidden(m) => GatewayError::Forbidden(m),
			ServiceError::Validation(m) => GatewayError::ValidationFailed(m),
			ServiceError::Internal(m) => GatewayError::Internal(m),
		}
	}
}

impl From<CommandError> for GatewayError {
	fn from(e: CommandError) -> Self {
		GatewayError::ValidationFailed(e.to_string())
	}
}

impl From<PresenceError> for GatewayError {
	fn from(e: PresenceError) -> Self {
		match e {
			PresenceError::NotInRoom { .. } => GatewayError::NotInRoom("join the room before joining its maps".to_string()),
		}
	}
}

impl From<AuthError> for GatewayError {
	fn from(e: AuthError) -> Self {
		GatewayError::Unauthenticated(e.to_string())
	}
}

/// An authenticated connection as seen by the command handlers.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
	pub conn_id: u64,
	pub identity: Identity,
	/// The connection's own outbound queue, for direct replies.
	pub outbound: OutboundTx,
}

impl ConnectionContext {
	pub fn user_id(&self) -> &UserId {
		&self.identity.user_id
	}
}

/// Encode a server event into a ready-to-queue frame.
pub fn encode_event(event: &ServerEvent) -> Result<Bytes, GatewayError> {
	encode_json_frame(event, DEFAULT_MAX_FRAME_SIZE)
		.map(Bytes::from)
		.map_err(|e| GatewayError::Internal(format!("encode {}: {e}", event.name())))
}

/// Direct reply to one connection. Waits for queue space; a vanished
/// connection is ignored.
pub async fn send_direct(ctx: &ConnectionContext, event: &ServerEvent) {
	let frame = match encode_event(event) {
		Ok(f) => f,
		Err(e) => {
			warn!(conn_id = ctx.conn_id, error = %e, "failed to encode reply");
			return;
		}
	};
	if ctx.outbound.send(frame).await.is_err() {
		debug!(conn_id = ctx.conn_id, event = event.name(), "reply dropped; connection gone");
	}
}

/// Command handlers for one namespace.
#[derive(Clone)]
pub struct Gateway {
	hub: NamespaceHub,
	services: Services,
}

impl Gateway {
	pub fn new(hub: NamespaceHub, services: Services) -> Self {
		Self { hub, services }
	}

	pub fn hub(&self) -> &NamespaceHub {
		&self.hub
	}

	pub fn namespace(&self) -> Namespace {
		self.hub.namespace
	}

	/// Parse one inbound frame and run it. The caller gets exactly one
	/// reply on failure; the connection stays open either way.
	pub async fn handle_frame(&self, ctx: &ConnectionContext, payload: &[u8]) {
		match parse_command(self.namespace(), payload) {
			Ok(cmd) => self.dispatch(ctx, cmd).await,
			Err(e) => {
				metrics::counter!("vtt_server_command_errors_total", "code" => ErrorCode::ValidationFailed.as_str())
					.increment(1);
				debug!(conn_id = ctx.conn_id, error = %e, "rejected command frame");
				send_direct(ctx, &GatewayError::from(e).to_event()).await;
			}
		}
	}

	pub async fn dispatch(&self, ctx: &ConnectionContext, cmd: ClientCommand) {
		let name = cmd.name();
		metrics::counter!("vtt_server_commands_total", "event" => name.as_str()).increment(1);

		match self.execute(ctx, cmd).await {
			Ok(Some(reply)) => send_direct(ctx, &reply).await,
			Ok(None) => {}
			Err(e) => {
				metrics::counter!("vtt_server_command_errors_total", "code" => e.code().as_str()).increment(1);
				if let GatewayError::Internal(detail) = &e {
					warn!(conn_id = ctx.conn_id, user_id = %ctx.user_id(), event = %name, %detail, "command failed");
				} else {
					debug!(conn_id = ctx.conn_id, user_id = %ctx.user_id(), event = %name, error = %e, "command rejected");
				}
				send_direct(ctx, &e.to_event()).await;
			}
		}
	}

	/// Run a validated command. `Ok(Some(_))` is the caller's acknowledgment;
	/// mutations return `Ok(None)` and reach clients through domain events.
	pub async fn execute(&self, ctx: &ConnectionContext, cmd: ClientCommand) -> Result<Option<ServerEvent>, GatewayError> {
		let user = ctx.user_id();
		match cmd {
			ClientCommand::JoinRoom { room_id } => self.join_room(ctx, room_id).await.map(Some),
			ClientCommand::LeaveRoom { room_id } => Ok(Some(self.leave_room(ctx, room_id))),
			ClientCommand::JoinMap { map_id } => self.join_map(ctx, map_id).await.map(Some),
			ClientCommand::LeaveMap { map_id } => Ok(Some(self.leave_map(ctx, map_id))),
			ClientCommand::MoveToken { token_id, x, y } => self.move_token(user, token_id, x, y).await.map(|_| None),
			ClientCommand::UpdateMapAsset { asset_id, transform } => {
				self.update_map_asset(asset_id, transform).await.map(|_| None)
			}
			ClientCommand::DeleteMapAsset { asset_id } => self.delete_map_asset(asset_id).await.map(|_| None),
			ClientCommand::UpdateMap { map_id, updates } => {
				self.services.maps.update_map(&map_id, updates, user).await?;
				Ok(None)
			}
			ClientCommand::SendMessage { room_id, content } => self.send_message(user, room_id, content).await.map(|_| None),
		}
	}

	async fn join_room(&self, ctx: &ConnectionContext, room_id: RoomId) -> Result<ServerEvent, GatewayError> {
		let user = ctx.user_id();
		let access = match self.namespace() {
			Namespace::Vtt => self.services.rooms.check_access(user, &room_id).await,
			Namespace::Chat => self.services.chat.check_access(user, &room_id).await,
		};
		access.map_err(|e| GatewayError::from(e).prefixed("Cannot join room: "))?;

		if self.hub.presence.join_room(&room_id, user) {
			debug!(user_id = %user, room_id = %room_id, namespace = %self.namespace(), "joined room");
		}
		self.hub.sessions.enter(ctx.conn_id, Scope::Room(room_id.clone()));
		Ok(ServerEvent::JoinedRoom { room_id })
	}

	fn leave_room(&self, ctx: &ConnectionContext, room_id: RoomId) -> ServerEvent {
		self.hub.presence.leave_room(&room_id, ctx.user_id());
		self.hub.sessions.exit(ctx.conn_id, &Scope::Room(room_id.clone()));
		ServerEvent::LeftRoom { room_id }
	}

	/// Registers first, then snapshots, so no event committed after the
	/// snapshot can be missed. A failed snapshot undoes this join unless a
	/// later join of the same map by the same user superseded it.
	async fn join_map(&self, ctx: &ConnectionContext, map_id: MapId) -> Result<ServerEvent, GatewayError> {
		let user = ctx.user_id();
		let map = self.services.maps.get_map_for_user(&map_id, user).await?;
		let join = self.hub.presence.join_map(&map_id, &map.room_id, user)?;
		let scope = Scope::Map(map_id.clone());
		let entered = self.hub.sessions.enter(ctx.conn_id, scope.clone());

		let snapshot = async {
			let tokens = self.services.tokens.tokens_for_map(&map_id, user).await?;
			let map_assets = self.services.assets.assets_for_map(&map_id).await?;
			Ok::<_, ServiceError>((tokens, map_assets))
		}
		.await;

		match snapshot {
			Ok((tokens, map_assets)) => {
				debug!(user_id = %user, map_id = %map_id, tokens = tokens.len(), assets = map_assets.len(), "joined map");
				Ok(ServerEvent::JoinedMap {
					map: map.into(),
					tokens,
					map_assets,
				})
			}
			Err(e) => {
				if entered {
					self.hub.sessions.exit(ctx.conn_id, &scope);
				}
				self.hub.presence.undo_map_join(&map_id, user, join);
				Err(e.into())
			}
		}
	}

	fn leave_map(&self, ctx: &ConnectionContext, map_id: MapId) -> ServerEvent {
		self.hub.presence.leave_map(&map_id, ctx.user_id());
		self.hub.sessions.exit(ctx.conn_id, &Scope::Map(map_id.clone()));
		ServerEvent::LeftMap { map_id }
	}

	async fn move_token(&self, user: &UserId, token_id: TokenId, x: f64, y: f64) -> Result<(), GatewayError> {
		let token = self.services.tokens.validate_move_access(&token_id, user).await?;
		if !self.hub.presence.is_map_member(&token.map_id, user) {
			return Err(GatewayError::NotInMap("join the map before moving its tokens".to_string()));
		}
		self.services.tokens.move_token(&token_id, x, y, user).await?;
		Ok(())
	}

	async fn update_map_asset(&self, asset_id: AssetId, transform: AssetTransform) -> Result<(), GatewayError> {
		self.services.assets.update_asset(&asset_id, transform).await?;
		Ok(())
	}

	async fn delete_map_asset(&self, asset_id: AssetId) -> Result<(), GatewayError> {
		self.services.assets.remove_asset(&asset_id).await?;
		Ok(())
	}

	/// Historical access alone is not enough: the sender must be present in
	/// the room in this namespace.
	async fn send_message(&self, user: &UserId, room_id: RoomId, content: String) -> Result<(), GatewayError> {
		self.services.chat.check_access(user, &room_id).await?;
		if !self.hub.presence.is_room_member(&room_id, user) {
			return Err(GatewayError::NotInRoom("join the room before sending messages".to_string()));
		}
		self.services.chat.create_message(user, &room_id, &content).await?;
		Ok(())
	}
}
