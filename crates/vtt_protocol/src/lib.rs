#![forbid(unsafe_code)]

pub mod command;
pub mod event;
pub mod framing;
pub mod handshake;

pub use command::{AssetTransform, ClientCommand, CommandEnvelope, CommandError, CommandName, parse_command};
pub use event::{ErrorCode, MapView, ServerEvent};
pub use framing::{
	DEFAULT_MAX_FRAME_SIZE, FramingError, decode_frame, encode_frame, encode_json_frame, encode_json_frame_default,
	frame_len_from_payload_len, try_decode_frame_from_buffer,
};
pub use handshake::{Handshake, Namespace};

/// Protocol version constants.
pub mod version {
	/// ALPN identifier negotiated on the QUIC connection.
	pub const ALPN: &[u8] = b"vtt-v1";
}

/// Application close code sent when authentication fails.
pub const CLOSE_UNAUTHENTICATED: u32 = 4401;

/// Application close code sent when framing is lost or the handshake never arrives.
pub const CLOSE_PROTOCOL_ERROR: u32 = 4400;
