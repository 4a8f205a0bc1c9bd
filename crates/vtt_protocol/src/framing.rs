#![forbid(unsafe_code)]

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;

/// Default maximum frame payload size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2 * 1024 * 1024; // 2 MiB

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("insufficient data: need={need} have={have}")]
	InsufficientData {
		need: usize,
		have: usize,
	},

	#[error("json encode error: {0}")]
	Encode(#[from] serde_json::Error),
}

/// Prefix `payload` with its `u32` big-endian length.
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	if payload.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: payload.len(),
			max: max_frame_size,
		});
	}

	let mut out = Vec::with_capacity(frame_len_from_payload_len(payload.len()));
	out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
	out.extend_from_slice(payload);
	Ok(out)
}

/// Serialize `msg` as JSON and frame it.
pub fn encode_json_frame<T: Serialize + ?Sized>(msg: &T, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	let payload = serde_json::to_vec(msg)?;
	encode_frame(&payload, max_frame_size)
}

/// Encode a JSON frame using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_json_frame_default<T: Serialize + ?Sized>(msg: &T) -> Result<Vec<u8>, FramingError> {
	encode_json_frame(msg, DEFAULT_MAX_FRAME_SIZE)
}

#[inline]
pub fn frame_len_from_payload_len(payload_len: usize) -> usize {
	4 + payload_len
}

fn declared_len(prefix: &[u8], max_frame_size: usize) -> Result<usize, FramingError> {
	let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
	if len > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len,
			max: max_frame_size,
		});
	}
	Ok(len)
}

/// Decode a single frame from the start of `src`.
///
/// Returns the payload and the number of bytes consumed.
pub fn decode_frame(src: &[u8], max_frame_size: usize) -> Result<(&[u8], usize), FramingError> {
	if src.len() < 4 {
		return Err(FramingError::InsufficientData {
			need: 4,
			have: src.len(),
		});
	}

	let len = declared_len(src, max_frame_size)?;
	let need = frame_len_from_payload_len(len);
	if src.len() < need {
		return Err(FramingError::InsufficientData { need, have: src.len() });
	}

	Ok((&src[4..need], need))
}

/// Split one complete frame payload off the front of a growable buffer.
///
/// `Ok(None)` means more bytes are needed. An oversized length prefix is an
/// error; the stream cannot be resynchronised after it.
pub fn try_decode_frame_from_buffer(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>, FramingError> {
	if buf.len() < 4 {
		return Ok(None);
	}

	let len = declared_len(buf, max_frame_size)?;
	let need = frame_len_from_payload_len(len);
	if buf.len() < need {
		return Ok(None);
	}

	let mut frame = buf.split_to(need);
	Ok(Some(frame.split_off(4).freeze()))
}
