//! Binary frame codec.
//!
//! A frame is a varuint message-type tag followed by a type-specific
//! payload. This mirrors the wire framing `y-websocket` uses: the same
//! varuint encoding Yjs's `lib0` encoder produces, so a real browser client
//! speaking the Yjs sync/awareness protocols needs no adapter at this layer.

use quill_core::prelude::*;

/// Recognized top-level message types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
	Sync,
	Awareness,
	/// Reserved for server-to-client notifications (permission changes,
	/// etc). Carries its own tag value (always >= 2) since this core does
	/// not interpret the payload.
	HedgeDoc(u64),
}

const TAG_SYNC: u64 = 0;
const TAG_AWARENESS: u64 = 1;

impl MessageType {
	fn from_tag(tag: u64) -> MessageType {
		match tag {
			TAG_SYNC => MessageType::Sync,
			TAG_AWARENESS => MessageType::Awareness,
			other => MessageType::HedgeDoc(other),
		}
	}

	fn tag(self) -> u64 {
		match self {
			MessageType::Sync => TAG_SYNC,
			MessageType::Awareness => TAG_AWARENESS,
			MessageType::HedgeDoc(tag) => tag,
		}
	}
}

/// Writes an unsigned LEB128 varint, matching lib0's `writeVarUint`.
pub fn write_var_u64(out: &mut Vec<u8>, mut value: u64) {
	loop {
		let mut byte = (value & 0x7f) as u8;
		value >>= 7;
		if value != 0 {
			byte |= 0x80;
		}
		out.push(byte);
		if value == 0 {
			break;
		}
	}
}

/// Reads an unsigned LEB128 varint, advancing `input` past the bytes consumed.
pub fn read_var_u64(input: &mut &[u8]) -> ClResult<u64> {
	let mut value: u64 = 0;
	let mut shift = 0u32;
	loop {
		let (&byte, rest) =
			input.split_first().ok_or_else(|| Error::ProtocolError("truncated varuint".into()))?;
		*input = rest;
		value |= u64::from(byte & 0x7f) << shift;
		if byte & 0x80 == 0 {
			return Ok(value);
		}
		shift += 7;
		if shift >= 64 {
			return Err(Error::ProtocolError("varuint too long".into()));
		}
	}
}

/// Writes a varuint-length-prefixed byte array, matching lib0's
/// `writeVarUint8Array`.
pub fn write_var_buf(out: &mut Vec<u8>, buf: &[u8]) {
	write_var_u64(out, buf.len() as u64);
	out.extend_from_slice(buf);
}

/// Reads a varuint-length-prefixed byte array.
pub fn read_var_buf<'a>(input: &mut &'a [u8]) -> ClResult<&'a [u8]> {
	let len = read_var_u64(input)? as usize;
	if input.len() < len {
		return Err(Error::ProtocolError("truncated buffer".into()));
	}
	let (buf, rest) = input.split_at(len);
	*input = rest;
	Ok(buf)
}

/// Encodes a complete outbound frame: tag followed by the raw payload
/// (callers are responsible for any inner framing the payload itself needs,
/// e.g. sync sub-message tags).
pub fn encode_frame(message_type: MessageType, payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(payload.len() + 4);
	write_var_u64(&mut out, message_type.tag());
	out.extend_from_slice(payload);
	out
}

/// Decodes the message-type tag and returns it along with the remaining
/// payload bytes.
pub fn decode_frame(bytes: &[u8]) -> ClResult<(MessageType, &[u8])> {
	let mut rest = bytes;
	let tag = read_var_u64(&mut rest)?;
	Ok((MessageType::from_tag(tag), rest))
}
