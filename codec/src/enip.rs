use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::warn;
use std::io::{Cursor, Read};

use crate::error::{DecodeError, DecodeResult};

pub const HEADER_LEN: usize = 24;

pub const CMD_NOP: u16 = 0x0000;
pub const CMD_LIST_SERVICES: u16 = 0x0004;
pub const CMD_LIST_IDENTITY: u16 = 0x0063;
pub const CMD_LIST_INTERFACES: u16 = 0x0064;
pub const CMD_REGISTER_SESSION: u16 = 0x0065;
pub const CMD_UNREGISTER_SESSION: u16 = 0x0066;
pub const CMD_SEND_RR_DATA: u16 = 0x006F;
pub const CMD_SEND_UNIT_DATA: u16 = 0x0070;

pub const STATUS_SUCCESS: u32 = 0x0000;
pub const STATUS_INVALID_COMMAND: u32 = 0x0001;
pub const STATUS_INVALID_SESSION_HANDLE: u32 = 0x0064;

/// The 24-byte ENIP encapsulation header. Every field is little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
	pub command: u16,
	/// Length of the payload that follows the header, not including the header itself.
	pub length: u16,
	pub session_handle: u32,
	pub status: u32,
	/// Opaque bytes, echoed verbatim from request to reply. Never reinterpreted.
	pub sender_context: [u8; 8],
	pub options: u32,
}

impl Header {
	pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
		if bytes.len() < HEADER_LEN {
			return Err(DecodeError::ShortFrame);
		}

		let mut cur = Cursor::new(bytes);

		let command = cur.read_u16::<LittleEndian>().map_err(|_| DecodeError::ShortFrame)?;
		let length = cur.read_u16::<LittleEndian>().map_err(|_| DecodeError::ShortFrame)?;
		let session_handle = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::ShortFrame)?;
		let status = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::ShortFrame)?;

		let mut sender_context = [0u8; 8];
		cur.read_exact(&mut sender_context).map_err(|_| DecodeError::ShortFrame)?;

		let options = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::ShortFrame)?;

		Ok(Self { command, length, session_handle, status, sender_context, options })
	}

	pub fn encode(&self, out: &mut Vec<u8>) {
		out.write_u16::<LittleEndian>(self.command).unwrap();
		out.write_u16::<LittleEndian>(self.length).unwrap();
		out.write_u32::<LittleEndian>(self.session_handle).unwrap();
		out.write_u32::<LittleEndian>(self.status).unwrap();
		out.extend_from_slice(&self.sender_context);
		out.write_u32::<LittleEndian>(self.options).unwrap();
	}

	/// Build a reply header with the same session handle and sender context as `self`,
	/// the given status, and a length matching `payload`.
	pub fn reply_for(&self, command: u16, status: u32, payload: &[u8]) -> Self {
		Self {
			command,
			length: payload.len() as u16,
			session_handle: self.session_handle,
			status,
			sender_context: self.sender_context,
			options: 0,
		}
	}
}

/// Encode a full ENIP frame (header + payload). Sets `header.length` to `payload.len()`.
pub fn encode_frame(mut header: Header, payload: &[u8]) -> Vec<u8> {
	header.length = payload.len() as u16;

	let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
	header.encode(&mut out);
	out.extend_from_slice(payload);
	out
}

/// Decode a header plus a payload slice known to have the declared length available.
/// Trailing bytes beyond `header.length` are logged, not treated as an error.
pub fn decode_frame(bytes: &[u8]) -> DecodeResult<(Header, &[u8])> {
	let header = Header::decode(bytes)?;

	let end = HEADER_LEN + header.length as usize;
	if bytes.len() < end {
		return Err(DecodeError::ShortFrame);
	}

	if bytes.len() > end {
		warn!("trailing {} byte(s) after declared ENIP payload length", bytes.len() - end);
	}

	Ok((header, &bytes[HEADER_LEN..end]))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> (Header, Vec<u8>) {
		let header = Header {
			command: CMD_REGISTER_SESSION,
			length: 4,
			session_handle: 0,
			status: 0,
			sender_context: [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88],
			options: 0,
		};

		(header, vec![0x01, 0x00, 0x00, 0x00])
	}

	#[test]
	fn round_trip() {
		let (header, payload) = sample();
		let bytes = encode_frame(header, &payload);
		let (decoded, decoded_payload) = decode_frame(&bytes).unwrap();

		assert_eq!(decoded, header);
		assert_eq!(decoded_payload, payload.as_slice());
	}

	#[test]
	fn short_frame_is_rejected() {
		assert_eq!(Header::decode(&[0u8; 10]), Err(DecodeError::ShortFrame));
	}

	#[test]
	fn register_session_literal_bytes() {
		let bytes: &[u8] = &[
			0x65, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x00, 0x00, 0x00,
			0x00, 0x01, 0x00, 0x00, 0x00,
		];

		let (header, payload) = decode_frame(bytes).unwrap();
		assert_eq!(header.command, CMD_REGISTER_SESSION);
		assert_eq!(header.length, 4);
		assert_eq!(payload, &[0x01, 0x00, 0x00, 0x00]);
	}

	#[test]
	fn reply_for_echoes_context_and_handle() {
		let (header, _) = sample();
		let reply = header.reply_for(CMD_REGISTER_SESSION, STATUS_SUCCESS, &[1, 0, 0, 0]);
		assert_eq!(reply.sender_context, header.sender_context);
		assert_eq!(reply.session_handle, header.session_handle);
		assert_eq!(reply.status, STATUS_SUCCESS);
	}
}
