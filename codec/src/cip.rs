use bilge::prelude::*;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::error::{DecodeError, DecodeResult};

pub const SERVICE_FORWARD_OPEN: u8 = 0x54;
pub const SERVICE_FORWARD_CLOSE: u8 = 0x4E;
pub const SERVICE_GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
pub const SERVICE_SET_ATTRIBUTE_SINGLE: u8 = 0x10;
pub const REPLY_SERVICE_BIT: u8 = 0x80;

pub const GENERAL_STATUS_SUCCESS: u8 = 0x00;
pub const GENERAL_STATUS_CONNECTION_FAILURE: u8 = 0x01;
pub const GENERAL_STATUS_SERVICE_NOT_SUPPORTED: u8 = 0x08;

/// Priority/tick byte carried by a Forward Open request: a 4-bit priority, a
/// reserved bit, and a 3-bit tick base, packed MSB to LSB in that order.
#[bitsize(8)]
#[derive(DebugBits, Clone, Copy, PartialEq, Eq, FromBits)]
pub struct PriorityTick {
	pub tick_base: u3,
	pub reserved: bool,
	pub priority: u4,
}

/// The part of a CIP explicit message common to every service: the service
/// byte, an EPATH (size in 16-bit words, then that many bytes), and whatever
/// service-specific body follows.
pub struct ExplicitHeader<'a> {
	pub service: u8,
	pub path: &'a [u8],
	pub body: &'a [u8],
}

pub fn decode_explicit_header(bytes: &[u8]) -> DecodeResult<ExplicitHeader<'_>> {
	if bytes.len() < 2 {
		return Err(DecodeError::MalformedItem);
	}

	let service = bytes[0];
	let path_words = bytes[1] as usize;
	let path_len = path_words * 2;

	let path_end = 2usize.checked_add(path_len).ok_or(DecodeError::MalformedItem)?;
	let path = bytes.get(2..path_end).ok_or(DecodeError::MalformedItem)?;
	let body = bytes.get(path_end..).ok_or(DecodeError::MalformedItem)?;

	Ok(ExplicitHeader { service, path, body })
}

/// The Forward Open request body, after the service byte and EPATH have been stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardOpenRequest {
	pub priority_tick: PriorityTick,
	pub timeout_ticks: u8,
	pub o_t_connection_id: u32,
	pub t_o_connection_id: u32,
	pub connection_serial: u16,
	pub vendor_id: u16,
	pub originator_serial: u32,
	pub timeout_multiplier: u8,
	pub o_t_rpi_us: u32,
	pub o_t_network_params: u16,
	pub t_o_rpi_us: u32,
	pub t_o_network_params: u16,
	pub transport_class_trigger: u8,
}

impl ForwardOpenRequest {
	/// Decode from the bytes following the service byte and EPATH. The
	/// connection path itself (up to 40 bytes, `path_size * 2` bytes long) is
	/// not needed by this adapter and is not returned.
	pub fn decode(body: &[u8]) -> DecodeResult<Self> {
		let mut cur = Cursor::new(body);

		let priority_tick = PriorityTick::from(cur.read_u8().map_err(|_| DecodeError::MalformedItem)?);
		let timeout_ticks = cur.read_u8().map_err(|_| DecodeError::MalformedItem)?;
		let o_t_connection_id = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
		let t_o_connection_id = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
		let connection_serial = cur.read_u16::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
		let vendor_id = cur.read_u16::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
		let originator_serial = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
		let timeout_multiplier = cur.read_u8().map_err(|_| DecodeError::MalformedItem)?;

		let mut reserved = [0u8; 3];
		cur.read_exact(&mut reserved).map_err(|_| DecodeError::MalformedItem)?;

		let o_t_rpi_us = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
		let o_t_network_params = cur.read_u16::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
		let t_o_rpi_us = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
		let t_o_network_params = cur.read_u16::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
		let transport_class_trigger = cur.read_u8().map_err(|_| DecodeError::MalformedItem)?;

		// connection path size (words) followed by that many words; not retained.
		let path_words = cur.read_u8().map_err(|_| DecodeError::MalformedItem)? as usize;
		let path_len = path_words * 2;
		let pos = cur.position() as usize;

		if body.len() < pos + path_len {
			return Err(DecodeError::MalformedItem);
		}

		Ok(Self {
			priority_tick,
			timeout_ticks,
			o_t_connection_id,
			t_o_connection_id,
			connection_serial,
			vendor_id,
			originator_serial,
			timeout_multiplier,
			o_t_rpi_us,
			o_t_network_params,
			t_o_rpi_us,
			t_o_network_params,
			transport_class_trigger,
		})
	}
}

/// The Forward Open success reply body (service 0xD4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardOpenReply {
	pub o_t_connection_id: u32,
	pub t_o_connection_id: u32,
	pub connection_serial: u16,
	pub vendor_id: u16,
	pub originator_serial: u32,
	pub o_t_api_us: u32,
	pub t_o_api_us: u32,
}

impl ForwardOpenReply {
	pub fn encode(&self) -> Vec<u8> {
		let mut out = vec![SERVICE_FORWARD_OPEN | REPLY_SERVICE_BIT, 0x00, GENERAL_STATUS_SUCCESS, 0x00];

		out.write_u32::<LittleEndian>(self.o_t_connection_id).unwrap();
		out.write_u32::<LittleEndian>(self.t_o_connection_id).unwrap();
		out.write_u16::<LittleEndian>(self.connection_serial).unwrap();
		out.write_u16::<LittleEndian>(self.vendor_id).unwrap();
		out.write_u32::<LittleEndian>(self.originator_serial).unwrap();
		out.write_u32::<LittleEndian>(self.o_t_api_us).unwrap();
		out.write_u32::<LittleEndian>(self.t_o_api_us).unwrap();

		out.push(0x00); // application reply size, in words
		out.push(0x00); // reserved

		out
	}
}

/// Build a general-status-only reply body for a CIP service, with no extended data.
pub fn simple_reply(service: u8, general_status: u8) -> Vec<u8> {
	vec![service | REPLY_SERVICE_BIT, 0x00, general_status, 0x00]
}

/// Identity fields reported by List Identity. All multi-byte fields here are
/// little-endian except the embedded socket address, which is big-endian.
#[derive(Debug, Clone)]
pub struct IdentityReply {
	pub encapsulation_version: u16,
	pub sin_port: u16,
	pub sin_addr: u32,
	pub vendor_id: u16,
	pub device_type: u16,
	pub product_code: u16,
	pub revision_major: u8,
	pub revision_minor: u8,
	pub status: u16,
	pub serial_number: u32,
	pub product_name: String,
	pub state: u8,
}

impl IdentityReply {
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::new();

		out.write_u16::<LittleEndian>(self.encapsulation_version).unwrap();

		// sockaddr_in: family, port, addr, 8 bytes of zero padding, all big-endian.
		out.write_u16::<BigEndian>(crate::cpf::AF_INET).unwrap();
		out.write_u16::<BigEndian>(self.sin_port).unwrap();
		out.write_u32::<BigEndian>(self.sin_addr).unwrap();
		out.extend_from_slice(&[0u8; 8]);

		out.write_u16::<LittleEndian>(self.vendor_id).unwrap();
		out.write_u16::<LittleEndian>(self.device_type).unwrap();
		out.write_u16::<LittleEndian>(self.product_code).unwrap();
		out.push(self.revision_major);
		out.push(self.revision_minor);
		out.write_u16::<LittleEndian>(self.status).unwrap();
		out.write_u32::<LittleEndian>(self.serial_number).unwrap();

		// SHORT_STRING: length byte then bytes, no terminator.
		let name = self.product_name.as_bytes();
		out.push(name.len() as u8);
		out.extend_from_slice(name);

		out.push(self.state);

		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_request() -> Vec<u8> {
		let mut body = Vec::new();
		body.push(0x13); // priority/tick
		body.push(0x05); // timeout ticks
		body.extend_from_slice(&0u32.to_le_bytes()); // O->T id (ignored on decode, adapter assigns)
		body.extend_from_slice(&0x01020304u32.to_le_bytes()); // T->O id
		body.extend_from_slice(&0x1234u16.to_le_bytes()); // serial
		body.extend_from_slice(&0x5678u16.to_le_bytes()); // vendor
		body.extend_from_slice(&0x9abcdef0u32.to_le_bytes()); // originator serial
		body.push(0x07); // timeout multiplier
		body.extend_from_slice(&[0u8; 3]); // reserved
		body.extend_from_slice(&10000u32.to_le_bytes()); // O->T RPI
		body.extend_from_slice(&0x4302u16.to_le_bytes()); // O->T net params
		body.extend_from_slice(&10000u32.to_le_bytes()); // T->O RPI
		body.extend_from_slice(&0x4302u16.to_le_bytes()); // T->O net params
		body.push(0x01); // transport class/trigger
		body.push(0); // connection path size

		body
	}

	#[test]
	fn decodes_forward_open_request() {
		let body = sample_request();
		let req = ForwardOpenRequest::decode(&body).unwrap();

		assert_eq!(req.t_o_connection_id, 0x01020304);
		assert_eq!(req.connection_serial, 0x1234);
		assert_eq!(req.vendor_id, 0x5678);
		assert_eq!(req.o_t_rpi_us, 10000);
		assert_eq!(req.t_o_rpi_us, 10000);
	}

	#[test]
	fn forward_open_reply_has_odva_layout() {
		let reply = ForwardOpenReply {
			o_t_connection_id: 0xaabbccdd,
			t_o_connection_id: 0x01020304,
			connection_serial: 0x1234,
			vendor_id: 0x5678,
			originator_serial: 0x9abcdef0,
			o_t_api_us: 10000,
			t_o_api_us: 10000,
		};

		let bytes = reply.encode();
		assert_eq!(bytes[0], SERVICE_FORWARD_OPEN | REPLY_SERVICE_BIT);
		assert_eq!(bytes[2], GENERAL_STATUS_SUCCESS);
		assert_eq!(&bytes[4..8], &0xaabbccddu32.to_le_bytes());
		assert_eq!(&bytes[8..12], &0x01020304u32.to_le_bytes());
	}

	#[test]
	fn explicit_header_skips_epath() {
		let bytes = [SERVICE_FORWARD_OPEN, 0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xFF];
		let header = decode_explicit_header(&bytes).unwrap();
		assert_eq!(header.service, SERVICE_FORWARD_OPEN);
		assert_eq!(header.path, &[0xAA, 0xBB, 0xCC, 0xDD]);
		assert_eq!(header.body, &[0xFF]);
	}

	#[test]
	fn priority_tick_bitfield_round_trips() {
		let pt = PriorityTick::from(0x13u8);
		assert_eq!(pt.tick_base().value(), 0x3);
		assert_eq!(pt.priority().value(), 0x1);
	}
}
