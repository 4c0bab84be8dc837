use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{DecodeError, DecodeResult};

pub const TYPE_NULL_ADDRESS: u16 = 0x0000;
pub const TYPE_UNCONNECTED_DATA: u16 = 0x00B2;
pub const TYPE_CONNECTED_DATA: u16 = 0x00B1;
pub const TYPE_SOCKET_ADDRESS_INFO_OT: u16 = 0x8000;
pub const TYPE_SEQUENCED_ADDRESS: u16 = 0x8002;

pub const AF_INET: u16 = 2;

/// A Common Packet Format item. Order within a `Vec<Item>` is semantically
/// significant: item lists are encoded and decoded in the order they're stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
	NullAddress,
	UnconnectedData(Vec<u8>),
	/// O→T socket address info, sockaddr_in fields big-endian on the wire.
	SocketAddressInfo { family: u16, port: u16, addr: u32 },
	SequencedAddress { connection_id: u32, encap_sequence: u32 },
	ConnectedData { cip_sequence: u16, payload: Vec<u8> },
}

impl Item {
	fn type_id(&self) -> u16 {
		match self {
			Item::NullAddress => TYPE_NULL_ADDRESS,
			Item::UnconnectedData(_) => TYPE_UNCONNECTED_DATA,
			Item::SocketAddressInfo { .. } => TYPE_SOCKET_ADDRESS_INFO_OT,
			Item::SequencedAddress { .. } => TYPE_SEQUENCED_ADDRESS,
			Item::ConnectedData { .. } => TYPE_CONNECTED_DATA,
		}
	}

	fn encode_payload(&self, out: &mut Vec<u8>) {
		match self {
			Item::NullAddress => {}
			Item::UnconnectedData(bytes) => out.extend_from_slice(bytes),
			Item::SocketAddressInfo { family, port, addr } => {
				out.write_u16::<BigEndian>(*family).unwrap();
				out.write_u16::<BigEndian>(*port).unwrap();
				out.write_u32::<BigEndian>(*addr).unwrap();
				out.extend_from_slice(&[0u8; 8]);
			}
			Item::SequencedAddress { connection_id, encap_sequence } => {
				out.write_u32::<LittleEndian>(*connection_id).unwrap();
				out.write_u32::<LittleEndian>(*encap_sequence).unwrap();
			}
			Item::ConnectedData { cip_sequence, payload } => {
				out.write_u16::<LittleEndian>(*cip_sequence).unwrap();
				out.extend_from_slice(payload);
			}
		}
	}

	fn payload_len(&self) -> u16 {
		match self {
			Item::NullAddress => 0,
			Item::UnconnectedData(bytes) => bytes.len() as u16,
			Item::SocketAddressInfo { .. } => 16,
			Item::SequencedAddress { .. } => 8,
			Item::ConnectedData { payload, .. } => 2 + payload.len() as u16,
		}
	}
}

/// Encode an ordered item list, preserving order.
pub fn encode_cpf(items: &[Item]) -> Vec<u8> {
	let mut out = Vec::new();

	out.write_u16::<LittleEndian>(items.len() as u16).unwrap();

	for item in items {
		out.write_u16::<LittleEndian>(item.type_id()).unwrap();
		out.write_u16::<LittleEndian>(item.payload_len()).unwrap();
		item.encode_payload(&mut out);
	}

	out
}

/// Decode an item count followed by that many `(type, length, payload)` items.
pub fn decode_cpf(bytes: &[u8]) -> DecodeResult<Vec<Item>> {
	let mut cur = Cursor::new(bytes);

	let count = cur.read_u16::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;

	let mut items = Vec::with_capacity(count as usize);

	for _ in 0..count {
		let type_id = cur.read_u16::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
		let len = cur.read_u16::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)? as usize;

		let start = cur.position() as usize;
		let end = start.checked_add(len).ok_or(DecodeError::MalformedItem)?;

		let payload = bytes.get(start..end).ok_or(DecodeError::MalformedItem)?;
		cur.set_position(end as u64);

		items.push(decode_item(type_id, payload)?);
	}

	Ok(items)
}

fn decode_item(type_id: u16, payload: &[u8]) -> DecodeResult<Item> {
	match type_id {
		TYPE_NULL_ADDRESS => Ok(Item::NullAddress),
		TYPE_UNCONNECTED_DATA => Ok(Item::UnconnectedData(payload.to_vec())),
		TYPE_SOCKET_ADDRESS_INFO_OT => {
			if payload.len() < 8 {
				return Err(DecodeError::MalformedItem);
			}

			let mut cur = Cursor::new(payload);
			let family = cur.read_u16::<BigEndian>().map_err(|_| DecodeError::MalformedItem)?;
			let port = cur.read_u16::<BigEndian>().map_err(|_| DecodeError::MalformedItem)?;
			let addr = cur.read_u32::<BigEndian>().map_err(|_| DecodeError::MalformedItem)?;

			Ok(Item::SocketAddressInfo { family, port, addr })
		}
		TYPE_SEQUENCED_ADDRESS => {
			if payload.len() < 8 {
				return Err(DecodeError::MalformedItem);
			}

			let mut cur = Cursor::new(payload);
			let connection_id = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
			let encap_sequence = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;

			Ok(Item::SequencedAddress { connection_id, encap_sequence })
		}
		TYPE_CONNECTED_DATA => {
			if payload.len() < 2 {
				return Err(DecodeError::MalformedItem);
			}

			let mut cur = Cursor::new(payload);
			let cip_sequence = cur.read_u16::<LittleEndian>().map_err(|_| DecodeError::MalformedItem)?;
			let payload = payload[2..].to_vec();

			Ok(Item::ConnectedData { cip_sequence, payload })
		}
		_ => Err(DecodeError::MalformedItem),
	}
}

/// Find the single `UnconnectedData` payload in a two-item explicit request
/// (Null Address followed by Unconnected Data), per the ENIP convention this
/// adapter relies on.
pub fn unconnected_data(items: &[Item]) -> DecodeResult<&[u8]> {
	items
		.iter()
		.find_map(|i| match i {
			Item::UnconnectedData(bytes) => Some(bytes.as_slice()),
			_ => None,
		})
		.ok_or(DecodeError::MissingItem)
}
