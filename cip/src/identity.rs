use byteorder::{LittleEndian, WriteBytesExt as _};

use codec::cip::IdentityReply;

pub const ENCAPSULATION_VERSION: u16 = 1;

const LIST_SERVICES_ITEM_TYPE: u16 = 0x0100;
const LIST_IDENTITY_ITEM_TYPE: u16 = 0x000C;
const LIST_SERVICES_CAPABILITY_FLAGS: u16 = 0x0120;
const SERVICE_NAME: &str = "Communications";
const SERVICE_NAME_FIELD_LEN: usize = 16;

/// Fixed, simulated device identity. The richer CIP object model (real
/// class/instance/attribute dictionaries) is out of scope; this is the
/// minimal set of fields List Identity reports.
#[derive(Clone)]
pub struct DeviceIdentity {
	pub vendor_id: u16,
	pub device_type: u16,
	pub product_code: u16,
	pub revision_major: u8,
	pub revision_minor: u8,
	pub serial_number: u32,
	pub product_name: String,
	pub status: u16,
	pub state: u8,
}

impl DeviceIdentity {
	pub fn simulated() -> Self {
		Self {
			vendor_id: 1,
			device_type: 0x0C, // Communications Adapter
			product_code: 1,
			revision_major: 1,
			revision_minor: 0,
			serial_number: 0x0000_2A2A,
			product_name: "CIP Adapter".to_string(),
			status: 0,
			state: 3, // operational
		}
	}
}

/// Build the List Services reply payload (the bytes following the ENIP
/// header): item count 1, a single fixed capability item.
pub fn list_services_reply() -> Vec<u8> {
	let mut name = vec![0u8; SERVICE_NAME_FIELD_LEN];
	name[..SERVICE_NAME.len()].copy_from_slice(SERVICE_NAME.as_bytes());

	let mut item_payload = Vec::new();
	item_payload.write_u16::<LittleEndian>(ENCAPSULATION_VERSION).unwrap();
	item_payload.write_u16::<LittleEndian>(LIST_SERVICES_CAPABILITY_FLAGS).unwrap();
	item_payload.extend_from_slice(&name);

	let mut out = Vec::new();
	out.write_u16::<LittleEndian>(1).unwrap();
	out.write_u16::<LittleEndian>(LIST_SERVICES_ITEM_TYPE).unwrap();
	out.write_u16::<LittleEndian>(item_payload.len() as u16).unwrap();
	out.extend_from_slice(&item_payload);

	out
}

/// Build the List Identity reply payload: a single item carrying
/// encapsulation version, a big-endian socket address, and identity fields.
pub fn list_identity_reply(identity: &DeviceIdentity, sin_port: u16, sin_addr: u32) -> Vec<u8> {
	let reply = IdentityReply {
		encapsulation_version: ENCAPSULATION_VERSION,
		sin_port,
		sin_addr,
		vendor_id: identity.vendor_id,
		device_type: identity.device_type,
		product_code: identity.product_code,
		revision_major: identity.revision_major,
		revision_minor: identity.revision_minor,
		status: identity.status,
		serial_number: identity.serial_number,
		product_name: identity.product_name.clone(),
		state: identity.state,
	};

	let item_payload = reply.encode();

	let mut out = Vec::new();
	out.write_u16::<LittleEndian>(1).unwrap();
	out.write_u16::<LittleEndian>(LIST_IDENTITY_ITEM_TYPE).unwrap();
	out.write_u16::<LittleEndian>(item_payload.len() as u16).unwrap();
	out.extend_from_slice(&item_payload);

	out
}

/// List Interfaces always replies with an empty item list in this design.
pub fn list_interfaces_reply() -> Vec<u8> {
	let mut out = Vec::new();
	out.write_u16::<LittleEndian>(0).unwrap();
	out
}
