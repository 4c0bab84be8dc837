use std::net::SocketAddr;
use std::sync::Arc;

use codec::cip::{self, ForwardOpenReply, ForwardOpenRequest};
use codec::cpf::{self, Item};
use log::{debug, info, warn};
use rand::Rng;

use crate::connection::{Connection, Registry};
use crate::io_image::IoImage;

/// Result of dispatching one Send RR Data CIP service: the CPF item list to
/// reply with, in the order §4.3 requires.
pub struct ExplicitReply {
	pub items: Vec<Item>,
}

impl ExplicitReply {
	fn simple(body: Vec<u8>) -> Self {
		Self { items: vec![Item::NullAddress, Item::UnconnectedData(body)] }
	}
}

/// Dispatch one CIP explicit message carried in an Unconnected Data item.
///
/// `session_handle` keys the connection registry; `tcp_peer`/`udp_bind_addr`
/// provide the addresses Forward Open needs to start the Cyclic Producer and
/// to advertise the adapter's UDP endpoint back to the scanner.
pub fn dispatch(
	session_handle: u32,
	message: &[u8],
	registry: &Registry,
	io_image: &Arc<IoImage>,
	tcp_peer: SocketAddr,
	udp_bind_addr: SocketAddr,
) -> ExplicitReply {
	let header = match cip::decode_explicit_header(message) {
		Ok(h) => h,
		Err(e) => {
			warn!("malformed CIP explicit message: {e}");
			return ExplicitReply::simple(cip::simple_reply(0, cip::GENERAL_STATUS_SERVICE_NOT_SUPPORTED));
		}
	};

	debug!("dispatching CIP service 0x{:02x} for session {session_handle}", header.service);

	match header.service {
		cip::SERVICE_FORWARD_OPEN => forward_open(session_handle, header.body, registry, io_image, tcp_peer, udp_bind_addr),
		cip::SERVICE_FORWARD_CLOSE => forward_close(session_handle, registry),
		cip::SERVICE_GET_ATTRIBUTE_SINGLE => {
			ExplicitReply::simple(mock_attribute_reply(cip::SERVICE_GET_ATTRIBUTE_SINGLE, &[0x00]))
		}
		cip::SERVICE_SET_ATTRIBUTE_SINGLE => ExplicitReply::simple(mock_attribute_reply(cip::SERVICE_SET_ATTRIBUTE_SINGLE, &[])),
		other => {
			warn!("unsupported CIP service 0x{other:02x} for session {session_handle}");
			ExplicitReply::simple(cip::simple_reply(other, cip::GENERAL_STATUS_SERVICE_NOT_SUPPORTED))
		}
	}
}

fn mock_attribute_reply(service: u8, data: &[u8]) -> Vec<u8> {
	let mut reply = cip::simple_reply(service, cip::GENERAL_STATUS_SUCCESS);
	reply.extend_from_slice(data);
	reply
}

fn forward_open(
	session_handle: u32,
	body: &[u8],
	registry: &Registry,
	io_image: &Arc<IoImage>,
	tcp_peer: SocketAddr,
	udp_bind_addr: SocketAddr,
) -> ExplicitReply {
	if registry.has_connection(session_handle) {
		warn!("Forward Open rejected for session {session_handle}: connection already in use");
		return ExplicitReply::simple(cip::simple_reply(cip::SERVICE_FORWARD_OPEN, cip::GENERAL_STATUS_CONNECTION_FAILURE));
	}

	let req = match ForwardOpenRequest::decode(body) {
		Ok(req) => req,
		Err(e) => {
			warn!("malformed Forward Open request: {e}");
			return ExplicitReply::simple(cip::simple_reply(cip::SERVICE_FORWARD_OPEN, cip::GENERAL_STATUS_CONNECTION_FAILURE));
		}
	};

	let o_t_connection_id = fresh_connection_id(registry);
	let peer_addr = SocketAddr::new(tcp_peer.ip(), 2222);

	match Connection::open(&req, o_t_connection_id, udp_bind_addr, peer_addr, io_image.clone()) {
		Ok(connection) => {
			info!(
				"Forward Open succeeded for session {session_handle}: O->T=0x{:08x} T->O=0x{:08x} RPI={}us",
				connection.o_t_connection_id, connection.t_o_connection_id, connection.t_o_rpi_us
			);

			let reply = ForwardOpenReply {
				o_t_connection_id: connection.o_t_connection_id,
				t_o_connection_id: connection.t_o_connection_id,
				connection_serial: connection.connection_serial,
				vendor_id: connection.vendor_id,
				originator_serial: connection.originator_serial,
				o_t_api_us: req.o_t_rpi_us,
				t_o_api_us: req.t_o_rpi_us,
			};

			registry.insert(session_handle, connection);

			ExplicitReply {
				items: vec![
					Item::NullAddress,
					Item::UnconnectedData(reply.encode()),
					Item::SocketAddressInfo { family: cpf::AF_INET, port: udp_bind_addr.port(), addr: 0 },
				],
			}
		}
		Err(e) => {
			warn!("Forward Open failed for session {session_handle}: {e}");
			ExplicitReply::simple(cip::simple_reply(cip::SERVICE_FORWARD_OPEN, cip::GENERAL_STATUS_CONNECTION_FAILURE))
		}
	}
}

fn forward_close(session_handle: u32, registry: &Registry) -> ExplicitReply {
	if let Some(connection) = registry.remove(session_handle) {
		info!("Forward Close for session {session_handle}: stopping cyclic producer");
		connection.close();
	} else {
		warn!("Forward Close for session {session_handle} with no active connection");
	}

	ExplicitReply::simple(cip::simple_reply(cip::SERVICE_FORWARD_CLOSE, cip::GENERAL_STATUS_SUCCESS))
}

/// Pick a pseudo-random, non-zero O→T connection id that isn't already active.
fn fresh_connection_id(registry: &Registry) -> u32 {
	let mut rng = rand::thread_rng();

	loop {
		let candidate: u32 = rng.gen();

		if candidate != 0 && !registry.is_o_t_id_in_use(candidate) {
			return candidate;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn forward_open_body(t_o_id: u32, rpi_us: u32) -> Vec<u8> {
		let mut body = Vec::new();
		body.push(0x13);
		body.push(0x05);
		body.extend_from_slice(&0u32.to_le_bytes());
		body.extend_from_slice(&t_o_id.to_le_bytes());
		body.extend_from_slice(&0x1234u16.to_le_bytes());
		body.extend_from_slice(&0x5678u16.to_le_bytes());
		body.extend_from_slice(&0x9abcdef0u32.to_le_bytes());
		body.push(0x07);
		body.extend_from_slice(&[0u8; 3]);
		body.extend_from_slice(&rpi_us.to_le_bytes());
		body.extend_from_slice(&0x4302u16.to_le_bytes());
		body.extend_from_slice(&rpi_us.to_le_bytes());
		body.extend_from_slice(&0x4302u16.to_le_bytes());
		body.push(0x01);
		body.push(0);
		body
	}

    fn message(service: u8, body: &[u8]) -> Vec<u8> {
        let mut msg = vec![service, 0];
        msg.extend_from_slice(body);
        msg
    }

	#[test]
	fn forward_open_then_close_round_trip() {
		let registry = Registry::new();
		let io_image = Arc::new(IoImage::default());
		let tcp_peer: SocketAddr = "127.0.0.1:12345".parse().unwrap();
		let udp_bind: SocketAddr = "127.0.0.1:0".parse().unwrap();

		let body = forward_open_body(0x01020304, 10_000);
		let msg = message(cip::SERVICE_FORWARD_OPEN, &body);

		let reply = dispatch(1, &msg, &registry, &io_image, tcp_peer, udp_bind);
		assert_eq!(reply.items.len(), 3);
		assert!(registry.has_connection(1));

		let close_msg = message(cip::SERVICE_FORWARD_CLOSE, &[]);
		let reply = dispatch(1, &close_msg, &registry, &io_image, tcp_peer, udp_bind);
		assert_eq!(reply.items.len(), 2);
		assert!(!registry.has_connection(1));
	}

	#[test]
	fn second_forward_open_is_rejected() {
		let registry = Registry::new();
		let io_image = Arc::new(IoImage::default());
		let tcp_peer: SocketAddr = "127.0.0.1:12345".parse().unwrap();
		let udp_bind: SocketAddr = "127.0.0.1:0".parse().unwrap();

		let body = forward_open_body(0x01020304, 10_000);
		let msg = message(cip::SERVICE_FORWARD_OPEN, &body);

		dispatch(1, &msg, &registry, &io_image, tcp_peer, udp_bind);
		let second = dispatch(1, &msg, &registry, &io_image, tcp_peer, udp_bind);

		match &second.items[1] {
			Item::UnconnectedData(bytes) => assert_eq!(bytes[2], cip::GENERAL_STATUS_CONNECTION_FAILURE),
			other => panic!("unexpected item: {other:?}"),
		}

		registry.remove(1).unwrap().close();
	}

	#[test]
	fn unsupported_service_replies_with_status_08() {
		let registry = Registry::new();
		let io_image = Arc::new(IoImage::default());
		let tcp_peer: SocketAddr = "127.0.0.1:12345".parse().unwrap();
		let udp_bind: SocketAddr = "127.0.0.1:0".parse().unwrap();

		let msg = message(0x77, &[]);
		let reply = dispatch(1, &msg, &registry, &io_image, tcp_peer, udp_bind);

		match &reply.items[1] {
			Item::UnconnectedData(bytes) => {
				assert_eq!(bytes[0], 0x77 | cip::REPLY_SERVICE_BIT);
				assert_eq!(bytes[2], cip::GENERAL_STATUS_SERVICE_NOT_SUPPORTED);
			}
			other => panic!("unexpected item: {other:?}"),
		}
	}
}
