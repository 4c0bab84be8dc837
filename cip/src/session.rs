use std::net::SocketAddr;
use std::sync::Arc;

use codec::cpf;
use codec::enip::{self, Header};
use log::{debug, info, warn};

use crate::connection::Registry;
use crate::error::SessionError;
use crate::explicit;
use crate::identity::{self, DeviceIdentity};
use crate::io_image::IoImage;

const REGISTER_SESSION_REPLY: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Send RR Data's interface handle (u32) + timeout (u16) prefix, present on
/// both the request and the reply before the CPF item list.
const SEND_RR_DATA_PREFIX_LEN: usize = 6;

/// One TCP connection's ENIP command/session state, from Register Session
/// through to whatever connection Forward Open negotiated on top of it.
///
/// A session owns at most one CIP connection (and therefore at most one
/// Cyclic Producer) for the lifetime of this build; the registry it wraps
/// is ready to track more without reshaping this type.
pub struct Session {
	handle: Option<u32>,
	identity: DeviceIdentity,
	registry: Arc<Registry>,
	io_image: Arc<IoImage>,
	tcp_peer: SocketAddr,
	udp_bind_addr: SocketAddr,
}

impl Session {
	/// `registry` is shared across every session this process serves, so the
	/// session-handle counter it owns stays monotonic across connections
	/// rather than resetting each time a scanner reconnects.
	pub fn new(registry: Arc<Registry>, tcp_peer: SocketAddr, udp_bind_addr: SocketAddr) -> Self {
		Self {
			handle: None,
			identity: DeviceIdentity::simulated(),
			registry,
			io_image: Arc::new(IoImage::default()),
			tcp_peer,
			udp_bind_addr,
		}
	}

	/// Handle one complete ENIP frame, returning the encoded reply frame.
	pub fn handle_frame(&mut self, header: &Header, payload: &[u8]) -> Vec<u8> {
		match header.command {
			enip::CMD_LIST_SERVICES => {
				debug!("List Services");
				self.reply(header, enip::STATUS_SUCCESS, &identity::list_services_reply())
			}
			enip::CMD_LIST_IDENTITY => {
				debug!("List Identity");
				let body = identity::list_identity_reply(&self.identity, self.udp_bind_addr.port(), 0);
				self.reply(header, enip::STATUS_SUCCESS, &body)
			}
			enip::CMD_LIST_INTERFACES => {
				debug!("List Interfaces");
				self.reply(header, enip::STATUS_SUCCESS, &identity::list_interfaces_reply())
			}
			enip::CMD_REGISTER_SESSION => self.register_session(header),
			enip::CMD_UNREGISTER_SESSION => self.unregister_session(header),
			enip::CMD_SEND_RR_DATA if self.handle.is_some() => self.send_rr_data(header, payload),
			enip::CMD_SEND_UNIT_DATA => {
				warn!("Send Unit Data is not supported by this adapter");
				self.reply(header, enip::STATUS_INVALID_COMMAND, &[])
			}
			other => {
				let err = SessionError::UnsupportedCommand;
				warn!("command 0x{other:04x} rejected: {err}");
				self.reply(header, enip::STATUS_INVALID_COMMAND, &[])
			}
		}
	}

	fn register_session(&mut self, header: &Header) -> Vec<u8> {
		let handle = self.registry.register_session();
		self.handle = Some(handle);
		info!("session {handle} registered for {}", self.tcp_peer);

		let mut reply_header = header.reply_for(enip::CMD_REGISTER_SESSION, enip::STATUS_SUCCESS, &REGISTER_SESSION_REPLY);
		reply_header.session_handle = handle;
		enip::encode_frame(reply_header, &REGISTER_SESSION_REPLY)
	}

	fn unregister_session(&mut self, header: &Header) -> Vec<u8> {
		if let Some(handle) = self.handle {
			if header.session_handle != handle {
				let err = SessionError::InvalidSessionHandle;
				warn!("Unregister Session rejected for {}: {err} (expected {handle}, got {})", self.tcp_peer, header.session_handle);
				return self.reply(header, enip::STATUS_INVALID_SESSION_HANDLE, &[]);
			}

			self.handle = None;
			info!("session {handle} unregistered");

			if let Some(connection) = self.registry.remove(handle) {
				connection.close();
			}
		}

		enip::encode_frame(header.reply_for(enip::CMD_UNREGISTER_SESSION, enip::STATUS_SUCCESS, &[]), &[])
	}

	fn send_rr_data(&mut self, header: &Header, payload: &[u8]) -> Vec<u8> {
		let handle = self.handle.expect("send_rr_data only dispatched once a session is registered");

		if header.session_handle != handle {
			let err = SessionError::InvalidSessionHandle;
			warn!("Send RR Data rejected for {}: {err} (expected {handle}, got {})", self.tcp_peer, header.session_handle);
			return self.reply(header, enip::STATUS_INVALID_SESSION_HANDLE, &[]);
		}

		// Interface handle (u32, always 0) then timeout (u16) precede the CPF
		// item list proper.
		if payload.len() < SEND_RR_DATA_PREFIX_LEN {
			warn!("Send RR Data payload too short for interface handle/timeout");
			return self.reply(header, enip::STATUS_INVALID_COMMAND, &[]);
		}

		let cpf_payload = &payload[SEND_RR_DATA_PREFIX_LEN..];

		let items = match cpf::decode_cpf(cpf_payload) {
			Ok(items) => items,
			Err(e) => {
				warn!("malformed Send RR Data CPF payload: {e}");
				return self.reply(header, enip::STATUS_INVALID_COMMAND, &[]);
			}
		};

		let message = match cpf::unconnected_data(&items) {
			Ok(bytes) => bytes,
			Err(e) => {
				warn!("Send RR Data missing Unconnected Data item: {e}");
				return self.reply(header, enip::STATUS_INVALID_COMMAND, &[]);
			}
		};

		let explicit::ExplicitReply { items: reply_items } =
			explicit::dispatch(handle, message, &self.registry, &self.io_image, self.tcp_peer, self.udp_bind_addr);

		let mut body = vec![0u8; SEND_RR_DATA_PREFIX_LEN];
		body.extend_from_slice(&cpf::encode_cpf(&reply_items));
		self.reply(header, enip::STATUS_SUCCESS, &body)
	}

	fn reply(&self, header: &Header, status: u32, body: &[u8]) -> Vec<u8> {
		let mut reply_header = header.reply_for(header.command, status, body);
		reply_header.session_handle = self.handle.unwrap_or(header.session_handle);
		enip::encode_frame(reply_header, body)
	}

	/// Tear down any connection still open when the TCP connection drops
	/// without a clean Unregister Session.
	pub fn shutdown(self) {
		if let Some(handle) = self.handle {
			if let Some(connection) = self.registry.remove(handle) {
				info!("session {handle} torn down on disconnect");
				connection.close();
			}
		}
	}
}
