use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use codec::cip::ForwardOpenRequest;

use crate::error::SessionError;
use crate::io_image::IoImage;
use crate::producer::Producer;

/// Everything negotiated by a successful Forward Open, plus the running
/// Cyclic Producer. Owned exclusively by the session thread that created it;
/// the producer thread owns only the sequence counters inside `Producer`
/// after spawn (see `producer::Counters`).
pub struct Connection {
	pub o_t_connection_id: u32,
	pub t_o_connection_id: u32,
	pub o_t_rpi_us: u32,
	pub t_o_rpi_us: u32,
	pub connection_serial: u16,
	pub vendor_id: u16,
	pub originator_serial: u32,
	pub timeout_multiplier: u8,
	producer: Producer,
}

impl Connection {
	/// Negotiate a new connection from a decoded Forward Open request,
	/// assigning a fresh O→T connection id and spawning the Cyclic Producer.
	/// On producer start failure, no `Connection` is constructed.
	pub fn open(
		req: &ForwardOpenRequest,
		o_t_connection_id: u32,
		bind_addr: SocketAddr,
		peer_addr: SocketAddr,
		io_image: Arc<IoImage>,
	) -> Result<Self, SessionError> {
		let producer = Producer::spawn(bind_addr, peer_addr, req.t_o_connection_id, req.t_o_rpi_us, io_image)
			.map_err(|_| SessionError::ConnectionFailure)?;

		Ok(Self {
			o_t_connection_id,
			t_o_connection_id: req.t_o_connection_id,
			o_t_rpi_us: req.o_t_rpi_us,
			t_o_rpi_us: req.t_o_rpi_us,
			connection_serial: req.connection_serial,
			vendor_id: req.vendor_id,
			originator_serial: req.originator_serial,
			timeout_multiplier: req.timeout_multiplier,
			producer,
		})
	}

	/// Current encapsulation sequence count, for diagnostics/tests only.
	pub fn producer_sequence(&self) -> u32 {
		self.producer.current_sequence()
	}

	/// Stop and join the Cyclic Producer thread. Called from Forward Close
	/// and from every session teardown path, so a connection never outlives
	/// the socket it was negotiated over.
	pub fn close(self) {
		self.producer.stop();
	}
}

/// Tracks the session-handle counter and the (at most one, in this build)
/// active connection per session. Reified as a map rather than a single
/// `Option<Connection>` so the single-session assumption can be lifted later
/// without reshaping this type.
pub struct Registry {
	next_handle: Mutex<u32>,
	connections: Mutex<HashMap<u32, Connection>>,
}

impl Registry {
	pub fn new() -> Self {
		Self { next_handle: Mutex::new(0), connections: Mutex::new(HashMap::new()) }
	}

	/// Assign the next unused, non-zero session handle.
	pub fn register_session(&self) -> u32 {
		let mut next = self.next_handle.lock().expect("session handle counter lock poisoned");
		*next = next.wrapping_add(1).max(1);
		*next
	}

	pub fn has_connection(&self, session_handle: u32) -> bool {
		self.connections.lock().expect("connection registry lock poisoned").contains_key(&session_handle)
	}

	pub fn insert(&self, session_handle: u32, connection: Connection) {
		self.connections.lock().expect("connection registry lock poisoned").insert(session_handle, connection);
	}

	/// Remove and return the connection for `session_handle`, if any. The
	/// caller is responsible for calling `Connection::close` on it.
	pub fn remove(&self, session_handle: u32) -> Option<Connection> {
		self.connections.lock().expect("connection registry lock poisoned").remove(&session_handle)
	}

	/// A currently-active O→T connection id, used to avoid collisions when
	/// assigning a new one.
	pub fn is_o_t_id_in_use(&self, id: u32) -> bool {
		self.connections
			.lock()
			.expect("connection registry lock poisoned")
			.values()
			.any(|c| c.o_t_connection_id == id)
	}
}

impl Default for Registry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn session_handles_are_unique_and_nonzero() {
		let registry = Registry::new();
		let a = registry.register_session();
		let b = registry.register_session();
		assert_ne!(a, 0);
		assert_ne!(b, 0);
		assert_ne!(a, b);
	}
}
