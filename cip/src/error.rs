use core::fmt;

/// Session/connection-level faults, distinct from the lower-level codec
/// errors in `codec::DecodeError`. These map onto ENIP status codes or CIP
/// general status bytes at the point a reply is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
	/// The command arrived for a session handle that doesn't match the one
	/// this adapter assigned (or no session has been registered yet).
	InvalidSessionHandle,
	/// A command other than Register/List* arrived before Register Session.
	UnsupportedCommand,
	/// A second Forward Open arrived while a connection was already active.
	ConnectionInUse,
	/// The Cyclic Producer failed to start (e.g. the UDP socket could not be bound).
	ConnectionFailure,
}

impl fmt::Display for SessionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SessionError::InvalidSessionHandle => write!(f, "invalid or unregistered session handle"),
			SessionError::UnsupportedCommand => write!(f, "command not permitted in the current session state"),
			SessionError::ConnectionInUse => write!(f, "a CIP connection is already active on this session"),
			SessionError::ConnectionFailure => write!(f, "failed to establish the cyclic producer"),
		}
	}
}

impl std::error::Error for SessionError {}
