use core::fmt;

/// Errors that can arise while decoding an ENIP/CIP byte stream.
///
/// These are codec-level faults only; the session layer is responsible for
/// turning them into the appropriate ENIP status code or CIP general status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
	/// Fewer than 24 bytes were available for an encapsulation header.
	ShortFrame,
	/// A CPF item or CIP record was truncated or carried an unexpected length.
	MalformedItem,
	/// A required item type was missing from a context that demands it.
	MissingItem,
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DecodeError::ShortFrame => write!(f, "frame shorter than a complete encapsulation header"),
			DecodeError::MalformedItem => write!(f, "malformed or truncated item"),
			DecodeError::MissingItem => write!(f, "required item missing from item list"),
		}
	}
}

impl std::error::Error for DecodeError {}

pub type DecodeResult<T> = Result<T, DecodeError>;
