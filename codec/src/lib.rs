//! Byte-accurate encode/decode for the EtherNet/IP encapsulation layer and
//! the slice of CIP explicit messages this adapter understands.
//!
//! Every wire record is a plain value type with explicit field-by-field
//! encode/decode; nothing here relies on in-memory struct layout.

pub mod cip;
pub mod cpf;
pub mod enip;
pub mod error;

pub use error::{DecodeError, DecodeResult};
