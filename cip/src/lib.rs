//! Session, explicit-message, and cyclic-producer logic for a CIP adapter:
//! everything above the EtherNet/IP wire codec and below the TCP/UDP listen
//! loops in the adapter binary.

pub mod connection;
pub mod error;
pub mod explicit;
pub mod identity;
pub mod io_image;
pub mod producer;
pub mod session;

pub use connection::{Connection, Registry};
pub use error::SessionError;
pub use io_image::IoImage;
pub use session::Session;
