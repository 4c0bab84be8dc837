use std::sync::RwLock;

/// Default payload size of the Connected Data item this adapter produces.
/// Chosen to comfortably fit a handful of simulated I/O points without
/// fragmentation, which is explicitly out of scope.
pub const DEFAULT_IMAGE_SIZE: usize = 32;

/// The application-level I/O memory: two opaque byte buffers, produced-data
/// (to the scanner) and consumed-data (from the scanner). Nothing upstream of
/// this adapter exists in this build, so `consumed` is never read and
/// `produced` is only ever read by the Cyclic Producer; the single-writer /
/// single-reader discipline is enforced by the lock rather than assumed.
pub struct IoImage {
	produced: RwLock<Vec<u8>>,
	consumed: RwLock<Vec<u8>>,
}

impl IoImage {
	pub fn new(size: usize) -> Self {
		Self { produced: RwLock::new(vec![0u8; size]), consumed: RwLock::new(vec![0u8; size]) }
	}

	/// Snapshot the produced-data buffer for inclusion in one Connected Data item.
	pub fn read_produced(&self) -> Vec<u8> {
		self.produced.read().expect("produced-data lock poisoned").clone()
	}

	/// Overwrite the produced-data buffer. Exposed for the external source
	/// that owns this buffer's contents; exercised directly by tests here
	/// since no such source exists in this build.
	pub fn write_produced(&self, data: &[u8]) {
		let mut guard = self.produced.write().expect("produced-data lock poisoned");
		let len = guard.len().min(data.len());
		guard[..len].copy_from_slice(&data[..len]);
	}

	pub fn write_consumed(&self, data: &[u8]) {
		let mut guard = self.consumed.write().expect("consumed-data lock poisoned");
		let len = guard.len().min(data.len());
		guard[..len].copy_from_slice(&data[..len]);
	}

	pub fn read_consumed(&self) -> Vec<u8> {
		self.consumed.read().expect("consumed-data lock poisoned").clone()
	}
}

impl Default for IoImage {
	fn default() -> Self {
		Self::new(DEFAULT_IMAGE_SIZE)
	}
}
