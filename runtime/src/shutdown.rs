use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use utils::error::Result;

/// A process-wide stop flag, tripped by Ctrl+C and polled by the accept loop
/// and any thread that needs to notice shutdown between blocking calls.
#[derive(Clone)]
pub struct Shutdown {
	flag: Arc<AtomicBool>,
}

impl Shutdown {
	/// Install the Ctrl+C handler. Must be called once, before any thread
	/// starts checking `requested()`.
	pub fn install() -> Result<Self> {
		let flag = Arc::new(AtomicBool::new(false));
		let handler_flag = flag.clone();

		ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
			.map_err(|err| log::error!("failed to install Ctrl+C handler: {err}"))?;

		Ok(Self { flag })
	}

	pub fn requested(&self) -> bool {
		self.flag.load(Ordering::SeqCst)
	}

	/// A `Shutdown` that never fires, for tests that drive a connection
	/// handler end-to-end without installing a process-wide Ctrl+C handler.
	pub fn inert() -> Self {
		Self { flag: Arc::new(AtomicBool::new(false)) }
	}
}
