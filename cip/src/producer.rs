use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use codec::cpf::{self, Item};
use log::{info, warn};

use crate::io_image::IoImage;

/// Sequence counters are split out so the session thread can read the latest
/// value for diagnostics while the producer thread remains the sole writer.
#[derive(Default)]
pub struct Counters {
	encap_sequence: AtomicU32,
}

const SEQUENCE_MASK: u32 = 0x0FFF_FFFF;

impl Counters {
	/// The sequence of the *next* packet to be sent; starts at 1 per connection.
	fn next(&self) -> u32 {
		// Use compare-and-swap so a concurrent reader never observes 0.
		loop {
			let current = self.encap_sequence.load(Ordering::Relaxed);
			let wrapped = (current + 1) & SEQUENCE_MASK;
			let next = if wrapped == 0 { 1 } else { wrapped };

			if self.encap_sequence.compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
				return next;
			}
		}
	}

	pub fn current(&self) -> u32 {
		self.encap_sequence.load(Ordering::Relaxed)
	}
}

struct Stop {
	flag: Mutex<bool>,
	cvar: Condvar,
}

impl Stop {
	fn new() -> Self {
		Self { flag: Mutex::new(false), cvar: Condvar::new() }
	}

	/// Sleep for `dur`, waking early if `signal` is called. Returns `true` if
	/// woken by the stop signal rather than by timeout.
	fn sleep(&self, dur: Duration) -> bool {
		let guard = self.flag.lock().expect("producer stop lock poisoned");
		let (guard, _) = self.cvar.wait_timeout_while(guard, dur, |stopped| !*stopped).expect("producer stop lock poisoned");
		*guard
	}

	fn signal(&self) {
		*self.flag.lock().expect("producer stop lock poisoned") = true;
		self.cvar.notify_all();
	}
}

/// A single Cyclic Producer thread for one CIP I/O connection. Emits Class-1
/// UDP packets at the negotiated T→O RPI until stopped, the socket errors
/// fatally, or the session that owns it tears it down.
pub struct Producer {
	stop: Arc<Stop>,
	counters: Arc<Counters>,
	handle: Option<JoinHandle<()>>,
}

const MAX_TRANSIENT_RETRIES: u32 = 5;

impl Producer {
	/// Bind a UDP socket on `bind_addr` and spawn the producer thread sending
	/// to `peer_addr`. Binding failure is the `ConnectionFailure` case Forward
	/// Open must report without registering a connection.
	pub fn spawn(
		bind_addr: SocketAddr,
		peer_addr: SocketAddr,
		t_o_connection_id: u32,
		t_o_rpi_us: u32,
		io_image: Arc<IoImage>,
	) -> std::io::Result<Self> {
		let socket = UdpSocket::bind(bind_addr)?;
		socket.connect(peer_addr)?;

		let stop = Arc::new(Stop::new());
		let counters = Arc::new(Counters::default());

		let thread_stop = stop.clone();
		let thread_counters = counters.clone();

		let rpi = Duration::from_micros(t_o_rpi_us.max(1) as u64);

		let handle = thread::spawn(move || run(socket, t_o_connection_id, rpi, thread_stop, thread_counters, io_image));

		Ok(Self { stop, counters, handle: Some(handle) })
	}

	pub fn current_sequence(&self) -> u32 {
		self.counters.current()
	}

	/// Signal the producer to stop and join its thread. Idempotent: safe to
	/// call once, consuming `self`.
	pub fn stop(mut self) {
		self.stop.signal();

		if let Some(handle) = self.handle.take() {
			let _ = handle.join();
		}
	}
}

impl Drop for Producer {
	fn drop(&mut self) {
		self.stop.signal();

		if let Some(handle) = self.handle.take() {
			let _ = handle.join();
		}
	}
}

fn run(socket: UdpSocket, t_o_connection_id: u32, rpi: Duration, stop: Arc<Stop>, counters: Arc<Counters>, io_image: Arc<IoImage>) {
	let mut transient_failures = 0u32;

	loop {
		if stop.sleep(rpi) {
			info!("cyclic producer for connection 0x{t_o_connection_id:08x} stopping");
			return;
		}

		let encap_sequence = counters.next();
		let cip_sequence = (encap_sequence & 0xFFFF) as u16;
		let payload = io_image.read_produced();

		let items = vec![
			Item::SequencedAddress { connection_id: t_o_connection_id, encap_sequence },
			Item::ConnectedData { cip_sequence, payload },
		];

		let packet = cpf::encode_cpf(&items);

		match socket.send(&packet) {
			Ok(_) => transient_failures = 0,
			Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
				transient_failures += 1;

				if transient_failures >= MAX_TRANSIENT_RETRIES {
					warn!("cyclic producer for connection 0x{t_o_connection_id:08x} giving up after repeated transient send errors");
					return;
				}
			}
			Err(e) => {
				warn!("cyclic producer for connection 0x{t_o_connection_id:08x} stopping after socket error: {e}");
				return;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::UdpSocket as StdUdpSocket;

	#[test]
	fn sequence_starts_at_one_and_wraps() {
		let counters = Counters::default();
		assert_eq!(counters.next(), 1);
		assert_eq!(counters.next(), 2);

		counters.encap_sequence.store(SEQUENCE_MASK, Ordering::Relaxed);
		assert_eq!(counters.next(), 1);
	}

	#[test]
	fn emits_packets_at_cadence_and_stops_cleanly() {
		let scanner = StdUdpSocket::bind("127.0.0.1:0").unwrap();
		scanner.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
		let scanner_addr = scanner.local_addr().unwrap();

		let image = Arc::new(IoImage::new(4));
		image.write_produced(&[9, 9, 9, 9]);

		let producer =
			Producer::spawn("127.0.0.1:0".parse().unwrap(), scanner_addr, 0x01020304, 5_000, image).unwrap();

		let mut buf = [0u8; 64];
		let mut seqs = Vec::new();

		for _ in 0..5 {
			let (n, _) = scanner.recv_from(&mut buf).unwrap();
			let items = cpf::decode_cpf(&buf[..n]).unwrap();

			match &items[0] {
				Item::SequencedAddress { connection_id, encap_sequence } => {
					assert_eq!(*connection_id, 0x01020304);
					seqs.push(*encap_sequence);
				}
				other => panic!("unexpected first item: {other:?}"),
			}
		}

		producer.stop();

		for w in seqs.windows(2) {
			assert_eq!(w[1], w[0] + 1);
		}
	}
}
