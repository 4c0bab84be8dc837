use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cip::{Registry, Session};
use clap::Parser;
use codec::enip;
use log::{error, info, warn};

/// EtherNet/IP and CIP adapter: listens for explicit messaging over TCP and
/// drives one Cyclic Producer over UDP per negotiated I/O connection.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Config {
	/// Address to bind the TCP and UDP listeners on.
	#[arg(long, default_value = "0.0.0.0")]
	host: IpAddr,

	/// TCP port for explicit messaging (Register/Forward Open/etc).
	#[arg(long, default_value_t = 44818)]
	tcp_port: u16,

	/// UDP port this adapter sends Class-1 cyclic data from.
	#[arg(long, default_value_t = 2222)]
	udp_port: u16,

	/// Increase log verbosity; repeatable (-v, -vv).
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,
}

fn main() -> ExitCode {
	let config = Config::parse();

	log::set_max_level(match config.verbose {
		0 => log::LevelFilter::Info,
		1 => log::LevelFilter::Debug,
		_ => log::LevelFilter::Trace,
	});
	log::set_logger(&runtime::logger::Logger).expect("logger installed exactly once");

	let shutdown = match runtime::Shutdown::install() {
		Ok(shutdown) => shutdown,
		Err(()) => return ExitCode::FAILURE,
	};

	let tcp_addr = SocketAddr::new(config.host, config.tcp_port);
	let udp_bind_addr = SocketAddr::new(config.host, config.udp_port);

	let listener = match TcpListener::bind(tcp_addr) {
		Ok(listener) => listener,
		Err(err) => {
			error!("failed to bind TCP listener on {tcp_addr}: {err}");
			return ExitCode::FAILURE;
		}
	};

	listener.set_nonblocking(true).expect("setting listener nonblocking");
	info!("listening for explicit messaging on {tcp_addr}");

	// This adapter serves one scanner at a time; a connection that arrives
	// while `busy` is set is rejected by closing it immediately rather than
	// left to queue in the OS accept backlog.
	let busy = Arc::new(AtomicBool::new(false));

	// Shared across every connection this process serves, so the session
	// handle counter it owns stays monotonic for the life of the process
	// rather than resetting to 1 on every reconnect.
	let registry = Arc::new(Registry::new());

	let mut workers = Vec::new();

	while !shutdown.requested() {
		match listener.accept() {
			Ok((stream, peer)) => {
				if busy.swap(true, Ordering::SeqCst) {
					warn!("rejecting connection from {peer}: a scanner is already connected");
					drop(stream);
					continue;
				}

				info!("accepted TCP connection from {peer}");

				let busy = busy.clone();
				let shutdown = shutdown.clone();
				let registry = registry.clone();

				workers.push(std::thread::spawn(move || {
					serve(stream, peer, udp_bind_addr, registry, &shutdown);
					busy.store(false, Ordering::SeqCst);
				}));
			}
			Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
				std::thread::sleep(Duration::from_millis(100));
			}
			Err(err) => {
				warn!("accept() failed: {err}");
			}
		}
	}

	info!("shutting down");

	for worker in workers {
		let _ = worker.join();
	}

	ExitCode::SUCCESS
}

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Serve one TCP connection to completion: read, dispatch, reply, until the
/// scanner disconnects, a fatal I/O error occurs, or shutdown is requested.
fn serve(mut stream: TcpStream, peer: SocketAddr, udp_bind_addr: SocketAddr, registry: Arc<Registry>, shutdown: &runtime::Shutdown) {
	stream.set_read_timeout(Some(POLL_TIMEOUT)).expect("setting read timeout");

	let mut session = Session::new(registry, peer, udp_bind_addr);
	let mut buf = Vec::new();
	let mut chunk = [0u8; 1024];

	loop {
		if shutdown.requested() {
			info!("dropping connection from {peer} for shutdown");
			break;
		}

		match stream.read(&mut chunk) {
			Ok(0) => {
				info!("connection from {peer} closed");
				break;
			}
			Ok(n) => buf.extend_from_slice(&chunk[..n]),
			Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
			Err(err) => {
				warn!("read from {peer} failed: {err}");
				break;
			}
		}

		while let Some((header, payload_len)) = frame_ready(&buf) {
			let frame_len = enip::HEADER_LEN + payload_len;
			let payload = buf[enip::HEADER_LEN..frame_len].to_vec();

			let reply = session.handle_frame(&header, &payload);

			if let Err(err) = stream.write_all(&reply) {
				warn!("write to {peer} failed: {err}");
				session.shutdown();
				return;
			}

			buf.drain(..frame_len);
		}
	}

	session.shutdown();
}

/// If `buf` holds a complete ENIP frame, return its header and declared
/// payload length without consuming anything.
fn frame_ready(buf: &[u8]) -> Option<(enip::Header, usize)> {
	if buf.len() < enip::HEADER_LEN {
		return None;
	}

	let header = enip::Header::decode(buf).ok()?;
	let payload_len = header.length as usize;

	if buf.len() < enip::HEADER_LEN + payload_len {
		return None;
	}

	Some((header, payload_len))
}

#[cfg(test)]
mod tests {
	use super::*;
	use codec::cpf::{self, Item};
	use codec::enip::{self, Header};
	use std::net::UdpSocket;
	use std::time::Duration;

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

	fn request_header(command: u16, session_handle: u32) -> Header {
		Header { command, length: 0, session_handle, status: 0, sender_context: [0u8; 8], options: 0 }
	}

	/// Drives a real adapter (real `TcpListener`/`TcpStream`, real
	/// `UdpSocket`) through Register Session, Forward Open, one Cyclic
	/// Producer packet, and Unregister Session.
	#[test]
	fn serves_a_connection_end_to_end_over_real_sockets() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();

		let udp_bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
		let registry = Arc::new(Registry::new());
		let shutdown = runtime::Shutdown::inert();

		let worker = std::thread::spawn(move || {
			let (stream, peer) = listener.accept().unwrap();
			serve(stream, peer, udp_bind_addr, registry, &shutdown);
		});

		// The Cyclic Producer always targets the well-known CIP I/O port on
		// the scanner's address (see `cip::explicit::forward_open`).
		let scanner_io = UdpSocket::bind("127.0.0.1:2222").expect("binding the well-known CIP I/O port for this test");
		scanner_io.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

		let mut client = TcpStream::connect(addr).unwrap();
		client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

		let register = enip::encode_frame(request_header(enip::CMD_REGISTER_SESSION, 0), &[0x01, 0x00, 0x00, 0x00]);
		client.write_all(&register).unwrap();

		let mut buf = [0u8; 1024];
		let n = client.read(&mut buf).unwrap();
		let (reply_header, _) = enip::decode_frame(&buf[..n]).unwrap();
		assert_eq!(reply_header.status, enip::STATUS_SUCCESS);

		let handle = reply_header.session_handle;
		assert_ne!(handle, 0);

		let mut message = vec![codec::cip::SERVICE_FORWARD_OPEN, 0x00];
		message.extend_from_slice(&forward_open_body(0x01020304, 5_000));

		let mut rr_payload = vec![0u8; 6];
		rr_payload.extend_from_slice(&cpf::encode_cpf(&[Item::NullAddress, Item::UnconnectedData(message)]));

		let send_rr = enip::encode_frame(request_header(enip::CMD_SEND_RR_DATA, handle), &rr_payload);
		client.write_all(&send_rr).unwrap();

		let n = client.read(&mut buf).unwrap();
		let (reply_header, payload) = enip::decode_frame(&buf[..n]).unwrap();
		assert_eq!(reply_header.status, enip::STATUS_SUCCESS);

		let items = cpf::decode_cpf(&payload[6..]).unwrap();
		match &items[1] {
			Item::UnconnectedData(bytes) => assert_eq!(bytes[2], codec::cip::GENERAL_STATUS_SUCCESS),
			other => panic!("unexpected item: {other:?}"),
		}

		let mut packet = [0u8; 64];
		let (n, _) = scanner_io.recv_from(&mut packet).unwrap();
		let items = cpf::decode_cpf(&packet[..n]).unwrap();
		match &items[0] {
			Item::SequencedAddress { connection_id, .. } => assert_eq!(*connection_id, 0x01020304),
			other => panic!("unexpected first item: {other:?}"),
		}

		let unregister = enip::encode_frame(request_header(enip::CMD_UNREGISTER_SESSION, handle), &[]);
		client.write_all(&unregister).unwrap();

		let n = client.read(&mut buf).unwrap();
		let (reply_header, _) = enip::decode_frame(&buf[..n]).unwrap();
		assert_eq!(reply_header.status, enip::STATUS_SUCCESS);

		drop(client);
		worker.join().unwrap();
	}
}
