//! Exercise the TCP backend against a fake G30 listening on the loopback interface.

use scpi_psu::{
	error::{Error, ProtocolError, TransportError},
	transport::{Config, Port},
	State, Timing, G30,
};
use std::{
	io::{BufRead as _, BufReader, Read as _, Write as _},
	net::TcpListener,
	sync::mpsc,
	thread,
	time::{Duration, Instant},
};

fn init_logging() {
	// Another test may have installed the logger already.
	let _ = simple_logger::SimpleLogger::new().init();
}

/// Serve a single client like a G30 would, returning every line received.
fn spawn_fake_g30() -> (u16, thread::JoinHandle<Vec<String>>) {
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let port = listener.local_addr().unwrap().port();
	let handle = thread::spawn(move || {
		let (stream, _) = listener.accept().unwrap();
		let mut writer = stream.try_clone().unwrap();
		let mut received = Vec::new();
		let mut volts = 0.0_f64;
		let mut output = false;
		for line in BufReader::new(stream).lines() {
			let Ok(line) = line else { break };
			let line = line.trim().to_string();
			received.push(line.clone());
			let reply = match line.as_str() {
				"*IDN?" => Some("TDK-LAMBDA,G30-30-56,SN0001,1.02".to_string()),
				"VOLT?" | "MEAS:VOLT?" => Some(format!("{volts:.3}")),
				"MEAS:CURR?" => Some("0.250".to_string()),
				"OUTP?" => Some(if output { "ON" } else { "OFF" }.to_string()),
				"STAT:QUES?" => Some("0".to_string()),
				"*RST" => {
					volts = 0.0;
					output = false;
					None
				}
				"OUTP ON" => {
					output = true;
					None
				}
				"OUTP OFF" => {
					output = false;
					None
				}
				other => {
					if let Some(value) = other.strip_prefix("VOLT ") {
						volts = value.parse().unwrap();
					}
					None
				}
			};
			if let Some(reply) = reply {
				writer.write_all(format!("{reply}\r\n").as_bytes()).unwrap();
			}
		}
		received
	});
	(port, handle)
}

#[test]
fn session_over_tcp() {
	init_logging();
	let (port, server) = spawn_fake_g30();
	let mut psu = G30::tcp("127.0.0.1", port);
	psu.set_timing(Timing::none());

	psu.connect().unwrap();
	assert_eq!(psu.state(), State::Connected);
	psu.set_voltage(12.5).unwrap();
	assert_eq!(psu.get_voltage().unwrap(), 12.5);
	psu.enable_output(true).unwrap();
	assert!(psu.is_output_enabled().unwrap());
	assert_eq!(psu.measure_power().unwrap(), 3.125);
	let status = psu.status().unwrap();
	assert!(status.output_enabled);
	assert!(!status.is_faulted());
	psu.disconnect();
	assert!(!psu.is_connected());

	let received = server.join().unwrap();
	assert_eq!(
		received,
		vec![
			"*IDN?",
			"*RST",
			"*CLS",
			"VOLT 12.500",
			"VOLT?",
			"OUTP ON",
			"OUTP?",
			"MEAS:VOLT?",
			"MEAS:CURR?",
			"OUTP?",
			"STAT:QUES?",
			"OUTP OFF",
		]
	);
}

#[test]
fn remote_close_is_detected() {
	init_logging();
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let address = listener.local_addr().unwrap();
	let server = thread::spawn(move || {
		let (mut stream, _) = listener.accept().unwrap();
		let mut buf = [0u8; 64];
		let _ = stream.read(&mut buf).unwrap();
		// Hang up without replying.
	});

	let mut port = Port::new(Config::tcp("127.0.0.1", address.port()));
	port.open().unwrap();
	port.write(b"*IDN?\n").unwrap();
	server.join().unwrap();
	let err = port.read_line(Duration::from_secs(2)).unwrap_err();
	assert!(matches!(
		err,
		Error::Transport(TransportError::ConnectionClosed)
	));
	port.close();
}

#[test]
fn silent_device_times_out_without_error() {
	init_logging();
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let address = listener.local_addr().unwrap();
	let (done_tx, done_rx) = mpsc::channel::<()>();
	let server = thread::spawn(move || {
		let (_stream, _) = listener.accept().unwrap();
		// Keep the connection open, but never reply.
		let _ = done_rx.recv();
	});

	let mut port = Port::new(Config::tcp("127.0.0.1", address.port()));
	port.open().unwrap();
	port.write(b"VOLT?\n").unwrap();
	let timeout = Duration::from_millis(200);
	let start = Instant::now();
	let line = port.read_line(timeout).unwrap();
	let elapsed = start.elapsed();
	assert_eq!(line, "");
	assert!(elapsed >= timeout);
	assert!(elapsed < timeout + Duration::from_millis(300), "{elapsed:?}");

	port.close();
	done_tx.send(()).unwrap();
	server.join().unwrap();
}

#[test]
fn silent_device_fails_to_connect() {
	init_logging();
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let address = listener.local_addr().unwrap();
	let (done_tx, done_rx) = mpsc::channel::<()>();
	let server = thread::spawn(move || {
		let (_stream, _) = listener.accept().unwrap();
		let _ = done_rx.recv();
	});

	let config = Config::tcp("127.0.0.1", address.port()).with_timeout(Duration::from_millis(100));
	let mut psu = G30::new(config);
	psu.set_timing(Timing::none());
	let err = psu.connect().unwrap_err();
	assert!(matches!(
		err,
		Error::Protocol(ProtocolError::EmptyIdentification)
	));
	assert_eq!(psu.state(), State::Disconnected);
	assert!(!psu.port().is_open());

	done_tx.send(()).unwrap();
	server.join().unwrap();
}

#[test]
fn refused_connection_is_a_transport_error() {
	init_logging();
	let address = {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		listener.local_addr().unwrap()
	};
	let mut port = Port::new(
		Config::tcp("127.0.0.1", address.port()).with_timeout(Duration::from_millis(500)),
	);
	let err = port.open().unwrap_err();
	assert!(matches!(err, Error::Transport(TransportError::Open { .. })));
	assert!(!port.is_open());
}
