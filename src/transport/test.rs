use super::*;
use crate::{backend::Mock, error::ConfigurationError};

/// Create an open port over a mock, returning the port and a handle to the mock.
fn open_port() -> (Port<Mock>, Mock) {
	let mock = Mock::new();
	let mut port = Port::new(mock.clone());
	port.open().unwrap();
	(port, mock)
}

#[test]
fn open_is_idempotent() {
	let (mut port, mock) = open_port();
	port.open().unwrap();
	assert_eq!(mock.open_count(), 1);
	assert!(port.is_open());
}

#[test]
fn close_is_idempotent() {
	let (mut port, mock) = open_port();
	port.close();
	port.close();
	assert!(!port.is_open());
	assert!(mock.is_closed());
}

#[test]
fn write_when_closed_fails() {
	let mut port = Port::new(Mock::new());
	let err = port.write(b"*RST\n").unwrap_err();
	assert!(matches!(err, Error::Transport(TransportError::NotOpen)));
	let err = port.read_line(Duration::from_millis(10)).unwrap_err();
	assert!(matches!(err, Error::Transport(TransportError::NotOpen)));
}

#[test]
fn write_reports_bytes_written() {
	let (mut port, mock) = open_port();
	assert_eq!(port.write(b"VOLT 12.500\n").unwrap(), 12);
	assert_eq!(mock.written(), b"VOLT 12.500\n");
}

#[test]
fn write_error_propagates() {
	let (mut port, mock) = open_port();
	mock.write_error(Some(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
	let err = port.write(b"*CLS\n").unwrap_err();
	match err {
		Error::Transport(TransportError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
		other => panic!("unexpected error {other:?}"),
	}
}

#[test]
fn read_line_returns_complete_line() {
	let (mut port, mock) = open_port();
	mock.push("12.345\n");
	assert_eq!(port.read_line(Duration::from_secs(1)).unwrap(), "12.345\n");
}

#[test]
fn read_line_keeps_bytes_after_the_line() {
	let (mut port, mock) = open_port();
	mock.push("1\n2.5\r\n");
	assert_eq!(port.read_line(Duration::from_secs(1)).unwrap(), "1\n");
	assert_eq!(port.read_line(Duration::from_secs(1)).unwrap(), "2.5\r\n");
}

#[test]
fn read_line_times_out_with_empty_result() {
	let (mut port, _mock) = open_port();
	let timeout = Duration::from_millis(100);
	let start = Instant::now();
	let line = port.read_line(timeout).unwrap();
	let elapsed = start.elapsed();
	assert_eq!(line, "");
	assert!(elapsed >= timeout);
	// Allow for a generous scheduling delay on top of one poll interval.
	assert!(elapsed < timeout + Duration::from_millis(200), "{elapsed:?}");
}

#[test]
fn read_line_returns_partial_data_on_timeout() {
	let (mut port, mock) = open_port();
	mock.push("12.3");
	let line = port.read_line(Duration::from_millis(30)).unwrap();
	assert_eq!(line, "12.3");
	// The partial data is consumed.
	mock.push("4\n");
	assert_eq!(port.read_line(Duration::from_millis(30)).unwrap(), "4\n");
}

#[test]
fn read_line_detects_remote_close() {
	let (mut port, mock) = open_port();
	mock.close_remote();
	let err = port.read_line(Duration::from_secs(1)).unwrap_err();
	assert!(matches!(err, Error::Transport(TransportError::ConnectionClosed)));
}

#[test]
fn read_line_propagates_other_errors() {
	let (mut port, mock) = open_port();
	mock.read_error(Some(io::Error::new(io::ErrorKind::PermissionDenied, "nope")));
	let err = port.read_line(Duration::from_secs(1)).unwrap_err();
	assert!(matches!(err, Error::Transport(TransportError::Io(_))));
}

#[test]
fn read_line_reports_aborted_connections_as_closed() {
	for kind in [
		io::ErrorKind::ConnectionReset,
		io::ErrorKind::ConnectionAborted,
		io::ErrorKind::BrokenPipe,
	] {
		let (mut port, mock) = open_port();
		mock.read_error(Some(io::Error::new(kind, "peer went away")));
		let err = port.read_line(Duration::from_secs(1)).unwrap_err();
		assert!(
			matches!(err, Error::Transport(TransportError::ConnectionClosed)),
			"{kind:?}: {err:?}"
		);
	}
}

#[test]
fn discard_input_drops_buffered_and_waiting_data() {
	let (mut port, mock) = open_port();
	mock.push("1\n2");
	assert_eq!(port.read_line(Duration::from_millis(30)).unwrap(), "1\n");
	mock.push(".5\n");
	port.discard_input().unwrap();
	assert!(mock.is_empty());
	mock.push("OK\n");
	assert_eq!(port.read_line(Duration::from_millis(30)).unwrap(), "OK\n");
	// The poll interval used while discarding does not leak out.
	assert_eq!(mock.read_timeout().unwrap(), Some(Duration::from_millis(50)));
}

#[test]
fn discard_input_leaves_a_hang_up_for_the_next_read() {
	let (mut port, mock) = open_port();
	mock.close_remote();
	port.discard_input().unwrap();
	let err = port.read_line(Duration::from_secs(1)).unwrap_err();
	assert!(matches!(err, Error::Transport(TransportError::ConnectionClosed)));
}

#[test]
fn discard_input_when_closed_fails() {
	let mut port = Port::new(Mock::new());
	let err = port.discard_input().unwrap_err();
	assert!(matches!(err, Error::Transport(TransportError::NotOpen)));
}

#[test]
fn read_line_ignores_interrupted_reads() {
	let (mut port, mock) = open_port();
	mock.read_error(Some(io::Error::new(io::ErrorKind::Interrupted, "signal")));
	mock.push("OK\n");
	assert_eq!(port.read_line(Duration::from_secs(1)).unwrap(), "OK\n");
}

#[test]
fn read_line_restores_read_timeout() {
	let (mut port, mock) = open_port();
	let original = mock.read_timeout().unwrap();
	port.read_line(Duration::from_millis(20)).unwrap();
	assert_eq!(mock.read_timeout().unwrap(), original);
}

#[test]
fn read_line_can_be_cancelled() {
	let (mut port, _mock) = open_port();
	let token = CancelToken::new();
	port.set_cancel_token(Some(token.clone()));
	token.cancel();
	let start = Instant::now();
	let err = port.read_line(Duration::from_secs(5)).unwrap_err();
	assert!(matches!(err, Error::Cancelled(_)));
	assert!(start.elapsed() < Duration::from_secs(1));

	token.reset();
	let line = port.read_line(Duration::from_millis(20)).unwrap();
	assert_eq!(line, "");
}

#[test]
fn poll_interval_has_a_floor() {
	let mut port = Port::new(Mock::new());
	assert_eq!(port.poll_interval(), Port::<Mock>::DEFAULT_POLL_INTERVAL);
	port.set_poll_interval(Duration::ZERO);
	assert_eq!(port.poll_interval(), Duration::from_millis(1));
}

#[test]
fn connect_error_leaves_port_closed() {
	let mock = Mock::new();
	mock.connect_error(Some(ConfigurationError::MissingEndpoint.into()));
	let mut port = Port::new(mock);
	let err = port.open().unwrap_err();
	assert!(matches!(
		err,
		Error::Configuration(ConfigurationError::MissingEndpoint)
	));
	assert!(!port.is_open());
}

#[test]
fn config_validation() {
	assert!(Config::tcp("10.0.0.2", DEFAULT_TCP_PORT).validate().is_ok());
	assert!(matches!(
		Config::tcp("", DEFAULT_TCP_PORT).validate(),
		Err(ConfigurationError::MissingEndpoint)
	));
	assert!(matches!(
		Config::tcp("10.0.0.2", 0).validate(),
		Err(ConfigurationError::MissingEndpoint)
	));
	assert!(matches!(
		Config::serial("/dev/ttyUSB0", 9601).validate(),
		Err(ConfigurationError::UnsupportedBaudRate(9601))
	));
	assert!(matches!(
		Config::serial("/dev/ttyUSB0", 9600)
			.with_timeout(Duration::ZERO)
			.validate(),
		Err(ConfigurationError::InvalidTimeout)
	));
}

#[test]
fn config_rejects_bad_settings_before_opening() {
	let mut config = Config::serial("/dev/this-port-does-not-exist", 12345);
	let err = config.connect().err().unwrap();
	assert!(matches!(
		err,
		Error::Configuration(ConfigurationError::UnsupportedBaudRate(12345))
	));

	let mut port = Port::new(Config::tcp("", DEFAULT_TCP_PORT));
	let err = port.open().unwrap_err();
	assert!(matches!(
		err,
		Error::Configuration(ConfigurationError::MissingEndpoint)
	));
}

#[test]
fn config_defaults() {
	let config = Config::serial("COM3", 19200);
	assert_eq!(config.timeout, DEFAULT_TIMEOUT);
	match config.endpoint {
		Endpoint::Serial(serial) => {
			assert_eq!(serial.baud_rate, 19200);
			assert_eq!(serial.data_bits, DataBits::Eight);
			assert_eq!(serial.parity, Parity::None);
			assert_eq!(serial.stop_bits, StopBits::One);
		}
		other => panic!("unexpected endpoint {other:?}"),
	}
	assert_eq!(
		Config::tcp("psu.local", 8003).endpoint.to_string(),
		"tcp://psu.local:8003"
	);
	assert_eq!(TcpEndpoint::new("psu.local").port, DEFAULT_TCP_PORT);
}
