//! Types that can exchange (read/write) bytes with a power supply.
//!
//! The [`Backend`] trait represents all such types.

use std::io::{self, Write as _};
use std::time::Duration;

use serialport as sp;

#[cfg(windows)]
use sp::COMPort as ExternSerial;
use sp::SerialPort;
#[cfg(unix)]
use sp::TTYPort as ExternSerial;

#[cfg(any(test, feature = "mock"))]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "mock")))]
pub use mock::Mock;

/// The placeholder name for a backend that doesn't have a name.
pub(crate) const UNKNOWN_BACKEND_NAME: &str = "<unknown backend>";

/// Types that allow reading and writing bytes with a connected device.
pub trait Backend: io::Read + io::Write {
	/// Set the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error>;

	/// Get the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error>;

	/// Get the "name" of the backend.
	///
	/// This can be in any format, but should uniquely identify the backend
	/// instance.
	fn name(&self) -> Option<String>;

	/// Release the underlying channel.
	///
	/// The backend is dropped immediately afterwards, so implementations only
	/// need to override this when dropping alone does not shut the channel
	/// down cleanly.
	fn close(&mut self) -> Result<(), io::Error> {
		Ok(())
	}
}

impl<C: Backend + ?Sized> Backend for Box<C> {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
	fn close(&mut self) -> Result<(), io::Error> {
		(**self).close()
	}
}

impl<C: Backend + ?Sized> Backend for &mut C {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
	fn close(&mut self) -> Result<(), io::Error> {
		(**self).close()
	}
}

impl Backend for std::net::TcpStream {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		std::net::TcpStream::set_read_timeout(self, timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		std::net::TcpStream::read_timeout(self)
	}
	fn name(&self) -> Option<String> {
		self.peer_addr().map(|addr| format!("{addr}")).ok()
	}
	fn close(&mut self) -> Result<(), io::Error> {
		match self.shutdown(std::net::Shutdown::Both) {
			// The peer may have already gone away.
			Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
			other => other,
		}
	}
}

/// A platform agnostic serial port backend.
//
// `serialport` exposes `COMPort` and `TTYPort` for windows and unix,
// respectively. Only one is ever used on a given platform, so wrap whichever
// applies in a new type rather than paying for dynamic dispatch or an extra
// type parameter.
#[derive(Debug)]
pub struct Serial(pub(crate) ExternSerial);

impl io::Read for Serial {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.0.read(buf)
	}
}

impl io::Write for Serial {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.write(buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.0.flush()
	}
}

impl Backend for Serial {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		// The serialport API does not support infinite timeouts, so simply set
		// the timeout to the largest possible duration if `timeout` is `None`,
		// which is practically infinite.
		Ok(self.0.set_timeout(timeout.unwrap_or(Duration::MAX))?)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(Some(self.0.timeout()))
	}
	fn name(&self) -> Option<String> {
		self.0.name()
	}
	fn close(&mut self) -> Result<(), io::Error> {
		self.0.flush()
	}
}

#[cfg(any(test, feature = "mock"))]
mod mock {
	use super::Backend;
	use crate::error::Error;
	use crate::transport::Connect;
	use std::collections::{HashMap, VecDeque};
	use std::io;
	use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
	use std::time::Duration;

	/// The default read timeout of a freshly opened mock.
	const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

	#[derive(Debug, Default)]
	struct State {
		/// Bytes waiting to be read.
		incoming: VecDeque<u8>,
		/// Every byte ever written, across reconnects.
		written: Vec<u8>,
		/// The number of successful `write` calls.
		write_count: usize,
		/// The partial line currently being written.
		line: Vec<u8>,
		/// Scripted replies, keyed by the trimmed line that triggers them.
		replies: HashMap<String, VecDeque<String>>,
		read_timeout: Option<Duration>,
		read_error: Option<io::Error>,
		write_error: Option<io::Error>,
		/// Successful writes left before `write_error` is surfaced.
		writes_before_error: usize,
		connect_error: Option<Error>,
		/// Reads report end-of-stream, like a peer that hung up.
		remote_closed: bool,
		closed: bool,
		open_count: usize,
	}

	/// A scripted, in-memory backend for use in testing.
	///
	/// It has the following features:
	///   * Every byte written to it is recorded.
	///   * It can be filled with data for reading, either directly or as a
	///     scripted reply that becomes readable once a given line is written.
	///   * Errors can be injected for the next `read`, `write` or `connect`.
	///   * It can simulate the remote end closing the connection.
	///
	/// Clones share the same state, so a test can keep a handle to the mock
	/// after moving a clone into a session. The mock also implements
	/// [`Connect`], where "connecting" hands out another clone.
	///
	/// When no data is available a read waits for the read timeout and then
	/// fails with [`io::ErrorKind::TimedOut`], like a real device would.
	#[derive(Debug, Clone, Default)]
	pub struct Mock {
		state: Arc<Mutex<State>>,
	}

	impl Mock {
		/// Create a new Mock backend.
		pub fn new() -> Self {
			let mock = Mock::default();
			mock.lock().read_timeout = Some(DEFAULT_TIMEOUT);
			mock
		}

		fn lock(&self) -> MutexGuard<'_, State> {
			self.state.lock().unwrap_or_else(PoisonError::into_inner)
		}

		/// Append data to the read buffer.
		///
		/// The data is not validated in any way.
		pub fn push<T: AsRef<[u8]>>(&self, bytes: T) {
			self.lock().incoming.extend(bytes.as_ref());
		}

		/// Queue `reply` to become readable once `line` is written.
		///
		/// `line` is compared against each written line with surrounding
		/// whitespace removed. Several replies to the same line are returned
		/// in the order they were queued, one per write.
		pub fn reply_to<L: Into<String>, R: Into<String>>(&self, line: L, reply: R) {
			self.lock()
				.replies
				.entry(line.into())
				.or_default()
				.push_back(reply.into());
		}

		/// Set the error for the next `read`, if any.
		pub fn read_error(&self, err: Option<io::Error>) {
			self.lock().read_error = err;
		}

		/// Set the error for the next `write`, if any.
		pub fn write_error(&self, err: Option<io::Error>) {
			self.write_error_after(0, err);
		}

		/// Set the error for the `write` following the next `writes` successful ones.
		pub fn write_error_after(&self, writes: usize, err: Option<io::Error>) {
			let mut state = self.lock();
			state.write_error = err;
			state.writes_before_error = writes;
		}

		/// Set the error for the next [`Connect::connect`], if any.
		pub fn connect_error(&self, err: Option<Error>) {
			self.lock().connect_error = err;
		}

		/// Make every subsequent read report that the remote end hung up.
		pub fn close_remote(&self) {
			self.lock().remote_closed = true;
		}

		/// Every line written so far, without terminators.
		pub fn written_lines(&self) -> Vec<String> {
			String::from_utf8_lossy(&self.lock().written)
				.lines()
				.map(str::to_string)
				.collect()
		}

		/// All bytes written so far.
		pub fn written(&self) -> Vec<u8> {
			self.lock().written.clone()
		}

		/// The number of successful `write` calls.
		pub fn write_count(&self) -> usize {
			self.lock().write_count
		}

		/// Forget everything written so far.
		pub fn clear_written(&self) {
			let mut state = self.lock();
			state.written.clear();
			state.write_count = 0;
		}

		/// Whether the mock has any data available or not.
		pub fn is_empty(&self) -> bool {
			self.lock().incoming.is_empty()
		}

		/// Whether the backend has been closed.
		pub fn is_closed(&self) -> bool {
			self.lock().closed
		}

		/// The number of times the mock has been connected.
		pub fn open_count(&self) -> usize {
			self.lock().open_count
		}
	}

	impl Backend for Mock {
		fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
			self.lock().read_timeout = timeout;
			Ok(())
		}

		fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
			Ok(self.lock().read_timeout)
		}

		fn name(&self) -> Option<String> {
			Some(format!("<mock 0x{:x}>", Arc::as_ptr(&self.state) as usize))
		}

		fn close(&mut self) -> Result<(), io::Error> {
			self.lock().closed = true;
			Ok(())
		}
	}

	impl io::Read for Mock {
		fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
			let wait = {
				let mut state = self.lock();
				if let Some(err) = state.read_error.take() {
					return Err(err);
				}
				if state.remote_closed {
					return Ok(0);
				}
				if !state.incoming.is_empty() {
					let n = buf.len().min(state.incoming.len());
					for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
						*slot = byte;
					}
					return Ok(n);
				}
				state.read_timeout
			};
			// Wait outside of the lock so the test can keep inspecting the mock.
			if let Some(wait) = wait {
				std::thread::sleep(wait);
			}
			Err(io::Error::new(
				io::ErrorKind::TimedOut,
				"Simulated timeout error",
			))
		}
	}

	impl io::Write for Mock {
		fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
			let mut state = self.lock();
			if state.write_error.is_some() {
				if state.writes_before_error == 0 {
					if let Some(err) = state.write_error.take() {
						return Err(err);
					}
				} else {
					state.writes_before_error -= 1;
				}
			}
			if state.closed {
				return Err(io::Error::new(
					io::ErrorKind::NotConnected,
					"the mock backend is closed",
				));
			}
			state.written.extend_from_slice(buf);
			state.write_count += 1;
			for &byte in buf {
				if byte == b'\n' {
					let line = String::from_utf8_lossy(&state.line).trim().to_string();
					state.line.clear();
					let reply = state
						.replies
						.get_mut(&line)
						.and_then(VecDeque::pop_front);
					if let Some(reply) = reply {
						state.incoming.extend(reply.as_bytes());
					}
				} else {
					state.line.push(byte);
				}
			}
			Ok(buf.len())
		}

		fn flush(&mut self) -> io::Result<()> {
			Ok(())
		}
	}

	impl Connect for Mock {
		type Backend = Mock;

		fn connect(&mut self) -> Result<Self::Backend, Error> {
			let mut state = self.lock();
			if let Some(err) = state.connect_error.take() {
				return Err(err);
			}
			state.closed = false;
			state.remote_closed = false;
			state.read_timeout = Some(DEFAULT_TIMEOUT);
			state.open_count += 1;
			drop(state);
			Ok(self.clone())
		}

		fn timeout(&self) -> Duration {
			DEFAULT_TIMEOUT
		}

		fn endpoint(&self) -> String {
			self.name().unwrap_or_default()
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::{Read as _, Write as _};

	static_assertions::assert_impl_all!(Serial: Backend, Send);
	static_assertions::assert_impl_all!(std::net::TcpStream: Backend, Send);
	static_assertions::assert_impl_all!(Box<dyn Backend + Send>: Backend);
	static_assertions::assert_impl_all!(Mock: Backend, Send, Clone);

	#[test]
	fn mock_replies_to_scripted_lines() {
		let mut mock = Mock::new();
		mock.reply_to("VOLT?", "12.345\n");
		mock.write_all(b"VOLT 1.000\n").unwrap();
		assert!(mock.is_empty());
		mock.write_all(b"VOLT?\n").unwrap();
		let mut buf = [0u8; 16];
		let n = mock.read(&mut buf).unwrap();
		assert_eq!(&buf[..n], b"12.345\n");
		assert_eq!(mock.written_lines(), vec!["VOLT 1.000", "VOLT?"]);
	}

	#[test]
	fn mock_times_out_when_empty() {
		let mut mock = Mock::new();
		mock.set_read_timeout(Some(Duration::from_millis(1))).unwrap();
		let mut buf = [0u8; 4];
		let err = mock.read(&mut buf).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::TimedOut);
	}

	#[test]
	fn mock_clones_share_state() {
		let mock = Mock::new();
		let mut other = mock.clone();
		other.write_all(b"*CLS\n").unwrap();
		other.close().unwrap();
		assert_eq!(mock.written_lines(), vec!["*CLS"]);
		assert!(mock.is_closed());
	}
}
