//! The line-oriented channel used to talk to a power supply.
//!
//! A [`Port`] owns a [`Connect`] implementation, which knows how to open a
//! [`Backend`], and the backend itself once it is open. Commands are written
//! as whole lines and replies are read one newline-terminated line at a time.
//!
//! Reads never block for longer than the requested timeout: the port lowers
//! the backend's read timeout to a short poll interval and keeps polling until
//! a full line arrives or the deadline passes. Hitting the deadline is not an
//! error, whatever was received so far (possibly nothing) is returned instead.
//!
//! ```rust
//! # use scpi_psu::transport::{Config, Port};
//! # use std::time::Duration;
//! # fn wrapper() -> Result<(), scpi_psu::error::Error> {
//! let mut port = Port::new(Config::tcp("192.168.0.50", 8003));
//! port.open()?;
//! port.write(b"*IDN?\n")?;
//! let reply = port.read_line(Duration::from_secs(1))?;
//! # Ok(())
//! # }
//! ```

mod options;
#[cfg(test)]
mod test;

pub use options::*;

use crate::{
	backend::{Backend, UNKNOWN_BACKEND_NAME},
	error::{CancelledError, Error, TransportError},
	timeout_guard::TimeoutGuard,
};
use std::{
	io::{self, Read as _, Write as _},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::{Duration, Instant},
};

/// The line terminator used in both directions.
pub const LINE_FEED: u8 = b'\n';

/// Something that can open a [`Backend`].
///
/// [`Config`] is the implementation used for real hardware.
pub trait Connect {
	/// The type of backend that is opened.
	type Backend: Backend;

	/// Validate the settings and open a new backend.
	fn connect(&mut self) -> Result<Self::Backend, Error>;

	/// The timeout to use when waiting for a reply.
	fn timeout(&self) -> Duration;

	/// A human readable description of the endpoint.
	fn endpoint(&self) -> String;
}

/// A shared flag used to abandon a blocking operation from another thread.
///
/// Clones share the same flag. Once cancelled, the token stays cancelled
/// until [`reset`](CancelToken::reset) is called.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
	/// Create a new token that has not been cancelled.
	pub fn new() -> Self {
		CancelToken::default()
	}
	/// Request that operations observing this token stop.
	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}
	/// Whether cancellation has been requested.
	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
	/// Clear a previous cancellation so the token can be reused.
	pub fn reset(&self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

/// A channel to a power supply that exchanges newline-terminated lines.
pub struct Port<C: Connect> {
	/// Opens the backend
	connector: C,
	/// The open backend, if any
	backend: Option<C::Backend>,
	/// Bytes received after the end of the last line returned
	pending: Vec<u8>,
	/// How long each individual read may block
	poll_interval: Duration,
	/// If populated, the error that has "poisoned" the port. This error MUST be
	/// reported before the port is used for communication again.
	///
	/// A port becomes poisoned when the backend's read timeout cannot be
	/// restored after a read.
	poison: Option<io::Error>,
	/// Checked between polls
	cancel: Option<CancelToken>,
}

impl<C: Connect> std::fmt::Debug for Port<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Port")
			.field("endpoint", &self.connector.endpoint())
			.field("open", &self.is_open())
			.finish_non_exhaustive()
	}
}

impl<C: Connect> Port<C> {
	/// The default poll interval: 10 ms.
	pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

	/// Create a closed port that will be opened with `connector`.
	pub fn new(connector: C) -> Self {
		Port {
			connector,
			backend: None,
			pending: Vec::new(),
			poll_interval: Self::DEFAULT_POLL_INTERVAL,
			poison: None,
			cancel: None,
		}
	}

	/// Open the port.
	///
	/// Opening a port that is already open does nothing.
	pub fn open(&mut self) -> Result<(), Error> {
		if self.backend.is_some() {
			return Ok(());
		}
		let backend = self.connector.connect()?;
		log::debug!(
			"{} opened",
			backend
				.name()
				.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string())
		);
		self.backend = Some(backend);
		self.pending.clear();
		self.poison = None;
		Ok(())
	}

	/// Close the port.
	///
	/// Closing is idempotent and never fails. Errors raised while releasing the
	/// backend are logged and otherwise ignored.
	pub fn close(&mut self) {
		if let Some(mut backend) = self.backend.take() {
			let name = backend
				.name()
				.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string());
			match backend.close() {
				Ok(()) => log::debug!("{name} closed"),
				Err(e) => log::debug!("{name} closed with error: {e}"),
			}
		}
		self.pending.clear();
		self.poison = None;
	}

	/// Whether the port is open.
	pub fn is_open(&self) -> bool {
		self.backend.is_some()
	}

	/// Get the name of the open backend.
	pub fn name(&self) -> Option<String> {
		self.backend.as_ref().and_then(Backend::name)
	}

	/// The timeout the connector was configured with.
	pub fn timeout(&self) -> Duration {
		self.connector.timeout()
	}

	/// Get how long each individual read may block while waiting for a line.
	pub fn poll_interval(&self) -> Duration {
		self.poll_interval
	}

	/// Set how long each individual read may block while waiting for a line.
	///
	/// Intervals shorter than a millisecond are rounded up to one millisecond.
	pub fn set_poll_interval(&mut self, interval: Duration) {
		self.poll_interval = interval.max(Duration::from_millis(1));
	}

	/// Set the token checked between polls, if any.
	pub fn set_cancel_token(&mut self, token: Option<CancelToken>) {
		self.cancel = token;
	}

	/// Get a reference to the connector.
	pub fn connector(&self) -> &C {
		&self.connector
	}

	/// Get a mutable reference to the connector.
	///
	/// Changes only take effect the next time the port is opened.
	pub fn connector_mut(&mut self) -> &mut C {
		&mut self.connector
	}

	/// Check if the port is poisoned and report the error if it exists.
	fn check_poisoned(&mut self) -> Result<(), io::Error> {
		if let Some(poison) = self.poison.take() {
			Err(poison)
		} else {
			Ok(())
		}
	}

	/// Write all of `bytes` to the device, returning the number of bytes written.
	pub fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
		self.check_poisoned().map_err(TransportError::Io)?;
		let backend = self.backend.as_mut().ok_or(TransportError::NotOpen)?;
		log::debug!(
			"{} TX:   {}",
			backend
				.name()
				.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string()),
			String::from_utf8_lossy(bytes).trim_end()
		);
		backend.write_all(bytes).map_err(TransportError::Io)?;
		backend.flush().map_err(TransportError::Io)?;
		Ok(bytes.len())
	}

	/// Read a single line, waiting at most `timeout` for it to arrive.
	///
	/// The returned line includes its terminator. If the timeout elapses first,
	/// whatever was received so far is returned without a terminator, and may
	/// be empty.
	///
	/// Bytes received after the end of the line are kept for the next read.
	/// The remote end closing the connection is reported as
	/// [`TransportError::ConnectionClosed`].
	pub fn read_line(&mut self, timeout: Duration) -> Result<String, Error> {
		self.check_poisoned().map_err(TransportError::Io)?;
		let Port {
			backend,
			pending,
			poll_interval,
			poison,
			cancel,
			..
		} = self;
		let backend = backend.as_mut().ok_or(TransportError::NotOpen)?;
		let name = backend
			.name()
			.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string());

		if let Some(line) = take_line(pending) {
			log::debug!("{} RECV: {}", name, line.trim_end());
			return Ok(line);
		}

		let deadline = Instant::now() + timeout;
		let mut guard =
			TimeoutGuard::new(backend, poison, Some(*poll_interval)).map_err(TransportError::Io)?;
		let mut buf = [0u8; 256];
		while Instant::now() < deadline {
			if cancel.as_ref().map_or(false, CancelToken::is_cancelled) {
				return Err(CancelledError.into());
			}
			match guard.read(&mut buf) {
				Ok(0) => return Err(TransportError::ConnectionClosed.into()),
				Ok(n) => {
					pending.extend_from_slice(&buf[..n]);
					if let Some(line) = take_line(pending) {
						log::debug!("{} RECV: {}", name, line.trim_end());
						return Ok(line);
					}
				}
				Err(e)
					if matches!(
						e.kind(),
						io::ErrorKind::TimedOut
							| io::ErrorKind::WouldBlock
							| io::ErrorKind::Interrupted
					) => {}
				Err(e) => return Err(read_error(e).into()),
			}
		}
		drop(guard);

		let partial = String::from_utf8_lossy(&std::mem::take(pending)).into_owned();
		log::debug!("{} RECV (timed out): {}", name, partial.trim_end());
		Ok(partial)
	}

	/// Throw away any received data that has not been read yet.
	///
	/// This removes replies that arrived after an earlier read gave up on
	/// them. The backend is polled once with the shortest possible wait.
	pub fn discard_input(&mut self) -> Result<(), Error> {
		self.check_poisoned().map_err(TransportError::Io)?;
		let Port {
			backend,
			pending,
			poison,
			..
		} = self;
		let backend = backend.as_mut().ok_or(TransportError::NotOpen)?;
		let name = backend
			.name()
			.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string());
		let mut discarded = std::mem::take(pending);

		let mut guard = TimeoutGuard::new(backend, poison, Some(Duration::from_millis(1)))
			.map_err(TransportError::Io)?;
		let mut buf = [0u8; 256];
		loop {
			match guard.read(&mut buf) {
				// A hang-up is reported by the read that follows.
				Ok(0) => break,
				Ok(n) => discarded.extend_from_slice(&buf[..n]),
				Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
				Err(e)
					if matches!(
						e.kind(),
						io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
					) =>
				{
					break
				}
				Err(e) => return Err(read_error(e).into()),
			}
		}
		drop(guard);

		if !discarded.is_empty() {
			log::debug!(
				"{} DISCARD: {}",
				name,
				String::from_utf8_lossy(&discarded).trim_end()
			);
		}
		Ok(())
	}
}

/// Classify an error raised while reading.
///
/// A peer that aborts the connection is reported the same way as one that
/// closes it cleanly.
fn read_error(e: io::Error) -> TransportError {
	match e.kind() {
		io::ErrorKind::ConnectionReset
		| io::ErrorKind::ConnectionAborted
		| io::ErrorKind::BrokenPipe => TransportError::ConnectionClosed,
		_ => TransportError::Io(e),
	}
}

/// Remove and return the first complete line in `pending`, if there is one.
fn take_line(pending: &mut Vec<u8>) -> Option<String> {
	let end = pending.iter().position(|&b| b == LINE_FEED)?;
	let line: Vec<u8> = pending.drain(..=end).collect();
	Some(String::from_utf8_lossy(&line).into_owned())
}
