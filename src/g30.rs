//! The TDK-Lambda G30 session.
//!
//! A [`G30`] owns the [`Port`] used to reach the supply and tracks the coarse
//! state of the session. Every operation is a blocking request followed, for
//! queries, by a single reply line.
//!
//! ```rust,no_run
//! # use scpi_psu::G30;
//! # fn wrapper() -> Result<(), scpi_psu::error::Error> {
//! let mut psu = G30::tcp("192.168.0.50", 8003);
//! psu.connect()?;
//! psu.set_current(2.0)?;
//! psu.set_voltage_with_ramp(12.0, 4.0)?;
//! psu.enable_output(true)?;
//! println!("{:.3} W", psu.measure_power()?);
//! psu.disconnect();
//! # Ok(())
//! # }
//! ```


use crate::{
	codec::{self, command, Command},
	error::{
		CancelledError, Error, InvalidArgumentError, LimitExceededError, NotConnectedError,
		ProtocolError,
	},
	status::{Capabilities, Status, Vendor},
	supply::PowerSupply,
	transport::{CancelToken, Config, Connect, Port},
};
use std::time::Duration;

/// The G30's highest output voltage, in volts.
pub const MAX_VOLTAGE: f64 = 30.0;
/// The G30's highest output current, in amps.
pub const MAX_CURRENT: f64 = 56.0;
/// The model name.
pub const MODEL: &str = "G30";

/// The state of a [`G30`] session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
	/// No channel is open.
	Disconnected,
	/// The channel is being opened and the device identified.
	Connecting,
	/// The device has been identified and initialized.
	Connected,
}

/// Delays inserted between operations to give the supply time to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timing {
	/// After opening the channel, before identifying the device.
	pub connect_settle: Duration,
	/// After each command, and between writing a query and reading its reply.
	pub command_settle: Duration,
	/// After enabling or disabling the output.
	pub output_settle: Duration,
	/// After a reset.
	pub reset_settle: Duration,
	/// After clearing protection faults.
	pub clear_settle: Duration,
	/// Between the steps of a ramp.
	pub ramp_step: Duration,
}

impl Timing {
	/// No delays at all.
	pub const fn none() -> Self {
		Timing {
			connect_settle: Duration::ZERO,
			command_settle: Duration::ZERO,
			output_settle: Duration::ZERO,
			reset_settle: Duration::ZERO,
			clear_settle: Duration::ZERO,
			ramp_step: Duration::ZERO,
		}
	}
}

impl Default for Timing {
	fn default() -> Self {
		Timing {
			connect_settle: Duration::from_millis(100),
			command_settle: Duration::from_millis(50),
			output_settle: Duration::from_millis(50),
			reset_settle: Duration::from_millis(500),
			clear_settle: Duration::from_millis(100),
			ramp_step: Duration::from_millis(100),
		}
	}
}

/// Sleep for `duration`, unless it is zero.
fn settle(duration: Duration) {
	if !duration.is_zero() {
		std::thread::sleep(duration);
	}
}

/// A quantity with a client-side ceiling.
#[derive(Debug, Clone, Copy)]
enum Setpoint {
	Voltage,
	Current,
}

impl Setpoint {
	fn name(self) -> &'static str {
		match self {
			Setpoint::Voltage => "voltage",
			Setpoint::Current => "current",
		}
	}
	fn set(self, value: f64) -> Command {
		match self {
			Setpoint::Voltage => command::set_voltage(value),
			Setpoint::Current => command::set_current(value),
		}
	}
	fn query(self) -> Command {
		match self {
			Setpoint::Voltage => command::query_voltage(),
			Setpoint::Current => command::query_current(),
		}
	}
}

/// A session with a TDK-Lambda G30 power supply.
///
/// The session is generic over how the channel is opened, which is normally a
/// [`Config`]. It is not internally synchronized: wrap it in a mutex to share
/// it between threads.
///
/// Dropping a session disconnects it, which first tries to turn the output off.
pub struct G30<C: Connect = Config> {
	port: Port<C>,
	state: State,
	/// The last output state that was requested. The device is authoritative.
	output_enabled: bool,
	max_voltage: f64,
	max_current: f64,
	timing: Timing,
	cancel: Option<CancelToken>,
}

impl<C: Connect> std::fmt::Debug for G30<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("G30")
			.field("port", &self.port)
			.field("state", &self.state)
			.field("output_enabled", &self.output_enabled)
			.field("max_voltage", &self.max_voltage)
			.field("max_current", &self.max_current)
			.finish_non_exhaustive()
	}
}

impl G30<Config> {
	/// Create a disconnected session using `config`.
	pub fn new(config: Config) -> Self {
		G30::with_connector(config)
	}

	/// Create a disconnected session for the supply at `host:port`.
	pub fn tcp<H: Into<String>>(host: H, port: u16) -> Self {
		G30::new(Config::tcp(host, port))
	}

	/// Create a disconnected session for the supply on the serial port at `path`.
	pub fn serial<P: Into<String>>(path: P, baud_rate: u32) -> Self {
		G30::new(Config::serial(path, baud_rate))
	}
}

impl<C: Connect> G30<C> {
	/// Create a disconnected session that opens its channel with `connector`.
	pub fn with_connector(connector: C) -> Self {
		G30 {
			port: Port::new(connector),
			state: State::Disconnected,
			output_enabled: false,
			max_voltage: MAX_VOLTAGE,
			max_current: MAX_CURRENT,
			timing: Timing::default(),
			cancel: None,
		}
	}

	/// Open the channel, identify the device, reset it and clear any faults.
	///
	/// Connecting an already connected session does nothing. On failure the
	/// channel is closed again and the session is left disconnected.
	pub fn connect(&mut self) -> Result<(), Error> {
		if self.is_connected() {
			return Ok(());
		}
		self.state = State::Connecting;
		log::debug!("connecting to {}", self.port.connector().endpoint());
		let result = self.initialize();
		if let Err(e) = &result {
			log::debug!(
				"failed to connect to {}: {}",
				self.port.connector().endpoint(),
				e
			);
			self.port.close();
			self.state = State::Disconnected;
			self.output_enabled = false;
		}
		result
	}

	fn initialize(&mut self) -> Result<(), Error> {
		self.port.open()?;
		settle(self.timing.connect_settle);
		let id = self.query(command::identify())?;
		if id.is_empty() {
			return Err(ProtocolError::EmptyIdentification.into());
		}
		log::info!("connected to {}: {}", self.port.connector().endpoint(), id);
		self.state = State::Connected;
		self.reset()?;
		self.clear_protection()
	}

	/// Turn the output off and close the channel.
	///
	/// Failing to turn the output off is logged and otherwise ignored.
	/// Disconnecting a disconnected session does nothing.
	pub fn disconnect(&mut self) {
		if self.is_connected() {
			if let Err(e) = self.enable_output(false) {
				log::warn!("failed to disable the output while disconnecting: {e}");
			}
		}
		if self.port.is_open() {
			log::debug!("disconnecting from {}", self.port.connector().endpoint());
		}
		self.port.close();
		self.state = State::Disconnected;
		self.output_enabled = false;
	}

	/// Whether the session is connected.
	pub fn is_connected(&self) -> bool {
		self.state == State::Connected && self.port.is_open()
	}

	/// The state of the session.
	pub fn state(&self) -> State {
		self.state
	}

	fn ensure_connected(&self) -> Result<(), NotConnectedError> {
		if self.is_connected() {
			Ok(())
		} else {
			Err(NotConnectedError)
		}
	}

	fn check_cancelled(&self) -> Result<(), CancelledError> {
		match &self.cancel {
			Some(token) if token.is_cancelled() => Err(CancelledError),
			_ => Ok(()),
		}
	}

	/// Send a command and wait for it to settle.
	fn execute(&mut self, command: Command) -> Result<(), Error> {
		self.port.write(command.encode().as_bytes())?;
		settle(self.timing.command_settle);
		Ok(())
	}

	/// Send a query and return the reply with surrounding whitespace removed.
	fn query(&mut self, command: Command) -> Result<String, Error> {
		self.port.discard_input()?;
		self.port.write(command.encode().as_bytes())?;
		settle(self.timing.command_settle);
		let timeout = self.port.timeout();
		Ok(self.port.read_line(timeout)?.trim().to_string())
	}

	fn query_number(&mut self, command: Command) -> Result<f64, Error> {
		self.ensure_connected()?;
		let reply = self.query(command)?;
		Ok(codec::parse_number(&reply)?)
	}

	/// Enable or disable the output.
	///
	/// The cached output state is updated without reading it back.
	pub fn enable_output(&mut self, enable: bool) -> Result<(), Error> {
		self.ensure_connected()?;
		self.port.write(command::output(enable).encode().as_bytes())?;
		settle(self.timing.output_settle);
		self.output_enabled = enable;
		Ok(())
	}

	/// Ask the supply whether the output is enabled.
	pub fn is_output_enabled(&mut self) -> Result<bool, Error> {
		self.ensure_connected()?;
		let reply = self.query(command::query_output())?;
		Ok(codec::parse_bool(&reply))
	}

	/// The output state last requested through this session.
	///
	/// This may differ from the device, e.g. if a protection circuit tripped.
	/// Use [`is_output_enabled`](G30::is_output_enabled) for the real state.
	pub fn cached_output_enabled(&self) -> bool {
		self.output_enabled
	}

	/// Reset the supply to its defaults, which also disables the output.
	pub fn reset(&mut self) -> Result<(), Error> {
		self.ensure_connected()?;
		self.port.write(command::reset().encode().as_bytes())?;
		settle(self.timing.reset_settle);
		self.output_enabled = false;
		Ok(())
	}

	/// Clear latched protection faults.
	///
	/// The result is not verified. Check [`status`](G30::status) afterwards
	/// if it matters.
	pub fn clear_protection(&mut self) -> Result<(), Error> {
		self.ensure_connected()?;
		self.port
			.write(command::clear_status().encode().as_bytes())?;
		settle(self.timing.clear_settle);
		Ok(())
	}

	fn limit(&self, setpoint: Setpoint) -> f64 {
		match setpoint {
			Setpoint::Voltage => self.max_voltage,
			Setpoint::Current => self.max_current,
		}
	}

	/// Check a setpoint against the client-side limits.
	fn validate(&self, setpoint: Setpoint, value: f64) -> Result<(), Error> {
		if !value.is_finite() {
			return Err(InvalidArgumentError::new(setpoint.name(), "must be a finite number").into());
		}
		let max = self.limit(setpoint);
		if value < 0.0 || value > max {
			return Err(LimitExceededError {
				quantity: setpoint.name(),
				value,
				min: 0.0,
				max,
			}
			.into());
		}
		Ok(())
	}

	fn set(&mut self, setpoint: Setpoint, value: f64) -> Result<(), Error> {
		self.validate(setpoint, value)?;
		self.ensure_connected()?;
		self.execute(setpoint.set(value))
	}

	/// Move `setpoint` to `target` in steps of a tenth of `rate` per step.
	fn ramp(&mut self, setpoint: Setpoint, target: f64, rate: f64) -> Result<(), Error> {
		self.validate(setpoint, target)?;
		if !rate.is_finite() || rate <= 0.0 {
			return Err(InvalidArgumentError::new("ramp rate", "must be a positive number").into());
		}
		let start = self.query_number(setpoint.query())?;
		let delta = target - start;
		let steps = delta.abs() / rate * 10.0;
		let count = steps as usize;
		log::debug!(
			"ramping {} from {} to {} in {} steps",
			setpoint.name(),
			start,
			target,
			count
		);
		let (low, high) = if start <= target {
			(start, target)
		} else {
			(target, start)
		};
		for i in 1..=count {
			self.check_cancelled()?;
			let value = (start + delta * i as f64 / steps).clamp(low, high);
			log::trace!("{} ramp step {}/{}: {:.3}", setpoint.name(), i, count, value);
			self.set(setpoint, value)?;
			settle(self.timing.ramp_step);
		}
		self.check_cancelled()?;
		self.set(setpoint, target)
	}

	/// Set the output voltage, in volts.
	///
	/// The value must be between zero and [`max_voltage`](G30::max_voltage).
	/// Nothing is sent if it isn't.
	pub fn set_voltage(&mut self, volts: f64) -> Result<(), Error> {
		self.set(Setpoint::Voltage, volts)
	}

	/// Get the voltage setpoint, in volts.
	pub fn get_voltage(&mut self) -> Result<f64, Error> {
		self.query_number(command::query_voltage())
	}

	/// Measure the output voltage, in volts.
	pub fn measure_voltage(&mut self) -> Result<f64, Error> {
		self.query_number(command::measure_voltage())
	}

	/// Move the voltage setpoint to `volts` at `rate` volts per second.
	///
	/// The current setpoint is read first, then one intermediate setpoint is
	/// sent per [`Timing::ramp_step`] followed by the exact target. This
	/// blocks for the whole ramp. If a cancel token is set it is checked
	/// before every step.
	pub fn set_voltage_with_ramp(&mut self, volts: f64, rate: f64) -> Result<(), Error> {
		self.ramp(Setpoint::Voltage, volts, rate)
	}

	/// Set the current limit, in amps.
	///
	/// The value must be between zero and [`max_current`](G30::max_current).
	/// Nothing is sent if it isn't.
	pub fn set_current(&mut self, amps: f64) -> Result<(), Error> {
		self.set(Setpoint::Current, amps)
	}

	/// Get the current limit, in amps.
	pub fn get_current(&mut self) -> Result<f64, Error> {
		self.query_number(command::query_current())
	}

	/// Measure the output current, in amps.
	pub fn measure_current(&mut self) -> Result<f64, Error> {
		self.query_number(command::measure_current())
	}

	/// Move the current limit to `amps` at `rate` amps per second.
	///
	/// See [`set_voltage_with_ramp`](G30::set_voltage_with_ramp).
	pub fn set_current_with_ramp(&mut self, amps: f64, rate: f64) -> Result<(), Error> {
		self.ramp(Setpoint::Current, amps, rate)
	}

	/// Measure the output power, in watts.
	///
	/// Voltage and current are measured one after the other, so the result is
	/// only meaningful when the output is steady.
	pub fn measure_power(&mut self) -> Result<f64, Error> {
		let volts = self.measure_voltage()?;
		let amps = self.measure_current()?;
		Ok(volts * amps)
	}

	/// Set the over-voltage protection trip level, in volts.
	pub fn set_over_voltage_protection(&mut self, volts: f64) -> Result<(), Error> {
		if !volts.is_finite() || volts < 0.0 {
			return Err(InvalidArgumentError::new(
				"over-voltage protection level",
				"must be a non-negative number",
			)
			.into());
		}
		self.ensure_connected()?;
		self.execute(command::set_over_voltage_protection(volts))
	}

	/// Get the over-voltage protection trip level, in volts.
	pub fn over_voltage_protection(&mut self) -> Result<f64, Error> {
		self.query_number(command::query_over_voltage_protection())
	}

	/// Get the device's identification string.
	pub fn identification(&mut self) -> Result<String, Error> {
		self.ensure_connected()?;
		self.query(command::identify())
	}

	/// Fetch a fresh status snapshot.
	pub fn status(&mut self) -> Result<Status, Error> {
		let output_enabled = self.is_output_enabled()?;
		let reply = self.query(command::query_questionable_status())?;
		let register = codec::parse_questionable(&reply)?;
		Ok(Status::from_register(output_enabled, register))
	}

	/// Read the head of the device's error queue.
	pub fn check_error(&mut self) -> Result<String, Error> {
		self.ensure_connected()?;
		self.query(command::query_system_error())
	}

	/// The supply's capabilities, as limited by this session's ceilings.
	pub fn capabilities(&self) -> Capabilities {
		Capabilities {
			max_voltage: self.max_voltage,
			max_current: self.max_current,
			max_power: self.max_voltage * self.max_current,
			channels: 1,
			has_over_voltage_protection: true,
			has_over_current_protection: true,
			has_over_power_protection: false,
			has_remote_sensing: false,
			has_sequencing: false,
		}
	}

	/// The manufacturer.
	pub fn vendor(&self) -> Vendor {
		Vendor::TdkLambda
	}

	/// The model name.
	pub fn model(&self) -> &'static str {
		MODEL
	}

	/// The highest voltage this session will set, in volts.
	pub fn max_voltage(&self) -> f64 {
		self.max_voltage
	}

	/// The highest current this session will set, in amps.
	pub fn max_current(&self) -> f64 {
		self.max_current
	}

	/// Set the highest voltage this session will set, in volts.
	pub fn set_max_voltage(&mut self, volts: f64) -> Result<(), Error> {
		if !volts.is_finite() || volts <= 0.0 {
			return Err(InvalidArgumentError::new("maximum voltage", "must be positive").into());
		}
		self.max_voltage = volts;
		Ok(())
	}

	/// Set the highest current this session will set, in amps.
	pub fn set_max_current(&mut self, amps: f64) -> Result<(), Error> {
		if !amps.is_finite() || amps <= 0.0 {
			return Err(InvalidArgumentError::new("maximum current", "must be positive").into());
		}
		self.max_current = amps;
		Ok(())
	}

	/// Send a raw command line.
	///
	/// A newline is appended if `command` does not already end with one.
	pub fn send_command(&mut self, command: &str) -> Result<(), Error> {
		if command.trim().is_empty() {
			return Err(InvalidArgumentError::new("command", "must not be empty").into());
		}
		self.ensure_connected()?;
		self.port.write(codec::terminate(command).as_bytes())?;
		settle(self.timing.command_settle);
		Ok(())
	}

	/// Send a raw query line and return the reply with surrounding whitespace
	/// removed.
	///
	/// A newline is appended if `query` does not already end with one. An
	/// empty string is returned if no reply arrives in time.
	pub fn send_query(&mut self, query: &str) -> Result<String, Error> {
		if query.trim().is_empty() {
			return Err(InvalidArgumentError::new("query", "must not be empty").into());
		}
		self.ensure_connected()?;
		self.port.discard_input()?;
		self.port.write(codec::terminate(query).as_bytes())?;
		settle(self.timing.command_settle);
		let timeout = self.port.timeout();
		Ok(self.port.read_line(timeout)?.trim().to_string())
	}

	/// The delays inserted between operations.
	pub fn timing(&self) -> Timing {
		self.timing
	}

	/// Set the delays inserted between operations.
	pub fn set_timing(&mut self, timing: Timing) {
		self.timing = timing;
	}

	/// Set the token used to abandon blocking reads and ramps, if any.
	pub fn set_cancel_token(&mut self, token: Option<CancelToken>) {
		self.port.set_cancel_token(token.clone());
		self.cancel = token;
	}

	/// Get a reference to the underlying port.
	pub fn port(&self) -> &Port<C> {
		&self.port
	}

	/// Get a mutable reference to the underlying port.
	///
	/// Closing the port through this reference disconnects the session, and
	/// a later [`connect`](G30::connect) opens it again.
	pub fn port_mut(&mut self) -> &mut Port<C> {
		&mut self.port
	}
}

impl<C: Connect> Drop for G30<C> {
	fn drop(&mut self) {
		self.disconnect();
	}
}

impl<C: Connect> PowerSupply for G30<C> {
	fn connect(&mut self) -> Result<(), Error> {
		G30::connect(self)
	}
	fn disconnect(&mut self) {
		G30::disconnect(self)
	}
	fn is_connected(&self) -> bool {
		G30::is_connected(self)
	}
	fn enable_output(&mut self, enable: bool) -> Result<(), Error> {
		G30::enable_output(self, enable)
	}
	fn is_output_enabled(&mut self) -> Result<bool, Error> {
		G30::is_output_enabled(self)
	}
	fn reset(&mut self) -> Result<(), Error> {
		G30::reset(self)
	}
	fn clear_protection(&mut self) -> Result<(), Error> {
		G30::clear_protection(self)
	}
	fn set_voltage(&mut self, volts: f64) -> Result<(), Error> {
		G30::set_voltage(self, volts)
	}
	fn get_voltage(&mut self) -> Result<f64, Error> {
		G30::get_voltage(self)
	}
	fn measure_voltage(&mut self) -> Result<f64, Error> {
		G30::measure_voltage(self)
	}
	fn set_voltage_with_ramp(&mut self, volts: f64, rate: f64) -> Result<(), Error> {
		G30::set_voltage_with_ramp(self, volts, rate)
	}
	fn set_current(&mut self, amps: f64) -> Result<(), Error> {
		G30::set_current(self, amps)
	}
	fn get_current(&mut self) -> Result<f64, Error> {
		G30::get_current(self)
	}
	fn measure_current(&mut self) -> Result<f64, Error> {
		G30::measure_current(self)
	}
	fn set_current_with_ramp(&mut self, amps: f64, rate: f64) -> Result<(), Error> {
		G30::set_current_with_ramp(self, amps, rate)
	}
	fn measure_power(&mut self) -> Result<f64, Error> {
		G30::measure_power(self)
	}
	fn status(&mut self) -> Result<Status, Error> {
		G30::status(self)
	}
	fn check_error(&mut self) -> Result<String, Error> {
		G30::check_error(self)
	}
	fn capabilities(&self) -> Capabilities {
		G30::capabilities(self)
	}
	fn vendor(&self) -> Vendor {
		G30::vendor(self)
	}
	fn model(&self) -> &str {
		G30::model(self)
	}
	fn send_command(&mut self, command: &str) -> Result<(), Error> {
		G30::send_command(self, command)
	}
	fn send_query(&mut self, query: &str) -> Result<String, Error> {
		G30::send_query(self, query)
	}
}
