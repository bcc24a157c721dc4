//! The vendor-neutral interface to a programmable DC power supply.

use crate::{
	error::Error,
	status::{Capabilities, Status, Vendor},
};

/// Operations common to every programmable DC power supply.
///
/// The trait is object safe so callers can hold a `Box<dyn PowerSupply>`
/// without knowing the model or how it is connected.
///
/// Every operation other than [`connect`](PowerSupply::connect) and the
/// static descriptors requires a connected session and otherwise fails with
/// [`NotConnectedError`](crate::error::NotConnectedError). Setpoints are
/// checked against the client-side limits before anything is sent.
pub trait PowerSupply {
	/// Open the connection and bring the supply into a known state.
	fn connect(&mut self) -> Result<(), Error>;
	/// Turn the output off, if possible, and close the connection.
	fn disconnect(&mut self);
	/// Whether the session is connected.
	fn is_connected(&self) -> bool;

	/// Enable or disable the output.
	fn enable_output(&mut self, enable: bool) -> Result<(), Error>;
	/// Ask the supply whether the output is enabled.
	fn is_output_enabled(&mut self) -> Result<bool, Error>;
	/// Reset the supply to its defaults.
	fn reset(&mut self) -> Result<(), Error>;
	/// Clear latched protection faults.
	fn clear_protection(&mut self) -> Result<(), Error>;

	/// Set the output voltage, in volts.
	fn set_voltage(&mut self, volts: f64) -> Result<(), Error>;
	/// Get the voltage setpoint, in volts.
	fn get_voltage(&mut self) -> Result<f64, Error>;
	/// Measure the output voltage, in volts.
	fn measure_voltage(&mut self) -> Result<f64, Error>;
	/// Move the voltage setpoint to `volts` at `rate` volts per second.
	fn set_voltage_with_ramp(&mut self, volts: f64, rate: f64) -> Result<(), Error>;

	/// Set the current limit, in amps.
	fn set_current(&mut self, amps: f64) -> Result<(), Error>;
	/// Get the current limit, in amps.
	fn get_current(&mut self) -> Result<f64, Error>;
	/// Measure the output current, in amps.
	fn measure_current(&mut self) -> Result<f64, Error>;
	/// Move the current limit to `amps` at `rate` amps per second.
	fn set_current_with_ramp(&mut self, amps: f64, rate: f64) -> Result<(), Error>;

	/// Measure the output power, in watts.
	fn measure_power(&mut self) -> Result<f64, Error>;

	/// Fetch a fresh status snapshot.
	fn status(&mut self) -> Result<Status, Error>;
	/// Read the head of the device's error queue.
	fn check_error(&mut self) -> Result<String, Error>;

	/// The model's static capabilities.
	fn capabilities(&self) -> Capabilities;
	/// The manufacturer.
	fn vendor(&self) -> Vendor;
	/// The model name.
	fn model(&self) -> &str;

	/// Send a raw command line.
	fn send_command(&mut self, command: &str) -> Result<(), Error>;
	/// Send a raw query line and return the reply.
	fn send_query(&mut self, query: &str) -> Result<String, Error>;
}
