//! Encoding commands and decoding replies.
//!
//! Commands are single ASCII lines made of a header, an optional `?` marking
//! a query, and an optional argument, e.g. `VOLT 12.500\n` or `MEAS:CURR?\n`.
//! Numeric arguments are always written with three decimal places.
//!
//! Replies are decoded after trimming surrounding whitespace, including any
//! `\r\n` terminator.

use crate::{error::ProtocolError, status::Questionable};
use std::fmt;

/// The headers understood by the power supply.
pub mod header {
	/// Identification (`*IDN`).
	pub const IDENTIFY: &str = "*IDN";
	/// Reset to defaults (`*RST`).
	pub const RESET: &str = "*RST";
	/// Clear status and faults (`*CLS`).
	pub const CLEAR_STATUS: &str = "*CLS";
	/// Output enable (`OUTP`).
	pub const OUTPUT: &str = "OUTP";
	/// Voltage setpoint (`VOLT`).
	pub const VOLTAGE: &str = "VOLT";
	/// Current limit (`CURR`).
	pub const CURRENT: &str = "CURR";
	/// Measured voltage (`MEAS:VOLT`).
	pub const MEASURE_VOLTAGE: &str = "MEAS:VOLT";
	/// Measured current (`MEAS:CURR`).
	pub const MEASURE_CURRENT: &str = "MEAS:CURR";
	/// Over-voltage trip level (`VOLT:PROT`).
	pub const OVER_VOLTAGE_PROTECTION: &str = "VOLT:PROT";
	/// Questionable status register (`STAT:QUES`).
	pub const QUESTIONABLE_STATUS: &str = "STAT:QUES";
	/// Head of the error queue (`SYST:ERR`).
	pub const SYSTEM_ERROR: &str = "SYST:ERR";
}

/// The argument of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Argument {
	/// No argument.
	None,
	/// A number, written with three decimal places.
	Number(f64),
	/// A keyword, such as `ON`.
	Word(&'static str),
}

/// A command or query that can be sent to the power supply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
	header: &'static str,
	query: bool,
	argument: Argument,
}

impl Command {
	/// A command without an argument.
	pub const fn new(header: &'static str) -> Self {
		Command {
			header,
			query: false,
			argument: Argument::None,
		}
	}

	/// A query for the value associated with `header`.
	pub const fn query(header: &'static str) -> Self {
		Command {
			header,
			query: true,
			argument: Argument::None,
		}
	}

	/// A command with a numeric argument.
	pub const fn with_number(header: &'static str, value: f64) -> Self {
		Command {
			header,
			query: false,
			argument: Argument::Number(value),
		}
	}

	/// A command with a keyword argument.
	pub const fn with_word(header: &'static str, word: &'static str) -> Self {
		Command {
			header,
			query: false,
			argument: Argument::Word(word),
		}
	}

	/// The command's header.
	pub fn header(&self) -> &'static str {
		self.header
	}

	/// Whether the command expects a reply.
	pub fn is_query(&self) -> bool {
		self.query
	}

	/// The command's argument.
	pub fn argument(&self) -> Argument {
		self.argument
	}

	/// The line to send, including the terminator.
	pub fn encode(&self) -> String {
		format!("{self}\n")
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.header)?;
		if self.query {
			f.write_str("?")?;
		}
		match self.argument {
			Argument::None => Ok(()),
			// Adding zero turns -0.0 into 0.0 so it isn't written as "-0.000".
			Argument::Number(value) => write!(f, " {:.3}", value + 0.0),
			Argument::Word(word) => write!(f, " {word}"),
		}
	}
}

/// Generate the commands for setting and querying each setpoint.
macro_rules! setpoint_commands {
	($($name:ident => $header:literal),+ $(,)?) => {
		paste::paste! {
			$(
				#[doc = "Set the " $name " setpoint: `" $header " <value>`."]
				pub fn [<set_ $name>](value: f64) -> Command {
					Command::with_number($header, value)
				}

				#[doc = "Query the " $name " setpoint: `" $header "?`."]
				pub fn [<query_ $name>]() -> Command {
					Command::query($header)
				}
			)+
		}
	};
}

/// Constructors for every command the power supply understands.
pub mod command {
	use super::{header, Command};

	setpoint_commands! {
		voltage => "VOLT",
		current => "CURR",
		over_voltage_protection => "VOLT:PROT",
	}

	/// `*IDN?`
	pub fn identify() -> Command {
		Command::query(header::IDENTIFY)
	}

	/// `*RST`
	pub fn reset() -> Command {
		Command::new(header::RESET)
	}

	/// `*CLS`
	pub fn clear_status() -> Command {
		Command::new(header::CLEAR_STATUS)
	}

	/// `OUTP ON` or `OUTP OFF`
	pub fn output(enable: bool) -> Command {
		Command::with_word(header::OUTPUT, if enable { "ON" } else { "OFF" })
	}

	/// `OUTP?`
	pub fn query_output() -> Command {
		Command::query(header::OUTPUT)
	}

	/// `MEAS:VOLT?`
	pub fn measure_voltage() -> Command {
		Command::query(header::MEASURE_VOLTAGE)
	}

	/// `MEAS:CURR?`
	pub fn measure_current() -> Command {
		Command::query(header::MEASURE_CURRENT)
	}

	/// `STAT:QUES?`
	pub fn query_questionable_status() -> Command {
		Command::query(header::QUESTIONABLE_STATUS)
	}

	/// `SYST:ERR?`
	pub fn query_system_error() -> Command {
		Command::query(header::SYSTEM_ERROR)
	}
}

/// Append a newline to `raw` unless it already ends with one.
pub fn terminate(raw: &str) -> String {
	let mut line = raw.to_string();
	if !line.ends_with('\n') {
		line.push('\n');
	}
	line
}

/// Decode a numeric reply.
pub fn parse_number(response: &str) -> Result<f64, ProtocolError> {
	response
		.trim()
		.parse()
		.map_err(|_| ProtocolError::InvalidNumber {
			response: response.to_string(),
		})
}

/// Decode a boolean reply.
///
/// `1` and `ON` are true. Everything else is false, though anything other
/// than `0` or `OFF` is logged as unexpected.
pub fn parse_bool(response: &str) -> bool {
	match response.trim() {
		"1" | "ON" => true,
		"0" | "OFF" => false,
		other => {
			log::warn!("unrecognized boolean reply '{other}', treating it as false");
			false
		}
	}
}

/// Decode the questionable status register.
///
/// Some firmware reports the register as a decimal number (e.g. `+2.0`),
/// which is accepted as long as it is a non-negative value that fits.
pub fn parse_questionable(response: &str) -> Result<Questionable, ProtocolError> {
	let trimmed = response.trim();
	if let Ok(bits) = trimmed.trim_start_matches('+').parse::<u32>() {
		return Ok(Questionable::from_bits(bits));
	}
	match trimmed.parse::<f64>() {
		Ok(value) if value.is_finite() && value >= 0.0 && value <= u32::MAX as f64 => {
			Ok(Questionable::from_bits(value as u32))
		}
		_ => Err(ProtocolError::InvalidStatus {
			response: response.to_string(),
		}),
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn encode_numbers_with_three_decimals() {
		assert_eq!(command::set_voltage(12.5).encode(), "VOLT 12.500\n");
		assert_eq!(command::set_current(0.0).encode(), "CURR 0.000\n");
		assert_eq!(command::set_current(-0.0).encode(), "CURR 0.000\n");
		assert_eq!(command::set_voltage(1.23456).encode(), "VOLT 1.235\n");
		assert_eq!(
			command::set_over_voltage_protection(33.0).encode(),
			"VOLT:PROT 33.000\n"
		);
	}

	#[test]
	fn encode_queries() {
		assert_eq!(command::query_voltage().encode(), "VOLT?\n");
		assert_eq!(command::query_current().encode(), "CURR?\n");
		assert_eq!(
			command::query_over_voltage_protection().encode(),
			"VOLT:PROT?\n"
		);
		assert_eq!(command::identify().encode(), "*IDN?\n");
		assert_eq!(command::measure_voltage().encode(), "MEAS:VOLT?\n");
		assert_eq!(command::measure_current().encode(), "MEAS:CURR?\n");
		assert_eq!(command::query_output().encode(), "OUTP?\n");
		assert_eq!(command::query_questionable_status().encode(), "STAT:QUES?\n");
		assert_eq!(command::query_system_error().encode(), "SYST:ERR?\n");
		assert!(command::identify().is_query());
	}

	#[test]
	fn encode_plain_commands() {
		assert_eq!(command::reset().encode(), "*RST\n");
		assert_eq!(command::clear_status().encode(), "*CLS\n");
		assert_eq!(command::output(true).encode(), "OUTP ON\n");
		assert_eq!(command::output(false).encode(), "OUTP OFF\n");
		assert!(!command::reset().is_query());
	}

	#[test]
	fn terminate_adds_a_single_newline() {
		assert_eq!(terminate("OUTP ON"), "OUTP ON\n");
		assert_eq!(terminate("OUTP ON\n"), "OUTP ON\n");
	}

	#[test]
	fn numbers() {
		assert_eq!(parse_number("12.345\n").unwrap(), 12.345);
		assert_eq!(parse_number("  +1.5E+01 \r\n").unwrap(), 15.0);
		let err = parse_number("abc\n").unwrap_err();
		assert_eq!(err.response(), Some("abc\n"));
		assert!(parse_number("").is_err());
		assert!(parse_number("\r\n").is_err());
	}

	#[test]
	fn booleans() {
		assert!(parse_bool("1\n"));
		assert!(parse_bool(" ON \r\n"));
		assert!(!parse_bool("OFF"));
		assert!(!parse_bool("0\n"));
		assert!(!parse_bool(""));
		assert!(!parse_bool("on"));
		assert!(!parse_bool("2"));
	}

	#[test]
	fn questionable_register() {
		let status = parse_questionable("19\n").unwrap();
		assert!(status.contains(Questionable::OVER_VOLTAGE));
		assert!(status.contains(Questionable::OVER_CURRENT));
		assert!(status.contains(Questionable::OVER_TEMPERATURE));

		let status = parse_questionable("+2.0\r\n").unwrap();
		assert!(!status.contains(Questionable::OVER_VOLTAGE));
		assert!(status.contains(Questionable::OVER_CURRENT));

		assert!(parse_questionable("0").unwrap().is_empty());
		assert!(parse_questionable("-1").is_err());
		assert!(matches!(
			parse_questionable("busy"),
			Err(ProtocolError::InvalidStatus { .. })
		));
	}
}
