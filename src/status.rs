//! Descriptions of a power supply's state and abilities.

use std::fmt;

/// The questionable status register (`STAT:QUES?`).
///
/// Only the protection bits are interpreted. All other bits are kept but
/// carry no meaning here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Questionable(u32);

impl Questionable {
	/// Over-voltage protection has tripped (bit 0).
	pub const OVER_VOLTAGE: Questionable = Questionable(0x01);
	/// Over-current protection has tripped (bit 1).
	pub const OVER_CURRENT: Questionable = Questionable(0x02);
	/// Over-temperature protection has tripped (bit 4).
	pub const OVER_TEMPERATURE: Questionable = Questionable(0x10);

	/// Create the register from its raw value.
	pub const fn from_bits(bits: u32) -> Self {
		Questionable(bits)
	}

	/// The raw value of the register.
	pub const fn bits(self) -> u32 {
		self.0
	}

	/// Whether every bit set in `other` is also set in `self`.
	pub const fn contains(self, other: Questionable) -> bool {
		self.0 & other.0 == other.0
	}

	/// Whether no bits are set.
	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}
}

impl std::ops::BitOr for Questionable {
	type Output = Self;
	fn bitor(self, rhs: Self) -> Self::Output {
		Questionable(self.0 | rhs.0)
	}
}

/// A snapshot of the power supply's state.
///
/// The snapshot is not refreshed automatically. Fetch a new one with
/// [`G30::status`](crate::G30::status).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Status {
	/// The output is enabled.
	pub output_enabled: bool,
	/// Over-voltage protection has tripped.
	pub over_voltage: bool,
	/// Over-current protection has tripped.
	pub over_current: bool,
	/// Over-power protection has tripped.
	pub over_power: bool,
	/// Over-temperature protection has tripped.
	pub over_temperature: bool,
	/// Remote sensing is active.
	pub remote_sensing: bool,
	/// The supply is regulating current.
	pub constant_current: bool,
	/// The supply is regulating voltage.
	pub constant_voltage: bool,
}

impl Status {
	/// Build a snapshot from the output state and the questionable register.
	///
	/// The G30 does not report over-power, remote sensing or regulation mode
	/// through the register, so those are always false.
	pub fn from_register(output_enabled: bool, register: Questionable) -> Self {
		Status {
			output_enabled,
			over_voltage: register.contains(Questionable::OVER_VOLTAGE),
			over_current: register.contains(Questionable::OVER_CURRENT),
			over_temperature: register.contains(Questionable::OVER_TEMPERATURE),
			..Status::default()
		}
	}

	/// Whether any protection circuit has tripped.
	pub fn is_faulted(&self) -> bool {
		self.over_voltage || self.over_current || self.over_power || self.over_temperature
	}
}

/// The manufacturer of a power supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Vendor {
	/// TDK-Lambda.
	TdkLambda,
	/// Keysight Technologies.
	Keysight,
	/// Rohde & Schwarz.
	RohdeSchwarz,
	/// Rigol.
	Rigol,
	/// Siglent.
	Siglent,
	/// Thurlby Thandar Instruments.
	Tti,
	/// B&K Precision.
	BkPrecision,
	/// Tenma.
	Tenma,
	/// Any other manufacturer.
	Custom,
}

impl fmt::Display for Vendor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Vendor::TdkLambda => "TDK-Lambda",
			Vendor::Keysight => "Keysight",
			Vendor::RohdeSchwarz => "Rohde & Schwarz",
			Vendor::Rigol => "Rigol",
			Vendor::Siglent => "Siglent",
			Vendor::Tti => "TTi",
			Vendor::BkPrecision => "B&K Precision",
			Vendor::Tenma => "Tenma",
			Vendor::Custom => "Custom",
		})
	}
}

/// The static abilities of a power supply model.
///
/// These are constants for the model, not live queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
	/// The highest voltage, in volts.
	pub max_voltage: f64,
	/// The highest current, in amps.
	pub max_current: f64,
	/// The highest output power, in watts.
	pub max_power: f64,
	/// The number of independent outputs.
	pub channels: u32,
	/// Supports over-voltage protection.
	pub has_over_voltage_protection: bool,
	/// Supports over-current protection.
	pub has_over_current_protection: bool,
	/// Supports over-power protection.
	pub has_over_power_protection: bool,
	/// Supports remote sensing.
	pub has_remote_sensing: bool,
	/// Supports output sequencing.
	pub has_sequencing: bool,
}
