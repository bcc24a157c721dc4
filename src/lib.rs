//! A library for controlling TDK-Lambda G30 programmable DC power supplies.
//!
//! The supply is driven with newline-terminated SCPI command lines over either
//! a TCP connection or a serial line. A [`G30`] session owns the connection,
//! validates setpoints against client-side limits before anything is sent, and
//! decodes replies into typed values. The vendor-neutral [`PowerSupply`] trait
//! allows code to be written without depending on the model.
//!
//! ```rust,no_run
//! use scpi_psu::{G30, PowerSupply};
//!
//! # fn wrapper() -> Result<(), scpi_psu::error::Error> {
//! let mut psu = G30::serial("/dev/ttyUSB0", 9600);
//! psu.connect()?;
//! psu.set_voltage(5.0)?;
//! psu.set_current(0.5)?;
//! psu.enable_output(true)?;
//! let status = psu.status()?;
//! assert!(!status.is_faulted());
//! # Ok(())
//! # }
//! ```
//!
//! The library logs every line it sends and receives through the [`log`]
//! crate at the `debug` level. Nothing is printed unless the application
//! installs a logger.

#![cfg_attr(all(doc, feature = "doc_cfg"), feature(doc_cfg))]

pub mod backend;
pub mod codec;
pub mod error;
pub mod g30;
pub mod status;
pub mod supply;
mod timeout_guard;
pub mod transport;

pub use g30::{State, Timing, G30};
pub use status::{Capabilities, Status, Vendor};
pub use supply::PowerSupply;
pub use transport::{CancelToken, Config};
