//! Error types.
//!
//! Each kind of failure is represented by its own type that implements
//! [`std::error::Error`]. Most APIs can fail in more than one way and so return
//! the higher level [`Error`] enum. Every kind of error converts into [`Error`],
//! allowing them to be used with `?`, and can be recovered from it with
//! [`TryFrom`]:
//!
//! ```
//! use scpi_psu::error::{Error, LimitExceededError};
//!
//! fn handle(err: Error) {
//!     match LimitExceededError::try_from(err) {
//!         Ok(limit) => println!("rejected before anything was sent: {limit}"),
//!         Err(other) => println!("something else went wrong: {other}"),
//!     }
//! }
//! ```
//!
//! Errors raised by client-side validation ([`LimitExceededError`],
//! [`InvalidArgumentError`], [`NotConnectedError`]) are always raised before
//! any bytes are written, so the device's state is unchanged when one is
//! returned.

use std::io;

/// Define the top-level error enum, which wraps each kind of error.
///
/// `From` is implemented for each wrapped type and `TryFrom` is implemented to
/// get the wrapped type back out again.
macro_rules! error_enum {
    (
        $(#[$attr:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_attr:meta])*
                $variant:ident($inner:ty)
            ),+
            $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_attr])*
                #[error(transparent)]
                $variant(#[from] $inner)
            ),+
        }

        $(
            impl TryFrom<$name> for $inner {
                type Error = $name;
                fn try_from(other: $name) -> Result<Self, Self::Error> {
                    match other {
                        $name::$variant(value) => Ok(value),
                        value => Err(value),
                    }
                }
            }
        )+
    };
}

/// The connection settings are invalid.
///
/// This is raised when the transport is opened but before any attempt is made
/// to reach the device.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// The host name or serial port path is empty, or the TCP port is zero.
    #[error("no endpoint was specified")]
    MissingEndpoint,
    /// The network address could not be resolved.
    #[error("invalid network address `{address}`: {source}")]
    InvalidAddress {
        /// The address as it was configured.
        address: String,
        /// The reason resolution failed.
        #[source]
        source: io::Error,
    },
    /// The power supply does not support the requested baud rate.
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),
    /// The serial port rejected the requested settings.
    #[error("invalid serial port settings: {0}")]
    InvalidSerialSettings(String),
    /// The communication timeout must be greater than zero.
    #[error("the communication timeout must be greater than zero")]
    InvalidTimeout,
}

/// The communication channel failed.
///
/// Transport errors are never retried automatically. After observing one the
/// caller must decide whether to disconnect and reconnect.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The channel could not be opened.
    #[error("failed to open {endpoint}: {source}")]
    Open {
        /// A description of the endpoint.
        endpoint: String,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },
    /// The channel is not open.
    #[error("the transport is not open")]
    NotOpen,
    /// The remote end closed the connection.
    #[error("the connection was closed by the remote host")]
    ConnectionClosed,
    /// The serial device is either disconnected or in use by another process.
    #[error("the serial device is either disconnected or already in use by another process: {0}")]
    DeviceUnavailable(String),
    /// Reading from or writing to the channel failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the error is due to the channel timing out.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Io(e) | TransportError::Open { source: e, .. } => {
                e.kind() == io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }
}

/// A response could not be decoded into the expected type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A number was expected.
    #[error("failed to parse numeric response: '{response}'")]
    InvalidNumber {
        /// The raw response.
        response: String,
    },
    /// A status register value was expected.
    #[error("failed to parse status register: '{response}'")]
    InvalidStatus {
        /// The raw response.
        response: String,
    },
    /// The device did not identify itself.
    #[error("the device returned an empty identification string")]
    EmptyIdentification,
}

impl ProtocolError {
    /// The raw response that could not be decoded, if any.
    pub fn response(&self) -> Option<&str> {
        match self {
            ProtocolError::InvalidNumber { response }
            | ProtocolError::InvalidStatus { response } => Some(response),
            ProtocolError::EmptyIdentification => None,
        }
    }
}

/// The operation requires a connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("not connected to the power supply")]
pub struct NotConnectedError;

/// The operation was cancelled via a [`CancelToken`](crate::transport::CancelToken).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("the operation was cancelled")]
pub struct CancelledError;

/// A setpoint falls outside the client-side safety limits.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{quantity} {value} is outside the allowed range [{min}, {max}]")]
pub struct LimitExceededError {
    /// What was being set (e.g., "voltage").
    pub quantity: &'static str,
    /// The rejected value.
    pub value: f64,
    /// The lowest allowed value.
    pub min: f64,
    /// The highest allowed value.
    pub max: f64,
}

/// An argument violated a precondition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {argument}: {reason}")]
pub struct InvalidArgumentError {
    /// The name of the argument.
    pub argument: &'static str,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl InvalidArgumentError {
    pub(crate) fn new(argument: &'static str, reason: &'static str) -> Self {
        InvalidArgumentError { argument, reason }
    }
}

error_enum! {
    /// Any error returned by this library.
    #[non_exhaustive]
    pub enum Error {
        /// See [`ConfigurationError`].
        Configuration(ConfigurationError),
        /// See [`TransportError`].
        Transport(TransportError),
        /// See [`ProtocolError`].
        Protocol(ProtocolError),
        /// See [`NotConnectedError`].
        NotConnected(NotConnectedError),
        /// See [`LimitExceededError`].
        LimitExceeded(LimitExceededError),
        /// See [`InvalidArgumentError`].
        InvalidArgument(InvalidArgumentError),
        /// See [`CancelledError`].
        Cancelled(CancelledError),
    }
}

impl Error {
    /// Whether the error is due to the channel timing out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport(e) if e.is_timeout())
    }

    /// Whether the error was raised by client-side validation, in which case
    /// nothing was sent to the device.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::NotConnected(_) | Error::LimitExceeded(_) | Error::InvalidArgument(_)
        )
    }
}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        Error::Transport(TransportError::Io(other))
    }
}

impl From<serialport::Error> for Error {
    fn from(other: serialport::Error) -> Self {
        match other.kind() {
            serialport::ErrorKind::NoDevice => {
                TransportError::DeviceUnavailable(other.description).into()
            }
            serialport::ErrorKind::InvalidInput => {
                ConfigurationError::InvalidSerialSettings(other.description).into()
            }
            serialport::ErrorKind::Unknown => {
                TransportError::Io(io::Error::new(io::ErrorKind::Other, other.description)).into()
            }
            serialport::ErrorKind::Io(kind) => {
                TransportError::Io(io::Error::new(kind, other.description)).into()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use static_assertions::assert_impl_all;

    // Errors must be able to cross threads so a session can live behind a mutex.
    assert_impl_all!(Error: Send, Sync, std::error::Error);

    assert_impl_all!(Error: From<ConfigurationError>, From<TransportError>, From<ProtocolError>);
    assert_impl_all!(Error: From<NotConnectedError>, From<LimitExceededError>);
    assert_impl_all!(Error: From<InvalidArgumentError>, From<CancelledError>);
    assert_impl_all!(Error: From<io::Error>, From<serialport::Error>);

    assert_impl_all!(ConfigurationError: TryFrom<Error>);
    assert_impl_all!(TransportError: TryFrom<Error>);
    assert_impl_all!(ProtocolError: TryFrom<Error>);
    assert_impl_all!(LimitExceededError: TryFrom<Error>);

    #[test]
    fn try_from_recovers_the_inner_error() {
        let err: Error = NotConnectedError.into();
        assert_eq!(NotConnectedError::try_from(err).unwrap(), NotConnectedError);

        let err: Error = ProtocolError::EmptyIdentification.into();
        let err = LimitExceededError::try_from(err).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::EmptyIdentification)));
    }

    #[test]
    fn display_defers_to_inner_error() {
        let err: Error = ProtocolError::InvalidNumber {
            response: "abc".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "failed to parse numeric response: 'abc'");
    }

    #[test]
    fn is_timeout() {
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(err.is_timeout());
        let err: Error = TransportError::ConnectionClosed.into();
        assert!(!err.is_timeout());
    }

    #[test]
    fn serialport_errors_are_classified() {
        let err: Error =
            serialport::Error::new(serialport::ErrorKind::NoDevice, "/dev/ttyUSB9").into();
        assert!(matches!(
            err,
            Error::Transport(TransportError::DeviceUnavailable(_))
        ));

        let err: Error =
            serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad parity").into();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidSerialSettings(_))
        ));
    }

    #[test]
    fn precondition_errors() {
        let err: Error = InvalidArgumentError::new("ramp rate", "must be positive").into();
        assert!(err.is_precondition());
        let err: Error = TransportError::NotOpen.into();
        assert!(!err.is_precondition());
    }
}
