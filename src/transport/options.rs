//! Types describing how to reach a power supply.

use super::Connect;
use crate::{
    backend::{Backend, Serial},
    error::{ConfigurationError, Error, TransportError},
};
use serialport as sp;
use std::{
    fmt, io,
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

pub use sp::{DataBits, Parity, StopBits};

/// The default communication timeout: 1 second.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// The TCP port G30 supplies listen on: 8003.
pub const DEFAULT_TCP_PORT: u16 = 8003;

/// The default serial baud rate: 9,600.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// The serial baud rates supported by the power supply.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[1200, 2400, 4800, 9600, 19200, 38400, 57600, 115_200];

/// A network endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TcpEndpoint {
    /// The host name or IP address.
    pub host: String,
    /// The TCP port.
    pub port: u16,
}

impl TcpEndpoint {
    /// Create an endpoint for `host` on the default port.
    pub fn new<H: Into<String>>(host: H) -> Self {
        TcpEndpoint {
            host: host.into(),
            port: DEFAULT_TCP_PORT,
        }
    }
}

impl fmt::Display for TcpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A serial endpoint.
///
/// The supply only supports no flow control, which is always used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialEndpoint {
    /// The path to the serial port (e.g., `/dev/ttyUSB0` or `COM3`).
    pub path: String,
    /// The baud rate. Must be one of [`SUPPORTED_BAUD_RATES`].
    pub baud_rate: u32,
    /// The number of data bits.
    pub data_bits: DataBits,
    /// The parity.
    pub parity: Parity,
    /// The number of stop bits.
    pub stop_bits: StopBits,
}

impl SerialEndpoint {
    /// Create an endpoint for the port at `path` with the default settings:
    /// 9,600 baud, 8 data bits, no parity and 1 stop bit.
    pub fn new<P: Into<String>>(path: P) -> Self {
        SerialEndpoint {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl fmt::Display for SerialEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.baud_rate)
    }
}

/// Where the power supply can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Over the network.
    Tcp(TcpEndpoint),
    /// Over a serial line.
    Serial(SerialEndpoint),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(tcp) => write!(f, "tcp://{tcp}"),
            Endpoint::Serial(serial) => write!(f, "serial:{serial}"),
        }
    }
}

impl From<TcpEndpoint> for Endpoint {
    fn from(other: TcpEndpoint) -> Self {
        Endpoint::Tcp(other)
    }
}

impl From<SerialEndpoint> for Endpoint {
    fn from(other: SerialEndpoint) -> Self {
        Endpoint::Serial(other)
    }
}

/// Connection settings for a power supply.
///
/// The settings are only validated when the connection is opened, and
/// invalid settings are reported as a [`ConfigurationError`] before any
/// attempt is made to reach the device.
///
/// ## Example
///
/// ```rust
/// # use scpi_psu::transport::{Config, Endpoint, SerialEndpoint, Parity};
/// # use std::time::Duration;
/// // The short way.
/// let tcp = Config::tcp("192.168.0.50", 8003).with_timeout(Duration::from_millis(500));
///
/// // Spelling everything out.
/// let mut serial = SerialEndpoint::new("/dev/ttyUSB0");
/// serial.baud_rate = 19200;
/// serial.parity = Parity::Even;
/// let serial = Config {
///     endpoint: Endpoint::Serial(serial),
///     timeout: Duration::from_secs(2),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where to reach the device.
    pub endpoint: Endpoint,
    /// How long to wait for a reply.
    pub timeout: Duration,
}

impl Config {
    /// Create settings for `endpoint` with the default timeout.
    pub fn new<E: Into<Endpoint>>(endpoint: E) -> Self {
        Config {
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create settings for a network connection to `host:port`.
    pub fn tcp<H: Into<String>>(host: H, port: u16) -> Self {
        Config::new(TcpEndpoint {
            host: host.into(),
            port,
        })
    }

    /// Create settings for the serial port at `path`, using 8 data bits, no
    /// parity and 1 stop bit.
    pub fn serial<P: Into<String>>(path: P, baud_rate: u32) -> Self {
        let mut endpoint = SerialEndpoint::new(path);
        endpoint.baud_rate = baud_rate;
        Config::new(endpoint)
    }

    /// Use a custom timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the settings without opening anything.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.timeout.is_zero() {
            return Err(ConfigurationError::InvalidTimeout);
        }
        match &self.endpoint {
            Endpoint::Tcp(tcp) => {
                if tcp.host.trim().is_empty() || tcp.port == 0 {
                    return Err(ConfigurationError::MissingEndpoint);
                }
            }
            Endpoint::Serial(serial) => {
                if serial.path.trim().is_empty() {
                    return Err(ConfigurationError::MissingEndpoint);
                }
                if !SUPPORTED_BAUD_RATES.contains(&serial.baud_rate) {
                    return Err(ConfigurationError::UnsupportedBaudRate(serial.baud_rate));
                }
            }
        }
        Ok(())
    }

    /// Open a TCP connection with the configured timeouts.
    fn open_tcp(&self, tcp: &TcpEndpoint) -> Result<TcpStream, Error> {
        let address = tcp.to_string();
        let addrs = (tcp.host.as_str(), tcp.port)
            .to_socket_addrs()
            .map_err(|source| ConfigurationError::InvalidAddress {
                address: address.clone(),
                source,
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    let configure = || -> io::Result<()> {
                        stream.set_read_timeout(Some(self.timeout))?;
                        stream.set_write_timeout(Some(self.timeout))?;
                        stream.set_nodelay(true)
                    };
                    return match configure() {
                        Ok(()) => Ok(stream),
                        Err(source) => Err(TransportError::Open {
                            endpoint: address,
                            source,
                        }
                        .into()),
                    };
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(TransportError::Open {
            endpoint: address,
            source: last_error.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved")
            }),
        }
        .into())
    }

    /// Open and configure a [`Serial`] port.
    fn open_serial(&self, serial: &SerialEndpoint) -> Result<Serial, Error> {
        // Due to https://gitlab.com/susurrus/serialport-rs/-/issues/102, the
        // baud rate passed to new is ignored. It must be defined using the
        // baud_rate method below.
        sp::new(serial.path.as_str(), DEFAULT_BAUD_RATE)
            .data_bits(serial.data_bits)
            .parity(serial.parity)
            .flow_control(sp::FlowControl::None)
            .stop_bits(serial.stop_bits)
            .timeout(self.timeout)
            .baud_rate(serial.baud_rate)
            .open_native()
            .map(Serial)
            .map_err(|e| match e.kind() {
                sp::ErrorKind::Io(kind) => TransportError::Open {
                    endpoint: serial.to_string(),
                    source: io::Error::new(kind, e.description),
                }
                .into(),
                _ => e.into(),
            })
    }
}

impl Connect for Config {
    type Backend = Box<dyn Backend + Send>;

    fn connect(&mut self) -> Result<Self::Backend, Error> {
        self.validate()?;
        let backend: Self::Backend = match &self.endpoint {
            Endpoint::Tcp(tcp) => Box::new(self.open_tcp(tcp)?),
            Endpoint::Serial(serial) => Box::new(self.open_serial(serial)?),
        };
        Ok(backend)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }
}
