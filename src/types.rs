//! Common types of the driver: the error taxonomy, scan records and the
//! UDP datagram sink used by the legacy (V1 firmware) receiving mode.

use heapless::String;

/// Number of concurrent links the AT firmware multiplexes over one serial
/// channel. Link ids are `0..LINK_COUNT`.
pub const LINK_COUNT: usize = 5;

/// Maximum payload length of a single CIPSEND transmission.
pub const MAX_SEND_LENGTH: usize = 2048;

/// Errors surfaced by every fallible driver operation.
///
/// The driver never retries on its own beyond the line reader's liveness
/// probe; callers decide the retry policy for their application.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// `init()` was not executed successfully
    NotInitialized,

    /// The module did not produce a byte within three consecutive read
    /// timeouts, or flooded the channel with unrecognized lines
    AtNotResponding,

    /// The module terminated a command with `ERROR` or `FAIL`
    AtError,

    /// Station mode is off or no access point is associated
    NoAp,

    /// The selected link is already carrying a connection
    LinkAlreadyConnected,

    /// The link is closed, closing or was recycled
    LinkNotActive,

    /// All links are in use
    NoFreeLink,

    /// The module announced fewer payload bytes than it delivered, or the
    /// payload timed out mid-transfer
    Receive,

    /// The module rejected the transmission (`SEND FAIL`) or the send
    /// handshake failed
    Send,

    /// A datagram arrived while the registered sink was busy
    UdpBusy,

    /// A datagram is larger than the receiving buffer
    UdpLarge,

    /// A datagram payload timed out mid-transfer
    UdpTimeout,

    /// The serial port itself failed
    Serial(embedded_io::ErrorKind),
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Error::Serial(kind) => *kind,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::NotInitialized => defmt::write!(f, "Error::NotInitialized"),
            Error::AtNotResponding => defmt::write!(f, "Error::AtNotResponding"),
            Error::AtError => defmt::write!(f, "Error::AtError"),
            Error::NoAp => defmt::write!(f, "Error::NoAp"),
            Error::LinkAlreadyConnected => defmt::write!(f, "Error::LinkAlreadyConnected"),
            Error::LinkNotActive => defmt::write!(f, "Error::LinkNotActive"),
            Error::NoFreeLink => defmt::write!(f, "Error::NoFreeLink"),
            Error::Receive => defmt::write!(f, "Error::Receive"),
            Error::Send => defmt::write!(f, "Error::Send"),
            Error::UdpBusy => defmt::write!(f, "Error::UdpBusy"),
            Error::UdpLarge => defmt::write!(f, "Error::UdpLarge"),
            Error::UdpTimeout => defmt::write!(f, "Error::UdpTimeout"),
            Error::Serial(_) => defmt::write!(f, "Error::Serial"),
        }
    }
}

/// One record of a network scan (`AT+CWLAP`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApData {
    pub ssid: String<32>,
    /// BSSID bytes in transmission order of the AT firmware (last octet first)
    pub bssid: [u8; 6],
    pub rssi: i8,
    pub channel: u8,
    /// Encryption method as reported by the firmware (0 = open, 4 = WPA2)
    pub enc: u8,
}

/// Power save mode set with `AT+SLEEP`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SleepMode {
    Disabled = 0,
    Modem = 1,
    Light = 2,
}

/// Consumer of inline UDP payloads in the legacy (V1 firmware) receiving
/// mode, where a datagram arrives attached to its `+IPD` notification and
/// must be drained synchronously by whatever read happens to be in progress.
pub trait UdpDataSink {
    /// Announces a datagram of `len` bytes. Rejecting it (typically with
    /// [Error::UdpBusy] or [Error::UdpLarge]) discards the payload, which is
    /// still consumed from the serial channel.
    fn begin_datagram(&mut self, len: usize) -> Result<(), Error>;

    /// Delivers the next payload chunk of an accepted datagram.
    fn push(&mut self, chunk: &[u8]);
}
