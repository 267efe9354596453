//! Transport boundary towards the AT firmware.
//!
//! The driver manages all framing (lines, `:` payload delimiters) itself and
//! only requires a byte stream with a timed single-byte read. Writing goes
//! through [embedded_io::Write]; a timeout on the read side is reported as
//! [nb::Error::WouldBlock].

/// Byte transport to the AT firmware, usually a UART.
///
/// The implementation is expected to block in [Serial::read_byte] up to a
/// configured timeout and then report [nb::Error::WouldBlock]. The driver
/// never blocks indefinitely on top of that: after three consecutive
/// first-byte timeouts the module is declared unresponsive.
pub trait Serial: embedded_io::Write {
    /// Reads the next byte, blocking up to the port's configured timeout.
    /// `WouldBlock` signals that the timeout elapsed without data.
    fn read_byte(&mut self) -> nb::Result<u8, Self::Error>;

    /// Number of bytes buffered and readable without blocking.
    fn bytes_available(&mut self) -> usize;
}
