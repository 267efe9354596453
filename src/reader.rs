//! The line reader and command dispatcher.
//!
//! All module traffic funnels through [Driver::read_rx]: it reads one line
//! (or one payload-announcing header) at a time, matches it against the
//! reply the caller expects and applies every unsolicited notification to
//! the link table on the way, no matter which command is in flight. Commands
//! are written as one piece and then drive the reader until the expected
//! line, a terminator or a timeout.

use crate::responses::{self, Fields};
use crate::serial::Serial;
use crate::types::Error;
use crate::urc::{self, Urc};
use crate::wifi::Driver;
use core::net::Ipv4Addr;
use core::str::FromStr;
use embedded_io::Error as _;
use fugit_timer::Timer;
use heapless::Vec;
use log::{debug, error, trace};

/// Consecutive first-byte timeouts before the module is declared dead.
pub(crate) const TIMEOUT_COUNT: u8 = 3;

/// Unrecognized lines tolerated within one call; a reset spews many.
const IGNORE_LIMIT: u8 = 70;

/// One accumulated reply line, terminator stripped.
pub(crate) type Line = Vec<u8, 64>;

/// Outcome of one reader invocation.
pub(crate) enum ReadResult {
    /// The expected reply line, also returned for an ERROR excused by the
    /// UNLINK firmware bug
    Matched(Line),
    /// The bare OK terminating an enumeration
    EndOfList,
    /// Nothing pending and nothing expected
    Drained,
}

impl<S, T, const TIMER_HZ: u32, const TX_SIZE: usize> Driver<S, T, TIMER_HZ, TX_SIZE>
where
    S: Serial,
    T: Timer<TIMER_HZ>,
{
    /// Processes pending unsolicited traffic. Returns as soon as the
    /// transport has nothing buffered; called by every public operation
    /// before its own command so stale notifications cannot be misread as
    /// the new command's reply.
    pub fn maintain(&mut self) {
        let _ = self.read_rx(None, false, false);
    }

    /// Reads and classifies lines until the expected reply, a terminator or
    /// a timeout. See the variants of [ReadResult] for the outcomes.
    ///
    /// `buffer_data = false` delimits `+CIP...` replies at the colon that
    /// separates the header from an inline payload, leaving the payload in
    /// the transport for the caller. `list_item` turns the bare `OK` into
    /// [ReadResult::EndOfList] instead of an ignored line.
    pub(crate) fn read_rx(
        &mut self,
        expected: Option<&str>,
        buffer_data: bool,
        list_item: bool,
    ) -> Result<ReadResult, Error> {
        let mut timeouts: u8 = 0;
        let mut unlink_bug = false;
        let mut ignored: u8 = 0;

        loop {
            if expected.is_none() && self.serial.bytes_available() == 0 {
                return Ok(ReadResult::Drained);
            }

            let mut line = Line::new();

            let first = match self.serial.read_byte() {
                Ok(byte) => byte,
                Err(nb::Error::WouldBlock) => {
                    if timeouts == TIMEOUT_COUNT {
                        error!("AT firmware not responding");
                        return Err(Error::AtNotResponding);
                    }
                    // Poke the module with an invalid one character command.
                    // A busy responder answers "busy p..." (ignored below), a
                    // stuck one a late ERROR (ignored when nothing is
                    // expected), a dead one stays silent until the strikes
                    // run out.
                    self.write_serial(b"?\r\n")?;
                    timeouts += 1;
                    continue;
                }
                Err(nb::Error::Other(e)) => return Err(Error::Serial(e.kind())),
            };

            if first == b'>' {
                // data prompt; V1 firmware appends a space that must go
                if self.variant.prompt_trailing_space() {
                    let _ = self.serial.read_byte();
                }
                let _ = line.push(b'>');
                timeouts = 0;
            } else {
                let second = match self.serial.read_byte() {
                    Ok(byte) => byte,
                    Err(nb::Error::WouldBlock) => continue,
                    Err(nb::Error::Other(e)) => return Err(Error::Serial(e.kind())),
                };
                timeouts = 0;

                if first == b'\r' && second == b'\n' {
                    // empty line, skip it
                    continue;
                }
                let _ = line.push(first);
                let _ = line.push(second);

                let mut terminator = b'\n';
                if first == b'+' {
                    if second == b'C' && !buffer_data {
                        // +CIPRECVDATA header, payload follows the colon
                        terminator = b':';
                    } else if second == b'I' && self.variant.udp_inline_drain() {
                        // +IPD: for a UDP listener the payload arrives inline
                        for _ in 0..4 {
                            match self.serial.read_byte() {
                                Ok(byte) => {
                                    let _ = line.push(byte);
                                }
                                Err(nb::Error::WouldBlock) => break,
                                Err(nb::Error::Other(e)) => return Err(Error::Serial(e.kind())),
                            }
                        }
                        if line.len() == 6 {
                            if let Some(link_id) = urc::parse_link_id(line[5]) {
                                if self.links.get(link_id).is_udp_listener() {
                                    terminator = b':';
                                }
                            }
                        }
                    }
                }

                loop {
                    if line.is_full() {
                        break;
                    }
                    match self.serial.read_byte() {
                        Ok(byte) if byte == terminator => break,
                        Ok(byte) => {
                            let _ = line.push(byte);
                        }
                        Err(nb::Error::WouldBlock) => break,
                        Err(nb::Error::Other(e)) => return Err(Error::Serial(e.kind())),
                    }
                }
                // 'while' because some (ignored) messages end \r\r\n
                while line.last() == Some(&b'\r') {
                    line.pop();
                }
            }

            trace!("< {}", responses::text(&line));

            if let Some(expected) = expected {
                if line.starts_with(expected.as_bytes()) {
                    trace!("  ...matched");
                    return Ok(ReadResult::Matched(line));
                }
            }

            match Urc::parse(&line) {
                Urc::DataAvailable { link_id, len } => {
                    if self.variant.udp_inline_drain() && self.links.get(link_id).is_udp_listener() {
                        self.drain_udp_payload(link_id, len);
                    } else {
                        self.links.data_notification(link_id, len);
                    }
                }
                Urc::TruncatedData => {
                    // +IPD header mangled by receive overflow
                    trace!("  ...ignored");
                }
                Urc::Connect(link_id) => {
                    if !self.links.peer_connected(link_id) {
                        trace!("  ...ignored");
                    }
                }
                Urc::Closed(link_id) => {
                    self.links
                        .peer_closed(link_id, self.variant.clears_available_on_closed());
                }
                Urc::Error => {
                    if unlink_bug {
                        trace!("  ...UNLINK is OK");
                        return Ok(ReadResult::Matched(line));
                    }
                    match expected {
                        Some(expected) => {
                            error!("expected {} got {}", expected, responses::text(&line));
                            return Err(Error::AtError);
                        }
                        // only a late response to the timeout poke
                        None => trace!("  ...ignored"),
                    }
                }
                Urc::NoAp => {
                    error!("expected {} got No AP", expected.unwrap_or("nothing"));
                    return Err(Error::NoAp);
                }
                Urc::Unlink => {
                    // a spurious ERROR may follow, known firmware bug
                    unlink_bug = true;
                }
                Urc::Ok if list_item => {
                    trace!("  ...end of list");
                    return Ok(ReadResult::EndOfList);
                }
                Urc::Ok | Urc::Unknown => {
                    ignored += 1;
                    if ignored > IGNORE_LIMIT {
                        error!("too much garbage on RX");
                        return Err(Error::AtNotResponding);
                    }
                    trace!("  ...ignored");
                }
            }
        }
    }

    /// Transmits `text` plus the line terminator and waits for the bare OK.
    pub(crate) fn command(&mut self, text: &str) -> Result<(), Error> {
        self.transmit_command(text)?;
        self.read_ok()
    }

    /// Transmits `text` and waits for a reply line starting with `expected`.
    pub(crate) fn command_expect(
        &mut self,
        text: &str,
        expected: &str,
        buffer_data: bool,
    ) -> Result<Line, Error> {
        self.transmit_command(text)?;
        self.read_match(expected, buffer_data)
    }

    /// Transmits `text` and reads the first item of an enumeration; `None`
    /// when the list is empty.
    pub(crate) fn command_list(&mut self, text: &str, expected: &str) -> Result<Option<Line>, Error> {
        self.transmit_command(text)?;
        self.read_list_item(expected)
    }

    /// Drains pending traffic, then runs a fixed command expecting OK.
    pub(crate) fn simple_command(&mut self, text: &str) -> Result<(), Error> {
        self.maintain();
        self.command(text)
    }

    fn transmit_command(&mut self, text: &str) -> Result<(), Error> {
        debug!("> {}", text);
        self.write_serial(text.as_bytes())?;
        self.write_serial(b"\r\n")
    }

    pub(crate) fn write_serial(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.serial
            .write_all(bytes)
            .map_err(|e| Error::Serial(e.kind()))
    }

    /// Waits for the bare success terminator.
    pub(crate) fn read_ok(&mut self) -> Result<(), Error> {
        self.read_match("OK", true).map(|_| ())
    }

    /// Waits for a reply line starting with `expected`.
    pub(crate) fn read_match(&mut self, expected: &str, buffer_data: bool) -> Result<Line, Error> {
        match self.read_rx(Some(expected), buffer_data, false)? {
            ReadResult::Matched(line) => Ok(line),
            _ => Err(Error::AtError),
        }
    }

    /// Next item of an enumeration reply; `None` once the terminating OK
    /// arrived.
    pub(crate) fn read_list_item(&mut self, expected: &str) -> Result<Option<Line>, Error> {
        match self.read_rx(Some(expected), true, true)? {
            ReadResult::Matched(line) => Ok(Some(line)),
            ReadResult::EndOfList => Ok(None),
            ReadResult::Drained => Err(Error::AtError),
        }
    }

    /// Reads raw payload bytes; a mid-transfer timeout returns the short
    /// count.
    pub(crate) fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        for i in 0..buf.len() {
            match self.serial.read_byte() {
                Ok(byte) => buf[i] = byte,
                Err(nb::Error::WouldBlock) => return Ok(i),
                Err(nb::Error::Other(e)) => return Err(Error::Serial(e.kind())),
            }
        }
        Ok(buf.len())
    }

    fn read_field(&mut self, delim: u8) -> Result<Vec<u8, 24>, Error> {
        let mut field = Vec::new();
        loop {
            match self.serial.read_byte() {
                Ok(byte) if byte == delim => return Ok(field),
                Ok(byte) => {
                    if field.push(byte).is_err() {
                        return Ok(field);
                    }
                }
                Err(nb::Error::WouldBlock) => return Ok(field),
                Err(nb::Error::Other(e)) => return Err(Error::Serial(e.kind())),
            }
        }
    }

    /// Parses a decimal payload header field terminated by `delim`.
    pub(crate) fn read_number_until(&mut self, delim: u8) -> Result<usize, Error> {
        let field = self.read_field(delim)?;
        responses::text(&field)
            .trim()
            .parse()
            .map_err(|_| Error::Receive)
    }

    /// Parses a quoted address header field terminated by `delim`.
    pub(crate) fn read_ip_until(&mut self, delim: u8) -> Result<Option<Ipv4Addr>, Error> {
        let field = self.read_field(delim)?;
        Ok(Fields::new(responses::text(&field))
            .quoted()
            .and_then(|s| Ipv4Addr::from_str(s).ok()))
    }

    /// Drains an inline UDP payload through the link's registered sink.
    /// Rejections and mid-payload timeouts discard the datagram without
    /// failing the surrounding read.
    fn drain_udp_payload(&mut self, link_id: u8, len: usize) {
        let mut sink = self.links.link(link_id).udp_sink.take();
        let accepted = match sink.as_mut() {
            Some(sink) => match sink.begin_datagram(len) {
                Ok(()) => true,
                Err(e) => {
                    error!("UDP message on link {} size {} rejected {:?}", link_id, len, e);
                    false
                }
            },
            None => {
                error!("UDP message on link {} size {} has no sink", link_id, len);
                false
            }
        };

        let mut chunk = [0u8; 32];
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(chunk.len());
            let got = self.read_raw(&mut chunk[..want]).unwrap_or(0);
            if accepted && got > 0 {
                if let Some(sink) = sink.as_mut() {
                    sink.push(&chunk[..got]);
                }
            }
            remaining -= got;
            if got < want {
                error!("UDP message on link {} {:?}", link_id, Error::UdpTimeout);
                break;
            }
        }
        self.links.link(link_id).udp_sink = sink;
    }
}
