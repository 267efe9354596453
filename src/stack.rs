//! Connection operations: opening and closing links, sending and receiving
//! data, server accept scans and the state resync that compensates for
//! notifications lost to receive overflow.

use crate::commands;
use crate::link::LinkState;
use crate::responses;
use crate::serial::Serial;
use crate::types::{Error, UdpDataSink, LINK_COUNT, MAX_SEND_LENGTH};
use crate::wifi::Driver;
use alloc::boxed::Box;
use core::net::Ipv4Addr;
use embedded_io::Error as _;
use fugit::ExtU32;
use fugit_timer::Timer;
use heapless::Vec;
use log::{error, info, warn};

/// Transport of an outbound connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionType {
    Tcp,
    Udp,
    Ssl,
}

impl ConnectionType {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Tcp => "TCP",
            ConnectionType::Udp => "UDP",
            ConnectionType::Ssl => "SSL",
        }
    }
}

/// Result of [Driver::recv_data_with_info].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdpRecvInfo {
    /// Bytes written to the caller's buffer
    pub len: usize,
    pub remote_ip: Option<Ipv4Addr>,
    pub remote_port: u16,
    /// The datagram was larger than the buffer; it was truncated to the
    /// buffer and its tail will not be served
    pub oversized: bool,
}

impl<S, T, const TIMER_HZ: u32, const TX_SIZE: usize> Driver<S, T, TIMER_HZ, TX_SIZE>
where
    S: Serial,
    T: Timer<TIMER_HZ>,
{
    /// Opens an outbound connection and returns its link id.
    pub fn connect(&mut self, kind: ConnectionType, host: &str, port: u16) -> Result<u8, Error> {
        self.connect_internal(kind, host, port, None, None)
    }

    /// Binds a UDP "connection" to a local port, receiving datagrams from
    /// any remote. The sink consumes inline payloads on V1 firmware; V2
    /// buffers datagrams for [Driver::recv_data_with_info].
    pub fn connect_udp(
        &mut self,
        host: &str,
        port: u16,
        local_port: u16,
        sink: Option<Box<dyn UdpDataSink>>,
    ) -> Result<u8, Error> {
        self.connect_internal(ConnectionType::Udp, host, port, Some(local_port), sink)
    }

    fn connect_internal(
        &mut self,
        kind: ConnectionType,
        host: &str,
        port: u16,
        udp_local_port: Option<u16>,
        sink: Option<Box<dyn UdpDataSink>>,
    ) -> Result<u8, Error> {
        self.maintain();

        let link_id = self.links.free_link_id().ok_or(Error::NoFreeLink)?;
        info!("start {} to {}:{} on link {}", kind.as_str(), host, port, link_id);

        if self.links.get(link_id).is_connected() {
            error!("linkId {} is already connected", link_id);
            return Err(Error::LinkAlreadyConnected);
        }

        let cmd = commands::connect(link_id, kind, host, port, udp_local_port)?;
        {
            let link = self.links.link(link_id);
            link.local_port = udp_local_port.unwrap_or(0);
            // claim the slot before the reply: the module echoes our own
            // <id>,CONNECT which must not read as an incoming connection
            link.state = LinkState::Connecting;
        }

        if let Err(e) = self.command(&cmd) {
            self.links.link(link_id).state = LinkState::Free;
            return Err(e);
        }

        let link = self.links.link(link_id);
        if udp_local_port.is_some() {
            link.state = LinkState::UdpListener;
            link.udp_sink = sink;
        } else if matches!(link.state, LinkState::Connecting) {
            link.state = LinkState::Connected {
                incoming: false,
                accepted: false,
            };
        }
        Ok(link_id)
    }

    /// Closes a link. `abort` tears the connection down instead of draining
    /// it gracefully. Closing an already closed link succeeds.
    pub fn close(&mut self, link_id: u8, abort: bool) -> Result<(), Error> {
        self.maintain();
        info!("close link {}", link_id);

        let link = self.links.link(link_id);
        link.available = 0;
        if !link.in_use() {
            info!("link is already closed");
            return Ok(());
        }
        link.state = LinkState::Closing;

        if abort {
            let cmd = commands::close_abort(link_id)?;
            let _ = self.command(&cmd);
        }
        let cmd = commands::close(link_id)?;
        self.command(&cmd)
    }

    /// True while the link carries a usable connection; a closing link
    /// counts as disconnected.
    pub fn connected(&mut self, link_id: u8) -> bool {
        self.maintain();
        self.links.get(link_id).is_connected()
    }

    /// Bytes buffered by the module for the link. A zero count triggers a
    /// (rate limited) resync, recovering promptly from lost notifications
    /// without taxing a link that is actively producing data.
    pub fn avail_data(&mut self, link_id: u8) -> usize {
        self.maintain();
        let link = self.links.get(link_id);
        if link.available == 0 && link.is_connected() {
            let _ = self.sync_link_info();
        }
        self.links.get(link_id).available
    }

    /// Fetches up to `data.len()` buffered bytes from the module. Returns 0
    /// without touching the transport when nothing is available.
    pub fn recv_data(&mut self, link_id: u8, data: &mut [u8]) -> Result<usize, Error> {
        self.maintain();
        info!("get data on link {}", link_id);

        if self.links.get(link_id).available == 0 {
            if !self.links.get(link_id).is_connected() {
                warn!("link is not active");
                return Err(Error::LinkNotActive);
            }
            warn!("no data for link {}", link_id);
            return Ok(0);
        }

        let cmd = commands::receive_data(link_id, data.len())?;
        let header = match self.command_expect(&cmd, "+CIPRECVDATA", false) {
            Ok(header) => header,
            Err(_) => {
                // V2 SSL reports more data than it has and closes the link
                // to signal the end of data
                if !self.variant.recv_len_in_header() && self.links.get(link_id).available == 0 {
                    return Ok(0);
                }
                return Err(self.receive_failed(link_id));
            }
        };

        let len = if self.variant.recv_len_in_header() {
            responses::str_after(&header, "+CIPRECVDATA,")
                .and_then(responses::leading_number)
                .ok_or(Error::Receive)?
        } else {
            self.read_number_until(b',')?
        };
        if len > data.len() {
            return Err(self.receive_failed(link_id));
        }

        let got = self.read_raw(&mut data[..len])?;
        if got != len {
            // timeout mid-payload
            return Err(self.receive_failed(link_id));
        }

        let link = self.links.link(link_id);
        link.available = link.available.saturating_sub(len);
        let _ = self.read_ok();

        info!("got {} bytes on link {}", len, link_id);
        Ok(len)
    }

    /// Fetches one buffered datagram together with its remote address (V2
    /// passive UDP). A datagram larger than `data` is truncated and flagged
    /// [UdpRecvInfo::oversized]; its tail is not served later.
    pub fn recv_data_with_info(&mut self, link_id: u8, data: &mut [u8]) -> Result<UdpRecvInfo, Error> {
        self.maintain();
        info!("get data and info on link {}", link_id);

        let available = self.links.get(link_id).available;
        if available == 0 {
            if !self.links.get(link_id).is_connected() {
                warn!("link is not active");
                return Err(Error::LinkNotActive);
            }
            warn!("no data for link {}", link_id);
            return Ok(UdpRecvInfo {
                len: 0,
                remote_ip: None,
                remote_port: 0,
                oversized: false,
            });
        }

        let mut request = data.len();
        let mut oversized = false;
        if self.links.get(link_id).is_udp_listener() {
            if request > available {
                // don't read data of the next message
                request = available;
            } else if request < available {
                // a buffered datagram must be read at once
                error!(
                    "UDP message on link {} size {} is larger than {} {:?}",
                    link_id,
                    available,
                    data.len(),
                    Error::UdpLarge
                );
                oversized = true;
                // the rest of the message will not be available
                self.links.link(link_id).available = request;
            }
        }

        self.simple_command("AT+CIPDINFO=1")?;
        let result = self.recv_info_frame(link_id, &mut data[..request]);
        let _ = self.simple_command("AT+CIPDINFO=0");

        let (len, remote_ip, remote_port) = result?;
        Ok(UdpRecvInfo {
            len,
            remote_ip,
            remote_port,
            oversized,
        })
    }

    fn recv_info_frame(
        &mut self,
        link_id: u8,
        data: &mut [u8],
    ) -> Result<(usize, Option<Ipv4Addr>, u16), Error> {
        let cmd = commands::receive_data(link_id, data.len())?;
        if self.command_expect(&cmd, "+CIPRECVDATA", false).is_err() {
            return Err(self.receive_failed(link_id));
        }

        let len = self.read_number_until(b',')?;
        let remote_ip = self.read_ip_until(b',')?;
        let remote_port = self.read_number_until(b',')? as u16;

        if len > data.len() {
            return Err(self.receive_failed(link_id));
        }
        let got = self.read_raw(&mut data[..len])?;
        if got != len {
            return Err(self.receive_failed(link_id));
        }

        let link = self.links.link(link_id);
        link.available = link.available.saturating_sub(len);
        let _ = self.read_ok();

        info!("got {} bytes on link {}", len, link_id);
        Ok((len, remote_ip, remote_port))
    }

    fn receive_failed(&mut self, link_id: u8) -> Error {
        error!("error receiving on link {}", link_id);
        self.links.link(link_id).available = 0;
        Error::Receive
    }

    /// Sends one buffer. Returns the byte count acknowledged by the module,
    /// which the caller should compare against `data.len()`.
    pub fn send_data(
        &mut self,
        link_id: u8,
        data: &[u8],
        udp_peer: Option<(&str, u16)>,
    ) -> Result<usize, Error> {
        self.maintain();
        info!("send data on link {}", link_id);

        if !self.links.get(link_id).is_connected() {
            error!("link is not connected");
            return Err(Error::LinkNotActive);
        }

        let cmd = commands::send("AT+CIPSEND", link_id, data.len(), udp_peer)?;
        self.command_expect(&cmd, ">", true)?;
        self.write_serial(data)?;

        let sent = self.finish_send()?;
        info!("sent {} bytes on link {}", sent, link_id);
        Ok(sent)
    }

    /// Sends everything `source` yields, framed in chunks of TX_SIZE.
    pub fn send_stream<R: embedded_io::Read>(
        &mut self,
        link_id: u8,
        source: &mut R,
        udp_peer: Option<(&str, u16)>,
    ) -> Result<usize, Error> {
        self.maintain();
        info!("send stream on link {}", link_id);

        if !self.links.get(link_id).is_connected() {
            error!("link is not connected");
            return Err(Error::LinkNotActive);
        }

        let mut chunk = [0u8; TX_SIZE];
        let mut total = 0;
        loop {
            let length = source.read(&mut chunk).map_err(|e| Error::Serial(e.kind()))?;
            if length == 0 {
                break;
            }

            let cmd = commands::send("AT+CIPSEND", link_id, length, udp_peer)?;
            if self.command_expect(&cmd, ">", true).is_err() {
                error!("CIPSEND failed at {}", total);
                return Err(Error::Send);
            }
            self.write_serial(&chunk[..length])?;

            let sent = self.finish_send().map_err(|e| {
                error!("failed to send data at {}", total);
                e
            })?;
            total += sent;
            if sent < length {
                warn!("retardment of sending data at {}", total);
            }
        }

        info!("sent {} bytes on link {}", total, link_id);
        Ok(total)
    }

    /// Sends whatever the callback writes to the serial port, terminated by
    /// the `\0` marker of CIPSENDEX. At most [MAX_SEND_LENGTH] bytes.
    pub fn send_with<F>(
        &mut self,
        link_id: u8,
        write: F,
        udp_peer: Option<(&str, u16)>,
    ) -> Result<usize, Error>
    where
        F: FnOnce(&mut S),
    {
        self.maintain();
        info!("send with callback on link {}", link_id);

        if !self.links.get(link_id).is_connected() {
            error!("link is not connected");
            return Err(Error::LinkNotActive);
        }

        let cmd = commands::send("AT+CIPSENDEX", link_id, MAX_SEND_LENGTH, udp_peer)?;
        self.command_expect(&cmd, ">", true)?;

        write(&mut self.serial);
        // the firmware needs a moment before the end marker
        self.settle_delay();
        self.write_serial(b"\\0")?;

        let sent = self.finish_send()?;
        info!("sent {} bytes on link {}", sent, link_id);
        Ok(sent)
    }

    /// `Recv <n>` then `SEND OK`/`SEND FAIL` conclude every transmission.
    fn finish_send(&mut self) -> Result<usize, Error> {
        let line = self.read_match("Recv ", true)?;
        let accepted = responses::str_after(&line, "Recv ")
            .and_then(responses::leading_number)
            .unwrap_or(0);

        let line = self.read_match("SEND ", true)?;
        if !line.starts_with(b"SEND OK") {
            error!("failed to send data");
            return Err(Error::Send);
        }
        Ok(accepted)
    }

    fn settle_delay(&mut self) {
        if self.timer.start(20.millis()).is_ok() {
            let _ = nb::block!(self.timer.wait());
        }
    }

    /// Starts the listening server of the module.
    pub fn server_begin(
        &mut self,
        port: u16,
        max_connections: u8,
        server_timeout: u16,
        ssl: bool,
        ca_enabled: bool,
    ) -> Result<(), Error> {
        self.maintain();
        info!("begin server at port {}", port);

        let cmd = commands::server_max_connections(max_connections)?;
        self.command(&cmd)?;
        let cmd = commands::server_start(port, ssl, ca_enabled)?;
        self.command(&cmd)?;
        let cmd = commands::server_timeout(server_timeout)?;
        self.command(&cmd)
    }

    /// Stops the listening server on `port`.
    pub fn server_end(&mut self, port: u16) -> Result<(), Error> {
        self.maintain();
        info!("stop server");

        let cmd = commands::server_stop(port)?;
        self.command(&cmd)
    }

    /// Scans for a pending incoming connection of the server on
    /// `server_port`. With `accept` the slot is marked accepted, so the next
    /// scan will not hand the same connection to a second caller; without,
    /// only links that already have data are reported.
    pub fn client_link_id(&mut self, server_port: u16, accept: bool) -> Option<u8> {
        self.maintain();

        for link_id in 0..LINK_COUNT as u8 {
            let link = self.links.get(link_id);
            let LinkState::Connected {
                incoming: true,
                accepted: false,
            } = link.state
            else {
                continue;
            };
            if link.available == 0 && !accept {
                continue;
            }
            if link.local_port == 0 {
                // populated lazily from the status listing
                let _ = self.check_links();
            }

            let link = self.links.link(link_id);
            if link.local_port != server_port {
                continue;
            }
            info!("incoming linkId {}", link_id);
            if accept {
                if let LinkState::Connected { incoming, .. } = link.state {
                    link.state = LinkState::Connected {
                        incoming,
                        accepted: true,
                    };
                }
            }
            return Some(link_id);
        }
        None
    }

    /// All pending incoming connections of the server on `server_port`,
    /// for write-to-all-clients broadcasts.
    pub fn client_link_ids(&mut self, server_port: u16) -> Vec<u8, LINK_COUNT> {
        self.maintain();

        let mut ids = Vec::new();
        for link_id in 0..LINK_COUNT as u8 {
            let link = self.links.get(link_id);
            let LinkState::Connected {
                incoming: true,
                accepted: false,
            } = link.state
            else {
                continue;
            };
            if link.local_port == 0 {
                let _ = self.check_links();
            }
            if self.links.get(link_id).local_port != server_port {
                continue;
            }
            let _ = ids.push(link_id);
        }
        info!("{} link ids for server", ids.len());
        ids
    }

    /// Remote address, remote port and local port of a link, from the
    /// module's status listing. An absent link is marked dead.
    pub fn remote_params_query(&mut self, link_id: u8) -> Result<(Ipv4Addr, u16, u16), Error> {
        self.maintain();
        info!("status of link {}", link_id);

        if self.links.get(link_id).in_use() {
            self.command_expect("AT+CIPSTATUS", "STATUS", true)?;
            while let Some(line) = self.read_list_item("+CIPSTATUS").unwrap_or(None) {
                let Some(record) = responses::parse_status_record(&line) else {
                    continue;
                };
                if record.link_id == link_id {
                    self.links.link(link_id).local_port = record.local_port;
                    // the remaining records drain as ignored lines
                    let _ = self.read_ok();
                    return Ok((record.remote_ip, record.remote_port, record.local_port));
                }
            }
        }

        warn!("link is not active");
        self.links.link(link_id).state = LinkState::Free;
        Err(Error::LinkNotActive)
    }

    /// Local port of a link, cached or queried on demand.
    pub fn local_port_query(&mut self, link_id: u8) -> Result<u16, Error> {
        let cached = self.links.get(link_id).local_port;
        if cached != 0 {
            return Ok(cached);
        }
        self.remote_params_query(link_id).map(|(_, _, local)| local)
    }

    /// Replaces locally tracked link state with the module's authoritative
    /// state, at most twice per second. The module's answer supersedes any
    /// notification bookkeeping, compensating for lost notifications.
    pub(crate) fn sync_link_info(&mut self) -> Result<(), Error> {
        let now = self.timer.now();
        if let Some(last) = self.last_sync {
            if let Some(elapsed) = now.checked_duration_since(last) {
                if elapsed.to_millis() < 500 {
                    return Ok(());
                }
            }
        }
        self.last_sync = Some(now);
        info!("sync");

        if self.variant.sync_checks_links() {
            // reconcile liveness first, to never observe a close before the
            // pending data size
            self.check_links()?;
        }
        self.recv_len_query()
    }

    /// Overwrites every link's available-byte counter with the module's
    /// `AT+CIPRECVLEN?` answer. On V2 the answer also reports inactive links
    /// (-1), reconciling liveness on the way.
    pub fn recv_len_query(&mut self) -> Result<(), Error> {
        self.maintain();

        let line = self.command_expect("AT+CIPRECVLEN?", "+CIPRECVLEN", true)?;
        let rest = responses::str_after(&line, "+CIPRECVLEN:").ok_or(Error::AtError)?;

        let marks_inactive = self.variant.recv_len_marks_inactive();
        let mut entries: [Option<&str>; LINK_COUNT] = [None; LINK_COUNT];
        for (slot, field) in entries.iter_mut().zip(rest.split(',')) {
            *slot = Some(field);
        }

        for (link_id, entry) in entries.iter().enumerate() {
            let Some(field) = entry else { break };
            if field.is_empty() {
                continue;
            }
            let link_id = link_id as u8;
            if marks_inactive && field.starts_with('-') {
                // V2 reports -1 for inactive links
                let link = self.links.link(link_id);
                link.state = LinkState::Free;
                link.available = 0;
                continue;
            }
            let Ok(len) = field.parse::<usize>() else {
                continue;
            };
            if marks_inactive {
                // a counted link is an active link; the incoming CONNECT
                // may have been lost
                self.links.revive_incoming(link_id);
            }
            self.links.link(link_id).available = len;
        }
        self.read_ok()
    }

    /// Reconciles connection flags against the module's status listing and
    /// captures the local ports on the way.
    pub fn check_links(&mut self) -> Result<(), Error> {
        self.maintain();

        self.command_expect("AT+CIPSTATUS", "STATUS", true)?;

        let mut active = [false; LINK_COUNT];
        let mut ports = [0u16; LINK_COUNT];
        while let Some(line) = self.read_list_item("+CIPSTATUS").unwrap_or(None) {
            if let Some(record) = responses::parse_status_record(&line) {
                let index = usize::from(record.link_id);
                if index < LINK_COUNT {
                    active[index] = true;
                    ports[index] = record.local_port;
                }
            }
        }

        for link_id in 0..LINK_COUNT as u8 {
            let index = usize::from(link_id);
            if active[index] {
                self.links.revive_incoming(link_id);
                self.links.link(link_id).local_port = ports[index];
            } else {
                self.links.link(link_id).state = LinkState::Free;
            }
        }
        Ok(())
    }
}
