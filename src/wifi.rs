//! # Driver for ESP-AT WiFi modems
//!
//! [Driver] owns the serial channel to the module and is the single entry
//! point for every operation: station association, SoftAP hosting, link
//! management and data transfer. All operations are synchronous; unsolicited
//! module traffic is absorbed as a side effect of whatever read is in
//! progress, and every public operation drains pending traffic before
//! issuing its own command.
//!
//! The driver is an explicitly constructed context: create it with
//! [Driver::new], bring the module to a known state with [Driver::init] and
//! recover the serial port and timer with [Driver::release]. Multiple
//! independent drivers may coexist, each owning its own channel.

use crate::commands;
use crate::link::LinkTable;
use crate::responses::{self, Fields};
use crate::serial::Serial;
use crate::types::{ApData, Error, SleepMode};
use crate::variant::AtVariant;
use core::net::Ipv4Addr;
use core::str::FromStr;
use fugit::TimerInstantU32;
use fugit_timer::Timer;
use heapless::{String, Vec};
use log::{error, info, warn};

pub(crate) const WIFI_MODE_STA: u8 = 0b01;
pub(crate) const WIFI_MODE_SOFT_AP: u8 = 0b10;

/// Driver for an AT firmware modem on one serial channel.
///
/// TX_SIZE: frame size in bytes for unbounded sends (streams, callbacks).
/// Larger values perform better at the cost of stack footprint; the firmware
/// accepts at most 2048 bytes per frame.
///
/// The driver assumes a single cooperative caller: no operation may run
/// concurrently with another, since interleaving two commands' line reads
/// would misattribute responses.
pub struct Driver<S: Serial, T: Timer<TIMER_HZ>, const TIMER_HZ: u32, const TX_SIZE: usize> {
    pub(crate) serial: S,

    /// Timer used for the resync rate limit and send settle delays
    pub(crate) timer: T,

    /// Wire-protocol decisions of the connected firmware generation
    pub(crate) variant: &'static dyn AtVariant,

    /// Per-link state, updated by replies and unsolicited notifications
    pub(crate) links: LinkTable,

    /// Current WiFi mode bits (STA 0b01, SoftAP 0b10)
    pub(crate) wifi_mode: u8,

    /// Persisted default mode; 0 until init() succeeded
    pub(crate) wifi_mode_stored: u8,

    /// Current AT+SYSSTORE state of a V2 module
    pub(crate) sys_store: bool,

    /// Instant of the last link resync, for rate limiting
    pub(crate) last_sync: Option<TimerInstantU32<TIMER_HZ>>,
}

/// The currently associated access point, as reported by `AT+CWJAP?`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApInfo {
    pub ssid: String<32>,
    /// BSSID octets in transmission order of the AT firmware (last first)
    pub bssid: [u8; 6],
    pub channel: u8,
    pub rssi: i32,
}

/// SoftAP configuration reported by `AT+CWSAP?`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SoftApConfig {
    pub ssid: String<32>,
    pub passphrase: String<63>,
    pub channel: u8,
    pub encoding: u8,
    pub max_connections: u8,
    pub hidden: bool,
}

impl<S, T, const TIMER_HZ: u32, const TX_SIZE: usize> Driver<S, T, TIMER_HZ, TX_SIZE>
where
    S: Serial,
    T: Timer<TIMER_HZ>,
{
    /// Creates a driver talking the given firmware generation over `serial`.
    /// The module is not touched until [Driver::init].
    pub fn new(serial: S, timer: T, variant: &'static dyn AtVariant) -> Self {
        Self {
            serial,
            timer,
            variant,
            links: LinkTable::default(),
            wifi_mode: 0,
            wifi_mode_stored: 0,
            sys_store: false,
            last_sync: None,
        }
    }

    /// Tears the driver down and returns the serial port and timer.
    pub fn release(self) -> (S, T) {
        (self.serial, self.timer)
    }

    /// Brings the module to a known state. Must succeed before any station
    /// or SoftAP scoped operation; those fail with [Error::NotInitialized]
    /// otherwise.
    pub fn init(&mut self) -> Result<(), Error> {
        self.reset()
    }

    /// Soft-resets the module and re-applies the base configuration: echo
    /// off, multiple connections, passive receiving mode.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.maintain();
        info!("soft reset");

        // the "ready" banner can be missed on a busy boot
        let _ = self.command_expect("AT+RST", "ready", true);

        self.simple_command("ATE0")?;
        self.simple_command("AT+CIPMUX=1")?;
        self.simple_command("AT+CIPRECVMODE=1")?;

        if self.variant.uses_system_store() {
            // our default is persistent off
            if self.command("AT+SYSSTORE=0").is_ok() {
                self.sys_store = false;
            } else {
                // the module keeps storing everything
                self.sys_store = true;
                warn!("error setting store mode. is the firmware V2?");
            }
        }

        let line = self.command_expect("AT+CWMODE?", "+CWMODE", true)?;
        self.wifi_mode = responses::number_after(&line, "+CWMODE:").ok_or(Error::AtError)?;
        self.read_ok()?;
        self.wifi_mode_stored = self.wifi_mode;
        Ok(())
    }

    /// Firmware version string of the `AT+GMR` banner.
    pub fn firmware_version(&mut self) -> Result<String<32>, Error> {
        self.maintain();
        info!("fw version");

        let line = self.command_expect("AT+GMR", "AT version:", true)?;
        let version = responses::parse_version(&line).ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok(version)
    }

    /// Raw station status code of `AT+CIPSTATUS` (2 = got IP, 3 = connected,
    /// 4 = disconnected, 5 = not associated).
    pub fn sta_status(&mut self) -> Result<u8, Error> {
        self.maintain();
        info!("wifi status");

        if self.wifi_mode_stored == 0 {
            error!("AT firmware was not initialized");
            return Err(Error::NotInitialized);
        }

        let line = self.command_expect("AT+CIPSTATUS", "STATUS", true)?;
        let status = responses::number_after(&line, "STATUS:").ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok(status)
    }

    /// Scans for networks, strongest first, at most N records.
    pub fn list_ap<const N: usize>(&mut self) -> Result<Vec<ApData, N>, Error> {
        self.maintain();
        info!("list AP");

        self.set_wifi_mode(self.wifi_mode | WIFI_MODE_STA, false)?;
        // sort by signal strength, report the first five fields
        self.simple_command("AT+CWLAPOPT=1,31")?;

        let mut found = self.command_list("AT+CWLAP", "+CWLAP")?;
        let mut list = Vec::new();
        while let Some(line) = found {
            match responses::parse_ap(&line) {
                Some(ap) => {
                    if list.push(ap).is_err() {
                        // list is full, skip the rest of the results
                        let _ = self.read_ok();
                        break;
                    }
                }
                None => warn!("malformed scan record"),
            }
            found = self.read_list_item("+CWLAP")?;
        }
        Ok(list)
    }

    /// Associates with an access point. Without `ssid` the module joins the
    /// stored access point. When persistent, auto-connect on reset is
    /// enabled as well.
    pub fn join_ap(
        &mut self,
        ssid: Option<&str>,
        password: Option<&str>,
        bssid: Option<&[u8; 6]>,
        persistent: bool,
    ) -> Result<(), Error> {
        self.maintain();
        info!(
            "join AP {} {}",
            ssid.unwrap_or("(stored)"),
            persistence(persistent)
        );

        self.set_wifi_mode(self.wifi_mode | WIFI_MODE_STA, persistent)?;

        let cmd = commands::join_ap(self.variant.cur_suffix(persistent), ssid, password, bssid)?;
        let toggled = self.enter_store(persistent)?;
        let result = self.command(&cmd);
        self.exit_store(persistent, toggled);
        result?;

        if persistent {
            let _ = self.simple_command("AT+CWAUTOCONN=1");
        }
        Ok(())
    }

    /// Disassociates from the access point; persistent also disables
    /// auto-connect. Static DNS is cleared and DHCP re-enabled in case a
    /// static configuration disabled it.
    pub fn quit_ap(&mut self, persistent: bool) -> Result<(), Error> {
        info!("quit AP {}", persistence(persistent));

        if self.wifi_mode == WIFI_MODE_SOFT_AP {
            warn!("STA is off");
            return Err(Error::NoAp);
        }

        let toggled = self.enter_store(persistent)?;
        if persistent {
            // don't reconnect on reset
            let _ = self.simple_command("AT+CWAUTOCONN=0");
        }
        let _ = self.simple_command(self.variant.dns_clear_command(persistent));
        let _ = self.simple_command(self.variant.dhcp_enable_command(persistent));
        self.exit_store(persistent, toggled);

        // doesn't clear the persistent settings
        self.simple_command("AT+CWQAP")
    }

    /// Enables or disables association on module reset.
    pub fn sta_auto_connect(&mut self, auto_connect: bool) -> Result<(), Error> {
        info!("STA auto connect {}", on_off(auto_connect));
        let cmd = commands::auto_connect(auto_connect)?;
        self.simple_command(&cmd)
    }

    /// Queries the currently associated access point.
    pub fn ap_query(&mut self) -> Result<ApInfo, Error> {
        self.maintain();
        info!("AP query");

        if self.wifi_mode == WIFI_MODE_SOFT_AP {
            error!("STA is off");
            return Err(Error::NoAp);
        }

        let line = self.command_expect("AT+CWJAP?", "+CWJAP", true)?;
        let info = responses::parse_ap_info(&line).ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok(info)
    }

    /// Sets a static station address, disabling DHCP. Gateway and netmask
    /// are optional, the netmask requires the gateway.
    pub fn sta_static_ip(
        &mut self,
        ip: Ipv4Addr,
        gateway: Option<Ipv4Addr>,
        netmask: Option<Ipv4Addr>,
        persistent: bool,
    ) -> Result<(), Error> {
        self.maintain();
        info!("set static IP {} {}", ip, persistence(persistent));

        // can't set the address without sta mode
        self.set_wifi_mode(self.wifi_mode | WIFI_MODE_STA, false)?;

        let cmd = commands::ip_config(
            "AT+CIPSTA",
            self.variant.cur_suffix(persistent),
            ip,
            gateway,
            netmask,
        )?;
        self.store_bracketed(&cmd, persistent)
    }

    /// Configures static DNS servers; `None` for `dns1` restores defaults.
    pub fn sta_dns(
        &mut self,
        dns1: Option<Ipv4Addr>,
        dns2: Option<Ipv4Addr>,
        persistent: bool,
    ) -> Result<(), Error> {
        self.maintain();
        info!("set static DNS {}", persistence(persistent));

        self.set_wifi_mode(self.wifi_mode | WIFI_MODE_STA, false)?;

        let cmd = commands::dns_config(self.variant.dns_command(persistent), dns1, dns2)?;
        self.store_bracketed(&cmd, persistent)
    }

    /// Station MAC address, octets in transmission order (last first).
    pub fn sta_mac_query(&mut self) -> Result<[u8; 6], Error> {
        self.maintain();
        info!("STA MAC query");

        let line = self.command_expect("AT+CIPSTAMAC?", "+CIPSTAMAC", true)?;
        let mac = responses::mac_after(&line, "+CIPSTAMAC:").ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok(mac)
    }

    /// Station address, gateway and netmask.
    pub fn sta_ip_query(&mut self) -> Result<(Ipv4Addr, Ipv4Addr, Ipv4Addr), Error> {
        self.maintain();
        info!("STA IP query");

        let line = self.command_expect("AT+CIPSTA?", "+CIPSTA", true)?;
        let ip = responses::ip_after(&line, "+CIPSTA:ip:").ok_or(Error::AtError)?;
        let line = self.read_match("+CIPSTA", true)?;
        let gateway = responses::ip_after(&line, "+CIPSTA:gateway:").ok_or(Error::AtError)?;
        let line = self.read_match("+CIPSTA", true)?;
        let netmask = responses::ip_after(&line, "+CIPSTA:netmask:").ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok((ip, gateway, netmask))
    }

    /// Configured DNS servers.
    pub fn sta_dns_query(&mut self) -> Result<(Option<Ipv4Addr>, Option<Ipv4Addr>), Error> {
        self.maintain();
        info!("STA DNS query");

        let (cmd, prefix) = self.variant.dns_query();
        if self.variant.dns_query_as_list() {
            // one address per line, terminated by OK
            let Some(line) = self.command_list(cmd, prefix)? else {
                return Ok((None, None));
            };
            let dns1 = responses::plain_ip_after(&line, prefix);
            let Some(line) = self.read_list_item(prefix)? else {
                // second dns is not set
                return Ok((dns1, None));
            };
            let dns2 = responses::plain_ip_after(&line, prefix);
            self.read_ok()?;
            Ok((dns1, dns2))
        } else {
            // +CIPDNS:<enabled>,"<dns1>"[,"<dns2>"]
            let line = self.command_expect(cmd, prefix, true)?;
            let text = responses::text(&line);
            let rest = text
                .strip_prefix(prefix)
                .and_then(|r| r.strip_prefix(':'))
                .ok_or(Error::AtError)?;
            let mut fields = Fields::new(rest);
            let _enabled: u8 = fields.number().ok_or(Error::AtError)?;
            let dns1 = fields.quoted().and_then(|s| Ipv4Addr::from_str(s).ok());
            let dns2 = fields.quoted().and_then(|s| Ipv4Addr::from_str(s).ok());
            self.read_ok()?;
            Ok((dns1, dns2))
        }
    }

    /// Sets a static SoftAP address. Raises the SoftAP mode bit for the
    /// duration of the command and restores the previous mode.
    pub fn soft_ap_ip(
        &mut self,
        ip: Ipv4Addr,
        gateway: Option<Ipv4Addr>,
        netmask: Option<Ipv4Addr>,
        persistent: bool,
    ) -> Result<(), Error> {
        self.maintain();
        info!("set SoftAP IP {} {}", ip, persistence(persistent));

        let original_mode = self.wifi_mode;
        self.set_wifi_mode(original_mode | WIFI_MODE_SOFT_AP, false)?;

        let cmd = commands::ip_config(
            "AT+CIPAP",
            self.variant.cur_suffix(persistent),
            ip,
            gateway,
            netmask,
        )?;
        let result = self.store_bracketed(&cmd, persistent);
        let _ = self.set_wifi_mode(original_mode, false);
        result
    }

    /// SoftAP MAC address, octets in transmission order (last first).
    pub fn soft_ap_mac_query(&mut self) -> Result<[u8; 6], Error> {
        self.maintain();
        info!("SoftAP MAC query");

        let line = self.command_expect("AT+CIPAPMAC?", "+CIPAPMAC", true)?;
        let mac = responses::mac_after(&line, "+CIPAPMAC:").ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok(mac)
    }

    /// SoftAP address, gateway and netmask.
    pub fn soft_ap_ip_query(&mut self) -> Result<(Ipv4Addr, Ipv4Addr, Ipv4Addr), Error> {
        self.maintain();
        info!("SoftAP IP query");

        let line = self.command_expect("AT+CIPAP?", "+CIPAP", true)?;
        let ip = responses::ip_after(&line, "+CIPAP:ip:").ok_or(Error::AtError)?;
        let line = self.read_match("+CIPAP", true)?;
        let gateway = responses::ip_after(&line, "+CIPAP:gateway:").ok_or(Error::AtError)?;
        let line = self.read_match("+CIPAP", true)?;
        let netmask = responses::ip_after(&line, "+CIPAP:netmask:").ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok((ip, gateway, netmask))
    }

    /// Starts the SoftAP. Without `ssid` only the mode bit is raised and the
    /// stored configuration applies.
    #[allow(clippy::too_many_arguments)]
    pub fn begin_soft_ap(
        &mut self,
        ssid: Option<&str>,
        passphrase: Option<&str>,
        channel: u8,
        encoding: u8,
        max_connections: u8,
        hidden: bool,
        persistent: bool,
    ) -> Result<(), Error> {
        self.maintain();
        info!("begin SoftAP {}", persistence(persistent));

        // the mode change itself is not persisted on purpose
        self.set_wifi_mode(self.wifi_mode | WIFI_MODE_SOFT_AP, false)?;
        let Some(ssid) = ssid else {
            // only start the SoftAP as it is configured
            return Ok(());
        };

        let cmd = commands::soft_ap(
            self.variant.cur_suffix(persistent),
            ssid,
            passphrase,
            channel,
            encoding,
            max_connections,
            hidden,
        )?;
        self.store_bracketed(&cmd, persistent)
    }

    /// Stops the SoftAP by dropping back to pure station mode.
    pub fn end_soft_ap(&mut self, persistent: bool) -> Result<(), Error> {
        self.maintain();
        info!("end SoftAP {}", persistence(persistent));

        self.set_wifi_mode(0, persistent)
    }

    /// Queries the running SoftAP configuration.
    pub fn soft_ap_query(&mut self) -> Result<SoftApConfig, Error> {
        self.maintain();
        info!("SoftAP query");

        if self.wifi_mode == WIFI_MODE_STA {
            error!("SoftAP is off");
            return Err(Error::NoAp);
        }

        let line = self.command_expect("AT+CWSAP?", "+CWSAP", true)?;
        let config = responses::parse_soft_ap_config(&line).ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok(config)
    }

    /// Sets the station hostname announced over DHCP.
    pub fn set_hostname(&mut self, hostname: &str) -> Result<(), Error> {
        self.maintain();

        self.set_wifi_mode(self.wifi_mode | WIFI_MODE_STA, false)?;
        info!("set hostname {}", hostname);

        let cmd = commands::hostname(hostname)?;
        self.command(&cmd)
    }

    /// Queries the station hostname.
    pub fn hostname_query(&mut self) -> Result<String<32>, Error> {
        self.maintain();
        info!("hostname query");

        let line = self.command_expect("AT+CWHOSTNAME?", "+CWHOSTNAME", true)?;
        let hostname = responses::str_after(&line, "+CWHOSTNAME:")
            .and_then(|s| String::try_from(s).ok())
            .ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok(hostname)
    }

    /// DHCP state as (station, SoftAP). The two have nothing in common but
    /// share one command.
    pub fn dhcp_state_query(&mut self) -> Result<(bool, bool), Error> {
        self.maintain();
        info!("DHCP state query");

        let line = self.command_expect("AT+CWDHCP?", "+CWDHCP", true)?;
        let bits = responses::number_after(&line, "+CWDHCP:").ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok(self.variant.dhcp_state(bits))
    }

    /// Announces an mDNS service.
    pub fn mdns(&mut self, hostname: &str, server_name: &str, server_port: u16) -> Result<(), Error> {
        self.maintain();
        info!("start MDNS");

        let cmd = commands::mdns(hostname, server_name, server_port)?;
        self.command(&cmd)
    }

    /// Resolves a hostname through the module's DNS.
    pub fn resolve(&mut self, hostname: &str) -> Result<Ipv4Addr, Error> {
        self.maintain();
        info!("resolve ip");

        let cmd = commands::resolve(hostname)?;
        let line = self.command_expect(&cmd, "+CIPDOMAIN", true)?;
        let ip = responses::plain_ip_after(&line, "+CIPDOMAIN").ok_or(Error::AtError)?;
        self.read_ok()?;
        Ok(ip)
    }

    /// Configures SNTP servers and the timezone offset in hours.
    pub fn sntp_cfg(&mut self, timezone: i8, server1: &str, server2: Option<&str>) -> Result<(), Error> {
        self.maintain();
        info!("SNTP config");

        let cmd = commands::sntp_config(timezone, server1, server2)?;
        self.command(&cmd)
    }

    /// Current SNTP epoch time in seconds, 0 before the first sync.
    pub fn sntp_time(&mut self) -> Result<u64, Error> {
        self.maintain();
        info!("SNTP time");

        let (cmd, prefix) = self.variant.time_query();
        let line = self.command_expect(cmd, prefix, true)?;
        let text = responses::text(&line);
        let rest = text
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or(Error::AtError)?;
        let seconds = Fields::new(rest).number().ok_or(Error::AtError)?;
        let _ = self.read_ok();
        Ok(seconds)
    }

    /// Pings a host through the module.
    pub fn ping(&mut self, hostname: &str) -> Result<(), Error> {
        self.maintain();
        info!("ping");

        let cmd = commands::ping(hostname)?;
        self.command(&cmd)
    }

    /// Selects the module's power save mode.
    pub fn sleep_mode(&mut self, mode: SleepMode) -> Result<(), Error> {
        self.maintain();
        info!("set sleep mode");

        let cmd = commands::sleep(mode as u8)?;
        self.command(&cmd)
    }

    /// Puts the module into deep sleep; only a reset wakes it up.
    pub fn deep_sleep(&mut self) -> Result<(), Error> {
        self.maintain();
        info!("deep sleep");

        self.simple_command("AT+GSLP=0")
    }

    /// Applies the requested mode bits. No-op when the module is already in
    /// the requested mode and the persistence doesn't change. Mode 0 drops
    /// back to plain station mode.
    pub(crate) fn set_wifi_mode(&mut self, mode: u8, persistent: bool) -> Result<(), Error> {
        if self.wifi_mode_stored == 0 {
            error!("AT firmware was not initialized");
            return Err(Error::NotInitialized);
        }

        let mode = if mode == 0 { WIFI_MODE_STA } else { mode };
        if mode == self.wifi_mode && (!persistent || mode == self.wifi_mode_stored) {
            return Ok(());
        }

        let cmd = commands::wifi_mode(self.variant.cur_suffix(persistent), mode)?;
        self.store_bracketed(&cmd, persistent)?;

        self.wifi_mode = mode;
        if persistent {
            self.wifi_mode_stored = mode;
        }
        Ok(())
    }

    /// Runs one command under the requested persistence, toggling
    /// `AT+SYSSTORE` around it on V2 firmware.
    pub(crate) fn store_bracketed(&mut self, cmd: &str, persistent: bool) -> Result<(), Error> {
        let toggled = self.enter_store(persistent)?;
        let result = self.command(cmd);
        self.exit_store(persistent, toggled);
        result
    }

    pub(crate) fn enter_store(&mut self, persistent: bool) -> Result<bool, Error> {
        if !self.variant.uses_system_store() || self.sys_store == persistent {
            return Ok(false);
        }
        let cmd = commands::system_store(persistent)?;
        self.command(&cmd)?;
        Ok(true)
    }

    pub(crate) fn exit_store(&mut self, persistent: bool, toggled: bool) {
        if !toggled {
            return;
        }
        let restored = commands::system_store(self.sys_store)
            .and_then(|cmd| self.command(&cmd))
            .is_ok();
        if !restored {
            // record what the module actually has
            self.sys_store = persistent;
        }
    }
}

fn persistence(persistent: bool) -> &'static str {
    if persistent {
        "persistent"
    } else {
        "current"
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
