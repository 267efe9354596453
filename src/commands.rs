//! AT command text builders.
//!
//! Commands are formatted into a bounded buffer and transmitted in one
//! piece, so the log shows complete command lines. Buffers are sized for the
//! protocol maxima (32 char SSID, 63 char passphrase, quoted host names);
//! anything longer fails the build instead of sending a mangled command.

use crate::stack::ConnectionType;
use crate::types::Error;
use core::fmt::{self, Write};
use core::net::Ipv4Addr;
use heapless::String;
use log::error;

/// Longest well-formed command: CWJAP with SSID, passphrase and BSSID.
pub(crate) type CmdString = String<192>;

fn build(f: impl FnOnce(&mut CmdString) -> fmt::Result) -> Result<CmdString, Error> {
    let mut cmd = CmdString::new();
    f(&mut cmd).map_err(|_| {
        error!("AT command too long");
        Error::AtError
    })?;
    Ok(cmd)
}

pub(crate) fn wifi_mode(suffix: &str, mode: u8) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+CWMODE{}={}", suffix, mode))
}

pub(crate) fn system_store(store: bool) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+SYSSTORE={}", u8::from(store)))
}

pub(crate) fn join_ap(
    suffix: &str,
    ssid: Option<&str>,
    password: Option<&str>,
    bssid: Option<&[u8; 6]>,
) -> Result<CmdString, Error> {
    build(|c| {
        write!(c, "AT+CWJAP{}", suffix)?;
        let ssid = match ssid {
            Some(ssid) => ssid,
            // without arguments the module joins the stored access point
            None => return Ok(()),
        };
        write!(c, "=\"{}\",\"", ssid)?;
        if let Some(password) = password {
            c.push_str(password).map_err(|_| fmt::Error)?;
            if let Some(bssid) = bssid {
                c.push_str("\",\"").map_err(|_| fmt::Error)?;
                write_bssid(c, bssid)?;
            }
        }
        c.push('"').map_err(|_| fmt::Error)
    })
}

/// BSSID octets are stored last-first and transmitted as colon separated
/// lowercase hex.
fn write_bssid(c: &mut CmdString, bssid: &[u8; 6]) -> fmt::Result {
    for (i, octet) in bssid.iter().enumerate().rev() {
        let mut hex = [0u8; 2];
        base16::encode_config_slice(&[*octet], base16::EncodeLower, &mut hex);
        c.push_str(core::str::from_utf8(&hex).map_err(|_| fmt::Error)?)
            .map_err(|_| fmt::Error)?;
        if i > 0 {
            c.push(':').map_err(|_| fmt::Error)?;
        }
    }
    Ok(())
}

pub(crate) fn auto_connect(enabled: bool) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+CWAUTOCONN={}", u8::from(enabled)))
}

/// `AT+CIPSTA` / `AT+CIPAP` style address configuration. Gateway and netmask
/// are optional but the netmask requires the gateway.
pub(crate) fn ip_config(
    name: &str,
    suffix: &str,
    ip: Ipv4Addr,
    gateway: Option<Ipv4Addr>,
    netmask: Option<Ipv4Addr>,
) -> Result<CmdString, Error> {
    build(|c| {
        write!(c, "{}{}=\"{}", name, suffix, ip)?;
        if let Some(gateway) = gateway {
            write!(c, "\",\"{}", gateway)?;
            if let Some(netmask) = netmask {
                write!(c, "\",\"{}", netmask)?;
            }
        }
        c.push('"').map_err(|_| fmt::Error)
    })
}

pub(crate) fn dns_config(
    name: &str,
    dns1: Option<Ipv4Addr>,
    dns2: Option<Ipv4Addr>,
) -> Result<CmdString, Error> {
    build(|c| {
        let dns1 = match dns1 {
            Some(dns1) => dns1,
            None => return write!(c, "{}=0", name),
        };
        write!(c, "{}=1,\"{}", name, dns1)?;
        if let Some(dns2) = dns2 {
            write!(c, "\",\"{}", dns2)?;
        }
        c.push('"').map_err(|_| fmt::Error)
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn soft_ap(
    suffix: &str,
    ssid: &str,
    passphrase: Option<&str>,
    channel: u8,
    encoding: u8,
    max_connections: u8,
    hidden: bool,
) -> Result<CmdString, Error> {
    build(|c| {
        write!(c, "AT+CWSAP{}=\"{}\",\"", suffix, ssid)?;
        if let Some(passphrase) = passphrase {
            c.push_str(passphrase).map_err(|_| fmt::Error)?;
        }
        // an open network must announce encoding 0
        let encoding = if passphrase.is_some() { encoding } else { 0 };
        write!(c, "\",{},{}", channel, encoding)?;
        if max_connections > 0 {
            write!(c, ",{},{}", max_connections, u8::from(hidden))?;
        }
        Ok(())
    })
}

pub(crate) fn hostname(name: &str) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+CWHOSTNAME=\"{}\"", name))
}

pub(crate) fn mdns(hostname: &str, server_name: &str, server_port: u16) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+MDNS=1,\"{}\",\"{}\",{}", hostname, server_name, server_port))
}

pub(crate) fn resolve(hostname: &str) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+CIPDOMAIN=\"{}\"", hostname))
}

pub(crate) fn sntp_config(timezone: i8, server1: &str, server2: Option<&str>) -> Result<CmdString, Error> {
    build(|c| {
        write!(c, "AT+CIPSNTPCFG=1,{},\"{}", timezone, server1)?;
        if let Some(server2) = server2 {
            write!(c, "\",\"{}", server2)?;
        }
        c.push('"').map_err(|_| fmt::Error)
    })
}

pub(crate) fn ping(hostname: &str) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+PING=\"{}\"", hostname))
}

pub(crate) fn sleep(mode: u8) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+SLEEP={}", mode))
}

pub(crate) fn server_max_connections(count: u8) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+CIPSERVERMAXCONN={}", count))
}

pub(crate) fn server_start(port: u16, ssl: bool, ca_enabled: bool) -> Result<CmdString, Error> {
    build(|c| {
        write!(c, "AT+CIPSERVER=1,{}", port)?;
        if ssl {
            write!(c, ",\"SSL\",{}", u8::from(ca_enabled))?;
        }
        Ok(())
    })
}

pub(crate) fn server_timeout(seconds: u16) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+CIPSTO={}", seconds))
}

pub(crate) fn server_stop(port: u16) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+CIPSERVER=0,{}", port))
}

pub(crate) fn connect(
    link_id: u8,
    kind: ConnectionType,
    host: &str,
    port: u16,
    udp_local_port: Option<u16>,
) -> Result<CmdString, Error> {
    build(|c| {
        write!(
            c,
            "AT+CIPSTART={},\"{}\",\"{}\",{}",
            link_id,
            kind.as_str(),
            host,
            port
        )?;
        if let Some(local_port) = udp_local_port {
            // mode 2: the remote of the UDP "connection" may change per datagram
            write!(c, ",{},2", local_port)?;
        }
        Ok(())
    })
}

pub(crate) fn close(link_id: u8) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+CIPCLOSE={}", link_id))
}

pub(crate) fn close_abort(link_id: u8) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+CIPCLOSEMODE={},1", link_id))
}

pub(crate) fn send(
    name: &str,
    link_id: u8,
    length: usize,
    udp_peer: Option<(&str, u16)>,
) -> Result<CmdString, Error> {
    build(|c| {
        write!(c, "{}={},{}", name, link_id, length)?;
        if let Some((host, port)) = udp_peer {
            write!(c, ",\"{}\",{}", host, port)?;
        }
        Ok(())
    })
}

pub(crate) fn receive_data(link_id: u8, length: usize) -> Result<CmdString, Error> {
    build(|c| write!(c, "AT+CIPRECVDATA={},{}", link_id, length))
}
