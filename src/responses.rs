//! Parsers for typed reply lines.
//!
//! Reply lines arrive as raw bytes in the reader's line buffer; the helpers
//! here pick them apart into addresses, scan records and status fields.
//! A `None` means the line did not have the advertised shape, which callers
//! surface as [Error::AtError](crate::types::Error::AtError).

use crate::types::ApData;
use crate::wifi::{ApInfo, SoftApConfig};
use core::net::Ipv4Addr;
use core::str::FromStr;
use heapless::String;

/// The reply line as text; garbage bytes yield an empty string, which no
/// parser accepts.
pub(crate) fn text(line: &[u8]) -> &str {
    core::str::from_utf8(line).unwrap_or("")
}

/// Parses a number directly following `prefix`, e.g. `STATUS:3`.
pub(crate) fn number_after<T: FromStr>(line: &[u8], prefix: &str) -> Option<T> {
    let rest = text(line).strip_prefix(prefix)?;
    Fields::new(rest).number()
}

/// Parses a quoted value following `prefix`, e.g. `+CWHOSTNAME:esp` (plain)
/// does not use this; `+CIPSTA:ip:"10.0.0.4"` does.
pub(crate) fn quoted_after<'a>(line: &'a [u8], prefix: &str) -> Option<&'a str> {
    let rest = text(line).strip_prefix(prefix)?;
    Fields::new(rest).quoted()
}

pub(crate) fn ip_after(line: &[u8], prefix: &str) -> Option<Ipv4Addr> {
    Ipv4Addr::from_str(quoted_after(line, prefix)?).ok()
}

/// The rest of the line behind `prefix`, e.g. `+CWHOSTNAME:esp`.
pub(crate) fn str_after<'a>(line: &'a [u8], prefix: &str) -> Option<&'a str> {
    text(line).strip_prefix(prefix)
}

/// The leading decimal digits of `s`, e.g. the count in `Recv 10 bytes`.
pub(crate) fn leading_number<T: FromStr>(s: &str) -> Option<T> {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// An unquoted address behind `prefix` and an optional colon, e.g.
/// `+CIPDOMAIN:10.0.0.5`.
pub(crate) fn plain_ip_after(line: &[u8], prefix: &str) -> Option<Ipv4Addr> {
    let rest = text(line).strip_prefix(prefix)?;
    let rest = rest.strip_prefix(':').unwrap_or(rest);
    Fields::new(rest).number()
}

/// `+CIPSTAMAC:"a4:cf:12:df:22:1b"` and friends.
pub(crate) fn mac_after(line: &[u8], prefix: &str) -> Option<[u8; 6]> {
    parse_mac(quoted_after(line, prefix)?)
}

/// MAC/BSSID octets are stored last-first, mirroring the order they are
/// written back out in commands.
pub(crate) fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut count = 0;
    for (i, part) in s.split(':').enumerate() {
        if i >= 6 {
            return None;
        }
        mac[5 - i] = u8::from_str_radix(part, 16).ok()?;
        count += 1;
    }
    if count == 6 {
        Some(mac)
    } else {
        None
    }
}

/// One `+CWLAP:(<enc>,"<ssid>",<rssi>,"<bssid>",<channel>)` scan record.
pub(crate) fn parse_ap(line: &[u8]) -> Option<ApData> {
    let rest = text(line).strip_prefix("+CWLAP:(")?;
    let mut fields = Fields::new(rest);

    let enc = fields.number()?;
    let ssid = bounded(fields.quoted()?)?;
    let rssi = fields.number()?;
    let bssid = parse_mac(fields.quoted()?)?;
    let channel = fields.number()?;

    Some(ApData {
        ssid,
        bssid,
        rssi,
        channel,
        enc,
    })
}

/// `+CWJAP:"<ssid>","<bssid>",<channel>,<rssi>,...`
pub(crate) fn parse_ap_info(line: &[u8]) -> Option<ApInfo> {
    let rest = text(line).strip_prefix("+CWJAP")?.strip_prefix(':')?;
    let mut fields = Fields::new(rest);

    Some(ApInfo {
        ssid: bounded(fields.quoted()?)?,
        bssid: parse_mac(fields.quoted()?)?,
        channel: fields.number()?,
        rssi: fields.number()?,
    })
}

/// `+CWSAP:"<ssid>","<passphrase>",<channel>,<enc>,<max conn>,<hidden>`
pub(crate) fn parse_soft_ap_config(line: &[u8]) -> Option<SoftApConfig> {
    let rest = text(line).strip_prefix("+CWSAP")?.strip_prefix(':')?;
    let mut fields = Fields::new(rest);

    Some(SoftApConfig {
        ssid: bounded(fields.quoted()?)?,
        passphrase: bounded(fields.quoted()?)?,
        channel: fields.number()?,
        encoding: fields.number()?,
        max_connections: fields.number()?,
        hidden: fields.number::<u8>()? != 0,
    })
}

/// One `+CIPSTATUS:<link>,"<type>","<remote ip>",<remote port>,<local port>,…`
/// record of the link status listing.
pub(crate) struct StatusRecord {
    pub(crate) link_id: u8,
    pub(crate) remote_ip: Ipv4Addr,
    pub(crate) remote_port: u16,
    pub(crate) local_port: u16,
}

pub(crate) fn parse_status_record(line: &[u8]) -> Option<StatusRecord> {
    let rest = text(line).strip_prefix("+CIPSTATUS:")?;
    let mut fields = Fields::new(rest);

    let link_id = fields.number()?;
    let _kind = fields.quoted()?;
    let remote_ip = Ipv4Addr::from_str(fields.quoted()?).ok()?;
    let remote_port = fields.number()?;
    let local_port = fields.number()?;

    Some(StatusRecord {
        link_id,
        remote_ip,
        remote_port,
        local_port,
    })
}

/// `AT version:1.7.4.0(May 11 2020 ...)` of the `AT+GMR` reply.
pub(crate) fn parse_version(line: &[u8]) -> Option<String<32>> {
    let rest = text(line).strip_prefix("AT version:")?;
    let end = rest.find('(').unwrap_or(rest.len());
    bounded(&rest[..end])
}

fn bounded<const N: usize>(s: &str) -> Option<String<N>> {
    String::try_from(s).ok()
}

/// Comma separated fields of a reply line tail.
pub(crate) struct Fields<'a> {
    rest: &'a str,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(rest: &'a str) -> Self {
        Self { rest }
    }

    /// Next unquoted field, tolerating a closing parenthesis.
    pub(crate) fn number<T: FromStr>(&mut self) -> Option<T> {
        let (token, rest) = match self.rest.split_once(',') {
            Some((token, rest)) => (token, rest),
            None => (self.rest, ""),
        };
        self.rest = rest;
        token.trim().trim_end_matches(')').parse().ok()
    }

    /// Next quoted field; the surrounding quotes and a trailing comma are
    /// consumed.
    pub(crate) fn quoted(&mut self) -> Option<&'a str> {
        let start = self.rest.find('"')? + 1;
        let end = start + self.rest[start..].find('"')?;
        let token = &self.rest[start..end];

        let mut rest = &self.rest[end + 1..];
        if let Some(stripped) = rest.strip_prefix(',') {
            rest = stripped;
        }
        self.rest = rest;
        Some(token)
    }
}
