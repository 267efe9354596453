//! Classification of lines received from the module.
//!
//! Besides the reply to the command currently in flight, the module injects
//! unsolicited notifications at arbitrary points of the byte stream. Every
//! received line that did not match the expected reply prefix is classified
//! here and applied to the link table by the reader loop.

use crate::types::LINK_COUNT;

/// One classified line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Urc {
    /// `+IPD,<link>,<len>`: the module buffered payload for a link
    DataAvailable { link_id: u8, len: usize },
    /// A `+IPD` header mangled by receive overflow; consumed without effect
    TruncatedData,
    /// `<link>,CONNECT`
    Connect(u8),
    /// `<link>,CLOSED` or `<link>,CONNECT FAIL`
    Closed(u8),
    /// Bare `ERROR` or `FAIL` terminator
    Error,
    /// Terminal `No AP` status line
    NoAp,
    /// `UNLINK`, anticipating the spurious ERROR of a known firmware bug
    Unlink,
    /// Bare `OK` terminator
    Ok,
    Unknown,
}

impl Urc {
    /// Classifies one line, already stripped of its terminator.
    pub(crate) fn parse(line: &[u8]) -> Self {
        if let Some(fields) = line.strip_prefix(b"+IPD,") {
            return Self::parse_data_notification(fields);
        }

        if line.len() > 1 {
            if let Some(link_id) = parse_link_id(line[0]) {
                match &line[1..] {
                    b",CONNECT" => return Self::Connect(link_id),
                    b",CLOSED" | b",CONNECT FAIL" => return Self::Closed(link_id),
                    _ => {}
                }
            }
        }

        match line {
            b"OK" => Self::Ok,
            b"ERROR" | b"FAIL" => Self::Error,
            b"No AP" => Self::NoAp,
            b"UNLINK" => Self::Unlink,
            _ => Self::Unknown,
        }
    }

    /// Parses `<link>,<len>[,<ip>,<port>]` behind a `+IPD,` prefix.
    fn parse_data_notification(fields: &[u8]) -> Self {
        let text = match core::str::from_utf8(fields) {
            Ok(text) => text,
            Err(_) => return Self::TruncatedData,
        };

        let mut fields = text.split(',');
        let link_id = fields.next().and_then(|f| f.parse::<u8>().ok());
        let len = fields.next().and_then(|f| f.parse::<usize>().ok());

        match (link_id, len) {
            (Some(link_id), Some(len)) if usize::from(link_id) < LINK_COUNT && len > 0 => {
                Self::DataAvailable { link_id, len }
            }
            _ => Self::TruncatedData,
        }
    }
}

/// Parses an ASCII link id digit.
pub(crate) fn parse_link_id(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'4' => Some(digit - b'0'),
        _ => None,
    }
}
