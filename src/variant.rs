//! Firmware generation strategy.
//!
//! Two generations of the AT firmware are in the field and differ in small
//! but load-bearing protocol details. Both are always compiled; the variant
//! is chosen at driver construction time as a trait object, so one binary can
//! talk to either generation.

/// Wire-protocol decisions that differ between AT firmware generations.
pub trait AtVariant {
    /// Suffix selecting the non-persistent flavor of a configuration
    /// command (`_CUR` on V1, empty on V2 which stores via `AT+SYSSTORE`).
    fn cur_suffix(&self, persistent: bool) -> &'static str;

    /// Persistence is controlled globally with `AT+SYSSTORE`.
    fn uses_system_store(&self) -> bool;

    /// The `>` data prompt is followed by a space byte that must be consumed.
    fn prompt_trailing_space(&self) -> bool;

    /// The `+CIPRECVDATA` reply carries the length inside the `:`-delimited
    /// header (V1) instead of in front of a `,` after it (V2).
    fn recv_len_in_header(&self) -> bool;

    /// A `CLOSED` notification implies the module dropped all buffered data.
    /// V1 keeps residual data readable after a peer close.
    fn clears_available_on_closed(&self) -> bool;

    /// UDP listener payloads arrive inline with `+IPD` and are drained
    /// through the link's registered sink (V1 active mode).
    fn udp_inline_drain(&self) -> bool;

    /// `AT+CIPRECVLEN?` reports `-1` for inactive links, making the reply
    /// authoritative for connection state as well.
    fn recv_len_marks_inactive(&self) -> bool;

    /// Link state must be reconciled with `AT+CIPSTATUS` before the receive
    /// length query, so a peer close is never observed before its data size.
    fn sync_checks_links(&self) -> bool;

    /// (command, reply prefix) querying the SNTP epoch time.
    fn time_query(&self) -> (&'static str, &'static str);

    /// Splits the `AT+CWDHCP?` state bits into (station, soft AP).
    fn dhcp_state(&self, bits: u8) -> (bool, bool);

    /// The DNS query replies with one address per list line (V1) instead of
    /// a single combined line (V2).
    fn dns_query_as_list(&self) -> bool;

    /// (command, reply prefix) querying the configured DNS servers.
    fn dns_query(&self) -> (&'static str, &'static str);

    /// Name of the DNS configuration command, without the `=`.
    fn dns_command(&self, persistent: bool) -> &'static str;

    /// Command clearing the static DNS configuration.
    fn dns_clear_command(&self, persistent: bool) -> &'static str;

    /// Command re-enabling DHCP after a static configuration.
    fn dhcp_enable_command(&self, persistent: bool) -> &'static str;
}

/// AT firmware 1.x (ESP8266 NonOS / LoBo builds).
pub struct AtV1;

/// AT firmware 2.x (ESP-IDF based).
pub struct AtV2;

impl AtVariant for AtV1 {
    fn cur_suffix(&self, persistent: bool) -> &'static str {
        if persistent {
            ""
        } else {
            "_CUR"
        }
    }

    fn uses_system_store(&self) -> bool {
        false
    }

    fn prompt_trailing_space(&self) -> bool {
        true
    }

    fn recv_len_in_header(&self) -> bool {
        true
    }

    fn clears_available_on_closed(&self) -> bool {
        false
    }

    fn udp_inline_drain(&self) -> bool {
        true
    }

    fn recv_len_marks_inactive(&self) -> bool {
        false
    }

    fn sync_checks_links(&self) -> bool {
        true
    }

    fn time_query(&self) -> (&'static str, &'static str) {
        ("AT+SNTPTIME?", "+SNTPTIME")
    }

    fn dhcp_state(&self, bits: u8) -> (bool, bool) {
        (bits & 0b10 != 0, bits & 0b01 != 0)
    }

    fn dns_query_as_list(&self) -> bool {
        true
    }

    fn dns_query(&self) -> (&'static str, &'static str) {
        ("AT+CIPDNS_CUR?", "+CIPDNS_CUR")
    }

    fn dns_command(&self, persistent: bool) -> &'static str {
        if persistent {
            "AT+CIPDNS_DEF"
        } else {
            "AT+CIPDNS_CUR"
        }
    }

    fn dns_clear_command(&self, persistent: bool) -> &'static str {
        if persistent {
            "AT+CIPDNS_DEF=0"
        } else {
            "AT+CIPDNS_CUR=0"
        }
    }

    fn dhcp_enable_command(&self, persistent: bool) -> &'static str {
        if persistent {
            "AT+CWDHCP=1,1"
        } else {
            "AT+CWDHCP_CUR=1,1"
        }
    }
}

impl AtVariant for AtV2 {
    fn cur_suffix(&self, _persistent: bool) -> &'static str {
        ""
    }

    fn uses_system_store(&self) -> bool {
        true
    }

    fn prompt_trailing_space(&self) -> bool {
        false
    }

    fn recv_len_in_header(&self) -> bool {
        false
    }

    fn clears_available_on_closed(&self) -> bool {
        true
    }

    fn udp_inline_drain(&self) -> bool {
        false
    }

    fn recv_len_marks_inactive(&self) -> bool {
        true
    }

    fn sync_checks_links(&self) -> bool {
        false
    }

    fn time_query(&self) -> (&'static str, &'static str) {
        ("AT+SYSTIMESTAMP?", "+SYSTIMESTAMP")
    }

    fn dhcp_state(&self, bits: u8) -> (bool, bool) {
        (bits & 0b01 != 0, bits & 0b10 != 0)
    }

    fn dns_query_as_list(&self) -> bool {
        false
    }

    fn dns_query(&self) -> (&'static str, &'static str) {
        ("AT+CIPDNS?", "+CIPDNS")
    }

    fn dns_command(&self, _persistent: bool) -> &'static str {
        "AT+CIPDNS"
    }

    fn dns_clear_command(&self, _persistent: bool) -> &'static str {
        "AT+CIPDNS=0"
    }

    fn dhcp_enable_command(&self, _persistent: bool) -> &'static str {
        "AT+CWDHCP=1,3"
    }
}
