//! Per-link connection records.
//!
//! The AT firmware multiplexes [LINK_COUNT](crate::types::LINK_COUNT)
//! connections over one serial channel and identifies each by a numeric link
//! id. The table mirrors what the module last told us about every link; it
//! is updated both by command replies and by unsolicited notifications
//! observed as a side effect of any read.

use crate::types::{UdpDataSink, LINK_COUNT};
use alloc::boxed::Box;
use log::{info, trace};

/// Connection state of one link.
///
/// `Closing` covers both a close initiated by us that the module has not
/// confirmed yet and nothing else: a close by the peer immediately frees the
/// slot's flags (its buffered data may remain readable, see
/// [LinkInfo::available]).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub(crate) enum LinkState {
    #[default]
    Free,
    /// An outbound connect command is in flight.
    Connecting,
    Connected {
        incoming: bool,
        accepted: bool,
    },
    Closing,
    /// Bound to a local UDP port, receiving datagrams.
    UdpListener,
}

/// Everything the driver tracks about one link slot.
#[derive(Default)]
pub(crate) struct LinkInfo {
    pub(crate) state: LinkState,

    /// Bytes the module reported as receivable but not yet read by us.
    /// May stay non-zero after a peer close on V1 firmware.
    pub(crate) available: usize,

    /// Last-known local port, 0 = unknown. Queried lazily from the module
    /// when a server accept needs to match on it.
    pub(crate) local_port: u16,

    /// Inline datagram consumer for legacy-mode UDP listeners.
    pub(crate) udp_sink: Option<Box<dyn UdpDataSink>>,
}

impl LinkInfo {
    /// Connected in any role, a closing link included.
    pub(crate) fn in_use(&self) -> bool {
        !matches!(self.state, LinkState::Free)
    }

    /// Connected and usable, i.e. not yet closing.
    pub(crate) fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected { .. } | LinkState::UdpListener)
    }

    pub(crate) fn is_udp_listener(&self) -> bool {
        matches!(self.state, LinkState::UdpListener)
    }
}

/// Preallocated table of all link slots; slots are reset in place, never
/// deleted.
#[derive(Default)]
pub(crate) struct LinkTable {
    links: [LinkInfo; LINK_COUNT],
}

impl LinkTable {
    pub(crate) fn link(&mut self, link_id: u8) -> &mut LinkInfo {
        &mut self.links[usize::from(link_id)]
    }

    pub(crate) fn get(&self, link_id: u8) -> &LinkInfo {
        &self.links[usize::from(link_id)]
    }

    /// Scans for a reusable slot, highest id first. A slot qualifies only
    /// when it is fully free: no flags and no residual data.
    pub(crate) fn free_link_id(&self) -> Option<u8> {
        for link_id in (0..LINK_COUNT as u8).rev() {
            let link = self.get(link_id);
            if !link.in_use() && link.available == 0 {
                info!("free linkId is {}", link_id);
                return Some(link_id);
            }
        }
        None
    }

    /// Applies a `<id>,CONNECT` notification. Returns false for a
    /// duplicate/stale notification, which is ignored: the module repeats
    /// CONNECT for links we opened ourselves and may deliver it late after
    /// we already observed data on the slot.
    pub(crate) fn peer_connected(&mut self, link_id: u8) -> bool {
        let link = self.link(link_id);
        if link.available == 0 && matches!(link.state, LinkState::Free | LinkState::Closing) {
            // incoming connection (a CLOSED of the previous tenant may have been missed)
            link.state = LinkState::Connected {
                incoming: true,
                accepted: false,
            };
            link.local_port = 0;
            return true;
        }
        false
    }

    /// Applies a `<id>,CLOSED` or `<id>,CONNECT FAIL` notification.
    pub(crate) fn peer_closed(&mut self, link_id: u8, clears_available: bool) {
        let link = self.link(link_id);
        link.state = LinkState::Free;
        if clears_available {
            link.available = 0;
        }
        info!("closed linkId {}", link_id);
    }

    /// Applies a `+IPD` data notification.
    pub(crate) fn data_notification(&mut self, link_id: u8, len: usize) {
        self.link(link_id).available = len;
        trace!("link {} has {} bytes pending", link_id, len);
    }

    /// Re-creates a link the module reports as active but we track as dead:
    /// the incoming CONNECT notification was lost on the wire.
    pub(crate) fn revive_incoming(&mut self, link_id: u8) {
        let link = self.link(link_id);
        if !link.is_connected() {
            link.state = LinkState::Connected {
                incoming: true,
                accepted: false,
            };
        }
    }
}
