use crate::link::LinkState;
use crate::reader::ReadResult;
use crate::serial::Serial;
use crate::tests::mock::{driver, driver_v1, MockSerial};
use crate::types::{Error, UdpDataSink};
use std::boxed::Box;
use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

struct RecordingSink(Rc<RefCell<Vec<u8>>>);

impl UdpDataSink for RecordingSink {
    fn begin_datagram(&mut self, _len: usize) -> Result<(), Error> {
        Ok(())
    }

    fn push(&mut self, chunk: &[u8]) {
        self.0.borrow_mut().extend_from_slice(chunk);
    }
}

struct BusySink;

impl UdpDataSink for BusySink {
    fn begin_datagram(&mut self, _len: usize) -> Result<(), Error> {
        Err(Error::UdpBusy)
    }

    fn push(&mut self, _chunk: &[u8]) {
        panic!("rejected datagram must not be delivered");
    }
}

#[test]
fn test_silent_module_fails_after_three_probes() {
    let serial = MockSerial::new();
    let mut drv = driver(serial);

    let result = drv.read_rx(Some("OK"), true, false);
    assert!(matches!(result, Err(Error::AtNotResponding)));
    // one liveness poke per missed first byte
    assert_eq!("?\r\n?\r\n?\r\n", drv.serial.written_str());
}

#[test]
fn test_notifications_interleaved_with_match() {
    let mut serial = MockSerial::new();
    serial.push_rx(
        b"+IPD,2,100\r\n3,CONNECT\r\n0,CLOSED\r\n+CWJAP:\"net\",\"8a:2f:16:f1:77:54\",6,-53\r\nOK\r\n",
    );
    let mut drv = driver(serial);
    drv.links.link(0).state = LinkState::Connected {
        incoming: true,
        accepted: false,
    };

    let result = drv.read_rx(Some("+CWJAP"), true, false).unwrap();
    assert!(matches!(result, ReadResult::Matched(_)));

    assert_eq!(100, drv.links.get(2).available);
    assert_eq!(
        LinkState::Connected {
            incoming: true,
            accepted: false
        },
        drv.links.get(3).state
    );
    assert_eq!(LinkState::Free, drv.links.get(0).state);
}

#[test]
fn test_notification_side_effects_are_order_independent() {
    let orders: [&[&[u8]]; 3] = [
        &[b"+IPD,2,100\r\n", b"3,CONNECT\r\n", b"+CWJAP:\"x\"\r\n"],
        &[b"3,CONNECT\r\n", b"+IPD,2,100\r\n", b"+CWJAP:\"x\"\r\n"],
        &[b"3,CONNECT\r\n", b"+CWJAP:\"x\"\r\n", b"+IPD,2,100\r\n"],
    ];

    for order in orders {
        let mut serial = MockSerial::new();
        for line in order {
            serial.push_rx(line);
        }
        let mut drv = driver(serial);

        let result = drv.read_rx(Some("+CWJAP"), true, false).unwrap();
        assert!(matches!(result, ReadResult::Matched(_)));
        // whatever arrives after the match is drained separately
        drv.maintain();

        assert_eq!(100, drv.links.get(2).available);
        assert_eq!(
            LinkState::Connected {
                incoming: true,
                accepted: false
            },
            drv.links.get(3).state
        );
    }
}

#[test]
fn test_unlink_excuses_spurious_error() {
    let mut serial = MockSerial::new();
    serial.push_rx(b"UNLINK\r\nERROR\r\n");
    let mut drv = driver(serial);

    let result = drv.read_rx(Some("OK"), true, false).unwrap();
    assert!(matches!(result, ReadResult::Matched(_)));
}

#[test]
fn test_error_fails_pending_command() {
    let mut serial = MockSerial::new();
    serial.push_rx(b"ERROR\r\n");
    let mut drv = driver(serial);

    let result = drv.read_rx(Some("OK"), true, false);
    assert!(matches!(result, Err(Error::AtError)));
}

#[test]
fn test_error_ignored_when_nothing_expected() {
    let mut serial = MockSerial::new();
    serial.push_rx(b"ERROR\r\n");
    let mut drv = driver(serial);

    let result = drv.read_rx(None, false, false);
    assert!(matches!(result, Ok(ReadResult::Drained)));
    assert_eq!("", drv.serial.written_str());
}

#[test]
fn test_no_ap_is_terminal() {
    let mut serial = MockSerial::new();
    serial.push_rx(b"No AP\r\n");
    let mut drv = driver(serial);

    let result = drv.read_rx(Some("+CWJAP"), true, false);
    assert!(matches!(result, Err(Error::NoAp)));
}

#[test]
fn test_garbage_flood_gives_up() {
    let mut serial = MockSerial::new();
    for _ in 0..71 {
        serial.push_rx(b"noise\r\n");
    }
    serial.push_rx(b"OK\r\n");
    let mut drv = driver(serial);

    let result = drv.read_rx(Some("OK"), true, false);
    assert!(matches!(result, Err(Error::AtNotResponding)));
}

#[test]
fn test_reset_chatter_below_flood_limit_is_tolerated() {
    let mut serial = MockSerial::new();
    for _ in 0..70 {
        serial.push_rx(b"noise\r\n");
    }
    serial.push_rx(b"OK\r\n");
    let mut drv = driver(serial);

    let result = drv.read_rx(Some("OK"), true, false).unwrap();
    assert!(matches!(result, ReadResult::Matched(_)));
}

#[test]
fn test_empty_lines_and_stray_cr_are_skipped() {
    let mut serial = MockSerial::new();
    serial.push_rx(b"\r\n\r\nOK\r\r\n");
    let mut drv = driver(serial);

    drv.read_ok().unwrap();
}

#[test]
fn test_bare_ok_ends_enumeration() {
    let mut serial = MockSerial::new();
    serial.push_rx(b"OK\r\n");
    let mut drv = driver(serial);

    let result = drv.read_rx(Some("+CWLAP"), true, true).unwrap();
    assert!(matches!(result, ReadResult::EndOfList));
}

#[test]
fn test_maintain_returns_when_idle() {
    let serial = MockSerial::new();
    let mut drv = driver(serial);

    drv.maintain();
    assert_eq!("", drv.serial.written_str());
}

#[test]
fn test_prompt_v1_swallows_trailing_space() {
    let mut serial = MockSerial::new();
    serial.push_rx(b"> ");
    let mut drv = driver_v1(serial);

    let result = drv.read_rx(Some(">"), true, false).unwrap();
    assert!(matches!(result, ReadResult::Matched(_)));
    assert_eq!(0, drv.serial.bytes_available());
}

#[test]
fn test_udp_inline_drain_v1() {
    let mut serial = MockSerial::new();
    serial.push_rx(b"+IPD,1,5:hello");
    let mut drv = driver_v1(serial);

    let received = Rc::new(RefCell::new(Vec::new()));
    drv.links.link(1).state = LinkState::UdpListener;
    drv.links.link(1).udp_sink = Some(Box::new(RecordingSink(received.clone())));

    drv.maintain();
    assert_eq!(b"hello".to_vec(), *received.borrow());
    // inline payloads never count as buffered data
    assert_eq!(0, drv.links.get(1).available);
    assert_eq!(0, drv.serial.bytes_available());
}

#[test]
fn test_udp_inline_drain_discards_rejected_datagram() {
    let mut serial = MockSerial::new();
    serial.push_rx(b"+IPD,1,5:hello");
    let mut drv = driver_v1(serial);

    drv.links.link(1).state = LinkState::UdpListener;
    drv.links.link(1).udp_sink = Some(Box::new(BusySink));

    drv.maintain();
    // payload consumed from the channel regardless
    assert_eq!(0, drv.serial.bytes_available());
}

#[test]
fn test_data_notification_for_plain_link_on_v1() {
    let mut serial = MockSerial::new();
    serial.push_rx(b"+IPD,0,5\r\n");
    let mut drv = driver_v1(serial);
    drv.links.link(0).state = LinkState::Connected {
        incoming: false,
        accepted: false,
    };

    drv.maintain();
    assert_eq!(5, drv.links.get(0).available);
}
