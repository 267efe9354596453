use crate::urc::Urc;

#[test]
fn test_parse_data_notification() {
    assert_eq!(
        Urc::DataAvailable {
            link_id: 2,
            len: 100
        },
        Urc::parse(b"+IPD,2,100")
    );
    assert_eq!(
        Urc::DataAvailable {
            link_id: 0,
            len: 8192
        },
        Urc::parse(b"+IPD,0,8192")
    );
}

#[test]
fn test_parse_data_notification_with_peer_address() {
    assert_eq!(
        Urc::DataAvailable {
            link_id: 4,
            len: 12
        },
        Urc::parse(b"+IPD,4,12,\"10.0.0.7\",8080")
    );
}

#[test]
fn test_parse_data_notification_truncated_by_overflow() {
    // header mangled in a receive buffer overflow
    assert_eq!(Urc::TruncatedData, Urc::parse(b"+IPD,"));
    assert_eq!(Urc::TruncatedData, Urc::parse(b"+IPD,2"));
    assert_eq!(Urc::TruncatedData, Urc::parse(b"+IPD,2,"));
    // out of range link
    assert_eq!(Urc::TruncatedData, Urc::parse(b"+IPD,9,100"));
    // a zero length notification carries no information
    assert_eq!(Urc::TruncatedData, Urc::parse(b"+IPD,2,0"));
}

#[test]
fn test_parse_connection_notifications() {
    assert_eq!(Urc::Connect(3), Urc::parse(b"3,CONNECT"));
    assert_eq!(Urc::Closed(0), Urc::parse(b"0,CLOSED"));
    assert_eq!(Urc::Closed(1), Urc::parse(b"1,CONNECT FAIL"));
    assert_eq!(Urc::Unknown, Urc::parse(b"7,CONNECT"));
}

#[test]
fn test_parse_terminators() {
    assert_eq!(Urc::Ok, Urc::parse(b"OK"));
    assert_eq!(Urc::Error, Urc::parse(b"ERROR"));
    assert_eq!(Urc::Error, Urc::parse(b"FAIL"));
    assert_eq!(Urc::NoAp, Urc::parse(b"No AP"));
    assert_eq!(Urc::Unlink, Urc::parse(b"UNLINK"));
}

#[test]
fn test_parse_firmware_chatter_is_unknown() {
    assert_eq!(Urc::Unknown, Urc::parse(b"WIFI GOT IP"));
    assert_eq!(Urc::Unknown, Urc::parse(b"busy p..."));
    assert_eq!(Urc::Unknown, Urc::parse(b""));
    assert_eq!(Urc::Unknown, Urc::parse(b"\x82\xff\x01"));
}
