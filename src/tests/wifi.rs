use crate::serial::Serial;
use crate::tests::mock::{driver, driver_v1, init_script, init_script_v1, MockSerial};
use crate::types::Error;
use core::net::Ipv4Addr;
use core::str::FromStr;

#[test]
fn test_init_configures_module() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    let mut drv = driver(serial);

    drv.init().unwrap();
    drv.serial.assert_script_consumed();
    assert_eq!(1, drv.wifi_mode);
    assert_eq!(1, drv.wifi_mode_stored);
}

#[test]
fn test_init_v1_skips_system_store() {
    let mut serial = MockSerial::new();
    init_script_v1(&mut serial);
    let mut drv = driver_v1(serial);

    drv.init().unwrap();
    drv.serial.assert_script_consumed();
    assert!(!drv.serial.written_str().contains("SYSSTORE"));
}

#[test]
fn test_failed_init_leaves_driver_uninitialized() {
    let mut serial = MockSerial::new();
    serial.expect(b"AT+RST\r\n", b"\r\nready\r\n");
    serial.expect(b"ATE0\r\n", b"ERROR\r\n");
    let mut drv = driver(serial);

    assert_eq!(Err(Error::AtError), drv.init());
    assert_eq!(Err(Error::NotInitialized), drv.sta_status());
}

#[test]
fn test_set_wifi_mode_is_idempotent() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+CWMODE=3\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();

    drv.set_wifi_mode(3, false).unwrap();
    drv.set_wifi_mode(3, false).unwrap();

    drv.serial.assert_script_consumed();
    assert_eq!(1, drv.serial.written_str().matches("AT+CWMODE=3").count());
}

#[test]
fn test_set_wifi_mode_persistent_brackets_with_system_store() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+SYSSTORE=1\r\n");
    serial.expect_ok(b"AT+CWMODE=3\r\n");
    serial.expect_ok(b"AT+SYSSTORE=0\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();

    drv.set_wifi_mode(3, true).unwrap();
    assert_eq!(3, drv.wifi_mode_stored);

    // already stored: issues nothing further
    drv.set_wifi_mode(3, true).unwrap();
    drv.serial.assert_script_consumed();
}

#[test]
fn test_join_ap_persistent_v2() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+SYSSTORE=1\r\n");
    serial.expect_ok(b"AT+CWJAP=\"net\",\"secret\"\r\n");
    serial.expect_ok(b"AT+SYSSTORE=0\r\n");
    serial.expect_ok(b"AT+CWAUTOCONN=1\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();

    drv.join_ap(Some("net"), Some("secret"), None, true).unwrap();
    drv.serial.assert_script_consumed();
}

#[test]
fn test_join_ap_current_v1_uses_cur_command() {
    let mut serial = MockSerial::new();
    init_script_v1(&mut serial);
    serial.expect_ok(b"AT+CWJAP_CUR=\"net\",\"secret\"\r\n");
    let mut drv = driver_v1(serial);
    drv.init().unwrap();

    drv.join_ap(Some("net"), Some("secret"), None, false).unwrap();
    drv.serial.assert_script_consumed();
    assert!(!drv.serial.written_str().contains("CWAUTOCONN"));
}

#[test]
fn test_join_ap_formats_bssid() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+CWJAP=\"net\",\"secret\",\"8a:2f:16:f1:77:54\"\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();

    // octets stored last-first
    let bssid = [0x54, 0x77, 0xf1, 0x16, 0x2f, 0x8a];
    drv.join_ap(Some("net"), Some("secret"), Some(&bssid), false).unwrap();
    drv.serial.assert_script_consumed();
}

#[test]
fn test_quit_ap_persistent_v2() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+SYSSTORE=1\r\n");
    serial.expect_ok(b"AT+CWAUTOCONN=0\r\n");
    serial.expect_ok(b"AT+CIPDNS=0\r\n");
    serial.expect_ok(b"AT+CWDHCP=1,3\r\n");
    serial.expect_ok(b"AT+SYSSTORE=0\r\n");
    serial.expect_ok(b"AT+CWQAP\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();

    drv.quit_ap(true).unwrap();
    drv.serial.assert_script_consumed();
}

#[test]
fn test_list_ap_parses_records() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+CWLAPOPT=1,31\r\n");
    serial.expect(
        b"AT+CWLAP\r\n",
        b"+CWLAP:(3,\"Wokwi-GUEST\",-42,\"8a:2f:16:f1:77:54\",6)\r\n+CWLAP:(4,\"other\",-70,\"11:22:33:44:55:66\",11)\r\nOK\r\n",
    );
    let mut drv = driver(serial);
    drv.init().unwrap();

    let list = drv.list_ap::<6>().unwrap();
    drv.serial.assert_script_consumed();

    assert_eq!(2, list.len());
    assert_eq!("Wokwi-GUEST", list[0].ssid.as_str());
    assert_eq!(3, list[0].enc);
    assert_eq!(-42, list[0].rssi);
    assert_eq!(6, list[0].channel);
    assert_eq!([0x54, 0x77, 0xf1, 0x16, 0x2f, 0x8a], list[0].bssid);
    assert_eq!("other", list[1].ssid.as_str());
}

#[test]
fn test_list_ap_drains_surplus_records() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+CWLAPOPT=1,31\r\n");
    serial.expect(
        b"AT+CWLAP\r\n",
        b"+CWLAP:(3,\"one\",-42,\"8a:2f:16:f1:77:54\",6)\r\n+CWLAP:(3,\"two\",-50,\"8a:2f:16:f1:77:55\",6)\r\n+CWLAP:(3,\"three\",-60,\"8a:2f:16:f1:77:56\",6)\r\nOK\r\n",
    );
    let mut drv = driver(serial);
    drv.init().unwrap();

    let list = drv.list_ap::<2>().unwrap();
    drv.serial.assert_script_consumed();
    assert_eq!(2, list.len());
    assert_eq!(0, drv.serial.bytes_available());
}

#[test]
fn test_unrelated_data_notification_during_query() {
    let mut serial = MockSerial::new();
    serial.expect(
        b"AT+CWJAP?\r\n",
        b"+IPD,2,100\r\n+CWJAP:\"net\",\"8a:2f:16:f1:77:54\",6,-53\r\nOK\r\n",
    );
    let mut drv = driver(serial);

    let info = drv.ap_query().unwrap();
    assert_eq!("net", info.ssid.as_str());
    assert_eq!(6, info.channel);
    assert_eq!(-53, info.rssi);

    // the notification was applied although the command never asked for it
    assert_eq!(100, drv.links.get(2).available);
}

#[test]
fn test_sta_static_ip() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+CIPSTA=\"10.0.0.4\",\"10.0.0.1\",\"255.255.255.0\"\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();

    drv.sta_static_ip(
        Ipv4Addr::new(10, 0, 0, 4),
        Some(Ipv4Addr::new(10, 0, 0, 1)),
        Some(Ipv4Addr::new(255, 255, 255, 0)),
        false,
    )
    .unwrap();
    drv.serial.assert_script_consumed();
}

#[test]
fn test_sta_ip_query() {
    let mut serial = MockSerial::new();
    serial.expect(
        b"AT+CIPSTA?\r\n",
        b"+CIPSTA:ip:\"10.0.0.4\"\r\n+CIPSTA:gateway:\"10.0.0.1\"\r\n+CIPSTA:netmask:\"255.255.255.0\"\r\nOK\r\n",
    );
    let mut drv = driver(serial);

    let (ip, gateway, netmask) = drv.sta_ip_query().unwrap();
    assert_eq!(Ipv4Addr::new(10, 0, 0, 4), ip);
    assert_eq!(Ipv4Addr::new(10, 0, 0, 1), gateway);
    assert_eq!(Ipv4Addr::new(255, 255, 255, 0), netmask);
}

#[test]
fn test_sta_mac_query() {
    let mut serial = MockSerial::new();
    serial.expect(b"AT+CIPSTAMAC?\r\n", b"+CIPSTAMAC:\"a4:cf:12:df:22:1b\"\r\nOK\r\n");
    let mut drv = driver(serial);

    let mac = drv.sta_mac_query().unwrap();
    assert_eq!([0x1b, 0x22, 0xdf, 0x12, 0xcf, 0xa4], mac);
}

#[test]
fn test_sta_dns_query_v2() {
    let mut serial = MockSerial::new();
    serial.expect(
        b"AT+CIPDNS?\r\n",
        b"+CIPDNS:1,\"8.8.8.8\",\"1.1.1.1\"\r\nOK\r\n",
    );
    let mut drv = driver(serial);

    let (dns1, dns2) = drv.sta_dns_query().unwrap();
    assert_eq!(Some(Ipv4Addr::new(8, 8, 8, 8)), dns1);
    assert_eq!(Some(Ipv4Addr::new(1, 1, 1, 1)), dns2);
}

#[test]
fn test_sta_dns_query_v1_list() {
    let mut serial = MockSerial::new();
    serial.expect(
        b"AT+CIPDNS_CUR?\r\n",
        b"+CIPDNS_CUR:8.8.8.8\r\n+CIPDNS_CUR:1.1.1.1\r\nOK\r\n",
    );
    let mut drv = driver_v1(serial);

    let (dns1, dns2) = drv.sta_dns_query().unwrap();
    assert_eq!(Some(Ipv4Addr::new(8, 8, 8, 8)), dns1);
    assert_eq!(Some(Ipv4Addr::new(1, 1, 1, 1)), dns2);
}

#[test]
fn test_dhcp_state_bit_order_per_variant() {
    let mut serial = MockSerial::new();
    serial.expect(b"AT+CWDHCP?\r\n", b"+CWDHCP:1\r\nOK\r\n");
    let mut drv = driver(serial);
    assert_eq!((true, false), drv.dhcp_state_query().unwrap());

    let mut serial = MockSerial::new();
    serial.expect(b"AT+CWDHCP?\r\n", b"+CWDHCP:1\r\nOK\r\n");
    let mut drv = driver_v1(serial);
    assert_eq!((false, true), drv.dhcp_state_query().unwrap());
}

#[test]
fn test_begin_soft_ap() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+CWMODE=3\r\n");
    serial.expect_ok(b"AT+CWSAP=\"ap\",\"secret\",6,4\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();

    drv.begin_soft_ap(Some("ap"), Some("secret"), 6, 4, 0, false, false)
        .unwrap();
    drv.serial.assert_script_consumed();
}

#[test]
fn test_begin_soft_ap_without_ssid_only_raises_mode() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+CWMODE=3\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();

    drv.begin_soft_ap(None, None, 1, 4, 0, false, false).unwrap();
    drv.serial.assert_script_consumed();
    assert!(!drv.serial.written_str().contains("CWSAP"));
}

#[test]
fn test_end_soft_ap_drops_to_station() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+CWMODE=3\r\n");
    serial.expect_ok(b"AT+CWMODE=1\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();
    drv.set_wifi_mode(3, false).unwrap();

    drv.end_soft_ap(false).unwrap();
    drv.serial.assert_script_consumed();
    assert_eq!(1, drv.wifi_mode);
}

#[test]
fn test_soft_ap_query_fails_when_off() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    let mut drv = driver(serial);
    drv.init().unwrap();

    assert_eq!(Err(Error::NoAp), drv.soft_ap_query());
}

#[test]
fn test_soft_ap_query_parses_configuration() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+CWMODE=3\r\n");
    serial.expect(
        b"AT+CWSAP?\r\n",
        b"+CWSAP:\"ap\",\"secret\",6,4,4,0\r\nOK\r\n",
    );
    let mut drv = driver(serial);
    drv.init().unwrap();
    drv.set_wifi_mode(3, false).unwrap();

    let config = drv.soft_ap_query().unwrap();
    assert_eq!("ap", config.ssid.as_str());
    assert_eq!("secret", config.passphrase.as_str());
    assert_eq!(6, config.channel);
    assert_eq!(4, config.encoding);
    assert_eq!(4, config.max_connections);
    assert!(!config.hidden);
}

#[test]
fn test_resolve() {
    let mut serial = MockSerial::new();
    serial.expect(
        b"AT+CIPDOMAIN=\"example.com\"\r\n",
        b"+CIPDOMAIN:93.184.216.34\r\nOK\r\n",
    );
    let mut drv = driver(serial);

    let ip = drv.resolve("example.com").unwrap();
    assert_eq!(Ipv4Addr::from_str("93.184.216.34").unwrap(), ip);
}

#[test]
fn test_sntp_time_per_variant() {
    let mut serial = MockSerial::new();
    serial.expect(b"AT+SYSTIMESTAMP?\r\n", b"+SYSTIMESTAMP:1609459200\r\nOK\r\n");
    let mut drv = driver(serial);
    assert_eq!(1609459200, drv.sntp_time().unwrap());

    let mut serial = MockSerial::new();
    serial.expect(
        b"AT+SNTPTIME?\r\n",
        b"+SNTPTIME:1609459200,Fri Jan 01 00:00:00 2021\r\nOK\r\n",
    );
    let mut drv = driver_v1(serial);
    assert_eq!(1609459200, drv.sntp_time().unwrap());
}

#[test]
fn test_sntp_cfg() {
    let mut serial = MockSerial::new();
    serial.expect_ok(b"AT+CIPSNTPCFG=1,2,\"pool.ntp.org\",\"time.nist.gov\"\r\n");
    let mut drv = driver(serial);

    drv.sntp_cfg(2, "pool.ntp.org", Some("time.nist.gov")).unwrap();
}

#[test]
fn test_firmware_version() {
    let mut serial = MockSerial::new();
    serial.expect(
        b"AT+GMR\r\n",
        b"AT version:1.7.4.0(May 11 2020)\r\nSDK version:3.0.4\r\nOK\r\n",
    );
    let mut drv = driver(serial);

    assert_eq!("1.7.4.0", drv.firmware_version().unwrap().as_str());
}

#[test]
fn test_sta_status() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect(b"AT+CIPSTATUS\r\n", b"STATUS:2\r\nOK\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();

    assert_eq!(2, drv.sta_status().unwrap());
}

#[test]
fn test_ping_and_mdns_and_hostname() {
    let mut serial = MockSerial::new();
    init_script(&mut serial);
    serial.expect_ok(b"AT+PING=\"example.com\"\r\n");
    serial.expect_ok(b"AT+MDNS=1,\"esp\",\"_http\",80\r\n");
    serial.expect_ok(b"AT+CWHOSTNAME=\"esp\"\r\n");
    let mut drv = driver(serial);
    drv.init().unwrap();

    drv.ping("example.com").unwrap();
    drv.mdns("esp", "_http", 80).unwrap();
    drv.set_hostname("esp").unwrap();
    drv.serial.assert_script_consumed();
}
