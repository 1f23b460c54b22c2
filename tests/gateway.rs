mod common;

use common::*;

use nrf53_spm_rs::channel::{Channel, CompanionPort, IpcLine, SharedRecord};
use nrf53_spm_rs::error::Error;
use nrf53_spm_rs::gateway::{write_non_secure, Gateway};
use nrf53_spm_rs::protocol::{AppStatus, Position2d};
use nrf53_spm_rs::remote::{handle_packet, log_notification, Outcome};
use nrf53_spm_rs::watchdog::{Watchdog, WatchdogConfig};

type TestGateway<'a> = Gateway<'a, HostSide<'a>, MockBoard, &'a WatchdogProbe>;

fn gateway<'a>(
    record: &'a SharedRecord,
    bus: &'a Bus,
    probe: &'a WatchdogProbe,
    board: MockBoard,
) -> TestGateway<'a> {
    let mut watchdog = Watchdog::new(probe, &WatchdogConfig::APPLICATION);
    watchdog.start();
    Gateway::new(Channel::new(record, HostSide::new(record, bus)), board, watchdog)
}

#[test]
fn keep_alive_feeds_the_watchdog_and_refreshes_the_cache() {
    let record = SharedRecord::new();
    let bus = Bus::default();
    let probe = WatchdogProbe::default();
    let board = MockBoard {
        adc_raw: 2730,
        fix: Some(Position2d::new(10, 20)),
        ..MockBoard::default()
    };
    let mut gateway = gateway(&record, &bus, &probe, board);

    gateway.keep_alive();
    gateway.keep_alive();

    assert_eq!(probe.config.get(), Some(WatchdogConfig::APPLICATION));
    assert!(probe.started.get());
    assert_eq!(probe.reloads.get(), 2);
    assert_eq!(gateway.position(), Position2d::new(10, 20));
    let port = CompanionPort::new(&record, CompanionSide::new(&bus));
    assert_eq!(port.battery_level(), 2400);
}

#[test]
fn data_packets_are_framed_and_raw_packets_are_not() {
    let record = SharedRecord::new();
    let bus = Bus::default();
    let probe = WatchdogProbe::default();
    let mut gateway = gateway(&record, &bus, &probe, MockBoard::default());

    gateway.send_data(b"Hello").unwrap();
    assert_eq!(bus.last_sent(), Some(b"\x10\x05Hello".to_vec()));

    gateway.send_raw(&[0xAA; 255]).unwrap();
    assert_eq!(bus.last_sent(), Some(vec![0xAA; 255]));

    assert_eq!(gateway.send_raw(&[0; 256]), Err(Error::PacketTooLong));
    assert_eq!(gateway.send_data(&[0; 254]), Err(Error::PacketTooLong));
    assert_eq!(bus.sent.borrow().len(), 2);
}

#[test]
fn random_bytes_and_device_id_come_from_their_sources() {
    let record = SharedRecord::new();
    let bus = Bus::default();
    let probe = WatchdogProbe::default();
    let mut gateway = gateway(&record, &bus, &probe, MockBoard::default());
    bus.rng.set(0xA5);

    gateway.init_rng();
    assert_eq!(gateway.read_rng(), 0xA5);
    assert_eq!(gateway.device_id(), 0x1122_3344_5566_7788);
}

#[test]
fn log_record_at_capacity_reaches_the_controller() {
    let record = SharedRecord::new();
    let bus = Bus::default();
    let probe = WatchdogProbe::default();
    let mut gateway = gateway(&record, &bus, &probe, MockBoard::default());
    let log: Vec<u8> = (0..127).collect();

    assert_eq!(unsafe { gateway.log_data(log.as_ptr(), log.len()) }, Ok(()));
    assert!(bus.raised(IpcLine::LogEvent));

    let port = CompanionPort::new(&record, CompanionSide::new(&bus));
    let frame = log_notification(&port, 42).unwrap();
    assert_eq!(&frame[..6], &[0x96, 42, 0, 0, 0, 127]);
    assert_eq!(&frame[6..], log.as_slice());
}

#[test]
fn oversized_or_secure_log_records_are_refused() {
    let record = SharedRecord::new();
    let bus = Bus::default();
    let probe = WatchdogProbe::default();
    let mut gateway = gateway(&record, &bus, &probe, MockBoard::default());
    let log = [0u8; 128];

    assert_eq!(
        unsafe { gateway.log_data(log.as_ptr(), log.len()) },
        Err(Error::LogTooLong)
    );
    // Never dereferenced: the range check comes first.
    assert_eq!(
        unsafe { gateway.log_data(0x2000_1000 as *const u8, 4) },
        Err(Error::SecureAddress)
    );
    assert_eq!(
        unsafe { gateway.log_data(0xFF00 as *const u8, 0x200) },
        Err(Error::SecureAddress)
    );
    assert_eq!(
        unsafe { gateway.log_data(0xFFF0 as *const u8, 0x20) },
        Err(Error::SecureAddress)
    );
    assert!(!bus.raised(IpcLine::LogEvent));
}

#[test]
fn log_records_cannot_read_out_secure_registers() {
    let record = SharedRecord::new();
    let bus = Bus::default();
    let probe = WatchdogProbe::default();
    let mut gateway = gateway(&record, &bus, &probe, MockBoard::default());

    // SPU permissions, then the SCB block
    for address in [0x5000_3700usize, 0xE000_ED00] {
        assert_eq!(
            unsafe { gateway.log_data(address as *const u8, 16) },
            Err(Error::SecureAddress)
        );
    }
    assert!(!bus.raised(IpcLine::LogEvent));
}

#[test]
fn analog_reads_accept_only_known_channels() {
    let record = SharedRecord::new();
    let bus = Bus::default();
    let probe = WatchdogProbe::default();
    let board = MockBoard {
        adc_raw: 1234,
        ..MockBoard::default()
    };
    let mut gateway = gateway(&record, &bus, &probe, board);

    assert_eq!(gateway.read_analog(0), Ok(1234));
    assert_eq!(gateway.read_analog(9), Ok(1234));
    assert_eq!(gateway.read_analog(10), Err(Error::InvalidAnalogChannel));
}

#[test]
fn application_packets_are_relayed_only_while_running() {
    let record = SharedRecord::new();
    let bus = Bus::default();
    let probe = WatchdogProbe::default();
    let mut gateway = gateway(&record, &bus, &probe, MockBoard::default());
    let mut port = CompanionPort::new(&record, CompanionSide::new(&bus));
    let packet = b"\x10\x02hi";

    assert_eq!(handle_packet(&mut port, packet), Err(Error::InvalidState));
    let mut relayed = None;
    gateway.relay_rx(|bytes| relayed = Some(bytes.to_vec()));
    assert_eq!(relayed, None);

    port.set_status(AppStatus::Running);
    assert_eq!(handle_packet(&mut port, packet), Ok(Outcome::Forwarded));
    gateway.relay_rx(|bytes| relayed = Some(bytes.to_vec()));
    assert_eq!(relayed.as_deref(), Some(&packet[..]));

    // The event is consumed by the first relay.
    relayed = None;
    gateway.relay_rx(|bytes| relayed = Some(bytes.to_vec()));
    assert_eq!(relayed, None);
}

#[test]
fn positioning_interrupt_is_passed_through() {
    let record = SharedRecord::new();
    let bus = Bus::default();
    let probe = WatchdogProbe::default();
    let mut gateway = gateway(&record, &bus, &probe, MockBoard::default());

    gateway.handle_position_interrupt();
    gateway.process_position();
    assert_eq!(gateway.position(), Position2d::default());
}

#[test]
fn outputs_land_only_in_caller_memory() {
    let mut position = Position2d::default();
    assert_eq!(
        unsafe { write_non_secure(&mut position, Position2d::new(1, 2)) },
        Ok(())
    );
    assert_eq!(position, Position2d::new(1, 2));

    assert_eq!(
        unsafe { write_non_secure(0x2000_7FF8 as *mut Position2d, Position2d::new(1, 2)) },
        Err(Error::SecureAddress)
    );
    assert_eq!(
        unsafe { write_non_secure(0x5000_3700 as *mut Position2d, Position2d::new(1, 2)) },
        Err(Error::SecureAddress)
    );
    assert_eq!(
        unsafe { write_non_secure(0xE000_ED00 as *mut u16, 0) },
        Err(Error::SecureAddress)
    );
}
