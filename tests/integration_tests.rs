use libibus::data_link::encode;
use libibus::data_link::framing::SyncOutcome;
use libibus::directory::AddressDirectory;
use libibus::error::IbusError;
use libibus::physical::mock::{MockHandle, MockPhysical, Traffic};
use libibus::transport::{IbusConfig, IbusInterface, TransportLayer};
use libibus::types::Address;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn test_config() -> IbusConfig {
    let mut config = IbusConfig::default();
    config.serial.read_timeout = Duration::from_millis(150);
    config.send_timeout = Some(Duration::from_secs(2));
    config.lock_poll_interval = Duration::from_millis(2);
    config
}

fn create_ibus(config: IbusConfig) -> (Arc<IbusInterface<MockPhysical>>, MockHandle) {
    let mock = MockPhysical::new();
    let handle = mock.handle();
    let ibus = IbusInterface::with_physical(
        config,
        Arc::new(AddressDirectory::ibus_defaults()),
        mock,
    )
    .unwrap();
    (Arc::new(ibus), handle)
}

fn reads(handle: &MockHandle) -> usize {
    handle
        .traffic()
        .iter()
        .filter(|entry| matches!(entry.traffic, Traffic::Read(_)))
        .count()
}

#[test]
fn test_clear_bus_on_idle_line() {
    let (ibus, handle) = create_ibus(test_config());
    let frame = encode(Address(0x68), Address(0x18), &[0x01, 0x02]).unwrap();
    handle.push_silence();
    handle.push_bytes(&frame);

    assert_eq!(ibus.wait_for_clear_bus().unwrap(), SyncOutcome::BusIdle);
    assert_eq!(handle.remaining(), frame.len());
    assert_eq!(reads(&handle), 1);
}

#[test]
fn test_clear_bus_discards_in_flight_packet() {
    let (ibus, handle) = create_ibus(test_config());

    // Tail end of a packet we joined halfway through
    handle.push_bytes(&[0x11, 0x22]);
    // Declared length 4 after a long gap: LEN, DST, two data bytes, CHK follow
    let in_flight = encode(Address(0x50), Address(0x68), &[0x32, 0x11]).unwrap();
    handle.push_byte_after(in_flight[0], Duration::from_millis(120));
    handle.push_bytes(&in_flight[1..]);
    let next = encode(Address(0x68), Address(0x18), &[0x01]).unwrap();
    handle.push_bytes(&next);

    assert_eq!(
        ibus.wait_for_clear_bus().unwrap(),
        SyncOutcome::Discarded { length: 0x04 }
    );
    assert_eq!(reads(&handle), 2 + in_flight.len());
    assert_eq!(handle.remaining(), next.len());

    let packet = ibus.read_packet().unwrap().unwrap();
    assert_eq!(packet.to_bytes(), next);
}

#[test]
fn test_oversized_packet_is_rejected_and_resyncs() {
    let (ibus, handle) = create_ibus(test_config());

    // 0x17 announces 21 payload bytes
    handle.push_bytes(&[0x68, 0x17, 0x18]);
    handle.push_bytes(&[0x01, 0x02, 0x03, 0x04]);
    handle.push_silence();
    let next = encode(Address(0x80), Address::GLOBAL_BROADCAST, &[0x11, 0x03]).unwrap();
    handle.push_bytes(&next);

    assert!(ibus.read_packet().unwrap().is_none());
    // Resync swallowed the noise and stopped at the quiet line
    assert_eq!(handle.remaining(), next.len());
    assert_eq!(ibus.read_packet().unwrap().unwrap().to_bytes(), next);
}

#[test]
fn test_concurrent_read_and_send_do_not_interleave() {
    let (ibus, handle) = create_ibus(test_config());

    let incoming: Vec<Vec<u8>> = (0..6u8)
        .map(|i| encode(Address(0x50), Address(0x68), &[0x3B, i, 0x00]).unwrap())
        .collect();
    for frame in &incoming {
        for &byte in frame {
            handle.push_byte_after(byte, Duration::from_millis(3));
        }
    }

    let reader = thread::Builder::new()
        .name("bus-reader".into())
        .spawn({
            let ibus = Arc::clone(&ibus);
            move || {
                let mut received = Vec::new();
                while received.len() < 6 {
                    if let Some(packet) = ibus.read_packet().unwrap() {
                        received.push(packet.to_bytes());
                    }
                }
                received
            }
        })
        .unwrap();

    let writer = thread::Builder::new()
        .name("bus-writer".into())
        .spawn({
            let ibus = Arc::clone(&ibus);
            move || {
                for i in 0..5u8 {
                    ibus.send_packet(Address(0xF1), Address(0x68), &[0x01, i])
                        .unwrap();
                }
            }
        })
        .unwrap();

    assert_eq!(reader.join().unwrap(), incoming);
    writer.join().unwrap();
    assert_eq!(handle.written().len(), 5);

    // Every incoming frame must be read back to back, with no write,
    // flush or line check from another caller in between.
    let traffic: Vec<Traffic> = handle.traffic().into_iter().map(|e| e.traffic).collect();
    let mut position = 0usize;
    let mut frame_len = 0usize;
    for entry in &traffic {
        if position > 0 {
            match entry {
                Traffic::Read(Some(byte)) => {
                    if position == 1 {
                        frame_len = usize::from(*byte) + 2;
                    }
                    position += 1;
                    if position == frame_len {
                        position = 0;
                    }
                }
                other => panic!("{:?} interleaved with an incoming frame", other),
            }
        } else if let Traffic::Read(Some(_)) = entry {
            position = 1;
        }
    }
    assert_eq!(position, 0);
}

#[test]
fn test_consecutive_sends_are_spaced() {
    let (ibus, handle) = create_ibus(test_config());
    for i in 0..4u8 {
        ibus.send_packet(Address(0xF1), Address::BROADCAST, &[i])
            .unwrap();
    }

    let times = handle.write_times();
    assert_eq!(times.len(), 4);
    for pair in times.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(10));
    }
}

#[test]
fn test_send_not_accepted_without_clear_to_send() {
    let (ibus, handle) = create_ibus(IbusConfig {
        send_timeout: Some(Duration::from_millis(100)),
        ..test_config()
    });
    handle.set_clear_to_send(false);

    match ibus.send_packet(Address(0xF1), Address(0x68), &[0x01]) {
        Err(IbusError::SendNotAccepted(waited)) => {
            assert!(waited >= Duration::from_millis(100))
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(handle.written().is_empty());
}

#[test]
fn test_send_waits_for_clear_to_send() {
    let (ibus, handle) = create_ibus(test_config());
    handle.set_clear_to_send(false);

    let started = Instant::now();
    let releaser = thread::spawn({
        let handle = handle.clone();
        move || {
            thread::sleep(Duration::from_millis(60));
            handle.set_clear_to_send(true);
        }
    });

    ibus.send_packet(Address(0xF1), Address(0x68), &[0x01])
        .unwrap();
    releaser.join().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(handle.written().len(), 1);
}

#[test]
fn test_close_cancels_pending_send() {
    let (ibus, handle) = create_ibus(IbusConfig {
        send_timeout: None,
        ..test_config()
    });
    handle.set_clear_to_send(false);

    let sender = thread::spawn({
        let ibus = Arc::clone(&ibus);
        move || ibus.send_packet(Address(0xF1), Address(0x68), &[0x01])
    });

    thread::sleep(Duration::from_millis(50));
    ibus.close().unwrap();

    assert!(matches!(sender.join().unwrap(), Err(IbusError::Closed)));
    assert!(!handle.is_open());
}

/// A line that never goes quiet long enough to mark a packet boundary
fn push_chatter(handle: &MockHandle, bytes: usize) {
    for i in 0..bytes {
        handle.push_byte_after(i as u8, Duration::from_millis(5));
    }
}

#[test]
fn test_close_interrupts_clear_bus_wait() {
    let (ibus, handle) = create_ibus(test_config());
    push_chatter(&handle, 400);

    let waiter = thread::spawn({
        let ibus = Arc::clone(&ibus);
        move || ibus.wait_for_clear_bus()
    });

    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    ibus.close().unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    assert!(matches!(waiter.join().unwrap(), Err(IbusError::Closed)));
    assert!(!handle.is_open());
}

#[test]
fn test_send_deadline_holds_while_bus_is_busy() {
    let (ibus, handle) = create_ibus(IbusConfig {
        send_timeout: Some(Duration::from_millis(100)),
        ..test_config()
    });
    push_chatter(&handle, 400);

    let waiter = thread::spawn({
        let ibus = Arc::clone(&ibus);
        move || ibus.wait_for_clear_bus()
    });
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    let result = ibus.send_packet(Address(0xF1), Address(0x68), &[0x01]);
    let elapsed = started.elapsed();
    assert!(matches!(result, Err(IbusError::SendNotAccepted(_))));
    assert!(elapsed < Duration::from_millis(400));
    assert!(handle.written().is_empty());

    ibus.close().unwrap();
    assert!(matches!(waiter.join().unwrap(), Err(IbusError::Closed)));
}

#[test]
fn test_generic_transport_exchange() {
    fn request_status<T: TransportLayer>(transport: &T) -> Option<Vec<u8>> {
        transport
            .send_packet(Address(0xF1), Address(0x68), &[0x01])
            .unwrap();
        transport.read_packet().unwrap().map(|packet| packet.payload)
    }

    let (ibus, handle) = create_ibus(test_config());
    handle.push_bytes(&encode(Address(0x68), Address(0xF1), &[0x02, 0x30]).unwrap());

    assert_eq!(request_status(&*ibus), Some(vec![0x02, 0x30]));
}
