use super::framing::*;
use super::*;
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(150);
const BUSY: Duration = Duration::from_millis(2);

fn feed_bytes(machine: &mut FrameMachine, bytes: &[u8]) -> Vec<Step> {
    bytes
        .iter()
        .map(|&b| machine.feed(Observation::byte(b, BUSY)))
        .collect()
}

mod codec_tests {
    use super::*;

    #[test]
    fn test_encode_known_frame() {
        let frame = encode(Address(0x68), Address(0x18), &[0x01, 0x02]).unwrap();
        assert_eq!(
            frame,
            vec![0x68, 0x04, 0x18, 0x01, 0x02, 0x68 ^ 0x04 ^ 0x18 ^ 0x01 ^ 0x02]
        );
        assert_eq!(checksum(&frame), 0);
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = encode(Address(0x3F), Address(0x00), &[]).unwrap();
        assert_eq!(frame, vec![0x3F, 0x02, 0x00, 0x3F ^ 0x02]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = [0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode(Address(0x68), Address(0x18), &payload),
            Err(IbusError::PayloadTooLong(21))
        ));
        assert!(encode(Address(0x68), Address(0x18), &payload[..MAX_PAYLOAD_LEN]).is_ok());
    }

    #[test]
    fn test_round_trip() {
        let frame = encode(Address(0x68), Address(0x18), &[0x01, 0x02]).unwrap();
        let packet = Packet::from_bytes(&frame).unwrap();

        assert_eq!(packet.source, Address(0x68));
        assert_eq!(packet.destination, Address(0x18));
        assert_eq!(packet.length, 0x04);
        assert_eq!(packet.payload, vec![0x01, 0x02]);
        assert_eq!(packet.checksum, 0x68 ^ 0x04 ^ 0x18 ^ 0x01 ^ 0x02);
        assert!(packet.checksum_valid());
        assert_eq!(packet.to_bytes(), frame);
    }

    #[test]
    fn test_packet_new_matches_encode() {
        let packet = Packet::new(Address(0x50), Address(0x68), &[0x3B, 0x01]).unwrap();
        let frame = encode(Address(0x50), Address(0x68), &[0x3B, 0x01]).unwrap();
        assert_eq!(packet.to_bytes(), frame);
    }

    #[test]
    fn test_from_bytes_errors() {
        assert!(matches!(
            Packet::from_bytes(&[0x68, 0x02, 0x18]),
            Err(IbusError::FrameTooShort(3))
        ));
        assert!(matches!(
            Packet::from_bytes(&[0x68, 0x05, 0x18, 0x01, 0x00]),
            Err(IbusError::LengthMismatch { length: 0x05, .. })
        ));
    }

    #[test]
    fn test_checksum_verification() {
        let mut packet = Packet::new(Address(0x68), Address(0x18), &[0x01]).unwrap();
        assert!(packet.verify_checksum().is_ok());

        packet.checksum ^= 0xFF;
        assert!(!packet.checksum_valid());
        assert!(matches!(
            packet.verify_checksum(),
            Err(IbusError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_display_renders_trace() {
        let packet = Packet::new(Address(0x68), Address(0x18), &[0x01, 0x02]).unwrap();
        assert_eq!(packet.to_string(), "68 04 18 01 02 77");
    }
}

mod framing_tests {
    use super::*;

    #[test]
    fn test_decodes_well_formed_frame() {
        let mut machine = FrameMachine::default();
        let frame = encode(Address(0x68), Address(0x18), &[0x01, 0x02]).unwrap();

        let steps = feed_bytes(&mut machine, &frame);
        let (last, rest) = steps.split_last().unwrap();
        assert!(rest.iter().all(|s| *s == Step::Pending));
        match last {
            Step::Packet(packet) => {
                assert_eq!(packet.payload, vec![0x01, 0x02]);
                assert_eq!(usize::from(packet.length), packet.payload.len() + 2);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(*machine.state(), FrameState::Idle);
    }

    #[test]
    fn test_timeout_on_source_is_idle() {
        let mut machine = FrameMachine::default();
        assert_eq!(
            machine.feed(Observation::timeout(QUIET)),
            Step::Dropped(DropReason::Idle)
        );
    }

    #[test]
    fn test_missing_length_or_destination_is_partial() {
        let mut machine = FrameMachine::default();
        machine.feed(Observation::byte(0x68, BUSY));
        assert_eq!(
            machine.feed(Observation::timeout(QUIET)),
            Step::Dropped(DropReason::Partial)
        );
        assert_eq!(*machine.state(), FrameState::Idle);

        feed_bytes(&mut machine, &[0x68, 0x04]);
        assert_eq!(
            machine.feed(Observation::timeout(QUIET)),
            Step::Dropped(DropReason::Partial)
        );
    }

    #[test]
    fn test_missing_payload_is_truncated() {
        let mut machine = FrameMachine::default();
        feed_bytes(&mut machine, &[0x68, 0x05, 0x18, 0x01]);
        assert_eq!(
            machine.feed(Observation::timeout(QUIET)),
            Step::Dropped(DropReason::Truncated { length: 0x05 })
        );
    }

    #[test]
    fn test_empty_packet_is_consumed_and_dropped() {
        let mut machine = FrameMachine::default();
        let steps = feed_bytes(&mut machine, &[0x3F, 0x02, 0x00, 0x3D]);
        assert_eq!(
            steps[3],
            Step::Dropped(DropReason::Empty {
                source: Address(0x3F),
                length: 0x02,
                destination: Address(0x00),
            })
        );
        assert_eq!(*machine.state(), FrameState::Idle);
    }

    #[test]
    fn test_short_length_byte_reads_as_empty() {
        let mut machine = FrameMachine::default();
        let steps = feed_bytes(&mut machine, &[0x3F, 0x01, 0x00, 0x3E]);
        assert!(matches!(steps[3], Step::Dropped(DropReason::Empty { length: 0x01, .. })));
    }

    #[test]
    fn test_oversized_length_starts_resync() {
        let mut machine = FrameMachine::default();
        // 0x17 announces 21 payload bytes
        let steps = feed_bytes(&mut machine, &[0x68, 0x17, 0x18]);
        assert_eq!(steps[2], Step::Oversized { length: 0x17 });
        assert_eq!(
            *machine.state(),
            FrameState::Resyncing(ResyncPhase::WatchingGap)
        );

        // Largest legal frame still decodes
        let mut machine = FrameMachine::default();
        let steps = feed_bytes(&mut machine, &[0x68, 0x16, 0x18]);
        assert_eq!(steps[2], Step::Pending);
    }

    #[test]
    fn test_corrupt_checksum_still_framed() {
        let mut machine = FrameMachine::default();
        let steps = feed_bytes(&mut machine, &[0x68, 0x03, 0x18, 0x01, 0x00]);
        match &steps[4] {
            Step::Packet(packet) => assert!(!packet.checksum_valid()),
            other => panic!("unexpected step {:?}", other),
        }
    }
}

mod resync_tests {
    use super::*;

    #[test]
    fn test_gap_then_timeout_is_clear_bus() {
        let mut machine = FrameMachine::resyncing(DEFAULT_IDLE_GAP);
        assert_eq!(
            machine.feed(Observation::timeout(QUIET)),
            Step::Synchronized(SyncOutcome::BusIdle)
        );
        assert_eq!(*machine.state(), FrameState::Idle);
    }

    #[test]
    fn test_short_gaps_keep_watching() {
        let mut machine = FrameMachine::resyncing(DEFAULT_IDLE_GAP);
        for byte in [0x11, 0x22, 0x33] {
            assert_eq!(machine.feed(Observation::byte(byte, BUSY)), Step::Pending);
        }
        // A timeout shorter than the idle gap proves nothing either
        assert_eq!(
            machine.feed(Observation::timeout(Duration::from_millis(50))),
            Step::Pending
        );
        assert_eq!(
            *machine.state(),
            FrameState::Resyncing(ResyncPhase::WatchingGap)
        );
    }

    #[test]
    fn test_gap_exactly_at_threshold_is_not_enough() {
        let mut machine = FrameMachine::resyncing(DEFAULT_IDLE_GAP);
        assert_eq!(
            machine.feed(Observation::timeout(DEFAULT_IDLE_GAP)),
            Step::Pending
        );
    }

    #[test]
    fn test_gap_then_byte_drains_one_frame() {
        let mut machine = FrameMachine::resyncing(DEFAULT_IDLE_GAP);
        assert_eq!(machine.feed(Observation::byte(0x50, QUIET)), Step::Pending);

        // Rest of a frame with declared length 4: LEN, DST, two data, CHK
        let rest = [0x04, 0x68, 0x32, 0x11, 0x50 ^ 0x04 ^ 0x68 ^ 0x32 ^ 0x11];
        let steps = feed_bytes(&mut machine, &rest);
        assert!(steps[..4].iter().all(|s| *s == Step::Pending));
        assert_eq!(
            steps[4],
            Step::Synchronized(SyncOutcome::Discarded { length: 0x04 })
        );

        // The next frame decodes cleanly
        let frame = encode(Address(0x68), Address(0x18), &[0x01]).unwrap();
        let steps = feed_bytes(&mut machine, &frame);
        assert!(matches!(steps.last(), Some(Step::Packet(_))));
    }

    #[test]
    fn test_timeout_while_draining_ends_resync() {
        let mut machine = FrameMachine::resyncing(DEFAULT_IDLE_GAP);
        machine.feed(Observation::byte(0x50, QUIET));
        feed_bytes(&mut machine, &[0x06, 0x68]);
        assert_eq!(
            machine.feed(Observation::timeout(QUIET)),
            Step::Synchronized(SyncOutcome::BusIdle)
        );
    }

    #[test]
    fn test_step_terminality() {
        assert!(!Step::Pending.is_terminal());
        assert!(!Step::Oversized { length: 0x20 }.is_terminal());
        assert!(Step::Dropped(DropReason::Idle).is_terminal());
        assert!(Step::Synchronized(SyncOutcome::BusIdle).is_terminal());
    }
}
