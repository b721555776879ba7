//! Decoding simulated device streams split at arbitrary points

use proptest::prelude::*;
use spike_core::protocol::ESCAPE_SEQUENCE_START;
use spike_core::{ControlMessage, DeviceProfile, Event, ExpansionBoard, Sample};
use spike_processing::FrameDecoder;
use spike_simulation::{DeviceConfig, DeviceSimulator, NoiseConfig, SignalPattern};

/// Everything decoded from a stream, event indices made absolute
#[derive(Debug, Default, PartialEq)]
struct Decoded {
    channels: Vec<Vec<Sample>>,
    events: Vec<Event>,
    messages: Vec<ControlMessage>,
}

fn decode_in_pieces(bytes: &[u8], channel_count: usize, cuts: &[usize]) -> Decoded {
    let mut decoder = FrameDecoder::new(channel_count).unwrap();
    let mut decoded = Decoded {
        channels: vec![Vec::new(); channel_count],
        ..Decoded::default()
    };

    let mut bounds: Vec<usize> = cuts.iter().map(|cut| cut % (bytes.len() + 1)).collect();
    bounds.push(0);
    bounds.push(bytes.len());
    bounds.sort_unstable();
    bounds.dedup();

    for pair in bounds.windows(2) {
        let block = decoder.decode(&bytes[pair[0]..pair[1]], channel_count).unwrap();
        let offset = decoded.channels[0].len();
        for event in block.events {
            decoded
                .events
                .push(Event::new(event.sample_index + offset, event.label));
        }
        decoded.messages.extend(block.messages);
        for (all, part) in decoded.channels.iter_mut().zip(block.samples.channels()) {
            all.extend_from_slice(part);
        }
    }
    decoded
}

fn simulated_stream(channel_count: usize, seed: u64) -> Vec<u8> {
    let config = DeviceConfig {
        channel_count,
        sample_rate: 1000,
        patterns: vec![
            SignalPattern::Heartbeat {
                bpm: 90.0,
                amplitude: 3000.0,
            },
            SignalPattern::Sine {
                frequency: 12.0,
                amplitude: 800.0,
                offset: 0.0,
            },
        ],
        noise: NoiseConfig {
            gaussian_std: 40.0,
            ..NoiseConfig::default()
        },
        seed: Some(seed),
        ..DeviceConfig::default()
    };
    let mut simulator = DeviceSimulator::new(config).unwrap();

    let mut bytes = simulator.generate_frames(150);
    simulator.inject_event("1");
    bytes.extend(simulator.generate_frames(80));
    simulator.inject(ControlMessage::ExpansionBoard(ExpansionBoard::from_code(1)));
    simulator.inject_event("2");
    bytes.extend(simulator.generate_frames(120));
    bytes
}

proptest! {
    #[test]
    fn split_points_do_not_change_output(
        channel_count in 1usize..4,
        seed in 0u64..1000,
        cuts in proptest::collection::vec(any::<usize>(), 0..24),
    ) {
        let bytes = simulated_stream(channel_count, seed);
        let whole = decode_in_pieces(&bytes, channel_count, &[]);
        let pieces = decode_in_pieces(&bytes, channel_count, &cuts);

        prop_assert_eq!(whole.channels[0].len(), 350);
        prop_assert_eq!(&whole, &pieces);
    }

    #[test]
    fn single_byte_feed_matches_bulk(seed in 0u64..200) {
        let bytes = simulated_stream(2, seed);
        let cuts: Vec<usize> = (1..bytes.len()).collect();
        prop_assert_eq!(
            decode_in_pieces(&bytes, 2, &[]),
            decode_in_pieces(&bytes, 2, &cuts)
        );
    }
}

#[test]
fn events_land_between_the_right_frames() {
    let decoded = decode_in_pieces(&simulated_stream(2, 3), 2, &[]);

    assert_eq!(
        decoded.events,
        vec![Event::new(150, "1"), Event::new(230, "2")]
    );
    assert_eq!(decoded.messages.len(), 5);
    assert_eq!(
        decoded.messages[0],
        ControlMessage::HardwareType("SBPRO".to_string())
    );
    assert_eq!(
        decoded.messages[1],
        ControlMessage::StreamFormat {
            sample_rate: 1000,
            channel_count: 2
        }
    );
}

#[test]
fn hardware_greeting_selects_profile() {
    let mut decoder = FrameDecoder::new(1).unwrap();
    assert_eq!(decoder.profile(), DeviceProfile::TenBit);

    let bytes = simulated_stream(1, 9);
    let split = ESCAPE_SEQUENCE_START.len() + 2;
    decoder.decode(&bytes[..split], 1).unwrap();
    decoder.decode(&bytes[split..], 1).unwrap();

    assert_eq!(decoder.hardware_type(), Some("SBPRO"));
    assert_eq!(decoder.profile(), DeviceProfile::FourteenBit);
    assert_eq!(decoder.expansion_board(), ExpansionBoard::from_code(1));
    assert_eq!(decoder.stats().frames, 350);
    assert_eq!(decoder.stats().dropped_frames, 0);
}

#[test]
fn garbage_prefix_is_skipped() {
    let mut bytes = vec![0x12, 0x34, 0x7F, 0x00];
    bytes.extend(simulated_stream(1, 5));

    let decoded = decode_in_pieces(&bytes, 1, &[]);
    assert_eq!(decoded.channels[0].len(), 350);
    assert_eq!(decoded.events.len(), 2);
}
