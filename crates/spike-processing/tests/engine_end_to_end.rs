//! Simulated device bytes through the complete engine

use spike_core::{ControlMessage, StreamFormat};
use spike_processing::{
    ControlCommand, EngineConfig, EngineOutput, EventFilter, SignalEngine, ThresholdSettings,
    TriggerMode,
};
use spike_simulation::{DeviceConfig, DeviceSimulator, SignalPattern};

fn run(engine: &mut SignalEngine, bytes: &[u8], chunk_size: usize) -> Vec<EngineOutput> {
    bytes
        .chunks(chunk_size)
        .map(|chunk| engine.process(chunk).unwrap())
        .collect()
}

fn heart_engine() -> SignalEngine {
    let mut config = EngineConfig::heart();
    config.filters.enabled = false;
    SignalEngine::new(config).unwrap()
}

fn heart_stream(seconds: f32) -> Vec<u8> {
    let mut simulator = DeviceSimulator::new(DeviceConfig {
        seed: Some(21),
        ..DeviceConfig::default()
    })
    .unwrap();
    simulator.generate(seconds)
}

#[test]
fn heartbeat_stream_reports_bpm_and_average() {
    let mut engine = heart_engine();
    let outputs = run(&mut engine, &heart_stream(10.0), 4096);

    let last = outputs.last().unwrap().averages.as_ref().unwrap();
    assert_eq!(last.bpm, 60);
    // Beats at 0..=8 s have a complete 2.4 s window by the 10 s mark
    assert_eq!(last.averaged_windows, 9);

    let peak = last.averages[0].iter().copied().max().unwrap();
    assert!(peak > 3500, "peak {}", peak);

    let samples: usize = outputs.iter().map(|o| o.samples.samples_per_channel()).sum();
    assert_eq!(samples, 100_000);
    assert_eq!(engine.decoder().hardware_type(), Some("SBPRO"));
    assert_eq!(engine.stats().calls, outputs.len() as u64);
}

#[test]
fn chunk_size_does_not_change_results() {
    let bytes = heart_stream(6.0);
    let mut config = EngineConfig::heart();
    config.spectrogram.enabled = true;

    let mut coarse = SignalEngine::new(config.clone()).unwrap();
    let mut fine = SignalEngine::new(config).unwrap();
    let coarse_out = run(&mut coarse, &bytes, 20_000);
    let fine_out = run(&mut fine, &bytes, 333);

    let concat = |outputs: &[EngineOutput]| -> Vec<i16> {
        outputs
            .iter()
            .flat_map(|o| o.samples.channels()[0].iter().copied())
            .collect()
    };
    assert_eq!(concat(&coarse_out), concat(&fine_out));

    let windows = |outputs: &[EngineOutput]| -> Vec<Vec<f32>> {
        outputs
            .iter()
            .flat_map(|o| o.spectrogram.as_ref().unwrap().windows.clone())
            .collect()
    };
    let coarse_windows = windows(&coarse_out);
    assert!(!coarse_windows.is_empty());
    assert_eq!(coarse_windows.len(), windows(&fine_out).len());

    assert_eq!(
        coarse_out.last().unwrap().averages,
        fine_out.last().unwrap().averages
    );
}

#[test]
fn event_triggered_averaging() {
    let config = EngineConfig {
        format: StreamFormat::new(1000, 1).unwrap(),
        threshold: spike_processing::ThresholdConfig {
            enabled: true,
            settings: ThresholdSettings {
                trigger: TriggerMode::Event(EventFilter::Label("7".to_string())),
                averaging_depth: 10,
                trigger_channel: 0,
                window_seconds: 0.2,
            },
        },
        ..EngineConfig::default()
    };
    let mut engine = SignalEngine::new(config).unwrap();
    engine.handle().send(ControlCommand::EnableFilters(false)).unwrap();

    let mut simulator = DeviceSimulator::new(DeviceConfig {
        sample_rate: 1000,
        patterns: vec![SignalPattern::Sine {
            frequency: 5.0,
            amplitude: 1000.0,
            offset: 0.0,
        }],
        seed: Some(2),
        ..DeviceConfig::default()
    })
    .unwrap();
    let mut bytes = simulator.generate_frames(500);
    simulator.inject_event("7");
    bytes.extend(simulator.generate_frames(200));
    simulator.inject_event("3");
    bytes.extend(simulator.generate_frames(100));
    simulator.inject_event("7");
    bytes.extend(simulator.generate_frames(700));

    let outputs = run(&mut engine, &bytes, 1000);
    let events: Vec<String> = outputs
        .iter()
        .flat_map(|o| o.events.iter().map(|e| e.label.clone()))
        .collect();
    assert_eq!(events, vec!["7", "3", "7"]);

    let last = outputs.last().unwrap().averages.as_ref().unwrap();
    assert_eq!(last.averaged_windows, 2);
    assert_eq!(last.bpm, 0);
}

#[test]
fn device_format_change_applies_on_next_call() {
    let mut engine = heart_engine();
    let mut simulator = DeviceSimulator::new(DeviceConfig {
        seed: Some(4),
        ..DeviceConfig::default()
    })
    .unwrap();

    engine.process(&simulator.generate_frames(1000)).unwrap();
    simulator.set_format(2000, 2).unwrap();
    let output = engine.process(&simulator.generate_frames(0)).unwrap();
    assert_eq!(
        output.messages,
        vec![ControlMessage::StreamFormat {
            sample_rate: 2000,
            channel_count: 2
        }]
    );
    assert_eq!(engine.format(), StreamFormat::new(10_000, 1).unwrap());

    let output = engine.process(&simulator.generate_frames(400)).unwrap();
    assert_eq!(engine.format(), StreamFormat::new(2000, 2).unwrap());
    assert_eq!(output.samples.channel_count(), 2);
    assert_eq!(output.samples.samples_per_channel(), 400);
}
