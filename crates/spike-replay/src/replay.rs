//! Feeding byte sources through the engine and summarizing the results

use anyhow::{Context, Result};
use spike_processing::{EngineConfig, EngineOutput, SignalEngine, MAX_BYTES_PER_CALL};
use spike_simulation::{
    start_device_stream, DeviceConfig, DeviceSimulator, SignalPattern, StreamCommand,
    StreamConfig,
};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Totals collected over a replay
#[derive(Debug, Clone, Default)]
pub struct ReplaySummary {
    pub calls: u64,
    pub samples: u64,
    pub events: u64,
    pub messages: u64,
    pub averaged_windows: usize,
    pub last_bpm: u32,
    pub spectrogram_windows: u64,
}

impl ReplaySummary {
    pub fn record(&mut self, output: &EngineOutput) {
        self.calls += 1;
        self.samples += output.samples.samples_per_channel() as u64;
        self.events += output.events.len() as u64;
        self.messages += output.messages.len() as u64;
        if let Some(averages) = &output.averages {
            self.averaged_windows = averages.averaged_windows;
            self.last_bpm = averages.bpm;
        }
        if let Some(spectrogram) = &output.spectrogram {
            self.spectrogram_windows += spectrogram.windows.len() as u64;
        }
        for event in &output.events {
            debug!(index = event.sample_index, label = %event.label, "event");
        }
    }

    pub fn log(&self, engine: &SignalEngine) {
        let decoder = engine.decoder_stats();
        let stats = engine.stats();
        info!(
            calls = self.calls,
            samples = self.samples,
            events = self.events,
            messages = self.messages,
            "replay finished"
        );
        info!(
            frames = decoder.frames,
            dropped_frames = decoder.dropped_frames,
            oversized_messages = decoder.oversized_messages,
            dropped_events = decoder.dropped_events,
            "decoder"
        );
        info!(
            averaged_windows = self.averaged_windows,
            bpm = self.last_bpm,
            spectrogram_windows = self.spectrogram_windows,
            "analysis"
        );
        info!(
            avg_latency_us = stats.avg_latency_us(),
            max_latency_us = stats.max_latency_us,
            resets = stats.resets,
            "engine"
        );
    }
}

/// Simulated board matching the engine's starting format
pub fn device_for(config: &EngineConfig) -> DeviceConfig {
    let pattern = if config.spectrogram.enabled && !config.threshold.enabled {
        SignalPattern::Sine {
            frequency: 10.0,
            amplitude: 400.0,
            offset: 0.0,
        }
    } else {
        SignalPattern::Heartbeat {
            bpm: 72.0,
            amplitude: 4000.0,
        }
    };
    DeviceConfig {
        sample_rate: config.format.sample_rate,
        channel_count: config.format.channel_count,
        patterns: vec![pattern],
        ..DeviceConfig::default()
    }
}

/// Process `bytes` in chunks of at most `chunk_size`
pub fn replay_bytes(
    engine: &mut SignalEngine,
    bytes: &[u8],
    chunk_size: usize,
    summary: &mut ReplaySummary,
) -> Result<()> {
    let chunk_size = chunk_size.clamp(1, MAX_BYTES_PER_CALL);
    for chunk in bytes.chunks(chunk_size) {
        let output = engine.process(chunk).context("processing chunk")?;
        summary.record(&output);
    }
    Ok(())
}

/// Generate `seconds` of simulated stream up front and replay it
pub fn replay_simulated(
    engine: &mut SignalEngine,
    seconds: f32,
    chunk_size: usize,
    summary: &mut ReplaySummary,
) -> Result<()> {
    let mut simulator = DeviceSimulator::new(device_for(engine.config()))?;
    let bytes = simulator.generate(seconds);
    info!(bytes = bytes.len(), seconds, "simulated stream generated");
    replay_bytes(engine, &bytes, chunk_size, summary)
}

/// Run the simulated device at wall-clock rate for `seconds`
pub async fn replay_realtime(
    engine: &mut SignalEngine,
    seconds: f32,
    summary: &mut ReplaySummary,
) -> Result<()> {
    let config = StreamConfig {
        device: device_for(engine.config()),
        ..StreamConfig::default()
    };
    let (mut data, control) = start_device_stream(config)?;
    control.send(StreamCommand::Start).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs_f32(seconds);
    loop {
        let chunk = match tokio::time::timeout_at(deadline, data.recv()).await {
            Err(_) => break,
            Ok(Ok(chunk)) => chunk,
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!(skipped, "replay fell behind the device stream");
                continue;
            }
            Ok(Err(RecvError::Closed)) => break,
        };
        for piece in chunk.chunks(MAX_BYTES_PER_CALL) {
            let output = engine.process(piece)?;
            summary.record(&output);
        }
    }

    let _ = control.send(StreamCommand::Shutdown).await;
    Ok(())
}
