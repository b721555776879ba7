//! Wall-clock paced device byte stream
//!
//! Stands in for the serial/USB reader: a tokio task generates chunks at the
//! device's real rate and broadcasts them as raw bytes.

use crate::device_simulator::{DeviceConfig, DeviceSimulator};
use crate::signal_patterns::SignalPattern;
use serde::{Deserialize, Serialize};
use spike_core::{ControlMessage, SpikeResult};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for real-time streaming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub device: DeviceConfig,
    /// Chunk duration in seconds
    pub chunk_duration: f32,
    /// Chunks kept for slow subscribers
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            chunk_duration: 0.05,
            buffer_size: 64,
        }
    }
}

/// Commands for controlling the stream
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Start,
    /// Stop and rewind the waveforms
    Stop,
    Pause,
    Resume,
    InjectEvent(String),
    SetFormat { sample_rate: u32, channel_count: usize },
    UpdatePattern { channel: usize, pattern: SignalPattern },
    Shutdown,
}

/// Stream statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub is_running: bool,
    pub chunks_generated: u64,
    pub bytes_generated: u64,
    pub total_duration: f32,
    pub average_chunk_time_us: u64,
}

/// Real-time device byte stream
pub struct RealTimeDeviceStream {
    config: StreamConfig,
    simulator: DeviceSimulator,
    data_sender: broadcast::Sender<Vec<u8>>,
    control_receiver: mpsc::Receiver<StreamCommand>,
    control_sender: mpsc::Sender<StreamCommand>,
    stats: StreamStats,
    total_chunk_time_us: u64,
}

impl RealTimeDeviceStream {
    pub fn new(config: StreamConfig) -> SpikeResult<Self> {
        let simulator = DeviceSimulator::new(config.device.clone())?;
        let (data_sender, _) = broadcast::channel(config.buffer_size.max(1));
        let (control_sender, control_receiver) = mpsc::channel(32);

        Ok(Self {
            config,
            simulator,
            data_sender,
            control_receiver,
            control_sender,
            stats: StreamStats::default(),
            total_chunk_time_us: 0,
        })
    }

    /// Receiver for raw byte chunks
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.data_sender.subscribe()
    }

    pub fn control_handle(&self) -> mpsc::Sender<StreamCommand> {
        self.control_sender.clone()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Run until `Shutdown` or until every control handle is dropped
    pub async fn run(&mut self) -> SpikeResult<()> {
        let mut ticker = interval(Duration::from_secs_f32(self.config.chunk_duration));
        info!(
            chunk_ms = self.config.chunk_duration * 1000.0,
            sample_rate = self.config.device.sample_rate,
            "device stream ready"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.stats.is_running {
                        self.emit_chunk();
                    }
                }

                command = self.control_receiver.recv() => {
                    match command {
                        Some(StreamCommand::Shutdown) | None => {
                            debug!("device stream shutting down");
                            break;
                        }
                        Some(command) => self.handle_command(command)?,
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_chunk(&mut self) {
        let start = Instant::now();
        let chunk = self.simulator.generate(self.config.chunk_duration);
        let elapsed = start.elapsed();

        self.stats.chunks_generated += 1;
        self.stats.bytes_generated += chunk.len() as u64;
        self.stats.total_duration += self.config.chunk_duration;
        self.total_chunk_time_us += elapsed.as_micros() as u64;
        self.stats.average_chunk_time_us = self.total_chunk_time_us / self.stats.chunks_generated;

        if elapsed.as_secs_f32() > self.config.chunk_duration {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                "chunk generation slower than real time"
            );
        }
        // No subscribers is fine
        let _ = self.data_sender.send(chunk);
    }

    fn handle_command(&mut self, command: StreamCommand) -> SpikeResult<()> {
        match command {
            StreamCommand::Start | StreamCommand::Resume => self.stats.is_running = true,
            StreamCommand::Pause => self.stats.is_running = false,
            StreamCommand::Stop => {
                self.stats = StreamStats::default();
                self.total_chunk_time_us = 0;
                self.simulator.reset_time();
            }
            StreamCommand::InjectEvent(label) => {
                self.simulator.inject(ControlMessage::Event(label))
            }
            StreamCommand::SetFormat {
                sample_rate,
                channel_count,
            } => {
                self.simulator.set_format(sample_rate, channel_count)?;
                self.config.device = self.simulator.config().clone();
            }
            StreamCommand::UpdatePattern { channel, pattern } => {
                debug!(channel, pattern = pattern.description(), "pattern updated");
                self.simulator.set_pattern(channel, pattern);
                self.config.device = self.simulator.config().clone();
            }
            StreamCommand::Shutdown => {}
        }
        Ok(())
    }
}

/// Create a stream and run it on a background task
pub fn start_device_stream(
    config: StreamConfig,
) -> SpikeResult<(broadcast::Receiver<Vec<u8>>, mpsc::Sender<StreamCommand>)> {
    let mut stream = RealTimeDeviceStream::new(config)?;
    let data_receiver = stream.subscribe();
    let control_sender = stream.control_handle();

    tokio::spawn(async move {
        if let Err(error) = stream.run().await {
            warn!(%error, "device stream stopped with error");
        }
    });

    Ok((data_receiver, control_sender))
}
