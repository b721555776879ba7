//! Signal engine: decoder, filter bank, averaging and spectrogram in one call
//!
//! The engine is owned by the thread reading the device. Other threads talk
//! to it through an [`EngineHandle`]; their commands are queued and applied
//! at the start of the next [`SignalEngine::process`] call, never mid-call.

use crate::config::EngineConfig;
use crate::decoder::{DecoderStats, FrameDecoder};
use crate::filters::{FilterBank, NotchFrequency};
use crate::processor::FormatListener;
use crate::spectrogram::{SpectrogramEngine, SpectrogramOutput, SpectrogramSettings};
use crate::threshold::{ThresholdEngine, ThresholdOutput, ThresholdSettings};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use spike_core::{
    ControlMessage, Event, SampleBlock, SpikeError, SpikeResult, StreamFormat,
};
use std::time::Instant;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Reconfiguration request, applied at the start of the next call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlCommand {
    /// Switch sample rate and/or channel count
    SetFormat(StreamFormat),
    /// Set the filter band of one channel, or of all channels when `None`
    SetFilter {
        channel: Option<usize>,
        low_cutoff: f32,
        high_cutoff: f32,
    },
    SetNotch(NotchFrequency),
    EnableFilters(bool),
    SetThreshold(ThresholdSettings),
    EnableThreshold(bool),
    SetSpectrogram(SpectrogramSettings),
    /// Change window length and overlap, keeping the current capacity
    SetSpectrogramWindow {
        window_seconds: f32,
        overlap_percent: f32,
    },
    SetSpectrogramChannel(usize),
    EnableSpectrogram(bool),
    /// Drop all in-flight state and start a new session
    Reset,
}

/// Cloneable, thread-safe handle for staging commands
#[derive(Debug, Clone)]
pub struct EngineHandle {
    sender: Sender<ControlCommand>,
}

impl EngineHandle {
    pub fn send(&self, command: ControlCommand) -> SpikeResult<()> {
        self.sender
            .send(command)
            .map_err(|_| SpikeError::EngineClosed)
    }

    pub fn set_format(&self, sample_rate: u32, channel_count: usize) -> SpikeResult<()> {
        self.send(ControlCommand::SetFormat(StreamFormat::new(
            sample_rate,
            channel_count,
        )?))
    }

    pub fn set_filter(&self, low_cutoff: f32, high_cutoff: f32) -> SpikeResult<()> {
        self.send(ControlCommand::SetFilter {
            channel: None,
            low_cutoff,
            high_cutoff,
        })
    }

    pub fn set_threshold(&self, settings: ThresholdSettings) -> SpikeResult<()> {
        settings.validate()?;
        self.send(ControlCommand::SetThreshold(settings))
    }

    pub fn set_spectrogram(&self, window_seconds: f32, overlap_percent: f32) -> SpikeResult<()> {
        SpectrogramSettings {
            window_seconds,
            overlap_percent,
            ..SpectrogramSettings::default()
        }
        .validate()?;
        self.send(ControlCommand::SetSpectrogramWindow {
            window_seconds,
            overlap_percent,
        })
    }

    pub fn reset(&self) -> SpikeResult<()> {
        self.send(ControlCommand::Reset)
    }
}

/// Everything one processing call produced
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// Decoded (and, where enabled, filtered) samples
    pub samples: SampleBlock,
    /// Events positioned in `samples`
    pub events: Vec<Event>,
    /// Running averages, if averaging is enabled
    pub averages: Option<ThresholdOutput>,
    /// New spectrogram windows, if the spectrogram is enabled
    pub spectrogram: Option<SpectrogramOutput>,
    /// Control messages reported by the device
    pub messages: Vec<ControlMessage>,
}

/// Engine performance counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub calls: u64,
    pub bytes: u64,
    pub total_latency_us: u64,
    pub max_latency_us: u64,
    pub resets: u64,
    pub rejected_commands: u64,
}

impl EngineStats {
    pub fn avg_latency_us(&self) -> u64 {
        if self.calls == 0 {
            0
        } else {
            self.total_latency_us / self.calls
        }
    }
}

/// Streaming signal engine
pub struct SignalEngine {
    config: EngineConfig,
    format: StreamFormat,
    decoder: FrameDecoder,
    filters: FilterBank,
    threshold: ThresholdEngine,
    spectrogram: SpectrogramEngine,
    sender: Sender<ControlCommand>,
    commands: Receiver<ControlCommand>,
    session_id: Uuid,
    stats: EngineStats,
}

impl SignalEngine {
    pub fn new(config: EngineConfig) -> SpikeResult<Self> {
        config.validate()?;
        let format = config.format;

        let decoder =
            FrameDecoder::new(format.channel_count)?.with_profile(config.device_profile);
        let mut filters = FilterBank::new(format);
        filters.configure_all(config.filters.low_cutoff, config.filters.high_cutoff);
        filters.set_notch_all(config.filters.notch);
        let threshold = ThresholdEngine::new(format, config.threshold.settings.clone())?;
        let spectrogram =
            SpectrogramEngine::new(format.sample_rate, config.spectrogram.settings.clone())?;

        let (sender, commands) = unbounded();
        let session_id = Uuid::new_v4();
        info!(
            config = %config.name,
            session = %session_id,
            sample_rate = format.sample_rate,
            channels = format.channel_count,
            "signal engine created"
        );

        Ok(Self {
            config,
            format,
            decoder,
            filters,
            threshold,
            spectrogram,
            sender,
            commands,
            session_id,
            stats: EngineStats::default(),
        })
    }

    /// Handle for staging commands from other threads
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Identifier of the current epoch; changes on every reset
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    pub fn filters(&self) -> &FilterBank {
        &self.filters
    }

    pub fn threshold(&self) -> &ThresholdEngine {
        &self.threshold
    }

    pub fn spectrogram(&self) -> &SpectrogramEngine {
        &self.spectrogram
    }

    /// Decode and process one chunk of device bytes
    pub fn process(&mut self, bytes: &[u8]) -> SpikeResult<EngineOutput> {
        let start = Instant::now();
        self.apply_staged();

        let span = info_span!("process", session = %self.session_id);
        let _guard = span.enter();

        let block = self.decoder.decode(bytes, self.format.channel_count)?;
        let mut samples = block.samples;
        self.dispatch_messages(&block.messages);

        if self.config.filters.enabled {
            self.filters.apply_block(&mut samples)?;
        }

        let averages = if self.config.threshold.enabled {
            Some(self.threshold.process(&samples, &block.events))
        } else {
            None
        };

        let spectrogram = if self.config.spectrogram.enabled {
            let channel = samples.channel(self.config.spectrogram.channel)?;
            Some(self.spectrogram.process(channel))
        } else {
            None
        };

        let latency = start.elapsed().as_micros() as u64;
        self.stats.calls += 1;
        self.stats.bytes += bytes.len() as u64;
        self.stats.total_latency_us += latency;
        self.stats.max_latency_us = self.stats.max_latency_us.max(latency);

        Ok(EngineOutput {
            samples,
            events: block.events,
            averages,
            spectrogram,
            messages: block.messages,
        })
    }

    fn apply_staged(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            if let Err(error) = self.apply_command(command) {
                self.stats.rejected_commands += 1;
                warn!(%error, "staged command rejected");
            }
        }
    }

    fn apply_command(&mut self, command: ControlCommand) -> SpikeResult<()> {
        debug!(?command, "applying staged command");
        match command {
            ControlCommand::SetFormat(format) => {
                StreamFormat::new(format.sample_rate, format.channel_count)?;
                self.change_format(format);
            }
            ControlCommand::SetFilter {
                channel,
                low_cutoff,
                high_cutoff,
            } => {
                let band = crate::config::FilterConfig {
                    low_cutoff,
                    high_cutoff,
                    ..self.config.filters
                };
                band.validate(self.format.sample_rate)?;
                match channel {
                    Some(channel) => self.filters.configure(channel, low_cutoff, high_cutoff)?,
                    None => {
                        self.filters.configure_all(low_cutoff, high_cutoff);
                        self.config.filters = band;
                    }
                }
            }
            ControlCommand::SetNotch(notch) => {
                self.filters.set_notch_all(notch);
                self.config.filters.notch = notch;
            }
            ControlCommand::EnableFilters(enabled) => self.config.filters.enabled = enabled,
            ControlCommand::SetThreshold(settings) => {
                if settings.trigger_channel >= self.format.channel_count {
                    return Err(SpikeError::ChannelOutOfRange {
                        channel: settings.trigger_channel,
                        channel_count: self.format.channel_count,
                    });
                }
                self.threshold.configure(settings.clone())?;
                self.config.threshold.settings = settings;
            }
            ControlCommand::EnableThreshold(enabled) => self.config.threshold.enabled = enabled,
            ControlCommand::SetSpectrogram(settings) => {
                self.spectrogram.configure_settings(settings.clone())?;
                self.config.spectrogram.settings = settings;
            }
            ControlCommand::SetSpectrogramWindow {
                window_seconds,
                overlap_percent,
            } => {
                self.spectrogram.configure(window_seconds, overlap_percent)?;
                self.config.spectrogram.settings.window_seconds = window_seconds;
                self.config.spectrogram.settings.overlap_percent = overlap_percent;
            }
            ControlCommand::SetSpectrogramChannel(channel) => {
                if channel >= self.format.channel_count {
                    return Err(SpikeError::ChannelOutOfRange {
                        channel,
                        channel_count: self.format.channel_count,
                    });
                }
                self.config.spectrogram.channel = channel;
            }
            ControlCommand::EnableSpectrogram(enabled) => {
                self.config.spectrogram.enabled = enabled
            }
            ControlCommand::Reset => {
                for listener in self.listeners() {
                    listener.reset();
                }
                self.new_session();
            }
        }
        Ok(())
    }

    /// React to device messages decoded in this call
    fn dispatch_messages(&mut self, messages: &[ControlMessage]) {
        for message in messages {
            match message {
                ControlMessage::StreamFormat {
                    sample_rate,
                    channel_count,
                } => match StreamFormat::new(*sample_rate, *channel_count) {
                    Ok(format) if format != self.format => {
                        info!(
                            sample_rate = format.sample_rate,
                            channels = format.channel_count,
                            "device reported new format, staged"
                        );
                        // The receiver lives in self, so this cannot fail
                        let _ = self.sender.send(ControlCommand::SetFormat(format));
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "device reported unusable format"),
                },
                ControlMessage::ExpansionBoard(board) => self.filters.set_expansion_board(*board),
                ControlMessage::HardwareType(name) => {
                    info!(hardware = %name, profile = ?self.decoder.profile(), "hardware type")
                }
                ControlMessage::Unknown(text) => debug!(%text, "unrecognized device message"),
                ControlMessage::Event(_) => {}
            }
        }
    }

    fn change_format(&mut self, format: StreamFormat) {
        if format == self.format {
            return;
        }
        info!(
            from_rate = self.format.sample_rate,
            to_rate = format.sample_rate,
            from_channels = self.format.channel_count,
            to_channels = format.channel_count,
            "stream format changed"
        );
        self.format = format;
        self.config.format = format;
        if self.config.spectrogram.channel >= format.channel_count {
            self.config.spectrogram.channel = 0;
        }
        for listener in self.listeners() {
            debug!(component = listener.name(), "format change");
            listener.format_changed(format);
        }
        self.config.threshold.settings.trigger_channel =
            self.threshold.settings().trigger_channel;
        self.new_session();
    }

    fn listeners(&mut self) -> [&mut dyn FormatListener; 4] {
        [
            &mut self.decoder,
            &mut self.filters,
            &mut self.threshold,
            &mut self.spectrogram,
        ]
    }

    fn new_session(&mut self) {
        self.session_id = Uuid::new_v4();
        self.stats.resets += 1;
        debug!(session = %self.session_id, "new session");
    }
}
