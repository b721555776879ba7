//! Device simulator producing the device's exact byte stream
//!
//! Synthetic per-channel waveforms are scaled back to raw words with the
//! selected [`DeviceProfile`] and encoded as frames. Control messages (hardware
//! type, format, expansion board, events) can be injected between frames.

use crate::signal_patterns::SignalPattern;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use spike_core::protocol::encode_frame;
use spike_core::{
    config_error, ControlMessage, DeviceProfile, Sample, SpikeResult, StreamFormat,
};
use std::f32::consts::PI;
use tracing::debug;

/// Noise added to every channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Gaussian noise standard deviation in sample units (0 = none)
    pub gaussian_std: f32,
    /// Mains interference frequency
    pub powerline_hz: Option<f32>,
    pub powerline_amplitude: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            gaussian_std: 0.0,
            powerline_hz: None,
            powerline_amplitude: 0.0,
        }
    }
}

/// Simulated board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Reported in the `HWT:` greeting
    pub hardware_type: String,
    pub profile: DeviceProfile,
    pub sample_rate: u32,
    pub channel_count: usize,
    /// One pattern per channel; channels without one repeat the last
    pub patterns: Vec<SignalPattern>,
    pub noise: NoiseConfig,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
    /// Send hardware type and format before the first frame
    pub announce: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hardware_type: "SBPRO".to_string(),
            profile: DeviceProfile::FourteenBit,
            sample_rate: 10_000,
            channel_count: 1,
            patterns: vec![SignalPattern::Heartbeat {
                bpm: 60.0,
                amplitude: 4000.0,
            }],
            noise: NoiseConfig::default(),
            seed: None,
            announce: true,
        }
    }
}

impl DeviceConfig {
    pub fn format(&self) -> SpikeResult<StreamFormat> {
        StreamFormat::new(self.sample_rate, self.channel_count)
    }

    fn pattern(&self, channel: usize) -> SignalPattern {
        self.patterns
            .get(channel)
            .or_else(|| self.patterns.last())
            .copied()
            .unwrap_or(SignalPattern::Constant { level: 0.0 })
    }
}

/// Byte-level device simulator
pub struct DeviceSimulator {
    config: DeviceConfig,
    rng: StdRng,
    noise: Normal<f32>,
    sample_index: u64,
    announced: bool,
    /// Messages to send before the next frame
    pending: Vec<ControlMessage>,
}

impl DeviceSimulator {
    pub fn new(config: DeviceConfig) -> SpikeResult<Self> {
        config.format()?;
        let noise = Normal::new(0.0, config.noise.gaussian_std)
            .map_err(|e| config_error!("invalid noise deviation: {}", e))?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            config,
            rng,
            noise,
            sample_index: 0,
            announced: false,
            pending: Vec::new(),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Frames generated so far
    pub fn sample_index(&self) -> u64 {
        self.sample_index
    }

    /// Queue a message to go out before the next frame
    pub fn inject(&mut self, message: ControlMessage) {
        self.pending.push(message);
    }

    pub fn inject_event(&mut self, label: impl Into<String>) {
        self.inject(ControlMessage::Event(label.into()));
    }

    /// Switch format; the board announces it in-band like real hardware
    pub fn set_format(&mut self, sample_rate: u32, channel_count: usize) -> SpikeResult<()> {
        StreamFormat::new(sample_rate, channel_count)?;
        self.config.sample_rate = sample_rate;
        self.config.channel_count = channel_count;
        self.inject(ControlMessage::StreamFormat {
            sample_rate,
            channel_count,
        });
        debug!(sample_rate, channel_count, "simulated device format changed");
        Ok(())
    }

    pub fn set_pattern(&mut self, channel: usize, pattern: SignalPattern) {
        if channel >= self.config.patterns.len() {
            let fill = self.config.pattern(channel);
            self.config.patterns.resize(channel + 1, fill);
        }
        self.config.patterns[channel] = pattern;
    }

    /// Generate `duration` seconds of stream
    pub fn generate(&mut self, duration: f32) -> Vec<u8> {
        let frames = (duration * self.config.sample_rate as f32).round() as usize;
        self.generate_frames(frames)
    }

    /// Generate `frames` frames, preceded by any pending messages
    pub fn generate_frames(&mut self, frames: usize) -> Vec<u8> {
        let channels = self.config.channel_count;
        let mut bytes = Vec::with_capacity(frames * channels * 2 + 64);

        if self.config.announce && !self.announced {
            self.announced = true;
            bytes.extend(ControlMessage::HardwareType(self.config.hardware_type.clone()).to_wire());
            bytes.extend(
                ControlMessage::StreamFormat {
                    sample_rate: self.config.sample_rate,
                    channel_count: channels,
                }
                .to_wire(),
            );
        }
        for message in self.pending.drain(..) {
            bytes.extend(message.to_wire());
        }

        let dt = 1.0 / self.config.sample_rate as f32;
        let mut raw = vec![0u16; channels];
        for _ in 0..frames {
            let time = self.sample_index as f32 * dt;
            for (channel, word) in raw.iter_mut().enumerate() {
                let value = self.sample_value(channel, time);
                *word = self.config.profile.raw_from_value(value.round() as i32);
            }
            encode_frame(&raw, &mut bytes);
            self.sample_index += 1;
        }
        bytes
    }

    fn sample_value(&mut self, channel: usize, time: f32) -> f32 {
        let mut value = self.config.pattern(channel).value_at(time);
        if self.config.noise.gaussian_std > 0.0 {
            value += self.noise.sample(&mut self.rng);
        }
        if let Some(hz) = self.config.noise.powerline_hz {
            value += self.config.noise.powerline_amplitude * (2.0 * PI * hz * time).sin();
        }
        value
    }

    /// Restart the waveforms from time zero and greet again
    pub fn reset_time(&mut self) {
        self.sample_index = 0;
        self.announced = false;
    }
}

/// Encode already-rebased per-channel samples as frames
pub fn encode_samples(profile: DeviceProfile, channels: &[Vec<Sample>]) -> Vec<u8> {
    let frames = channels.first().map(Vec::len).unwrap_or(0);
    let mut bytes = Vec::with_capacity(frames * channels.len() * 2);
    let mut raw = vec![0u16; channels.len()];
    for index in 0..frames {
        for (word, channel) in raw.iter_mut().zip(channels) {
            *word = profile.raw_from_value(channel[index] as i32);
        }
        encode_frame(&raw, &mut bytes);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use spike_core::protocol::{ESCAPE_SEQUENCE_END, ESCAPE_SEQUENCE_START};

    fn quiet(channels: usize) -> DeviceConfig {
        DeviceConfig {
            channel_count: channels,
            patterns: vec![SignalPattern::Constant { level: 100.0 }],
            announce: false,
            seed: Some(7),
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn test_frame_bytes() {
        let mut simulator = DeviceSimulator::new(quiet(2)).unwrap();
        let bytes = simulator.generate_frames(3);

        assert_eq!(bytes.len(), 3 * 2 * 2);
        assert_eq!(simulator.sample_index(), 3);
        // 8192 + 100 = 0x2064
        assert_eq!(&bytes[..4], &[0x80 | 0x40, 0x64, 0x40, 0x64]);
    }

    #[test]
    fn test_announcement_once() {
        let mut config = quiet(1);
        config.announce = true;
        let mut simulator = DeviceSimulator::new(config).unwrap();

        let first = simulator.generate_frames(1);
        assert_eq!(&first[..6], &ESCAPE_SEQUENCE_START);
        let second = simulator.generate_frames(1);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_injected_message_precedes_frames() {
        let mut simulator = DeviceSimulator::new(quiet(1)).unwrap();
        simulator.inject_event("3");
        let bytes = simulator.generate_frames(1);

        let wire = ControlMessage::Event("3".into()).to_wire();
        assert_eq!(&bytes[..wire.len()], wire.as_slice());
        assert_eq!(&bytes[wire.len() - 6..wire.len()], &ESCAPE_SEQUENCE_END);
        assert_eq!(bytes.len(), wire.len() + 2);
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let mut config = quiet(1);
        config.noise.gaussian_std = 50.0;

        let a = DeviceSimulator::new(config.clone()).unwrap().generate_frames(100);
        let b = DeviceSimulator::new(config).unwrap().generate_frames(100);
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_config() {
        let mut config = quiet(1);
        config.channel_count = 0;
        assert!(DeviceSimulator::new(config).is_err());

        let mut config = quiet(1);
        config.noise.gaussian_std = -1.0;
        assert!(DeviceSimulator::new(config).is_err());
    }

    #[test]
    fn test_encode_samples() {
        let bytes = encode_samples(DeviceProfile::FourteenBit, &[vec![0, 1], vec![-1, 2]]);
        assert_eq!(bytes, vec![0xC0, 0x00, 0x3F, 0x7F, 0xC0, 0x01, 0x40, 0x02]);
    }
}
