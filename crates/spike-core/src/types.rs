//! Stream format, sample blocks and events

use crate::error::{SpikeError, SpikeResult};
use serde::{Deserialize, Serialize};

/// One decoded sample
pub type Sample = i16;

/// Maximum number of channels a device can negotiate
pub const MAX_CHANNELS: usize = 16;

/// Lowest sample rate accepted from a device
pub const MIN_SAMPLE_RATE: u32 = 100;

/// Highest sample rate accepted from a device
pub const MAX_SAMPLE_RATE: u32 = 100_000;

/// Process-wide stream geometry
///
/// Both values can change at any time (the device renegotiates them in-band).
/// Every stateful component resets when it receives a new format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Sampling rate in Hz
    pub sample_rate: u32,
    /// Number of channels per frame
    pub channel_count: usize,
}

impl StreamFormat {
    /// Create a validated stream format
    pub fn new(sample_rate: u32, channel_count: usize) -> SpikeResult<Self> {
        Self::validate_sample_rate(sample_rate)?;
        Self::validate_channel_count(channel_count)?;
        Ok(Self {
            sample_rate,
            channel_count,
        })
    }

    /// Validate a sample rate
    pub fn validate_sample_rate(rate: u32) -> SpikeResult<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
            Err(SpikeError::InvalidSampleRate {
                rate,
                valid_range: format!("{}-{}Hz", MIN_SAMPLE_RATE, MAX_SAMPLE_RATE),
            })
        } else {
            Ok(())
        }
    }

    /// Validate a channel count
    pub fn validate_channel_count(count: usize) -> SpikeResult<()> {
        if count == 0 || count > MAX_CHANNELS {
            Err(SpikeError::InvalidChannelCount {
                count,
                max: MAX_CHANNELS,
            })
        } else {
            Ok(())
        }
    }

    /// Convert a duration in seconds to a sample count at this rate
    pub fn seconds_to_samples(&self, seconds: f32) -> usize {
        (self.sample_rate as f32 * seconds).round().max(0.0) as usize
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        StreamFormat {
            sample_rate: 10_000,
            channel_count: 1,
        }
    }
}

/// Named marker positioned in the sample stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Index into the sample block returned alongside the event
    pub sample_index: usize,
    /// Label carried by the device message
    pub label: String,
}

impl Event {
    pub fn new(sample_index: usize, label: impl Into<String>) -> Self {
        Self {
            sample_index,
            label: label.into(),
        }
    }
}

/// Per-channel sample sequences produced by one processing call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBlock {
    channels: Vec<Vec<Sample>>,
}

impl SampleBlock {
    /// Create an empty block with `channel_count` channels
    pub fn new(channel_count: usize) -> Self {
        Self {
            channels: vec![Vec::new(); channel_count],
        }
    }

    /// Create an empty block, reserving room for `samples` per channel
    pub fn with_capacity(channel_count: usize, samples: usize) -> Self {
        Self {
            channels: (0..channel_count).map(|_| Vec::with_capacity(samples)).collect(),
        }
    }

    /// Build a block from channel vectors. All channels must be equally long.
    pub fn from_channels(channels: Vec<Vec<Sample>>) -> SpikeResult<Self> {
        StreamFormat::validate_channel_count(channels.len())?;
        let expected = channels[0].len();
        if let Some(bad) = channels.iter().position(|c| c.len() != expected) {
            return Err(crate::config_error!(
                "channel {} has {} samples, expected {}",
                bad,
                channels[bad].len(),
                expected
            ));
        }
        Ok(Self { channels })
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples in each channel
    pub fn samples_per_channel(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// True if no samples were produced
    pub fn is_empty(&self) -> bool {
        self.samples_per_channel() == 0
    }

    /// Samples of one channel
    pub fn channel(&self, channel: usize) -> SpikeResult<&[Sample]> {
        self.channels
            .get(channel)
            .map(Vec::as_slice)
            .ok_or(SpikeError::ChannelOutOfRange {
                channel,
                channel_count: self.channels.len(),
            })
    }

    /// Mutable samples of one channel
    pub fn channel_mut(&mut self, channel: usize) -> SpikeResult<&mut [Sample]> {
        let channel_count = self.channels.len();
        self.channels
            .get_mut(channel)
            .map(Vec::as_mut_slice)
            .ok_or(SpikeError::ChannelOutOfRange {
                channel,
                channel_count,
            })
    }

    /// All channels
    pub fn channels(&self) -> &[Vec<Sample>] {
        &self.channels
    }

    /// Append one complete frame. `frame` must hold one sample per channel.
    pub fn push_frame(&mut self, frame: &[Sample]) {
        debug_assert_eq!(frame.len(), self.channels.len());
        for (channel, &sample) in self.channels.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    /// Drop all samples, keeping channel count and allocations
    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_format_validation() {
        assert!(StreamFormat::new(10_000, 2).is_ok());
        assert!(matches!(
            StreamFormat::new(10_000, 0),
            Err(SpikeError::InvalidChannelCount { count: 0, .. })
        ));
        assert!(matches!(
            StreamFormat::new(10_000, MAX_CHANNELS + 1),
            Err(SpikeError::InvalidChannelCount { .. })
        ));
        assert!(matches!(
            StreamFormat::new(50, 1),
            Err(SpikeError::InvalidSampleRate { rate: 50, .. })
        ));
    }

    #[test]
    fn test_seconds_to_samples() {
        let format = StreamFormat::new(10_000, 1).unwrap();
        assert_eq!(format.seconds_to_samples(0.005), 50);
        assert_eq!(format.seconds_to_samples(2.4), 24_000);
    }

    #[test]
    fn test_sample_block_frames() {
        let mut block = SampleBlock::new(2);
        block.push_frame(&[1, 2]);
        block.push_frame(&[3, 4]);

        assert_eq!(block.channel_count(), 2);
        assert_eq!(block.samples_per_channel(), 2);
        assert_eq!(block.channel(0).unwrap(), &[1, 3]);
        assert_eq!(block.channel(1).unwrap(), &[2, 4]);
        assert!(block.channel(2).is_err());

        block.clear();
        assert!(block.is_empty());
        assert_eq!(block.channel_count(), 2);
    }

    #[test]
    fn test_from_channels_rejects_ragged() {
        assert!(SampleBlock::from_channels(vec![vec![1, 2], vec![3]]).is_err());
        assert!(SampleBlock::from_channels(vec![]).is_err());
        let block = SampleBlock::from_channels(vec![vec![1, 2], vec![3, 4]]).unwrap();
        assert_eq!(block.samples_per_channel(), 2);
    }
}
