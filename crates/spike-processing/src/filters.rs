//! Per-channel IIR filter bank and DC offset tracking
//!
//! Every channel runs up to three second-order sections in series: high-pass
//! (at the low cutoff), low-pass (at the high cutoff) and a mains notch.
//! Coefficients follow the RBJ cookbook bilinear designs. Each section keeps
//! its own two-sample input/output history per channel.

use crate::processor::FormatListener;
use serde::{Deserialize, Serialize};
use spike_core::{ExpansionBoard, Sample, SampleBlock, SpikeError, SpikeResult, StreamFormat};
use std::f32::consts::{FRAC_1_SQRT_2, PI};
use tracing::debug;

/// Cutoff value that disables a section
pub const CUTOFF_OFF: f32 = -1.0;

/// Q used for the high-pass and low-pass sections
pub const BUTTERWORTH_Q: f32 = FRAC_1_SQRT_2;

/// Q used for the notch section
pub const NOTCH_Q: f32 = 1.0;

/// Weight of the newest sample in the DC offset average
pub const DC_OFFSET_WEIGHT: f32 = 0.0001;

/// Mains frequency removed by the notch section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NotchFrequency {
    #[default]
    Off,
    Hz50,
    Hz60,
}

impl NotchFrequency {
    pub fn hz(&self) -> Option<f32> {
        match self {
            NotchFrequency::Off => None,
            NotchFrequency::Hz50 => Some(50.0),
            NotchFrequency::Hz60 => Some(60.0),
        }
    }
}

/// True if `cutoff` disables its section at this sample rate
pub fn is_cutoff_off(cutoff: f32, sample_rate: f32) -> bool {
    cutoff == CUTOFF_OFF || !cutoff.is_finite() || cutoff <= 0.0 || cutoff >= sample_rate / 2.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BiquadCoefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoefficients {
    fn lowpass(cutoff: f32, fs: f32, q: f32) -> Self {
        let omega = 2.0 * PI * cutoff / fs;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q);
        let b0 = (1.0 - cos_omega) / 2.0;
        Self::normalized(b0, 1.0 - cos_omega, b0, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
    }

    fn highpass(cutoff: f32, fs: f32, q: f32) -> Self {
        let omega = 2.0 * PI * cutoff / fs;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q);
        let b0 = (1.0 + cos_omega) / 2.0;
        Self::normalized(b0, -(1.0 + cos_omega), b0, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
    }

    fn notch(center: f32, fs: f32, q: f32) -> Self {
        let omega = 2.0 * PI * center / fs;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q);
        Self::normalized(1.0, -2.0 * cos_omega, 1.0, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
    }

    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Single biquad section with its history
#[derive(Debug, Clone)]
struct BiquadSection {
    coeffs: BiquadCoefficients,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadSection {
    fn new(coeffs: BiquadCoefficients) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn process_sample(&mut self, input: f32) -> f32 {
        let c = &self.coeffs;
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

/// Filter chain of one channel
#[derive(Debug, Clone)]
pub struct ChannelFilter {
    low_cutoff: f32,
    high_cutoff: f32,
    notch: NotchFrequency,
    sections: Vec<BiquadSection>,
}

impl ChannelFilter {
    fn new(sample_rate: f32) -> Self {
        let mut filter = Self {
            low_cutoff: CUTOFF_OFF,
            high_cutoff: CUTOFF_OFF,
            notch: NotchFrequency::Off,
            sections: Vec::with_capacity(3),
        };
        filter.design(sample_rate);
        filter
    }

    /// Rebuild sections from the current settings. History starts from zero.
    fn design(&mut self, fs: f32) {
        self.sections.clear();
        if !is_cutoff_off(self.low_cutoff, fs) {
            self.sections
                .push(BiquadSection::new(BiquadCoefficients::highpass(self.low_cutoff, fs, BUTTERWORTH_Q)));
        }
        if !is_cutoff_off(self.high_cutoff, fs) {
            self.sections
                .push(BiquadSection::new(BiquadCoefficients::lowpass(self.high_cutoff, fs, BUTTERWORTH_Q)));
        }
        if let Some(center) = self.notch.hz().filter(|&hz| hz < fs / 2.0) {
            self.sections
                .push(BiquadSection::new(BiquadCoefficients::notch(center, fs, NOTCH_Q)));
        }
    }

    /// True if every section is disabled
    pub fn is_bypassed(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn cutoffs(&self) -> (f32, f32) {
        (self.low_cutoff, self.high_cutoff)
    }

    fn process(&mut self, samples: &mut [Sample]) {
        if self.sections.is_empty() {
            return;
        }
        for sample in samples.iter_mut() {
            let mut value = *sample as f32;
            for section in &mut self.sections {
                value = section.process_sample(value);
            }
            *sample = value.round().clamp(i16::MIN as f32, i16::MAX as f32) as Sample;
        }
    }
}

/// Filter bank holding one [`ChannelFilter`] per channel
pub struct FilterBank {
    format: StreamFormat,
    channels: Vec<ChannelFilter>,
    unfiltered_tail: usize,
}

impl FilterBank {
    pub fn new(format: StreamFormat) -> Self {
        let sample_rate = format.sample_rate as f32;
        Self {
            format,
            channels: (0..format.channel_count)
                .map(|_| ChannelFilter::new(sample_rate))
                .collect(),
            unfiltered_tail: 0,
        }
    }

    fn check_channel(&self, channel: usize) -> SpikeResult<()> {
        if channel >= self.channels.len() {
            return Err(SpikeError::ChannelOutOfRange {
                channel,
                channel_count: self.channels.len(),
            });
        }
        Ok(())
    }

    /// Set the band of one channel. Use [`CUTOFF_OFF`] to disable a side.
    pub fn configure(&mut self, channel: usize, low_cutoff: f32, high_cutoff: f32) -> SpikeResult<()> {
        self.check_channel(channel)?;
        let fs = self.format.sample_rate as f32;
        let filter = &mut self.channels[channel];
        if filter.low_cutoff == low_cutoff && filter.high_cutoff == high_cutoff {
            return Ok(());
        }
        filter.low_cutoff = low_cutoff;
        filter.high_cutoff = high_cutoff;
        filter.design(fs);
        debug!(channel, low_cutoff, high_cutoff, "filter band changed");
        Ok(())
    }

    /// Set the band of every channel
    pub fn configure_all(&mut self, low_cutoff: f32, high_cutoff: f32) {
        for channel in 0..self.channels.len() {
            // Channel is in range by construction
            let _ = self.configure(channel, low_cutoff, high_cutoff);
        }
    }

    /// Select the notch frequency of one channel
    pub fn set_notch(&mut self, channel: usize, notch: NotchFrequency) -> SpikeResult<()> {
        self.check_channel(channel)?;
        let fs = self.format.sample_rate as f32;
        let filter = &mut self.channels[channel];
        if filter.notch != notch {
            filter.notch = notch;
            filter.design(fs);
            debug!(channel, ?notch, "notch changed");
        }
        Ok(())
    }

    pub fn set_notch_all(&mut self, notch: NotchFrequency) {
        for channel in 0..self.channels.len() {
            let _ = self.set_notch(channel, notch);
        }
    }

    /// Exclude the expansion board's trailing channels from filtering
    pub fn set_expansion_board(&mut self, board: ExpansionBoard) {
        self.unfiltered_tail = board.unfiltered_channels().min(self.channels.len());
        debug!(?board, unfiltered = self.unfiltered_tail, "filter scope changed");
    }

    /// True if `channel` is inside the filtering scope
    pub fn is_filtered(&self, channel: usize) -> bool {
        channel < self.channels.len().saturating_sub(self.unfiltered_tail)
    }

    pub fn channel_filter(&self, channel: usize) -> Option<&ChannelFilter> {
        self.channels.get(channel)
    }

    /// Filter one channel's samples in place
    pub fn apply(&mut self, channel: usize, samples: &mut [Sample]) -> SpikeResult<()> {
        self.check_channel(channel)?;
        if self.is_filtered(channel) {
            self.channels[channel].process(samples);
        }
        Ok(())
    }

    /// Filter every channel of a block in place
    pub fn apply_block(&mut self, block: &mut SampleBlock) -> SpikeResult<()> {
        for channel in 0..block.channel_count() {
            let samples = block.channel_mut(channel)?;
            self.apply(channel, samples)?;
        }
        Ok(())
    }
}

impl FormatListener for FilterBank {
    fn format_changed(&mut self, format: StreamFormat) {
        let fs = format.sample_rate as f32;
        let previous = self.channels.first().cloned();
        self.channels.resize_with(format.channel_count, || ChannelFilter::new(fs));
        // New channels inherit the band of channel 0
        if let Some(template) = previous {
            for filter in self.channels.iter_mut().skip(self.format.channel_count) {
                filter.low_cutoff = template.low_cutoff;
                filter.high_cutoff = template.high_cutoff;
                filter.notch = template.notch;
            }
        }
        self.format = format;
        self.unfiltered_tail = self.unfiltered_tail.min(format.channel_count);
        self.reset();
    }

    fn reset(&mut self) {
        let fs = self.format.sample_rate as f32;
        for filter in &mut self.channels {
            filter.design(fs);
        }
    }

    fn name(&self) -> &str {
        "Filter Bank"
    }
}

/// Tracks and removes a slowly moving DC offset
#[derive(Debug, Clone, Copy, Default)]
pub struct DcOffsetTracker {
    offset: f32,
}

impl DcOffsetTracker {
    /// Update the running offset with `value` and return `value` without it
    pub fn remove(&mut self, value: i32) -> i32 {
        self.offset += (value as f32 - self.offset) * DC_OFFSET_WEIGHT;
        value - self.offset.round() as i32
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn reset(&mut self) {
        self.offset = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, fs: f32, amplitude: f32, len: usize) -> Vec<Sample> {
        (0..len)
            .map(|i| (amplitude * (2.0 * PI * freq * i as f32 / fs).sin()).round() as Sample)
            .collect()
    }

    fn peak(samples: &[Sample]) -> i32 {
        samples.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0)
    }

    #[test]
    fn test_bypass_leaves_samples_unchanged() {
        let format = StreamFormat::new(10_000, 2).unwrap();
        let mut bank = FilterBank::new(format);
        bank.configure_all(CUTOFF_OFF, CUTOFF_OFF);

        let original: Vec<Sample> = (0..500).map(|i| ((i * 37) % 2000 - 1000) as Sample).collect();
        let mut samples = original.clone();
        bank.apply(0, &mut samples).unwrap();
        assert_eq!(samples, original);

        // A high cutoff at or above Nyquist is also off
        bank.configure(1, CUTOFF_OFF, 5000.0).unwrap();
        assert!(bank.channel_filter(1).unwrap().is_bypassed());
    }

    #[test]
    fn test_lowpass_attenuates_high_frequency() {
        let fs = 10_000.0;
        let mut bank = FilterBank::new(StreamFormat::new(10_000, 1).unwrap());
        bank.configure(0, CUTOFF_OFF, 100.0).unwrap();

        let mut high = sine(2000.0, fs, 10_000.0, 4000);
        bank.apply(0, &mut high).unwrap();
        assert!(peak(&high[2000..]) < 200);

        bank.reset();
        let mut low = sine(10.0, fs, 10_000.0, 4000);
        bank.apply(0, &mut low).unwrap();
        assert!(peak(&low[2000..]) > 9000);
    }

    #[test]
    fn test_highpass_removes_dc() {
        let mut bank = FilterBank::new(StreamFormat::new(10_000, 1).unwrap());
        bank.configure(0, 10.0, CUTOFF_OFF).unwrap();

        let mut samples = vec![5000; 10_000];
        bank.apply(0, &mut samples).unwrap();
        assert!(peak(&samples[8000..]) <= 1);
    }

    #[test]
    fn test_notch_attenuates_mains() {
        let fs = 1000.0;
        let mut bank = FilterBank::new(StreamFormat::new(1000, 1).unwrap());
        bank.set_notch(0, NotchFrequency::Hz50).unwrap();

        let mut mains = sine(50.0, fs, 10_000.0, 4000);
        bank.apply(0, &mut mains).unwrap();
        assert!(peak(&mains[3000..]) < 300);
    }

    #[test]
    fn test_reconfigure_resets_history() {
        let mut bank = FilterBank::new(StreamFormat::new(10_000, 1).unwrap());
        bank.configure(0, 10.0, 1000.0).unwrap();

        let input: Vec<Sample> = (0..200).map(|i| (i * 50) as Sample).collect();
        let mut first = input.clone();
        bank.apply(0, &mut first).unwrap();

        // Changing the band and back starts from a clean history
        bank.configure(0, 20.0, 1000.0).unwrap();
        bank.configure(0, 10.0, 1000.0).unwrap();
        let mut second = input.clone();
        bank.apply(0, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_expansion_board_scope() {
        let mut bank = FilterBank::new(StreamFormat::new(10_000, 3).unwrap());
        bank.configure_all(CUTOFF_OFF, 100.0);
        bank.set_expansion_board(ExpansionBoard::Hammer);

        assert!(bank.is_filtered(0));
        assert!(bank.is_filtered(1));
        assert!(!bank.is_filtered(2));

        let original = vec![0, 10_000, 0, 10_000];
        let mut samples = original.clone();
        bank.apply(2, &mut samples).unwrap();
        assert_eq!(samples, original);
    }

    #[test]
    fn test_channel_out_of_range() {
        let mut bank = FilterBank::new(StreamFormat::new(10_000, 1).unwrap());
        assert!(matches!(
            bank.configure(3, 1.0, 100.0),
            Err(SpikeError::ChannelOutOfRange { channel: 3, channel_count: 1 })
        ));
        assert!(bank.apply(1, &mut [0; 4]).is_err());
    }

    #[test]
    fn test_format_change_resizes() {
        let mut bank = FilterBank::new(StreamFormat::new(10_000, 1).unwrap());
        bank.configure(0, 5.0, 500.0).unwrap();
        bank.format_changed(StreamFormat::new(5000, 3).unwrap());

        assert!(bank.channel_filter(2).is_some());
        assert_eq!(bank.channel_filter(2).unwrap().cutoffs(), (5.0, 500.0));
        assert!(bank.channel_filter(3).is_none());
    }

    #[test]
    fn test_dc_tracker_converges() {
        let mut tracker = DcOffsetTracker::default();
        let mut last = 0;
        for _ in 0..100_000 {
            last = tracker.remove(1000);
        }
        assert!((tracker.offset() - 1000.0).abs() < 1.0);
        assert!(last.abs() <= 1);
    }
}
