//! Rolling low-frequency spectrogram of one channel
//!
//! Windows of `window_len` samples advance by `hop` samples. Each window is
//! decimated by a fixed stride down to `FFT_SIZE` points (no anti-alias
//! filtering) and transformed with a real FFT. Only bins up to
//! `MAX_FREQUENCY_HZ` are kept.

use crate::processor::FormatListener;
use num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use spike_core::{config_error, Sample, SpikeResult, StreamFormat};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Transform length
pub const FFT_SIZE: usize = 256;

/// Highest frequency kept in a spectrogram window
pub const MAX_FREQUENCY_HZ: f32 = 30.0;

pub const DEFAULT_WINDOW_SECONDS: f32 = 4.0;
pub const DEFAULT_OVERLAP_PERCENT: f32 = 90.0;

/// Spectrogram history length; a block this many hops long is treated as a seek
pub const DEFAULT_CAPACITY: usize = 64;

pub const MAX_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramSettings {
    /// Window duration in seconds
    pub window_seconds: f32,
    /// Overlap between consecutive windows, 0 to below 100
    pub overlap_percent: f32,
    /// Number of windows rebuilt on a seek
    pub capacity: usize,
}

impl Default for SpectrogramSettings {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECONDS,
            overlap_percent: DEFAULT_OVERLAP_PERCENT,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl SpectrogramSettings {
    pub fn validate(&self) -> SpikeResult<()> {
        if !self.window_seconds.is_finite() || self.window_seconds <= 0.0 {
            return Err(config_error!(
                "spectrogram window must be positive, got {}",
                self.window_seconds
            ));
        }
        if !(0.0..100.0).contains(&self.overlap_percent) {
            return Err(config_error!(
                "overlap {}% outside 0-100%",
                self.overlap_percent
            ));
        }
        if !(1..=MAX_CAPACITY).contains(&self.capacity) {
            return Err(config_error!(
                "spectrogram capacity {} outside 1-{}",
                self.capacity,
                MAX_CAPACITY
            ));
        }
        Ok(())
    }
}

/// Window geometry derived from the sample rate and settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectrogramGeometry {
    pub window_len: usize,
    pub hop: usize,
    pub stride: usize,
    pub bin_count: usize,
}

impl SpectrogramGeometry {
    pub fn new(sample_rate: u32, settings: &SpectrogramSettings) -> Self {
        let window_len = ((sample_rate as f32 * settings.window_seconds).round() as usize).max(1);
        let hop = ((window_len as f32 * (1.0 - settings.overlap_percent / 100.0)).round() as usize)
            .max(1);
        let stride = (window_len / FFT_SIZE).max(1);
        let resolution = (sample_rate as f32 / stride as f32) / FFT_SIZE as f32;
        let bin_count = ((MAX_FREQUENCY_HZ / resolution).floor() as usize + 1).min(FFT_SIZE / 2 + 1);
        Self {
            window_len,
            hop,
            stride,
            bin_count,
        }
    }

    /// Frequency of one bin in Hz
    pub fn resolution(&self, sample_rate: u32) -> f32 {
        (sample_rate as f32 / self.stride as f32) / FFT_SIZE as f32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectrogramOutput {
    /// Completed windows, oldest first; each holds `bin_count` magnitudes in [0, 1]
    pub windows: Vec<Vec<f32>>,
    pub bin_count: usize,
}

/// Incremental windowed FFT
pub struct SpectrogramEngine {
    sample_rate: u32,
    settings: SpectrogramSettings,
    staged: Option<SpectrogramSettings>,
    geometry: SpectrogramGeometry,
    fft: Arc<dyn RealToComplex<f32>>,
    /// Current window contents, zero-populated at epoch start
    window: VecDeque<f32>,
    /// Samples received since the last hop
    carry: Vec<f32>,
    fft_input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    running_max: f32,
}

impl SpectrogramEngine {
    pub fn new(sample_rate: u32, settings: SpectrogramSettings) -> SpikeResult<Self> {
        StreamFormat::validate_sample_rate(sample_rate)?;
        settings.validate()?;

        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(FFT_SIZE);
        let fft_input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let geometry = SpectrogramGeometry::new(sample_rate, &settings);

        let mut engine = Self {
            sample_rate,
            settings,
            staged: None,
            geometry,
            fft,
            window: VecDeque::new(),
            carry: Vec::new(),
            fft_input,
            spectrum,
            running_max: 0.0,
        };
        engine.reset();
        Ok(engine)
    }

    /// Stage new window settings for the next call
    pub fn configure(&mut self, window_seconds: f32, overlap_percent: f32) -> SpikeResult<()> {
        let settings = SpectrogramSettings {
            window_seconds,
            overlap_percent,
            capacity: self.settings.capacity,
        };
        self.configure_settings(settings)
    }

    pub fn configure_settings(&mut self, settings: SpectrogramSettings) -> SpikeResult<()> {
        settings.validate()?;
        self.staged = Some(settings);
        Ok(())
    }

    pub fn geometry(&self) -> SpectrogramGeometry {
        self.geometry
    }

    pub fn settings(&self) -> &SpectrogramSettings {
        &self.settings
    }

    /// Largest magnitude seen this epoch
    pub fn running_max(&self) -> f32 {
        self.running_max
    }

    pub fn process(&mut self, samples: &[Sample]) -> SpectrogramOutput {
        if let Some(settings) = self.staged.take() {
            debug!(?settings, "applying staged spectrogram settings");
            self.settings = settings;
            self.reset();
        }

        let hop = self.geometry.hop;
        let mut output = SpectrogramOutput {
            windows: Vec::new(),
            bin_count: self.geometry.bin_count,
        };

        if samples.len() >= self.settings.capacity.saturating_mul(hop) {
            self.rebuild(samples, &mut output);
            return output;
        }

        let mut rest = samples;
        while !rest.is_empty() {
            let take = (hop - self.carry.len()).min(rest.len());
            self.carry.extend(rest[..take].iter().map(|&s| s as f32));
            rest = &rest[take..];

            if self.carry.len() == hop {
                self.window.drain(..hop);
                self.window.extend(self.carry.drain(..));
                if let Some(magnitudes) = self.transform_current() {
                    output.windows.push(magnitudes);
                }
            }
        }
        output
    }

    /// Seek: drop the carry and rebuild the trailing `capacity` windows
    fn rebuild(&mut self, samples: &[Sample], output: &mut SpectrogramOutput) {
        let SpectrogramGeometry {
            window_len, hop, ..
        } = self.geometry;
        let capacity = self.settings.capacity;
        debug!(samples = samples.len(), capacity, "spectrogram seek");

        self.carry.clear();
        for k in 0..capacity {
            let end = samples.len() - (capacity - 1 - k) * hop;
            self.load_window(&samples[..end], window_len);
            if let Some(magnitudes) = self.transform_current() {
                output.windows.push(magnitudes);
            }
        }
    }

    /// Make the last `window_len` samples of `samples` the current window
    fn load_window(&mut self, samples: &[Sample], window_len: usize) {
        let take = samples.len().min(window_len);
        self.window.clear();
        self.window.extend(std::iter::repeat(0.0).take(window_len - take));
        self.window
            .extend(samples[samples.len() - take..].iter().map(|&s| s as f32));
    }

    fn transform_current(&mut self) -> Option<Vec<f32>> {
        let SpectrogramGeometry {
            window_len,
            stride,
            bin_count,
            ..
        } = self.geometry;

        let offset = window_len.saturating_sub(FFT_SIZE * stride);
        for (i, slot) in self.fft_input.iter_mut().enumerate() {
            let index = offset + i * stride;
            *slot = self.window.get(index).copied().unwrap_or(0.0);
        }

        if let Err(error) = self.fft.process(&mut self.fft_input, &mut self.spectrum) {
            warn!(%error, "spectrogram transform failed, window skipped");
            return None;
        }

        let magnitudes: Vec<f32> = self.spectrum[..bin_count]
            .iter()
            .enumerate()
            .map(|(bin, value)| if bin == 0 { value.re.abs() } else { value.norm() })
            .collect();

        let peak = magnitudes.iter().copied().fold(0.0f32, f32::max);
        if peak > self.running_max {
            self.running_max = peak;
        }
        if self.running_max <= 0.0 {
            return Some(magnitudes);
        }
        Some(
            magnitudes
                .into_iter()
                .map(|m| m / self.running_max)
                .collect(),
        )
    }
}

impl FormatListener for SpectrogramEngine {
    fn format_changed(&mut self, format: StreamFormat) {
        self.sample_rate = format.sample_rate;
        self.reset();
    }

    fn reset(&mut self) {
        self.geometry = SpectrogramGeometry::new(self.sample_rate, &self.settings);
        self.window.clear();
        self.window
            .extend(std::iter::repeat(0.0).take(self.geometry.window_len));
        self.carry.clear();
        self.carry.reserve(self.geometry.hop);
        self.running_max = 0.0;
    }

    fn name(&self) -> &str {
        "Spectrogram"
    }
}
