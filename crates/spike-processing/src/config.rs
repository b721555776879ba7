//! Engine configuration
//!
//! One serializable document describes the whole engine: the stream format
//! to start with, the filter band, trigger settings and spectrogram
//! geometry. Presets cover the common recording setups.

use crate::filters::{is_cutoff_off, NotchFrequency, CUTOFF_OFF};
use crate::spectrogram::SpectrogramSettings;
use crate::threshold::{ThresholdSettings, TriggerMode};
use serde::{Deserialize, Serialize};
use spike_core::{config_error, DeviceProfile, SpikeError, SpikeResult, StreamFormat};
use std::path::Path;

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Configuration name, for logs
    pub name: String,
    /// Format assumed until the device reports one
    pub format: StreamFormat,
    /// Scaling assumed until the device reports its hardware type
    pub device_profile: DeviceProfile,
    pub filters: FilterConfig,
    pub threshold: ThresholdConfig,
    pub spectrogram: SpectrogramConfig,
}

/// Filter band applied to every filtered channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    /// High-pass corner in Hz, `CUTOFF_OFF` to disable
    pub low_cutoff: f32,
    /// Low-pass corner in Hz, `CUTOFF_OFF` to disable
    pub high_cutoff: f32,
    pub notch: NotchFrequency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub enabled: bool,
    pub settings: ThresholdSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    pub enabled: bool,
    /// Channel transformed into the spectrogram
    pub channel: usize,
    pub settings: SpectrogramSettings,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            low_cutoff: CUTOFF_OFF,
            high_cutoff: CUTOFF_OFF,
            notch: NotchFrequency::Off,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settings: ThresholdSettings::default(),
        }
    }
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: 0,
            settings: SpectrogramSettings::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            format: StreamFormat::default(),
            device_profile: DeviceProfile::default(),
            filters: FilterConfig::default(),
            threshold: ThresholdConfig::default(),
            spectrogram: SpectrogramConfig::default(),
        }
    }
}

/// Presets for common recording setups
impl EngineConfig {
    /// Neuron spikes: wide band, spike-triggered averaging
    pub fn neurons() -> Self {
        Self {
            name: "Neurons".to_string(),
            format: StreamFormat {
                sample_rate: 10_000,
                channel_count: 2,
            },
            filters: FilterConfig {
                enabled: true,
                low_cutoff: 1.0,
                high_cutoff: 3000.0,
                notch: NotchFrequency::Off,
            },
            ..Self::default()
        }
    }

    /// Heart rate from ECG on a muscle/heart board
    pub fn heart() -> Self {
        Self {
            name: "Heart".to_string(),
            format: StreamFormat {
                sample_rate: 10_000,
                channel_count: 1,
            },
            filters: FilterConfig {
                enabled: true,
                low_cutoff: 1.0,
                high_cutoff: 50.0,
                notch: NotchFrequency::Hz60,
            },
            threshold: ThresholdConfig {
                enabled: true,
                settings: ThresholdSettings {
                    trigger: TriggerMode::Threshold(1500),
                    averaging_depth: 10,
                    ..ThresholdSettings::default()
                },
            },
            ..Self::default()
        }
    }

    /// Slow EEG rhythms: spectrogram only
    pub fn brain() -> Self {
        Self {
            name: "Brain".to_string(),
            format: StreamFormat {
                sample_rate: 1000,
                channel_count: 1,
            },
            filters: FilterConfig {
                enabled: true,
                low_cutoff: 0.5,
                high_cutoff: 40.0,
                notch: NotchFrequency::Hz50,
            },
            threshold: ThresholdConfig {
                enabled: false,
                ..ThresholdConfig::default()
            },
            spectrogram: SpectrogramConfig {
                enabled: true,
                ..SpectrogramConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> SpikeResult<()> {
        StreamFormat::new(self.format.sample_rate, self.format.channel_count)?;
        self.filters.validate(self.format.sample_rate)?;
        self.threshold.settings.validate()?;
        self.spectrogram.settings.validate()?;

        let channel_count = self.format.channel_count;
        if self.threshold.settings.trigger_channel >= channel_count {
            return Err(SpikeError::ChannelOutOfRange {
                channel: self.threshold.settings.trigger_channel,
                channel_count,
            });
        }
        if self.spectrogram.channel >= channel_count {
            return Err(SpikeError::ChannelOutOfRange {
                channel: self.spectrogram.channel,
                channel_count,
            });
        }
        Ok(())
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> SpikeResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SpikeError::Config(format!("failed to serialize configuration: {}", e)))
    }

    /// Import configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> SpikeResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SpikeError::Config(format!("failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> SpikeResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SpikeError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> SpikeResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .map_err(|e| SpikeError::Config(format!("failed to write {}: {}", path.display(), e)))
    }
}

impl FilterConfig {
    /// Both corners active and in the wrong order is the only rejected band;
    /// corners at or above Nyquist simply switch their section off.
    pub fn validate(&self, sample_rate: u32) -> SpikeResult<()> {
        for cutoff in [self.low_cutoff, self.high_cutoff] {
            if cutoff.is_nan() {
                return Err(config_error!("filter cutoff is not a number"));
            }
        }
        let fs = sample_rate as f32;
        if !is_cutoff_off(self.low_cutoff, fs)
            && !is_cutoff_off(self.high_cutoff, fs)
            && self.low_cutoff >= self.high_cutoff
        {
            return Err(config_error!(
                "low cutoff {}Hz must be below high cutoff {}Hz",
                self.low_cutoff,
                self.high_cutoff
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::EventFilter;

    #[test]
    fn test_presets_validate() {
        for config in [
            EngineConfig::default(),
            EngineConfig::neurons(),
            EngineConfig::heart(),
            EngineConfig::brain(),
        ] {
            assert!(config.validate().is_ok(), "{} invalid", config.name);
        }
    }

    #[test]
    fn test_validation_errors() {
        let mut config = EngineConfig::neurons();
        config.filters.low_cutoff = 500.0;
        config.filters.high_cutoff = 100.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::heart();
        config.threshold.settings.trigger_channel = 3;
        assert!(matches!(
            config.validate(),
            Err(SpikeError::ChannelOutOfRange { channel: 3, .. })
        ));

        let mut config = EngineConfig::brain();
        config.spectrogram.settings.overlap_percent = 120.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.format.sample_rate = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cutoff_above_nyquist_is_accepted() {
        let mut config = EngineConfig::brain();
        config.filters.low_cutoff = 100.0;
        config.filters.high_cutoff = 600.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = EngineConfig::heart();
        config.threshold.settings.trigger = TriggerMode::Event(EventFilter::Label("3".into()));

        let json = config.to_json().unwrap();
        let restored = EngineConfig::from_json(&json).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            EngineConfig::from_json(r#"{ "name": "partial", "filters": { "high_cutoff": 400.0 } }"#)
                .unwrap();
        assert_eq!(config.name, "partial");
        assert_eq!(config.filters.high_cutoff, 400.0);
        assert_eq!(config.filters.low_cutoff, CUTOFF_OFF);
        assert_eq!(config.format, StreamFormat::default());

        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(SpikeError::Config(_))
        ));
    }

    #[test]
    fn test_load_and_save() {
        let path = std::env::temp_dir().join(format!("spike-config-{}.json", std::process::id()));
        let config = EngineConfig::brain();
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);

        assert!(matches!(
            EngineConfig::load(&path),
            Err(SpikeError::Config(_))
        ));
    }
}
