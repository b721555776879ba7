//! Synthetic waveforms in sample units

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Width of a QRS complex in seconds
const QRS_WIDTH: f32 = 0.04;

/// Predefined waveforms, evaluated per channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalPattern {
    /// Flat line
    Constant { level: f32 },
    /// Pure tone around an offset
    Sine {
        frequency: f32,
        amplitude: f32,
        offset: f32,
    },
    /// Regular triangular spikes, `rate` per second
    SpikeTrain {
        rate: f32,
        amplitude: f32,
        /// Spike width in seconds
        width: f32,
    },
    /// ECG-like trace: a sharp QRS spike followed by a low T wave
    Heartbeat { bpm: f32, amplitude: f32 },
    /// Muscle bursts: a carrier switched on and off
    Burst {
        on_duration: f32,
        off_duration: f32,
        amplitude: f32,
        frequency: f32,
    },
}

impl SignalPattern {
    /// Value at `time` seconds
    pub fn value_at(&self, time: f32) -> f32 {
        match *self {
            SignalPattern::Constant { level } => level,

            SignalPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * PI * frequency * time).sin(),

            SignalPattern::SpikeTrain {
                rate,
                amplitude,
                width,
            } => {
                if rate <= 0.0 || width <= 0.0 {
                    return 0.0;
                }
                triangle(time.rem_euclid(1.0 / rate), width) * amplitude
            }

            SignalPattern::Heartbeat { bpm, amplitude } => {
                if bpm <= 0.0 {
                    return 0.0;
                }
                let phase = time.rem_euclid(60.0 / bpm);
                let qrs = triangle(phase, QRS_WIDTH) * amplitude;
                let t_wave = if (0.2..0.4).contains(&phase) {
                    0.2 * amplitude * (PI * (phase - 0.2) / 0.2).sin()
                } else {
                    0.0
                };
                qrs + t_wave
            }

            SignalPattern::Burst {
                on_duration,
                off_duration,
                amplitude,
                frequency,
            } => {
                let cycle = on_duration + off_duration;
                if cycle <= 0.0 || time.rem_euclid(cycle) >= on_duration {
                    0.0
                } else {
                    amplitude * (2.0 * PI * frequency * time).sin()
                }
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SignalPattern::Constant { .. } => "Constant level",
            SignalPattern::Sine { .. } => "Sine wave",
            SignalPattern::SpikeTrain { .. } => "Spike train",
            SignalPattern::Heartbeat { .. } => "Heartbeat",
            SignalPattern::Burst { .. } => "Muscle bursts",
        }
    }

    pub fn presets() -> Vec<(&'static str, SignalPattern)> {
        vec![
            ("Silence", SignalPattern::Constant { level: 0.0 }),
            (
                "Alpha Rhythm",
                SignalPattern::Sine {
                    frequency: 10.0,
                    amplitude: 400.0,
                    offset: 0.0,
                },
            ),
            (
                "Neuron",
                SignalPattern::SpikeTrain {
                    rate: 20.0,
                    amplitude: 3000.0,
                    width: 0.002,
                },
            ),
            (
                "Resting Heart",
                SignalPattern::Heartbeat {
                    bpm: 60.0,
                    amplitude: 4000.0,
                },
            ),
            (
                "Flexing",
                SignalPattern::Burst {
                    on_duration: 1.0,
                    off_duration: 1.0,
                    amplitude: 2000.0,
                    frequency: 120.0,
                },
            ),
        ]
    }
}

/// Unit triangle of `width` starting at phase 0
fn triangle(phase: f32, width: f32) -> f32 {
    if phase >= width {
        return 0.0;
    }
    let half = width / 2.0;
    1.0 - (phase - half).abs() / half
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spike_train_period() {
        let pattern = SignalPattern::SpikeTrain {
            rate: 10.0,
            amplitude: 100.0,
            width: 0.01,
        };
        assert!((pattern.value_at(0.005) - 100.0).abs() < 1e-3);
        assert!((pattern.value_at(0.105) - 100.0).abs() < 1e-2);
        assert_eq!(pattern.value_at(0.05), 0.0);
    }

    #[test]
    fn test_heartbeat_peak_dominates() {
        let pattern = SignalPattern::Heartbeat {
            bpm: 60.0,
            amplitude: 1000.0,
        };
        let peak = pattern.value_at(QRS_WIDTH / 2.0);
        let t_wave = pattern.value_at(0.3);
        assert!((peak - 1000.0).abs() < 1e-2);
        assert!(t_wave > 100.0 && t_wave < 0.5 * peak);
        assert_eq!(pattern.value_at(0.7), 0.0);
    }

    #[test]
    fn test_burst_is_silent_when_off() {
        let pattern = SignalPattern::Burst {
            on_duration: 0.5,
            off_duration: 0.5,
            amplitude: 100.0,
            frequency: 50.0,
        };
        assert_eq!(pattern.value_at(0.75), 0.0);
        assert!(pattern.value_at(0.005).abs() > 0.0);
    }

    #[test]
    fn test_presets_have_descriptions() {
        for (name, pattern) in SignalPattern::presets() {
            assert!(!name.is_empty());
            assert!(!pattern.description().is_empty());
        }
    }
}
