//! Threshold and event triggered averaging
//!
//! Every trigger anchors a window of `sample_count` samples per channel, half
//! of it taken from a look-back ring and the rest filled as samples arrive
//! (possibly over many calls). Complete windows are folded into per-position
//! running sums; once more than `averaging_depth` windows are held, the
//! oldest one is subtracted again and dropped.

use crate::heartbeat::HeartbeatTracker;
use crate::processor::FormatListener;
use serde::{Deserialize, Serialize};
use spike_core::{config_error, Event, Sample, SampleBlock, SpikeResult, StreamFormat};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Default duration of one averaging window
pub const WINDOW_SECONDS: f32 = 2.4;

/// Time a threshold trigger stays disarmed after firing
pub const DEAD_PERIOD_SECONDS: f32 = 0.005;

/// Most windows that may be filling at the same time
pub const MAX_IN_FLIGHT_WINDOWS: usize = 512;

/// Largest accepted averaging depth
pub const MAX_AVERAGING_DEPTH: usize = 100;

/// Which events trigger a window in event mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFilter {
    Any,
    Label(String),
}

impl EventFilter {
    pub fn matches(&self, label: &str) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Label(wanted) => wanted == label,
        }
    }
}

/// What anchors an averaging window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerMode {
    /// Signal crossing on the trigger channel; direction follows the sign
    Threshold(Sample),
    /// Device events
    Event(EventFilter),
}

impl Default for TriggerMode {
    fn default() -> Self {
        TriggerMode::Threshold(1000)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSettings {
    pub trigger: TriggerMode,
    /// Number of complete windows kept in the average
    pub averaging_depth: usize,
    /// Channel watched for threshold crossings
    pub trigger_channel: usize,
    /// Window duration in seconds
    pub window_seconds: f32,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            trigger: TriggerMode::default(),
            averaging_depth: 20,
            trigger_channel: 0,
            window_seconds: WINDOW_SECONDS,
        }
    }
}

impl ThresholdSettings {
    pub fn validate(&self) -> SpikeResult<()> {
        if !(1..=MAX_AVERAGING_DEPTH).contains(&self.averaging_depth) {
            return Err(config_error!(
                "averaging depth {} outside 1-{}",
                self.averaging_depth,
                MAX_AVERAGING_DEPTH
            ));
        }
        if !self.window_seconds.is_finite() || self.window_seconds <= 0.0 {
            return Err(config_error!(
                "window duration must be positive, got {}",
                self.window_seconds
            ));
        }
        Ok(())
    }
}

/// Result of one processing call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOutput {
    /// Per-channel averaged window, zero-filled until a window completes
    pub averages: Vec<Vec<Sample>>,
    /// Number of complete windows in the average
    pub averaged_windows: usize,
    /// Beat rate in threshold mode, otherwise 0
    pub bpm: u32,
}

/// One trigger's samples, filled across calls
#[derive(Debug, Clone)]
struct TriggerWindow {
    channels: Vec<Vec<Sample>>,
}

impl TriggerWindow {
    fn filled(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }
}

/// Per-position sums over the finished windows
#[derive(Debug, Clone)]
struct RunningAverage {
    sums: Vec<Vec<i64>>,
    finished: VecDeque<TriggerWindow>,
}

impl RunningAverage {
    fn new(channel_count: usize, sample_count: usize) -> Self {
        Self {
            sums: vec![vec![0; sample_count]; channel_count],
            finished: VecDeque::new(),
        }
    }

    fn add(&mut self, window: TriggerWindow, depth: usize) {
        accumulate(&mut self.sums, &window, 1);
        self.finished.push_back(window);
        while self.finished.len() > depth {
            if let Some(oldest) = self.finished.pop_front() {
                accumulate(&mut self.sums, &oldest, -1);
            }
        }
    }

    fn averages(&self) -> Vec<Vec<Sample>> {
        let count = self.finished.len() as i64;
        self.sums
            .iter()
            .map(|sums| {
                sums.iter()
                    .map(|&sum| {
                        if count == 0 {
                            0
                        } else {
                            // Round half away from zero
                            let half = if sum >= 0 { count / 2 } else { -(count / 2) };
                            ((sum + half) / count) as Sample
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

fn accumulate(sums: &mut [Vec<i64>], window: &TriggerWindow, sign: i64) {
    for (channel_sums, samples) in sums.iter_mut().zip(&window.channels) {
        for (sum, &sample) in channel_sums.iter_mut().zip(samples) {
            *sum += sign * sample as i64;
        }
    }
}

/// Spike-triggered averaging with heart-rate extraction
pub struct ThresholdEngine {
    format: StreamFormat,
    settings: ThresholdSettings,
    staged: Option<ThresholdSettings>,
    sample_count: usize,
    look_back: usize,
    dead_samples: u64,
    /// Last `look_back` samples per channel, zero-populated at epoch start
    history: Vec<VecDeque<Sample>>,
    in_flight: VecDeque<TriggerWindow>,
    average: RunningAverage,
    heartbeat: HeartbeatTracker,
    previous: Option<Sample>,
    dead_until: u64,
    position: u64,
    rejected_triggers: u64,
}

impl ThresholdEngine {
    pub fn new(format: StreamFormat, settings: ThresholdSettings) -> SpikeResult<Self> {
        settings.validate()?;
        let mut engine = Self {
            format,
            settings,
            staged: None,
            sample_count: 0,
            look_back: 0,
            dead_samples: 0,
            history: Vec::new(),
            in_flight: VecDeque::new(),
            average: RunningAverage::new(0, 0),
            heartbeat: HeartbeatTracker::new(format.sample_rate),
            previous: None,
            dead_until: 0,
            position: 0,
            rejected_triggers: 0,
        };
        engine.reset();
        Ok(engine)
    }

    /// Stage new settings; they take effect at the start of the next call
    pub fn configure(&mut self, settings: ThresholdSettings) -> SpikeResult<()> {
        settings.validate()?;
        self.staged = Some(settings);
        Ok(())
    }

    pub fn settings(&self) -> &ThresholdSettings {
        &self.settings
    }

    /// Window length in samples per channel
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Triggers rejected because too many windows were filling
    pub fn rejected_triggers(&self) -> u64 {
        self.rejected_triggers
    }

    pub fn process(&mut self, samples: &SampleBlock, events: &[Event]) -> ThresholdOutput {
        if let Some(settings) = self.staged.take() {
            debug!(?settings, "applying staged threshold settings");
            self.settings = settings;
            self.reset();
        }

        if samples.channel_count() != self.format.channel_count {
            warn!(
                block = samples.channel_count(),
                expected = self.format.channel_count,
                "sample block does not match stream format, skipped"
            );
            return self.output();
        }

        let len = samples.samples_per_channel();
        let triggers = self.find_triggers(samples, events);
        self.fill_windows(samples);
        for trigger in triggers {
            self.open_window(samples, trigger);
        }
        self.promote_finished();
        self.update_history(samples);

        self.position += len as u64;
        if matches!(self.settings.trigger, TriggerMode::Threshold(_)) {
            self.heartbeat.check_stale(self.position);
        }
        self.output()
    }

    fn output(&self) -> ThresholdOutput {
        let bpm = match self.settings.trigger {
            TriggerMode::Threshold(_) => self.heartbeat.bpm(),
            TriggerMode::Event(_) => 0,
        };
        ThresholdOutput {
            averages: self.average.averages(),
            averaged_windows: self.average.finished.len(),
            bpm,
        }
    }

    /// Trigger positions in `samples`, ascending
    fn find_triggers(&mut self, samples: &SampleBlock, events: &[Event]) -> Vec<usize> {
        let len = samples.samples_per_channel();
        match &self.settings.trigger {
            TriggerMode::Event(filter) => events
                .iter()
                .filter(|event| event.sample_index <= len && filter.matches(&event.label))
                .map(|event| event.sample_index)
                .collect(),
            TriggerMode::Threshold(threshold) => {
                let threshold = *threshold;
                let Ok(channel) = samples.channel(self.settings.trigger_channel) else {
                    return Vec::new();
                };

                let mut triggers = Vec::new();
                for (index, &current) in channel.iter().enumerate() {
                    let position = self.position + index as u64;
                    let crossed = match self.previous {
                        Some(previous) if threshold >= 0 => {
                            previous < threshold && threshold <= current
                        }
                        Some(previous) => previous > threshold && threshold >= current,
                        None => false,
                    };
                    self.previous = Some(current);

                    if crossed && position >= self.dead_until {
                        self.dead_until = position + self.dead_samples;
                        self.heartbeat.on_beat(position);
                        triggers.push(index);
                    }
                }
                triggers
            }
        }
    }

    fn open_window(&mut self, samples: &SampleBlock, trigger: usize) {
        if self.in_flight.len() >= MAX_IN_FLIGHT_WINDOWS {
            self.rejected_triggers += 1;
            warn!(
                limit = MAX_IN_FLIGHT_WINDOWS,
                "too many averaging windows in flight, trigger rejected"
            );
            return;
        }

        let from_block = trigger.min(self.look_back);
        let from_history = self.look_back - from_block;
        let forward = self.sample_count - self.look_back;

        let channels = samples
            .channels()
            .iter()
            .zip(&self.history)
            .map(|(block, history)| {
                let take = forward.min(block.len() - trigger);
                let mut window = Vec::with_capacity(self.sample_count);
                window.extend(history.range(history.len() - from_history..));
                window.extend_from_slice(&block[trigger - from_block..trigger + take]);
                window
            })
            .collect();
        self.in_flight.push_back(TriggerWindow { channels });
    }

    /// Continue windows opened by earlier calls with the start of `samples`
    fn fill_windows(&mut self, samples: &SampleBlock) {
        for window in self.in_flight.iter_mut() {
            let needed = self.sample_count - window.filled();
            for (channel, block) in window.channels.iter_mut().zip(samples.channels()) {
                channel.extend_from_slice(&block[..needed.min(block.len())]);
            }
        }
    }

    /// Windows complete in trigger order, so only the front needs checking
    fn promote_finished(&mut self) {
        while self
            .in_flight
            .front()
            .is_some_and(|window| window.filled() == self.sample_count)
        {
            if let Some(window) = self.in_flight.pop_front() {
                self.average.add(window, self.settings.averaging_depth);
            }
        }
    }

    fn update_history(&mut self, samples: &SampleBlock) {
        for (history, block) in self.history.iter_mut().zip(samples.channels()) {
            let keep = block.len().min(self.look_back);
            history.drain(..keep);
            history.extend(&block[block.len() - keep..]);
        }
    }
}

impl FormatListener for ThresholdEngine {
    fn format_changed(&mut self, format: StreamFormat) {
        self.format = format;
        if self.settings.trigger_channel >= format.channel_count {
            debug!(
                channel = self.settings.trigger_channel,
                "trigger channel no longer exists, using channel 0"
            );
            self.settings.trigger_channel = 0;
        }
        self.reset();
    }

    fn reset(&mut self) {
        let channel_count = self.format.channel_count;
        self.sample_count = self
            .format
            .seconds_to_samples(self.settings.window_seconds)
            .max(1);
        self.look_back = self.sample_count / 2;
        self.dead_samples = self.format.seconds_to_samples(DEAD_PERIOD_SECONDS) as u64;
        self.history = vec![VecDeque::from(vec![0; self.look_back]); channel_count];
        self.in_flight.clear();
        self.average = RunningAverage::new(channel_count, self.sample_count);
        self.heartbeat = HeartbeatTracker::new(self.format.sample_rate);
        self.previous = None;
        self.dead_until = 0;
        self.position = 0;
    }

    fn name(&self) -> &str {
        "Threshold Engine"
    }
}
