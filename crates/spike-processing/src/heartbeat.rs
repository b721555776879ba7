//! Beat-rate estimation from threshold triggers

use std::collections::VecDeque;
use tracing::debug;

/// Fires closer together than this are not beats
pub const REFRACTORY_SECONDS: f32 = 0.2;

/// A gap longer than this clears the beat history
pub const STALE_GAP_SECONDS: f32 = 3.0;

/// Total span of the kept intervals
pub const HISTORY_SPAN_SECONDS: f32 = 6.0;

/// Tracks inter-beat distances in samples and derives beats per minute.
///
/// Positions are absolute sample counts since the start of the epoch.
#[derive(Debug, Clone)]
pub struct HeartbeatTracker {
    sample_rate: u32,
    refractory: u64,
    stale_gap: u64,
    max_span: u64,
    last_beat: Option<u64>,
    intervals: VecDeque<u64>,
    span: u64,
}

impl HeartbeatTracker {
    pub fn new(sample_rate: u32) -> Self {
        let samples = |seconds: f32| (sample_rate as f32 * seconds).round() as u64;
        Self {
            sample_rate,
            refractory: samples(REFRACTORY_SECONDS),
            stale_gap: samples(STALE_GAP_SECONDS),
            max_span: samples(HISTORY_SPAN_SECONDS),
            last_beat: None,
            intervals: VecDeque::new(),
            span: 0,
        }
    }

    /// Register a trigger at `position`. Returns false if it fell inside the
    /// refractory period and was ignored.
    pub fn on_beat(&mut self, position: u64) -> bool {
        let Some(last) = self.last_beat else {
            self.last_beat = Some(position);
            return true;
        };

        let interval = position.saturating_sub(last);
        if interval < self.refractory {
            return false;
        }
        if interval > self.stale_gap {
            self.clear();
            self.last_beat = Some(position);
            return true;
        }

        self.intervals.push_back(interval);
        self.span += interval;
        while self.span > self.max_span {
            match self.intervals.pop_front() {
                Some(oldest) => self.span -= oldest,
                None => break,
            }
        }
        self.last_beat = Some(position);
        true
    }

    /// Clear the history if nothing fired for longer than the stale gap
    pub fn check_stale(&mut self, position: u64) {
        if let Some(last) = self.last_beat {
            if position.saturating_sub(last) > self.stale_gap && !self.intervals.is_empty() {
                debug!(gap = position - last, "beat history stale, cleared");
                self.clear();
                self.last_beat = Some(last);
            }
        }
    }

    /// Beats per minute, 0 until two intervals are known
    pub fn bpm(&self) -> u32 {
        if self.intervals.len() < 2 || self.span == 0 {
            return 0;
        }
        let per_minute = self.sample_rate as u64 * 60 * self.intervals.len() as u64;
        ((per_minute + self.span / 2) / self.span) as u32
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// Drop all history
    pub fn clear(&mut self) {
        self.last_beat = None;
        self.intervals.clear();
        self.span = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpm_from_regular_beats() {
        let mut tracker = HeartbeatTracker::new(10_000);

        tracker.on_beat(0);
        assert_eq!(tracker.bpm(), 0);
        tracker.on_beat(10_000);
        assert_eq!(tracker.bpm(), 0);
        tracker.on_beat(20_000);
        assert_eq!(tracker.bpm(), 60);
        tracker.on_beat(30_000);
        assert_eq!(tracker.bpm(), 60);
    }

    #[test]
    fn test_refractory_ignores_close_fires() {
        let mut tracker = HeartbeatTracker::new(1000);
        assert!(tracker.on_beat(0));
        assert!(!tracker.on_beat(100));
        assert!(tracker.on_beat(500));
        assert!(tracker.on_beat(1000));
        assert_eq!(tracker.interval_count(), 2);
        assert_eq!(tracker.bpm(), 120);
    }

    #[test]
    fn test_stale_gap_clears_history() {
        let mut tracker = HeartbeatTracker::new(1000);
        for beat in 0..4 {
            tracker.on_beat(beat * 1000);
        }
        assert_eq!(tracker.bpm(), 60);

        tracker.on_beat(3000 + 3001);
        assert_eq!(tracker.bpm(), 0);
        assert_eq!(tracker.interval_count(), 0);
    }

    #[test]
    fn test_check_stale_without_new_beat() {
        let mut tracker = HeartbeatTracker::new(1000);
        for beat in 0..3 {
            tracker.on_beat(beat * 800);
        }
        assert_eq!(tracker.bpm(), 75);

        tracker.check_stale(1600 + 2000);
        assert_eq!(tracker.bpm(), 75);
        tracker.check_stale(1600 + 3001);
        assert_eq!(tracker.bpm(), 0);
    }

    #[test]
    fn test_history_span_is_capped() {
        let mut tracker = HeartbeatTracker::new(1000);
        let mut position = 0;
        tracker.on_beat(position);
        for _ in 0..10 {
            position += 1000;
            tracker.on_beat(position);
        }
        assert_eq!(tracker.interval_count(), 6);
        assert_eq!(tracker.bpm(), 60);
    }
}
