//! Energy-based noisy/quiet classification with hysteresis.
//!
//! Each power reading is folded into three rolling windows: a short-term
//! window, a long-term window, and a window kept sorted by power for
//! percentile lookup. The short-term mean is normalized against the recent
//! dynamic range and compared against a pair of hysteresis thresholds to
//! decide state transitions.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;

/// Two-state classification of the input signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseState {
    Quiet,
    Noisy,
}

impl fmt::Display for NoiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseState::Quiet => write!(f, "Quiet"),
            NoiseState::Noisy => write!(f, "Noisy"),
        }
    }
}

/// A state change observed by the monitor. The event list is append-only
/// within a recording; past events are never rewritten.
#[derive(Debug, Clone, Copy)]
pub struct NoiseEvent {
    pub state: NoiseState,
    pub start_time: Instant,
}

/// One power reading inside a rolling window, timestamped in seconds since
/// the monitor epoch.
#[derive(Debug, Clone, Copy)]
struct PowerSample {
    power: f32,
    time: f64,
}

/// Full threshold state at one tick. Kept for tuning and tests, not needed
/// for correctness.
#[derive(Debug, Clone, Copy)]
pub struct LogEntry {
    pub timestamp: f64,
    pub power_level: f32,
    pub min_power: f32,
    pub max_power: f32,
    pub sta: f32,
    pub lta: f32,
    pub noise_percentile: f32,
    pub high_threshold: f32,
    pub low_threshold: f32,
}

pub struct NoiseStateMonitor {
    config: MonitorConfig,
    epoch: Instant,
    events: Vec<NoiseEvent>,
    sta_samples: VecDeque<PowerSample>,
    lta_samples: VecDeque<PowerSample>,
    /// Kept sorted by power ascending for percentile lookup.
    sorted_samples: Vec<PowerSample>,
    log_entries: Vec<LogEntry>,
    power_level: Option<f32>,
}

impl NoiseStateMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let epoch = Instant::now();
        let mut monitor = Self {
            config,
            epoch,
            events: Vec::new(),
            sta_samples: VecDeque::new(),
            lta_samples: VecDeque::new(),
            sorted_samples: Vec::new(),
            log_entries: Vec::new(),
            power_level: None,
        };
        monitor.reset(epoch);
        monitor
    }

    /// Reinitialize for a new recording. The event list is seeded with a
    /// single Noisy event at `recording_started_at`, on the assumption that
    /// the user starts speaking right away.
    pub fn reset(&mut self, recording_started_at: Instant) {
        self.epoch = recording_started_at;
        self.events = vec![NoiseEvent {
            state: NoiseState::Noisy,
            start_time: recording_started_at,
        }];
        self.sta_samples.clear();
        self.lta_samples.clear();
        self.sorted_samples.clear();
        self.log_entries.clear();
        self.power_level = None;
    }

    /// Fold one power reading into the rolling windows and evaluate the
    /// hysteresis transition.
    pub fn update_power_level(&mut self, power: f32) {
        self.update_power_level_at(power, Instant::now());
    }

    fn update_power_level_at(&mut self, power: f32, now: Instant) {
        let timestamp = now.saturating_duration_since(self.epoch).as_secs_f64();
        self.power_level = Some(power);

        let sample = PowerSample {
            power,
            time: timestamp,
        };
        self.sta_samples.push_back(sample);
        self.lta_samples.push_back(sample);
        let at = self.sorted_samples.partition_point(|s| s.power <= power);
        self.sorted_samples.insert(at, sample);

        Self::evict_stale(&mut self.sta_samples, timestamp - self.config.sta_window_secs);
        Self::evict_stale(&mut self.lta_samples, timestamp - self.config.lta_window_secs);
        let min_max_horizon = timestamp - self.config.min_max_window_secs;
        self.sorted_samples.retain(|s| s.time >= min_max_horizon);

        let sta = Self::mean_power(&self.sta_samples);
        let lta = Self::mean_power(&self.lta_samples);
        let min_power = self.power_at_percentile(self.config.min_power_percentile);
        let max_power = self.power_at_percentile(self.config.max_power_percentile);

        // Deliberately unclamped: the thresholds are tuned against values
        // that can leave [0, 1], and a flat window yields NaN, which
        // satisfies neither transition predicate below so the state holds.
        let noise_percentile = (sta - min_power) / (max_power - min_power);

        self.log_entries.push(LogEntry {
            timestamp,
            power_level: power,
            min_power,
            max_power,
            sta,
            lta,
            noise_percentile,
            high_threshold: self.config.high_threshold,
            low_threshold: self.config.low_threshold,
        });

        let Some(last) = self.events.last() else {
            return;
        };
        let next = match last.state {
            NoiseState::Quiet if noise_percentile > self.config.low_threshold => NoiseState::Noisy,
            NoiseState::Noisy if noise_percentile < self.config.high_threshold => NoiseState::Quiet,
            held => held,
        };
        if next != last.state {
            // Backdate the transition by one short-term window to compensate
            // for the averaging lag.
            let lag = Duration::from_secs_f64(self.config.sta_window_secs);
            let start_time = now.checked_sub(lag).unwrap_or(now);
            self.events.push(NoiseEvent {
                state: next,
                start_time,
            });
        }
    }

    fn evict_stale(samples: &mut VecDeque<PowerSample>, horizon: f64) {
        while samples.front().is_some_and(|s| s.time < horizon) {
            samples.pop_front();
        }
    }

    fn mean_power(samples: &VecDeque<PowerSample>) -> f32 {
        samples.iter().map(|s| s.power).sum::<f32>() / samples.len() as f32
    }

    /// Power at the given percentile of the sorted window, or 0 when the
    /// window is empty.
    fn power_at_percentile(&self, percentile: f32) -> f32 {
        if self.sorted_samples.is_empty() {
            return 0.0;
        }
        let index = ((self.sorted_samples.len() - 1) as f32 * percentile) as usize;
        self.sorted_samples[index].power
    }

    pub fn events(&self) -> &[NoiseEvent] {
        &self.events
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        &self.log_entries
    }

    pub fn power_level(&self) -> Option<f32> {
        self.power_level
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> (NoiseStateMonitor, Instant) {
        let mut monitor = NoiseStateMonitor::new(MonitorConfig::default());
        let epoch = Instant::now();
        monitor.reset(epoch);
        (monitor, epoch)
    }

    /// Feed powers at the default 50ms cadence, starting one tick after the
    /// epoch. Returns the instant of the last tick.
    fn feed(monitor: &mut NoiseStateMonitor, epoch: Instant, powers: &[f32]) -> Instant {
        let mut now = epoch;
        for (i, power) in powers.iter().enumerate() {
            now = epoch + Duration::from_millis(50 * (i as u64 + 1));
            monitor.update_power_level_at(*power, now);
        }
        now
    }

    #[test]
    fn test_reset_seeds_noisy_event() {
        let (monitor, epoch) = monitor();
        assert_eq!(monitor.events().len(), 1);
        assert_eq!(monitor.events()[0].state, NoiseState::Noisy);
        assert_eq!(monitor.events()[0].start_time, epoch);
    }

    #[test]
    fn test_constant_power_holds_initial_state() {
        let (mut monitor, epoch) = monitor();
        // 20 seconds of flat signal: the dynamic range collapses, the
        // percentile ratio goes NaN, and no transition ever fires.
        feed(&mut monitor, epoch, &vec![0.5; 400]);
        assert_eq!(monitor.events().len(), 1);
        assert_eq!(monitor.events()[0].state, NoiseState::Noisy);
        let last = monitor.log_entries().last().unwrap();
        assert!(last.noise_percentile.is_nan());
    }

    #[test]
    fn test_rising_then_loud_stays_noisy() {
        let (mut monitor, epoch) = monitor();
        let mut powers: Vec<f32> = (1..=20).map(|i| i as f32 / 20.0).collect();
        powers.extend(std::iter::repeat(1.0).take(200));
        feed(&mut monitor, epoch, &powers);
        assert!(monitor
            .events()
            .iter()
            .all(|e| e.state == NoiseState::Noisy));
        assert_eq!(monitor.events().len(), 1);
    }

    #[test]
    fn test_quiet_transition_is_backdated() {
        let (mut monitor, epoch) = monitor();
        // Loud speech, then silence long enough for the short-term average
        // to sink below the high threshold.
        let mut powers = vec![0.8f32; 40];
        powers.extend(std::iter::repeat(0.0).take(100));
        feed(&mut monitor, epoch, &powers);

        let events = monitor.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].state, NoiseState::Quiet);

        // The transition is recorded one short-term window before the tick
        // that detected it.
        let entries = monitor.log_entries();
        let transition_tick = entries
            .iter()
            .position(|e| e.noise_percentile < e.high_threshold)
            .unwrap();
        let tick_instant = epoch + Duration::from_millis(50 * (transition_tick as u64 + 1));
        assert_eq!(
            events[1].start_time,
            tick_instant - Duration::from_millis(200)
        );
    }

    #[test]
    fn test_alternating_signal_never_repeats_state() {
        let (mut monitor, epoch) = monitor();
        let mut powers = Vec::new();
        for _ in 0..4 {
            powers.extend(std::iter::repeat(0.8f32).take(40));
            powers.extend(std::iter::repeat(0.0f32).take(40));
        }
        feed(&mut monitor, epoch, &powers);

        let events = monitor.events();
        assert!(events.len() >= 3);
        for pair in events.windows(2) {
            assert_ne!(pair[0].state, pair[1].state);
        }
    }

    #[test]
    fn test_one_log_entry_per_tick() {
        let (mut monitor, epoch) = monitor();
        feed(&mut monitor, epoch, &[0.1, 0.9, 0.4, 0.4, 0.2]);
        assert_eq!(monitor.log_entries().len(), 5);
    }

    #[test]
    fn test_percentile_on_empty_window_is_zero() {
        let (monitor, _) = monitor();
        assert_eq!(monitor.power_at_percentile(0.05), 0.0);
        assert_eq!(monitor.power_at_percentile(0.90), 0.0);
    }

    #[test]
    fn test_percentile_on_single_sample_returns_it() {
        let (mut monitor, epoch) = monitor();
        feed(&mut monitor, epoch, &[0.42]);
        assert_eq!(monitor.power_at_percentile(0.0), 0.42);
        assert_eq!(monitor.power_at_percentile(0.5), 0.42);
        assert_eq!(monitor.power_at_percentile(1.0), 0.42);
    }

    #[test]
    fn test_sorted_window_stays_ascending() {
        let (mut monitor, epoch) = monitor();
        feed(&mut monitor, epoch, &[0.5, 0.1, 0.9, 0.3, 0.7, 0.2]);
        let powers: Vec<f32> = monitor.sorted_samples.iter().map(|s| s.power).collect();
        let mut sorted = powers.clone();
        sorted.sort_by(f32::total_cmp);
        assert_eq!(powers, sorted);
    }

    #[test]
    fn test_stale_samples_leave_the_windows() {
        let (mut monitor, epoch) = monitor();
        // 12 seconds of data at 50ms: the 10s windows must have shed the
        // earliest samples, the 0.2s window keeps only the last few.
        feed(&mut monitor, epoch, &vec![0.5; 240]);
        assert!(monitor.sta_samples.len() <= 5);
        assert!(monitor.lta_samples.len() <= 201);
        assert!(monitor.sorted_samples.len() <= 201);
    }
}
