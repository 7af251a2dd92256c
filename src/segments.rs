//! Projection of monitor events onto recording-relative intervals.

use std::time::Instant;

use crate::noise_monitor::{NoiseEvent, NoiseState};

/// A noisy or quiet stretch of the recording, in seconds relative to
/// recording start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseInterval {
    pub state: NoiseState,
    pub start: f64,
    pub end: f64,
}

impl NoiseInterval {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Project the monitor's event list onto contiguous intervals. Each event
/// ends where the next one begins; the last is closed against `closed_at`
/// (recording end, or "now" while still recording). Backdated event starts
/// that land before `recording_started_at` saturate to zero, so no interval
/// ever has a negative duration.
pub fn project_intervals(
    events: &[NoiseEvent],
    recording_started_at: Instant,
    closed_at: Instant,
) -> Vec<NoiseInterval> {
    let mut intervals = Vec::with_capacity(events.len());
    for (i, event) in events.iter().enumerate() {
        let end_instant = match events.get(i + 1) {
            Some(next) => next.start_time,
            None => closed_at,
        };
        let start = event
            .start_time
            .saturating_duration_since(recording_started_at)
            .as_secs_f64();
        let end = end_instant
            .saturating_duration_since(recording_started_at)
            .as_secs_f64()
            .max(start);
        intervals.push(NoiseInterval {
            state: event.state,
            start,
            end,
        });
    }
    intervals
}

/// End of the most recent noisy interval. The scheduler reads this as its
/// pause-detection signal; None means no noisy interval exists.
pub fn latest_noisy_end(intervals: &[NoiseInterval]) -> Option<f64> {
    intervals
        .iter()
        .rev()
        .find(|interval| interval.state == NoiseState::Noisy)
        .map(|interval| interval.end)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn event(state: NoiseState, at: Instant) -> NoiseEvent {
        NoiseEvent {
            state,
            start_time: at,
        }
    }

    #[test]
    fn test_no_events_projects_nothing() {
        let now = Instant::now();
        assert!(project_intervals(&[], now, now).is_empty());
    }

    #[test]
    fn test_single_event_spans_whole_recording() {
        let start = Instant::now();
        let end = start + Duration::from_secs(3);
        let intervals = project_intervals(&[event(NoiseState::Noisy, start)], start, end);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].start, 0.0);
        assert_eq!(intervals[0].end, 3.0);
        assert_eq!(intervals[0].state, NoiseState::Noisy);
    }

    #[test]
    fn test_intervals_are_contiguous_and_cover_the_recording() {
        let start = Instant::now();
        let events = [
            event(NoiseState::Noisy, start),
            event(NoiseState::Quiet, start + Duration::from_millis(1200)),
            event(NoiseState::Noisy, start + Duration::from_millis(2500)),
            event(NoiseState::Quiet, start + Duration::from_millis(4100)),
        ];
        let end = start + Duration::from_secs(5);
        let intervals = project_intervals(&events, start, end);

        assert_eq!(intervals.len(), 4);
        assert_eq!(intervals[0].start, 0.0);
        assert_eq!(intervals.last().unwrap().end, 5.0);
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        for interval in &intervals {
            assert!(interval.end >= interval.start);
        }
    }

    #[test]
    fn test_backdated_event_clamps_to_recording_start() {
        let start = Instant::now() + Duration::from_secs(1);
        // A transition detected right after start gets backdated past the
        // recording start; both the first interval's end and the second's
        // start saturate to zero.
        let events = [
            event(NoiseState::Noisy, start),
            event(NoiseState::Quiet, start - Duration::from_millis(150)),
        ];
        let end = start + Duration::from_secs(2);
        let intervals = project_intervals(&events, start, end);

        assert_eq!(intervals[0].start, 0.0);
        assert_eq!(intervals[0].end, 0.0);
        assert_eq!(intervals[1].start, 0.0);
        assert_eq!(intervals[1].end, 2.0);
    }

    #[test]
    fn test_latest_noisy_end_skips_trailing_quiet() {
        let intervals = [
            NoiseInterval {
                state: NoiseState::Noisy,
                start: 0.0,
                end: 1.5,
            },
            NoiseInterval {
                state: NoiseState::Quiet,
                start: 1.5,
                end: 4.0,
            },
        ];
        assert_eq!(latest_noisy_end(&intervals), Some(1.5));
    }

    #[test]
    fn test_latest_noisy_end_without_noisy_interval() {
        let intervals = [NoiseInterval {
            state: NoiseState::Quiet,
            start: 0.0,
            end: 2.0,
        }];
        assert_eq!(latest_noisy_end(&intervals), None);
        assert_eq!(latest_noisy_end(&[]), None);
    }
}
