//! Sliding-window queue throughput (events per minute)

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Events older than this are ignored
pub const MAX_SECONDS_IN_THE_PAST: u64 = 600;

/// At most this many recent events are kept per direction
pub const MAX_EVENTS: usize = 1000;

/// Smallest time span used as a divisor, so that two events sharing a
/// timestamp do not produce an infinite rate
const MIN_SPAN_SECS: f64 = 0.01;

/// Input and output rate measurement for one queue
#[derive(Debug, Default)]
pub struct QueueSpeed {
    input: Mutex<VecDeque<Instant>>,
    output: Mutex<VecDeque<Instant>>,
}

impl QueueSpeed {
    /// Create an empty measurement
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an item entering the queue
    pub fn item_in(&self) {
        record(&mut self.input.lock(), Instant::now());
    }

    /// Record an item leaving the queue
    pub fn item_out(&self) {
        record(&mut self.output.lock(), Instant::now());
    }

    /// Items put per minute
    pub fn input_rpm(&self) -> f64 {
        rpm(&mut self.input.lock(), Instant::now())
    }

    /// Items taken per minute
    pub fn output_rpm(&self) -> f64 {
        rpm(&mut self.output.lock(), Instant::now())
    }
}

fn record(events: &mut VecDeque<Instant>, now: Instant) {
    events.push_back(now);
    while events.len() > MAX_EVENTS {
        events.pop_front();
    }
}

fn rpm(events: &mut VecDeque<Instant>, now: Instant) -> f64 {
    let max_age = Duration::from_secs(MAX_SECONDS_IN_THE_PAST);
    while let Some(oldest) = events.front() {
        if now.saturating_duration_since(*oldest) > max_age {
            events.pop_front();
        } else {
            break;
        }
    }

    match (events.front(), events.back()) {
        (None, _) | (_, None) => 0.0,
        // A single event says at least one item moved within the window
        _ if events.len() == 1 => 1.0,
        (Some(oldest), Some(newest)) => {
            let span = newest
                .saturating_duration_since(*oldest)
                .as_secs_f64()
                .max(MIN_SPAN_SECS);
            60.0 * events.len() as f64 / span
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        let speed = QueueSpeed::new();
        assert_eq!(speed.input_rpm(), 0.0);
        assert_eq!(speed.output_rpm(), 0.0);
    }

    #[test]
    fn test_single_sample() {
        let speed = QueueSpeed::new();
        speed.item_in();
        assert_eq!(speed.input_rpm(), 1.0);
        assert_eq!(speed.output_rpm(), 0.0);
    }

    #[test]
    fn test_rate_over_span() {
        let start = Instant::now();
        let mut events = VecDeque::new();
        for i in 0..10 {
            record(&mut events, start + Duration::from_secs(i * 6));
        }

        // 10 events over 54 seconds
        let rate = rpm(&mut events, start + Duration::from_secs(60));
        assert!((rate - 600.0 / 54.0).abs() < 1e-9);
    }

    #[test]
    fn test_same_timestamp_uses_floor() {
        let now = Instant::now();
        let mut events = VecDeque::new();
        record(&mut events, now);
        record(&mut events, now);

        assert!((rpm(&mut events, now) - 60.0 * 2.0 / 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_old_events_expire() {
        let start = Instant::now();
        let mut events = VecDeque::new();
        record(&mut events, start);
        record(&mut events, start + Duration::from_secs(1));

        let later = start + Duration::from_secs(MAX_SECONDS_IN_THE_PAST + 2);
        assert_eq!(rpm(&mut events, later), 0.0);
        assert!(events.is_empty());
    }

    #[test]
    fn test_window_is_bounded() {
        let now = Instant::now();
        let mut events = VecDeque::new();
        for _ in 0..MAX_EVENTS + 50 {
            record(&mut events, now);
        }
        assert_eq!(events.len(), MAX_EVENTS);
    }
}
