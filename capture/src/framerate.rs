//! Rolling frame-rate estimation over a fixed window of timestamps.

use std::collections::VecDeque;
use std::time::Instant;

/// Estimates a rate from the spread between the oldest and newest of the
/// last `window` event timestamps.
#[derive(Debug)]
pub struct FrameRateEstimator {
    timestamps: VecDeque<Instant>,
    window: usize,
}

impl FrameRateEstimator {
    /// Estimator over the last `window` events.
    ///
    /// # Panics
    /// Panics if `window` is smaller than 2; a rate needs two timestamps.
    pub fn new(window: usize) -> Self {
        assert!(window >= 2, "rate window must hold at least two timestamps");
        Self {
            timestamps: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Record an event and return the updated estimate.
    pub fn tick(&mut self, now: Instant) -> f32 {
        if self.timestamps.len() >= self.window {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(now);
        self.rate()
    }

    /// Current estimate in events per second; 0.0 until two events are seen.
    pub fn rate(&self) -> f32 {
        let (Some(&oldest), Some(&newest)) = (self.timestamps.front(), self.timestamps.back())
        else {
            return 0.0;
        };
        let elapsed = newest.duration_since(oldest).as_secs_f32();
        if elapsed <= 0.0 || self.timestamps.len() < 2 {
            return 0.0;
        }
        (self.timestamps.len() - 1) as f32 / elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_needs_two_events() {
        let mut est = FrameRateEstimator::new(10);
        assert_eq!(est.rate(), 0.0);
        assert_eq!(est.tick(Instant::now()), 0.0);
    }

    #[test]
    fn test_steady_rate() {
        let mut est = FrameRateEstimator::new(10);
        let start = Instant::now();
        for i in 0..10 {
            est.tick(start + Duration::from_millis(10 * i));
        }
        let rate = est.rate();
        assert!((rate - 100.0).abs() < 1.0, "got {rate}");
    }

    #[test]
    fn test_window_slides() {
        let mut est = FrameRateEstimator::new(4);
        let start = Instant::now();
        // Slow events first, then fast ones; the window should forget the
        // slow stretch.
        for i in 0..4 {
            est.tick(start + Duration::from_millis(100 * i));
        }
        let later = start + Duration::from_millis(400);
        for i in 0..4 {
            est.tick(later + Duration::from_millis(10 * i));
        }
        let rate = est.rate();
        assert!((rate - 100.0).abs() < 5.0, "got {rate}");
    }

    #[test]
    #[should_panic(expected = "rate window")]
    fn test_tiny_window_panics() {
        let _ = FrameRateEstimator::new(1);
    }
}
