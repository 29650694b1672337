//! Automatic gain control loop.
//!
//! The AGC samples the stream (lossy-latest), builds a full-frame histogram,
//! and steps the published gain target: down when too many pixels saturate,
//! up when the brightest pixel falls below a floor. The dead band between
//! the two thresholds is what makes the loop settle instead of hunting.
//! Exposure stays at its manual target under this law.

use crate::histogram::{histogram, max_pixel_value, percentile_value, BINS};
use crate::runtime::Runtime;
use camera::limits;
use tracing::{debug, info};

/// Control-law constants.
#[derive(Debug, Clone)]
pub struct AgcConfig {
    /// Percentile reported in the diagnostics line.
    pub percentile: f64,
    /// Saturated-pixel count above which gain steps down.
    pub max_saturated_pixels: u32,
    /// Brightest-pixel floor below which gain steps up.
    pub min_max_pixel_value: u8,
    /// Gain step per adjustment.
    pub gain_step: i64,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            percentile: 0.99,
            max_saturated_pixels: 10,
            min_max_pixel_value: 220,
            gain_step: 20,
        }
    }
}

/// One step of the control law: the next gain target for a histogram.
pub fn next_gain(hist: &[u32; BINS], current: i64, config: &AgcConfig) -> i64 {
    if hist[BINS - 1] > config.max_saturated_pixels {
        limits::clamp_gain(current - config.gain_step)
    } else if max_pixel_value(hist) < config.min_max_pixel_value {
        limits::clamp_gain(current + config.gain_step)
    } else {
        current
    }
}

/// Run the AGC until its queue is closed.
pub fn run(runtime: &Runtime, config: &AgcConfig) {
    info!("AGC thread running.");

    while let Some(frame) = runtime.to_agc.pop_latest_blocking() {
        let hist = {
            let data = frame.data();
            histogram(&data.pixels)
        };
        // The histogram is all we need; release the frame before the math.
        drop(frame);

        let percentile = percentile_value(&hist, config.percentile);
        let brightest = max_pixel_value(&hist);
        debug!(
            "{:.1}-th percentile value: {}, max pixel value: {}",
            100.0 * config.percentile,
            percentile,
            brightest
        );

        let current = runtime.controls.gain_target();
        let next = next_gain(&hist, current, config);
        if next != current {
            runtime.controls.set_gain_target(next);
            info!("AGC changed camera gain target to {next:03}");
        }
    }

    info!("AGC thread ending.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::FramePool;
    use crate::runtime::{ControlsInit, Runtime};

    // Flat-scene brightness model matching the synthetic camera: every pixel
    // reads flux * 10^(gain / 200), clamped to 8 bits.
    fn flat_histogram(gain: i64, flux: f64, pixels: u32) -> [u32; BINS] {
        let dn = (flux * 10f64.powf(gain as f64 / 200.0))
            .round()
            .clamp(0.0, 255.0) as usize;
        let mut hist = [0u32; BINS];
        hist[dn] = pixels;
        hist
    }

    #[test]
    fn test_saturated_scene_steps_down_to_stability() {
        let config = AgcConfig::default();
        let mut gain = limits::GAIN_MAX;
        let mut steps = Vec::new();
        for _ in 0..64 {
            let hist = flat_histogram(gain, 2.0, 10_000);
            let next = next_gain(&hist, gain, &config);
            if next == gain {
                break;
            }
            steps.push(next);
            gain = next;
        }

        // Monotonic descent to a stable point that satisfies both bounds.
        assert!(steps.windows(2).all(|w| w[1] < w[0]));
        let hist = flat_histogram(gain, 2.0, 10_000);
        assert!(hist[255] <= config.max_saturated_pixels);
        assert!(max_pixel_value(&hist) >= config.min_max_pixel_value);
        assert_eq!(next_gain(&hist, gain, &config), gain);
    }

    #[test]
    fn test_dark_scene_steps_up_to_same_point() {
        let config = AgcConfig::default();
        let mut gain = limits::GAIN_MIN;
        for _ in 0..64 {
            let hist = flat_histogram(gain, 2.0, 10_000);
            let next = next_gain(&hist, gain, &config);
            if next == gain {
                break;
            }
            assert!(next > gain);
            gain = next;
        }
        let hist = flat_histogram(gain, 2.0, 10_000);
        assert!(hist[255] <= config.max_saturated_pixels);
        assert!(max_pixel_value(&hist) >= config.min_max_pixel_value);
    }

    #[test]
    fn test_all_zero_frame_walks_to_the_clamp_and_stays() {
        let config = AgcConfig::default();
        let hist = histogram(&vec![0u8; 4096]);
        assert_eq!(percentile_value(&hist, config.percentile), 0);

        let mut gain = 100;
        let mut previous = gain;
        for _ in 0..64 {
            gain = next_gain(&hist, gain, &config);
            assert!(gain >= previous, "gain must move monotonically");
            previous = gain;
        }
        // Idempotent once clamped.
        assert_eq!(gain, limits::GAIN_MAX);
        assert_eq!(next_gain(&hist, gain, &config), gain);
    }

    #[test]
    fn test_saturated_frame_walks_to_the_floor() {
        let config = AgcConfig::default();
        let hist = histogram(&vec![255u8; 4096]);

        let mut gain = 100;
        for _ in 0..64 {
            let next = next_gain(&hist, gain, &config);
            assert!(next <= gain);
            gain = next;
        }
        assert_eq!(gain, limits::GAIN_MIN);
        assert_eq!(next_gain(&hist, gain, &config), gain);
    }

    #[test]
    fn test_worker_consumes_latest_and_publishes() {
        let pool = FramePool::new(64, 32, 4);
        let runtime = std::sync::Arc::new(Runtime::new(
            pool,
            ControlsInit {
                gain: 300,
                agc_enabled: true,
                ..ControlsInit::default()
            },
        ));

        // Two frames queued before the worker starts: a dark one then a
        // fully saturated one. The worker must only see the latest.
        let mut dark = runtime.pool.acquire().unwrap();
        dark.data_mut().pixels.fill(0);
        runtime.to_agc.push(dark.publish());
        let mut bright = runtime.pool.acquire().unwrap();
        bright.data_mut().pixels.fill(255);
        runtime.to_agc.push(bright.publish());

        let worker = {
            let runtime = std::sync::Arc::clone(&runtime);
            std::thread::spawn(move || run(&runtime, &AgcConfig::default()))
        };

        // A saturated latest frame steps the target down once; a dark latest
        // frame would have stepped it up instead.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while runtime.controls.gain_target() != 280 {
            assert!(std::time::Instant::now() < deadline, "AGC never adjusted");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        runtime.to_agc.close();
        worker.join().unwrap();
        assert_eq!(runtime.pool.free_len(), 4);
    }
}
