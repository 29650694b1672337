//! Shared pipeline state.
//!
//! Everything the worker tasks share lives in one [`Runtime`] constructed in
//! `main` and passed around behind an `Arc`: the frame pool, the three
//! consumer queues, and the process-wide control atomics. Each control has
//! designated writers: the AGC and preview publish control targets, the
//! producer reads them, the signal handler flips the shutdown flag.

use crate::pool::FramePool;
use crate::queue::FrameQueue;
use camera::limits;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use tracing::info;

/// Process-wide control values, all atomic.
pub struct Controls {
    shutdown: AtomicBool,
    agc_enabled: AtomicBool,
    disk_write_enabled: AtomicBool,
    disk_file_configured: AtomicBool,
    camera_frame_rate_bits: AtomicU32,
    gain_target: AtomicI64,
    exposure_target_us: AtomicI64,
}

/// Initial control values, set from CLI/defaults before any thread starts.
#[derive(Debug, Clone)]
pub struct ControlsInit {
    /// Initial gain target.
    pub gain: i64,
    /// Initial exposure target in microseconds.
    pub exposure_us: i64,
    /// Start with automatic gain control active.
    pub agc_enabled: bool,
    /// Start with disk writes active.
    pub disk_write_enabled: bool,
    /// An output file was configured for this run.
    pub disk_file_configured: bool,
}

impl Default for ControlsInit {
    fn default() -> Self {
        Self {
            gain: limits::GAIN_MAX,
            exposure_us: limits::EXPOSURE_DEFAULT_US,
            agc_enabled: false,
            disk_write_enabled: false,
            disk_file_configured: false,
        }
    }
}

impl Controls {
    fn new(init: ControlsInit) -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            agc_enabled: AtomicBool::new(init.agc_enabled),
            disk_write_enabled: AtomicBool::new(init.disk_write_enabled),
            disk_file_configured: AtomicBool::new(init.disk_file_configured),
            camera_frame_rate_bits: AtomicU32::new(0f32.to_bits()),
            gain_target: AtomicI64::new(init.gain),
            exposure_target_us: AtomicI64::new(init.exposure_us),
        }
    }

    /// Whether shutdown has been requested.
    pub fn shutdown_flagged(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Whether the AGC loop is driving the camera.
    pub fn agc_enabled(&self) -> bool {
        self.agc_enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable the AGC loop (preview slider).
    pub fn set_agc_enabled(&self, enabled: bool) {
        self.agc_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether frames should currently be written to disk.
    pub fn disk_write_enabled(&self) -> bool {
        self.disk_write_enabled.load(Ordering::SeqCst)
    }

    /// Toggle or set disk writing (preview keystroke, free-space monitor).
    pub fn set_disk_write_enabled(&self, enabled: bool) {
        self.disk_write_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether an output file exists for this run.
    pub fn disk_file_configured(&self) -> bool {
        self.disk_file_configured.load(Ordering::SeqCst)
    }

    /// Rolling camera frame rate estimate in frames per second.
    pub fn camera_frame_rate(&self) -> f32 {
        f32::from_bits(self.camera_frame_rate_bits.load(Ordering::Relaxed))
    }

    /// Publish the frame rate estimate (producer only).
    pub fn set_camera_frame_rate(&self, fps: f32) {
        self.camera_frame_rate_bits
            .store(fps.to_bits(), Ordering::Relaxed);
    }

    /// Gain the producer should apply before the next exposure.
    pub fn gain_target(&self) -> i64 {
        self.gain_target.load(Ordering::SeqCst)
    }

    /// Publish a new gain target (AGC or preview sliders).
    pub fn set_gain_target(&self, gain: i64) {
        self.gain_target.store(gain, Ordering::SeqCst);
    }

    /// Exposure the producer should apply before the next exposure.
    pub fn exposure_target_us(&self) -> i64 {
        self.exposure_target_us.load(Ordering::SeqCst)
    }

    /// Publish a new exposure target (AGC or preview sliders).
    pub fn set_exposure_target_us(&self, exposure_us: i64) {
        self.exposure_target_us.store(exposure_us, Ordering::SeqCst);
    }
}

/// Shared state for one capture session.
pub struct Runtime {
    /// Control atomics.
    pub controls: Controls,
    /// Frame buffer pool.
    pub pool: FramePool,
    /// Lossless route to the disk writer.
    pub to_disk: FrameQueue,
    /// Lossy-latest route to the preview.
    pub to_preview: FrameQueue,
    /// Lossy-latest route to the AGC.
    pub to_agc: FrameQueue,
}

impl Runtime {
    /// Build the runtime around an allocated pool.
    pub fn new(pool: FramePool, init: ControlsInit) -> Self {
        Self {
            controls: Controls::new(init),
            pool,
            to_disk: FrameQueue::new("to-disk"),
            to_preview: FrameQueue::new("to-preview"),
            to_agc: FrameQueue::new("to-agc"),
        }
    }

    /// Request coordinated termination: flag every worker and wake every
    /// condition variable. Idempotent and callable from the signal handler.
    pub fn shutdown(&self) {
        if self.controls.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutdown requested.");
        self.to_disk.close();
        self.to_preview.close();
        self.to_agc.close();
        self.pool.shutdown();
    }

    /// Whether shutdown has been requested.
    pub fn shutting_down(&self) -> bool {
        self.controls.shutdown_flagged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_runtime() -> Runtime {
        Runtime::new(FramePool::new(4, 4, 2), ControlsInit::default())
    }

    #[test]
    fn test_defaults() {
        let runtime = test_runtime();
        assert_eq!(runtime.controls.gain_target(), limits::GAIN_MAX);
        assert_eq!(
            runtime.controls.exposure_target_us(),
            limits::EXPOSURE_DEFAULT_US
        );
        assert!(!runtime.controls.agc_enabled());
        assert!(!runtime.shutting_down());
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let runtime = test_runtime();
        runtime.shutdown();
        assert!(runtime.shutting_down());
        assert!(runtime.to_disk.pop_blocking().is_none());
        assert!(runtime.to_preview.pop_latest_blocking().is_none());
        assert!(runtime.to_agc.pop_latest_blocking().is_none());
        assert!(runtime.pool.acquire().is_none());

        // A second call is a no-op.
        runtime.shutdown();
    }

    #[test]
    fn test_frame_rate_roundtrip() {
        let runtime = test_runtime();
        runtime.controls.set_camera_frame_rate(59.94);
        assert!((runtime.controls.camera_frame_rate() - 59.94).abs() < 1e-6);
    }
}
