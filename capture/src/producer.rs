//! Producer loop: pull frames from the camera and fan them out.
//!
//! The producer is the only task that touches the camera after init. Per
//! frame it applies any pending gain/exposure targets *before* fetching
//! (the device latches controls at the start of the next exposure, so
//! applying after the fetch would put one frame of lag into the AGC loop),
//! then routes the filled frame per the per-consumer policies: disk always
//! (lossless), AGC at most once per [`AGC_PERIOD`], preview only when its
//! queue is empty.

use crate::framerate::FrameRateEstimator;
use crate::pool::{FrameMut, FrameRef};
use crate::runtime::Runtime;
use camera::tag;
use camera::{CameraError, VideoCamera};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Minimum spacing between frames dispatched to the AGC.
pub const AGC_PERIOD: Duration = Duration::from_millis(100);

/// Floor for the camera fetch timeout.
pub const MIN_FETCH_TIMEOUT: Duration = Duration::from_millis(200);

/// Emit a stats line every this many frames.
pub const STATS_INTERVAL_FRAMES: u64 = 100;

/// Number of capture timestamps in the frame-rate window.
pub const FRAME_RATE_WINDOW: usize = 100;

/// Counters the producer reports back to `main`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProducerStats {
    /// Frames successfully fetched and dispatched.
    pub frames: u64,
    /// Times the pool was found empty and the producer had to wait.
    pub pool_stalls: u64,
    /// Fetches that failed with a transient error.
    pub fetch_errors: u64,
}

/// Run the producer until shutdown or device removal.
pub fn run(runtime: &Runtime, camera: &mut dyn VideoCamera) -> ProducerStats {
    let mut stats = ProducerStats::default();
    let mut estimator = FrameRateEstimator::new(FRAME_RATE_WINDOW);
    let mut applied_gain: Option<i64> = None;
    let mut applied_exposure_us: Option<i64> = None;
    let mut last_hw_index: Option<u16> = None;
    let mut agc_last_dispatch = Instant::now();

    while !runtime.shutting_down() {
        let Some(frame) = acquire_with_stall_warning(runtime, &mut stats) else {
            break;
        };

        apply_pending_controls(runtime, camera, &mut applied_gain, &mut applied_exposure_us);

        let exposure_us = applied_exposure_us.unwrap_or(0).max(0) as u64;
        let timeout = MIN_FETCH_TIMEOUT.max(Duration::from_micros(2 * exposure_us));

        match fetch(camera, frame, timeout, stats.frames, &mut last_hw_index) {
            Ok(frame) => {
                dispatch(runtime, frame, &mut agc_last_dispatch);
                stats.frames += 1;
                let rate = estimator.tick(Instant::now());
                runtime.controls.set_camera_frame_rate(rate);

                if stats.frames % STATS_INTERVAL_FRAMES == 0 {
                    info!(
                        "{:6} frames, {:6.2} FPS over last {}",
                        stats.frames, rate, FRAME_RATE_WINDOW
                    );
                    debug!(
                        "Frame counts: to-disk queue: {}, to-AGC queue: {}, to-preview queue: {}, pool: {} free frames.",
                        runtime.to_disk.len(),
                        runtime.to_agc.len(),
                        runtime.to_preview.len(),
                        runtime.pool.free_len()
                    );
                }
            }
            Err(CameraError::Timeout) => {
                warn!("Timed out waiting for frame data.");
                stats.fetch_errors += 1;
            }
            Err(CameraError::Removed) => {
                error!("Camera removed; shutting down.");
                runtime.shutdown();
                break;
            }
            Err(e) => {
                error!("Frame fetch failed: {e}");
                stats.fetch_errors += 1;
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        error!("Failed to stop camera stream: {e}");
    }
    info!("Producer done after {} frames.", stats.frames);
    stats
}

// The empty pool is the backpressure signal: warn with queue depths so the
// log shows which consumer is behind, then wait for a release.
fn acquire_with_stall_warning(runtime: &Runtime, stats: &mut ProducerStats) -> Option<FrameMut> {
    if let Some(frame) = runtime.pool.try_acquire() {
        return Some(frame);
    }
    if runtime.shutting_down() {
        return None;
    }
    stats.pool_stalls += 1;
    warn!(
        "Frame pool exhausted. To-disk queue: {}, to-AGC queue: {}, to-preview queue: {}, free: {}.",
        runtime.to_disk.len(),
        runtime.to_agc.len(),
        runtime.to_preview.len(),
        runtime.pool.free_len()
    );
    runtime.pool.acquire()
}

fn apply_pending_controls(
    runtime: &Runtime,
    camera: &mut dyn VideoCamera,
    applied_gain: &mut Option<i64>,
    applied_exposure_us: &mut Option<i64>,
) {
    let gain = runtime.controls.gain_target();
    if *applied_gain != Some(gain) {
        match camera.set_gain(gain) {
            Ok(()) => info!("Camera gain set to {gain:03}"),
            Err(e) => error!("Failed to set camera gain to {gain}: {e}"),
        }
        *applied_gain = Some(gain);
    }

    let exposure_us = runtime.controls.exposure_target_us();
    if *applied_exposure_us != Some(exposure_us) {
        match camera.set_exposure_us(exposure_us) {
            Ok(()) => info!(
                "Camera exposure time set to {:6.3} ms",
                exposure_us as f64 / 1.0e3
            ),
            Err(e) => error!("Failed to set camera exposure to {exposure_us} us: {e}"),
        }
        *applied_exposure_us = Some(exposure_us);
    }
}

// Fill the frame and stamp its metadata. On error the `FrameMut` drops here
// and the slot goes straight back to the free list.
fn fetch(
    camera: &mut dyn VideoCamera,
    mut frame: FrameMut,
    timeout: Duration,
    seq: u64,
    last_hw_index: &mut Option<u16>,
) -> Result<FrameRef, CameraError> {
    let mut data = frame.data_mut();
    camera.read_frame(&mut data.pixels, timeout)?;

    let parsed = tag::validate(&data.pixels);
    data.meta.seq = seq;
    data.meta.hw_index = parsed.index;
    data.meta.captured_at = SystemTime::now();
    data.meta.sync_valid = parsed.sync_valid;
    drop(data);

    if !parsed.sync_valid {
        error!("Frame {seq} failed sync word validation.");
    }
    if let Some(previous) = *last_hw_index {
        if !tag::index_step_ok(previous, parsed.index) {
            warn!(
                "Expected frame index {} or {} but got {}",
                previous.wrapping_add(1),
                previous.wrapping_add(2),
                parsed.index
            );
        }
    }
    *last_hw_index = Some(parsed.index);

    Ok(frame.publish())
}

fn dispatch(runtime: &Runtime, frame: FrameRef, agc_last_dispatch: &mut Instant) {
    // Dispatch a subset of frames to the AGC.
    if runtime.controls.agc_enabled() && agc_last_dispatch.elapsed() >= AGC_PERIOD {
        *agc_last_dispatch = Instant::now();
        runtime.to_agc.push(frame.clone());
    }

    // Preview gets a frame only while it has nothing pending; a rejected
    // clone is released on the spot.
    let _ = runtime.to_preview.push_if_empty(frame.clone());

    // Disk always receives the producer's own reference, last, so the frame
    // cannot hit zero references while still being routed.
    runtime.to_disk.push(frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ControlsInit;
    use crate::{pool::FramePool, runtime::Runtime};
    use camera::sim::{FaultPlan, SimCameraConfig, SimProvider, TestPattern};
    use camera::select::CameraProvider;
    use camera::StaticConfig;
    use std::sync::Arc;

    fn small_camera(faults: FaultPlan) -> Box<dyn VideoCamera> {
        let provider = SimProvider::new(vec![SimCameraConfig {
            faults,
            pattern: TestPattern::Gradient,
            ..SimCameraConfig::small()
        }]);
        let descriptor = provider.devices().remove(0);
        provider.open(&descriptor, &StaticConfig::default()).unwrap()
    }

    fn runtime_for(camera: &dyn VideoCamera, pool_size: usize) -> Arc<Runtime> {
        Arc::new(Runtime::new(
            FramePool::new(camera.width(), camera.height(), pool_size),
            ControlsInit {
                gain: 100,
                exposure_us: 500,
                ..ControlsInit::default()
            },
        ))
    }

    #[test]
    fn test_device_removal_triggers_shutdown() {
        let mut camera = small_camera(FaultPlan {
            remove_after: Some(10),
            ..FaultPlan::default()
        });
        let runtime = runtime_for(camera.as_ref(), 16);
        camera.start_stream().unwrap();

        // Drain the disk queue concurrently so the pool never runs dry.
        let drainer = {
            let runtime = Arc::clone(&runtime);
            std::thread::spawn(move || {
                let mut drained = 0u64;
                while runtime.to_disk.pop_blocking().is_some() {
                    drained += 1;
                }
                drained
            })
        };

        let stats = run(&runtime, camera.as_mut());
        assert_eq!(stats.frames, 10);
        assert!(runtime.shutting_down());
        assert_eq!(drainer.join().unwrap(), 10);
    }

    #[test]
    fn test_timeouts_release_the_slot() {
        let mut camera = small_camera(FaultPlan {
            timeout_at: vec![0, 1, 2],
            remove_after: Some(5),
            ..FaultPlan::default()
        });
        let runtime = runtime_for(camera.as_ref(), 8);
        camera.start_stream().unwrap();

        let drainer = {
            let runtime = Arc::clone(&runtime);
            std::thread::spawn(move || while runtime.to_disk.pop_blocking().is_some() {})
        };

        let stats = run(&runtime, camera.as_mut());
        assert_eq!(stats.frames, 5);
        assert_eq!(stats.fetch_errors, 3);
        drainer.join().unwrap();
        // Every slot is back once the undrained preview sample is let go:
        // nothing leaked on the timeout path.
        runtime.to_preview.clear();
        assert_eq!(runtime.pool.free_len(), 8);
    }

    #[test]
    fn test_preview_queue_holds_at_most_one() {
        let mut camera = small_camera(FaultPlan {
            remove_after: Some(20),
            ..FaultPlan::default()
        });
        let runtime = runtime_for(camera.as_ref(), 32);
        camera.start_stream().unwrap();

        let drainer = {
            let runtime = Arc::clone(&runtime);
            std::thread::spawn(move || while runtime.to_disk.pop_blocking().is_some() {})
        };

        // No preview consumer is running, so the queue stays at depth one.
        let stats = run(&runtime, camera.as_mut());
        assert_eq!(stats.frames, 20);
        assert!(runtime.to_preview.len() <= 1);
        drainer.join().unwrap();
    }

    #[test]
    fn test_agc_dispatch_rate_limited() {
        let mut camera = small_camera(FaultPlan {
            remove_after: Some(50),
            ..FaultPlan::default()
        });
        let runtime = Arc::new(Runtime::new(
            FramePool::new(camera.width(), camera.height(), 64),
            ControlsInit {
                agc_enabled: true,
                ..ControlsInit::default()
            },
        ));
        camera.start_stream().unwrap();

        let drainer = {
            let runtime = Arc::clone(&runtime);
            std::thread::spawn(move || while runtime.to_disk.pop_blocking().is_some() {})
        };

        // 50 frames at 2 kHz arrive in ~25 ms. Dispatch is limited to one
        // per 100 ms period, so nearly all frames bypass the AGC queue even
        // if the test machine stalls for a couple of periods.
        let stats = run(&runtime, camera.as_mut());
        assert_eq!(stats.frames, 50);
        assert!(runtime.to_agc.len() <= 3);
        drainer.join().unwrap();
    }
}
