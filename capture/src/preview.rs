//! Live preview consumer.
//!
//! Owns the view policy (lossy-latest sampling, redraw pacing, crosshair
//! overlay, histogram preparation, manual-override controls) and delegates
//! the actual window rendering to a [`PreviewSink`]. The GUI toolkit behind
//! the sink is a collaborator, not part of the pipeline.
//!
//! Two windows (preview and histogram) can be closed independently; the
//! worker only exits when both are gone or the pipeline shuts down. Closing
//! the windows never terminates the capture itself.

use crate::framerate::FrameRateEstimator;
use crate::histogram::{self, BINS};
use crate::runtime::Runtime;
use camera::limits;
use ndarray::{Array2, ArrayView2};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pixel value used for the centered crosshairs.
const CROSSHAIR_VALUE: u8 = 50;

/// Number of redraw timestamps in the preview rate window.
const PREVIEW_RATE_WINDOW: usize = 10;

/// User interaction reported by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewEvent {
    /// AGC mode slider moved.
    AgcMode(bool),
    /// Gain slider moved.
    GainSlider(i64),
    /// Exposure slider moved (microseconds).
    ExposureSlider(i64),
    /// The `s` key: toggle disk writing.
    ToggleDiskWrite,
    /// The preview window was closed.
    PreviewWindowClosed,
    /// The histogram window was closed.
    HistogramWindowClosed,
}

/// Histogram data prepared for display.
#[derive(Debug, Clone)]
pub struct HistogramView {
    /// Raw bin counts.
    pub bins: [u32; BINS],
    /// Log-y bin heights normalized to 0.0..=1.0.
    pub log_heights: [f32; BINS],
}

/// Rendering backend seam.
pub trait PreviewSink {
    /// Present the frame (already overlaid) with the given title line.
    fn show_frame(&mut self, image: ArrayView2<u8>, title: &str);

    /// Present an updated histogram.
    fn show_histogram(&mut self, view: &HistogramView);

    /// Push current control targets back to the sliders while AGC drives.
    fn sync_controls(&mut self, gain: i64, exposure_us: i64);

    /// Drain pending user events.
    fn poll_events(&mut self) -> Vec<PreviewEvent>;
}

/// Redraw pacing limits.
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Preview redraw cap in frames per second.
    pub max_preview_fps: f64,
    /// Histogram redraw cap in updates per second.
    pub max_histogram_fps: f64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_preview_fps: 30.0,
            max_histogram_fps: 4.0,
        }
    }
}

/// Run the preview until both windows close or the queue is closed.
pub fn run(runtime: &Runtime, sink: &mut dyn PreviewSink, config: &PreviewConfig) {
    info!("Preview thread running.");

    let width = runtime.pool.width();
    let height = runtime.pool.height();
    let preview_interval = Duration::from_secs_f64(1.0 / config.max_preview_fps.max(0.001));
    let histogram_interval = Duration::from_secs_f64(1.0 / config.max_histogram_fps.max(0.001));

    let mut estimator = FrameRateEstimator::new(PREVIEW_RATE_WINDOW);
    let mut preview_open = true;
    let mut histogram_open = true;
    let mut last_preview: Option<Instant> = None;
    let mut last_histogram: Option<Instant> = None;
    // Slider positions are remembered even while AGC drives, so disabling
    // AGC hands control back at the positions the user last set.
    let mut gain_slider = runtime.controls.gain_target();
    let mut exposure_slider = runtime.controls.exposure_target_us();

    while let Some(frame) = runtime.to_preview.pop_latest_blocking() {
        if !preview_open && !histogram_open {
            // Both windows were closed by the user; no need for this thread
            // anymore. The capture keeps running.
            drop(frame);
            break;
        }

        let now = Instant::now();
        {
            let data = frame.data();

            if preview_open && is_due(last_preview, preview_interval, now) {
                let rate = estimator.tick(now);
                match overlay_crosshairs(&data.pixels, width, height) {
                    Some(image) => {
                        let title = title_line(runtime, rate);
                        sink.show_frame(image.view(), &title);
                        last_preview = Some(now);
                    }
                    None => error!(
                        "Preview frame has unexpected size ({} bytes for {}x{})",
                        data.pixels.len(),
                        width,
                        height
                    ),
                }
            }

            if histogram_open && is_due(last_histogram, histogram_interval, now) {
                let bins = histogram::histogram(&data.pixels);
                let view = HistogramView {
                    log_heights: histogram::log_normalized(&bins),
                    bins,
                };
                sink.show_histogram(&view);
                last_histogram = Some(now);
            }
        }
        drop(frame);

        if runtime.controls.agc_enabled() {
            sink.sync_controls(
                runtime.controls.gain_target(),
                runtime.controls.exposure_target_us(),
            );
        }

        for event in sink.poll_events() {
            handle_event(
                runtime,
                event,
                &mut gain_slider,
                &mut exposure_slider,
                &mut preview_open,
                &mut histogram_open,
            );
        }
    }

    info!("Preview thread ending.");
}

fn handle_event(
    runtime: &Runtime,
    event: PreviewEvent,
    gain_slider: &mut i64,
    exposure_slider: &mut i64,
    preview_open: &mut bool,
    histogram_open: &mut bool,
) {
    match event {
        PreviewEvent::GainSlider(position) => {
            *gain_slider = limits::clamp_gain(position);
            if !runtime.controls.agc_enabled() {
                runtime.controls.set_gain_target(*gain_slider);
            }
        }
        PreviewEvent::ExposureSlider(position) => {
            *exposure_slider = limits::clamp_exposure_us(position);
            if !runtime.controls.agc_enabled() {
                runtime.controls.set_exposure_target_us(*exposure_slider);
            }
        }
        PreviewEvent::AgcMode(enable) => {
            if !enable && runtime.controls.agc_enabled() {
                // Hand control back at the slider positions.
                runtime.controls.set_gain_target(*gain_slider);
                runtime.controls.set_exposure_target_us(*exposure_slider);
            }
            runtime.controls.set_agc_enabled(enable);
            debug!("AGC mode set to {enable}");
        }
        PreviewEvent::ToggleDiskWrite => {
            if runtime.controls.disk_file_configured() {
                let enabled = !runtime.controls.disk_write_enabled();
                runtime.controls.set_disk_write_enabled(enabled);
                if enabled {
                    info!("Resumed writing frames to disk. Press s with preview window in focus to stop.");
                } else {
                    info!("Paused writing frames to disk. Press s with preview window in focus to resume.");
                }
            } else {
                warn!("No SER output filename was provided! Not writing to disk.");
            }
        }
        PreviewEvent::PreviewWindowClosed => {
            warn!("Preview window closed.");
            *preview_open = false;
        }
        PreviewEvent::HistogramWindowClosed => {
            warn!("Histogram window closed.");
            *histogram_open = false;
        }
    }
}

fn is_due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    last.map_or(true, |t| now.duration_since(t) >= interval)
}

fn title_line(runtime: &Runtime, preview_rate: f32) -> String {
    let camera_rate = runtime.controls.camera_frame_rate();
    if runtime.controls.disk_file_configured() {
        let disk_state = if runtime.controls.disk_write_enabled() {
            "writing frames to disk (press s to pause)"
        } else {
            "disk write paused (press s to resume)"
        };
        format!("Live Preview {preview_rate:.1} FPS ({camera_rate:.1} FPS from camera) {disk_state}")
    } else {
        format!("Live Preview {preview_rate:.1} FPS ({camera_rate:.1} FPS from camera)")
    }
}

// The overlay is drawn on a copy. Drawing on the shared buffer would corrupt
// the frame still queued for disk.
fn overlay_crosshairs(pixels: &[u8], width: usize, height: usize) -> Option<Array2<u8>> {
    let mut image = Array2::from_shape_vec((height, width), pixels.to_vec()).ok()?;
    image.row_mut(height / 2).fill(CROSSHAIR_VALUE);
    image.column_mut(width / 2).fill(CROSSHAIR_VALUE);
    Some(image)
}

/// Sink that renders nothing: used for headless runs where only the preview
/// policy (sampling, pacing, control plumbing) matters.
#[derive(Debug, Default)]
pub struct NullSink;

impl PreviewSink for NullSink {
    fn show_frame(&mut self, _image: ArrayView2<u8>, title: &str) {
        debug!("preview frame: {title}");
    }

    fn show_histogram(&mut self, _view: &HistogramView) {}

    fn sync_controls(&mut self, _gain: i64, _exposure_us: i64) {}

    fn poll_events(&mut self) -> Vec<PreviewEvent> {
        Vec::new()
    }
}
