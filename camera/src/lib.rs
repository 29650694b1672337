//! Camera abstraction layer for the capture pipeline.
//!
//! Provides a unified interface for video devices so the pipeline can be
//! driven by a synthetic camera in tests and by real hardware in production.
//! The vendor USB stack is a collaborator behind [`VideoCamera`]; nothing in
//! this crate talks to a device directly.

pub mod limits;
pub mod select;
pub mod sim;
pub mod tag;

use std::time::Duration;
use thiserror::Error;

/// Error type for camera operations.
#[derive(Error, Debug)]
pub enum CameraError {
    /// No frame arrived within the fetch timeout; transient.
    #[error("timed out waiting for frame data")]
    Timeout,

    /// The device was unplugged or stopped responding; unrecoverable.
    #[error("camera removed")]
    Removed,

    /// A control value was rejected by the device.
    #[error("invalid control value: {0}")]
    InvalidControl(String),

    /// Device/driver error that is not one of the cases above.
    #[error("device error: {0}")]
    Device(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Identity and sensor geometry of an enumerated device.
#[derive(Debug, Clone)]
pub struct CameraDescriptor {
    /// Human-readable device name as reported by the driver.
    pub name: String,
    /// Full sensor width in pixels.
    pub max_width: usize,
    /// Full sensor height in pixels.
    pub max_height: usize,
    /// True for sensors with a Bayer color filter array.
    pub is_color: bool,
}

/// Static configuration applied once when a device is opened.
///
/// These settings are latched before streaming starts and never touched
/// again; only gain and exposure change while frames are flowing.
#[derive(Debug, Clone)]
pub struct StaticConfig {
    /// Hardware pixel binning factor; the ROI is the full sensor divided by
    /// this in each dimension.
    pub binning: usize,
    /// Vendor USB pacing parameter. Higher pushes more bandwidth at the cost
    /// of dropped frames on marginal links.
    pub bandwidth_overload: i64,
    /// Vendor high-speed readout flag.
    pub high_speed_mode: bool,
    /// White-balance red channel, only applied to color sensors.
    pub wb_red: i64,
    /// White-balance blue channel, only applied to color sensors.
    pub wb_blue: i64,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            binning: 1,
            bandwidth_overload: limits::BANDWIDTH_OVERLOAD,
            high_speed_mode: true,
            wb_red: limits::WB_RED_DEFAULT,
            wb_blue: limits::WB_BLUE_DEFAULT,
        }
    }
}

/// Trait for a streaming video device.
///
/// The producer owns the camera exclusively after initialization; other
/// tasks influence it only through published gain/exposure targets.
pub trait VideoCamera: Send {
    /// Descriptor of the opened device.
    fn descriptor(&self) -> &CameraDescriptor;

    /// Frame width in pixels after binning.
    fn width(&self) -> usize;

    /// Frame height in pixels after binning.
    fn height(&self) -> usize;

    /// Size of one raw 8-bit frame in bytes.
    fn frame_len(&self) -> usize {
        self.width() * self.height()
    }

    /// Apply a gain value. Latches at the start of the next exposure.
    fn set_gain(&mut self, gain: i64) -> CameraResult<()>;

    /// Apply an exposure time in microseconds. Latches at the start of the
    /// next exposure.
    fn set_exposure_us(&mut self, exposure_us: i64) -> CameraResult<()>;

    /// Currently applied exposure time in microseconds.
    fn exposure_us(&self) -> i64;

    /// Start streaming mode.
    fn start_stream(&mut self) -> CameraResult<()>;

    /// Stop streaming mode.
    fn stop_stream(&mut self) -> CameraResult<()>;

    /// Block until the next frame lands in `buf` or the timeout elapses.
    ///
    /// `buf` must be exactly [`frame_len`](Self::frame_len) bytes.
    fn read_frame(&mut self, buf: &mut [u8], timeout: Duration) -> CameraResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_config_defaults() {
        let config = StaticConfig::default();
        assert_eq!(config.binning, 1);
        assert_eq!(config.bandwidth_overload, 100);
        assert!(config.high_speed_mode);
    }
}
